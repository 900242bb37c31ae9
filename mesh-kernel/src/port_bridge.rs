//! Bridge between the listener's bound port and the advertised endpoint.
//!
//! Agents often register with a configured port before their listener has
//! actually bound one (port `0` asks the OS to pick). The bridge lets the
//! listener report the real port once, and lets the health monitor wait a
//! bounded time for a divergent port so it can issue a single endpoint
//! correction to the registry.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
struct BridgeState {
    configured: u16,
    actual: Option<u16>,
    signalled: bool,
    consumed: bool,
}

/// Edge-triggered, consume-once port publication channel.
#[derive(Debug)]
pub struct PortBridge {
    state: Mutex<BridgeState>,
    notify: Notify,
}

impl PortBridge {
    /// Creates a bridge for an agent configured to advertise `configured`.
    #[must_use]
    pub fn new(configured: u16) -> Self {
        Self {
            state: Mutex::new(BridgeState {
                configured,
                actual: None,
                signalled: false,
                consumed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Returns the port the agent was configured with.
    #[must_use]
    pub fn configured_port(&self) -> u16 {
        self.lock().configured
    }

    /// Returns the port the listener reported, if it has.
    #[must_use]
    pub fn actual_port(&self) -> Option<u16> {
        self.lock().actual
    }

    /// Reports the port the listener actually bound.
    ///
    /// The divergence signal fires at most once, on the first report that
    /// differs from the configured port. Re-reporting the same port is a
    /// no-op, so restarted listeners cannot retrigger a correction.
    pub fn report_bound(&self, port: u16) {
        let fire = {
            let mut state = self.lock();
            if state.actual == Some(port) {
                return;
            }
            state.actual = Some(port);
            if port != state.configured && !state.signalled {
                state.signalled = true;
                true
            } else {
                false
            }
        };

        if fire {
            debug!(port, "listener bound a divergent port");
            self.notify.notify_one();
        }
    }

    /// Waits up to `timeout` for a divergent bound port.
    ///
    /// Returns `Some(port)` exactly once per bridge: the first caller that
    /// observes the signal consumes it, and every later call (or a timeout,
    /// or a report matching the configured port) yields `None`.
    pub async fn wait_divergent(&self, timeout: Duration) -> Option<u16> {
        let wait = async {
            loop {
                {
                    let mut state = self.lock();
                    if state.consumed {
                        return None;
                    }
                    if state.signalled {
                        state.consumed = true;
                        return state.actual;
                    }
                }
                self.notify.notified().await;
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        // A poisoned bridge mutex means a panic mid-report; the state is a
        // handful of scalars and is still coherent.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
