//! The stateful dependency resolver.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mesh_primitives::{AgentId, CapabilityDescriptor, Error, Result};
use tracing::{debug, info};

use crate::matcher;
use crate::proxy::{DependencySlot, ProxyFactory, ResolvedDependency};
use crate::snapshot::TopologySnapshot;

/// Consumer of topology snapshots, implemented by the resolver and fed by
/// the health monitor's heartbeat loop.
pub trait SnapshotSink: Send + Sync {
    /// Applies a new topology snapshot.
    fn apply_snapshot(&self, snapshot: TopologySnapshot);
}

struct ResolverState {
    snapshot: Arc<TopologySnapshot>,
    /// One complete slot array per local capability, swapped wholesale.
    slots: HashMap<String, Arc<Vec<DependencySlot>>>,
}

/// Resolves the declared dependencies of every local capability against the
/// last-applied topology snapshot.
///
/// Snapshot application is the only writer and replaces whole slot arrays
/// in a single critical section; call handlers clone the `Arc` for the
/// capability they serve and observe either the previous pass or the next
/// one, never a mixture.
pub struct DependencyResolver {
    local_agent: AgentId,
    locals: Vec<CapabilityDescriptor>,
    factory: Arc<dyn ProxyFactory>,
    state: RwLock<ResolverState>,
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("local_agent", &self.local_agent)
            .field("locals", &self.locals)
            .finish_non_exhaustive()
    }
}

impl DependencyResolver {
    /// Creates a resolver for the given local capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] when a capability is owned by a
    /// different agent or declared twice, and [`Error::InvalidDependency`]
    /// for a directly self-referential dependency (a capability requiring
    /// its own name cannot be routed safely).
    pub fn new(
        local_agent: AgentId,
        locals: Vec<CapabilityDescriptor>,
        factory: Arc<dyn ProxyFactory>,
    ) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for capability in &locals {
            if capability.agent_id() != local_agent {
                return Err(Error::InvalidCapability {
                    reason: format!(
                        "capability `{}` is owned by {}, not the local agent",
                        capability.capability(),
                        capability.agent_id()
                    ),
                });
            }
            if !seen.insert(capability.capability().to_owned()) {
                return Err(Error::InvalidCapability {
                    reason: format!(
                        "capability `{}` declared more than once",
                        capability.capability()
                    ),
                });
            }
            for spec in capability.dependencies() {
                if spec.capability() == capability.capability() {
                    return Err(Error::InvalidDependency {
                        reason: format!(
                            "capability `{}` cannot depend directly on itself",
                            capability.capability()
                        ),
                    });
                }
            }
        }

        let slots = locals
            .iter()
            .map(|capability| {
                let absent: Vec<DependencySlot> = capability
                    .dependencies()
                    .iter()
                    .map(|spec| DependencySlot::Absent {
                        capability: spec.capability().to_owned(),
                    })
                    .collect();
                (capability.capability().to_owned(), Arc::new(absent))
            })
            .collect();

        Ok(Self {
            local_agent,
            locals,
            factory,
            state: RwLock::new(ResolverState {
                snapshot: Arc::new(TopologySnapshot::default()),
                slots,
            }),
        })
    }

    /// Returns the local agent identifier.
    #[must_use]
    pub const fn local_agent(&self) -> AgentId {
        self.local_agent
    }

    /// Returns the local capability descriptors.
    #[must_use]
    pub fn local_capabilities(&self) -> &[CapabilityDescriptor] {
        &self.locals
    }

    /// Returns the last-applied snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned by a previous panic.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.state.read().expect("resolver state poisoned").snapshot)
    }

    /// Returns the current slot array for a local capability.
    ///
    /// The array always covers every declared `dep_index`; unresolved
    /// indices hold [`DependencySlot::Absent`], never a gap.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock has been poisoned by a previous panic.
    #[must_use]
    pub fn slots_for(&self, capability: &str) -> Option<Arc<Vec<DependencySlot>>> {
        self.state
            .read()
            .expect("resolver state poisoned")
            .slots
            .get(capability)
            .cloned()
    }

    fn recompute(&self, snapshot: &TopologySnapshot) -> HashMap<String, Arc<Vec<DependencySlot>>> {
        let candidates = snapshot.routable_capabilities();
        let previous = {
            let state = self.state.read().expect("resolver state poisoned");
            state.slots.clone()
        };

        let mut next = HashMap::with_capacity(self.locals.len());
        for capability in &self.locals {
            let prior = previous.get(capability.capability());
            let slots: Vec<DependencySlot> = capability
                .dependencies()
                .iter()
                .enumerate()
                .map(|(dep_index, spec)| {
                    let resolution = matcher::resolve(spec, &candidates);
                    match resolution {
                        None => {
                            if prior
                                .and_then(|p| p.get(dep_index))
                                .is_some_and(DependencySlot::is_resolved)
                            {
                                info!(
                                    capability = capability.capability(),
                                    dep_index,
                                    dependency = spec.capability(),
                                    "dependency became unresolved"
                                );
                            }
                            DependencySlot::Absent {
                                capability: spec.capability().to_owned(),
                            }
                        }
                        Some(resolution) => {
                            let target = resolution.descriptor();
                            let Some(owner) = snapshot.agent(target.agent_id()) else {
                                return DependencySlot::Absent {
                                    capability: spec.capability().to_owned(),
                                };
                            };
                            let endpoint = owner.endpoint().clone();

                            // Reuse the previous resolution when nothing
                            // observable changed, keeping proxy identity
                            // stable across passes.
                            if let Some(DependencySlot::Resolved(existing)) =
                                prior.and_then(|p| p.get(dep_index))
                            {
                                if existing.target_agent_id() == target.agent_id()
                                    && existing.target_endpoint() == &endpoint
                                    && existing.matched_tags() == resolution.matched_tags()
                                {
                                    return DependencySlot::Resolved(Arc::clone(existing));
                                }
                            }

                            debug!(
                                capability = capability.capability(),
                                dep_index,
                                dependency = spec.capability(),
                                target = %target.agent_id(),
                                "dependency rewired"
                            );
                            let proxy = self.factory.proxy_for(target, &endpoint);
                            DependencySlot::Resolved(Arc::new(ResolvedDependency::new(
                                dep_index,
                                spec.capability(),
                                target.agent_id(),
                                endpoint,
                                resolution.matched_tags().clone(),
                                proxy,
                            )))
                        }
                    }
                })
                .collect();
            next.insert(capability.capability().to_owned(), Arc::new(slots));
        }
        next
    }
}

impl SnapshotSink for DependencyResolver {
    fn apply_snapshot(&self, snapshot: TopologySnapshot) {
        let next = self.recompute(&snapshot);
        let mut state = self.state.write().expect("resolver state poisoned");
        state.snapshot = Arc::new(snapshot);
        state.slots = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mesh_primitives::{
        AgentDescriptor, AgentDescriptorBuilder, CapabilityDescriptorBuilder, DependencySpec,
        Endpoint, HealthState, Scheme, TagExpr,
    };
    use mesh_trace::{ForwardedHeaders, TraceContext};
    use serde_json::Value;

    use crate::proxy::{CallResult, CapabilityProxy};

    struct StaticProxy {
        target: AgentId,
    }

    #[async_trait]
    impl CapabilityProxy for StaticProxy {
        fn target(&self) -> AgentId {
            self.target
        }

        async fn invoke(
            &self,
            args: Value,
            _trace: &TraceContext,
            _forwarded: &ForwardedHeaders,
        ) -> CallResult<Value> {
            Ok(args)
        }
    }

    struct CountingFactory {
        built: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                built: AtomicUsize::new(0),
            })
        }
    }

    impl ProxyFactory for CountingFactory {
        fn proxy_for(
            &self,
            descriptor: &CapabilityDescriptor,
            _endpoint: &Endpoint,
        ) -> Arc<dyn CapabilityProxy> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Arc::new(StaticProxy {
                target: descriptor.agent_id(),
            })
        }
    }

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new(Scheme::Http, "127.0.0.1", port).expect("endpoint")
    }

    fn agent(name: &str, port: u16) -> AgentDescriptor {
        AgentDescriptor::builder(AgentId::random())
            .name(name)
            .and_then(|b| b.version("1.0"))
            .map(|b| b.endpoint(endpoint(port)))
            .and_then(AgentDescriptorBuilder::build)
            .expect("agent")
            .with_health_state(HealthState::Healthy)
    }

    fn provider(capability: &str, owner: AgentId, tags: &[&str]) -> CapabilityDescriptor {
        let mut builder = CapabilityDescriptor::builder(capability, owner)
            .function_name("f")
            .and_then(|b| b.version("1.0"))
            .expect("builder");
        for tag in tags {
            builder = builder.add_tag(*tag).expect("tag");
        }
        builder.build().expect("provider")
    }

    fn consumer(owner: AgentId, dependencies: &[&str]) -> CapabilityDescriptor {
        let mut builder = CapabilityDescriptor::builder("consumer", owner)
            .function_name("run")
            .and_then(|b| b.version("1.0"))
            .expect("builder");
        for dependency in dependencies {
            builder = builder.add_dependency(DependencySpec::new(*dependency).expect("spec"));
        }
        builder.build().expect("consumer")
    }

    #[test]
    fn positional_alignment_under_partial_resolution() {
        // Only a schedule_lookup provider runs; dep_index=0 must be absent
        // and dep_index=1 resolved, never the reverse.
        let local = AgentId::random();
        let local_agent = AgentDescriptor::builder(local)
            .name("local")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.endpoint(endpoint(7000)))
            .and_then(AgentDescriptorBuilder::build)
            .expect("agent")
            .with_health_state(HealthState::Healthy);

        let schedule_agent = agent("schedule", 7001);
        let schedule = provider("schedule_lookup", schedule_agent.agent_id(), &[]);
        let resolver = DependencyResolver::new(
            local,
            vec![consumer(local, &["student_lookup", "schedule_lookup"])],
            CountingFactory::new(),
        )
        .expect("resolver");

        resolver.apply_snapshot(TopologySnapshot::new(
            1,
            vec![local_agent, schedule_agent.clone()],
            vec![schedule],
        ));

        let slots = resolver.slots_for("consumer").expect("slots");
        assert_eq!(slots.len(), 2);
        assert!(!slots[0].is_resolved());
        assert_eq!(slots[0].capability(), "student_lookup");
        assert!(slots[1].is_resolved());
        match &slots[1] {
            DependencySlot::Resolved(resolved) => {
                assert_eq!(resolved.target_agent_id(), schedule_agent.agent_id());
                assert_eq!(resolved.dep_index(), 1);
            }
            DependencySlot::Absent { .. } => panic!("dep_index 1 should resolve"),
        }
    }

    #[test]
    fn every_index_reported_before_any_snapshot() {
        let local = AgentId::random();
        let resolver = DependencyResolver::new(
            local,
            vec![consumer(local, &["a", "b", "c"])],
            CountingFactory::new(),
        )
        .expect("resolver");

        let slots = resolver.slots_for("consumer").expect("slots");
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|slot| !slot.is_resolved()));
    }

    #[test]
    fn rewires_when_provider_changes_and_reuses_when_not() {
        let local = AgentId::random();
        let local_agent = AgentDescriptor::builder(local)
            .name("local")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.endpoint(endpoint(7000)))
            .and_then(AgentDescriptorBuilder::build)
            .expect("agent")
            .with_health_state(HealthState::Healthy);

        let first = agent("first", 7001);
        let factory = CountingFactory::new();
        let resolver = DependencyResolver::new(
            local,
            vec![consumer(local, &["lookup"])],
            Arc::clone(&factory) as Arc<dyn ProxyFactory>,
        )
        .expect("resolver");

        resolver.apply_snapshot(TopologySnapshot::new(
            1,
            vec![local_agent.clone(), first.clone()],
            vec![provider("lookup", first.agent_id(), &[])],
        ));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);

        // Identical topology: the resolved Arc is reused, no new proxy.
        resolver.apply_snapshot(TopologySnapshot::new(
            2,
            vec![local_agent.clone(), first.clone()],
            vec![provider("lookup", first.agent_id(), &[])],
        ));
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);

        // Provider replaced: a new proxy is built and the slot swaps.
        let second = agent("second", 7002);
        resolver.apply_snapshot(TopologySnapshot::new(
            3,
            vec![local_agent, second.clone()],
            vec![provider("lookup", second.agent_id(), &[])],
        ));
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);
        let slots = resolver.slots_for("consumer").expect("slots");
        match &slots[0] {
            DependencySlot::Resolved(resolved) => {
                assert_eq!(resolved.target_agent_id(), second.agent_id());
            }
            DependencySlot::Absent { .. } => panic!("should stay resolved"),
        }
    }

    #[test]
    fn offline_provider_cascades_to_unresolved() {
        let local = AgentId::random();
        let local_agent = AgentDescriptor::builder(local)
            .name("local")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.endpoint(endpoint(7000)))
            .and_then(AgentDescriptorBuilder::build)
            .expect("agent")
            .with_health_state(HealthState::Healthy);
        let remote = agent("remote", 7001);
        let lookup = provider("lookup", remote.agent_id(), &[]);

        let resolver = DependencyResolver::new(
            local,
            vec![consumer(local, &["lookup"])],
            CountingFactory::new(),
        )
        .expect("resolver");

        resolver.apply_snapshot(TopologySnapshot::new(
            1,
            vec![local_agent.clone(), remote.clone()],
            vec![lookup.clone()],
        ));
        assert!(resolver.slots_for("consumer").expect("slots")[0].is_resolved());

        // Degraded owners remain routable.
        resolver.apply_snapshot(TopologySnapshot::new(
            2,
            vec![
                local_agent.clone(),
                remote.with_health_state(HealthState::Degraded),
            ],
            vec![lookup.clone()],
        ));
        assert!(resolver.slots_for("consumer").expect("slots")[0].is_resolved());

        // Offline owners are excluded, cascading into an absent slot.
        resolver.apply_snapshot(TopologySnapshot::new(
            3,
            vec![local_agent, remote.with_health_state(HealthState::Offline)],
            vec![lookup],
        ));
        assert!(!resolver.slots_for("consumer").expect("slots")[0].is_resolved());
    }

    #[test]
    fn tag_expression_drives_selection() {
        let local = AgentId::random();
        let local_agent = AgentDescriptor::builder(local)
            .name("local")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.endpoint(endpoint(7000)))
            .and_then(AgentDescriptorBuilder::build)
            .expect("agent")
            .with_health_state(HealthState::Healthy);
        let python_agent = agent("python", 7001);
        let typescript_agent = agent("typescript", 7002);

        let spec = DependencySpec::new("math_operations")
            .expect("spec")
            .with_tags(
                TagExpr::new()
                    .tag("addition")
                    .and_then(|e| e.any_of([vec!["python"], vec!["+typescript"]]))
                    .expect("tags"),
            );
        let dependent = CapabilityDescriptor::builder("calc", local)
            .function_name("calc")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.add_dependency(spec))
            .and_then(CapabilityDescriptorBuilder::build)
            .expect("dependent");

        let resolver =
            DependencyResolver::new(local, vec![dependent], CountingFactory::new())
                .expect("resolver");

        resolver.apply_snapshot(TopologySnapshot::new(
            1,
            vec![local_agent, python_agent.clone(), typescript_agent],
            vec![
                provider(
                    "math_operations",
                    python_agent.agent_id(),
                    &["math", "addition", "python"],
                ),
                provider(
                    "math_operations",
                    AgentId::random(),
                    &["math", "addition", "typescript"],
                ),
            ],
        ));

        let slots = resolver.slots_for("calc").expect("slots");
        match &slots[0] {
            DependencySlot::Resolved(resolved) => {
                assert_eq!(resolved.target_agent_id(), python_agent.agent_id());
                assert!(resolved.matched_tags().contains("python"));
                assert_eq!(resolved.matched_tags(), &expected_tags());
            }
            DependencySlot::Absent { .. } => panic!("should resolve"),
        }
    }

    fn expected_tags() -> BTreeSet<String> {
        ["addition", "python"].iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn direct_self_reference_rejected() {
        let local = AgentId::random();
        let looped = CapabilityDescriptor::builder("loop", local)
            .function_name("f")
            .and_then(|b| b.version("1.0"))
            .map(|b| b.add_dependency(DependencySpec::new("loop").expect("spec")))
            .and_then(CapabilityDescriptorBuilder::build)
            .expect("descriptor");

        let err = DependencyResolver::new(local, vec![looped], CountingFactory::new())
            .expect_err("self reference should fail");
        assert!(matches!(err, Error::InvalidDependency { .. }));
    }

    #[test]
    fn foreign_capability_rejected() {
        let err = DependencyResolver::new(
            AgentId::random(),
            vec![consumer(AgentId::random(), &[])],
            CountingFactory::new(),
        )
        .expect_err("foreign owner should fail");
        assert!(matches!(err, Error::InvalidCapability { .. }));
    }
}
