use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mesh_kernel::{
    CallContext, EndpointUpdateRequest, HealthThresholds, HeartbeatConfig, HeartbeatRequest,
    HeartbeatResponse, KernelConfig, MeshKernel, MeshRegistry, RegisterRequest, RegisterResponse,
    RegistryResult, TopologyUpdate,
};
use mesh_primitives::{
    AgentDescriptor, AgentDescriptorBuilder, AgentId, CapabilityDescriptor, DependencySpec,
    Endpoint, HealthState, Scheme,
};
use mesh_trace::TraceContext;
use serde_json::{Value, json};

#[derive(Default)]
struct RegistryState {
    version: u64,
    agents: HashMap<AgentId, AgentDescriptor>,
    capabilities: Vec<CapabilityDescriptor>,
    deregistrations: usize,
}

#[derive(Default)]
struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    fn seed(&self, agent: AgentDescriptor, capabilities: Vec<CapabilityDescriptor>) {
        let mut state = self.state.lock().unwrap();
        state.agents.insert(agent.agent_id(), agent);
        state.capabilities.extend(capabilities);
        state.version += 1;
    }

    fn deregistrations(&self) -> usize {
        self.state.lock().unwrap().deregistrations
    }
}

#[async_trait]
impl MeshRegistry for InMemoryRegistry {
    async fn register(&self, request: &RegisterRequest) -> RegistryResult<RegisterResponse> {
        let mut state = self.state.lock().unwrap();
        let agent_id = request.agent.agent_id();
        state
            .agents
            .insert(agent_id, request.agent.with_health_state(HealthState::Healthy));
        state.capabilities.retain(|c| c.agent_id() != agent_id);
        state.capabilities.extend(request.capabilities.iter().cloned());
        state.version += 1;
        Ok(RegisterResponse {
            success: true,
            agent_id,
            message: String::new(),
        })
    }

    async fn heartbeat(&self, request: &HeartbeatRequest) -> RegistryResult<HeartbeatResponse> {
        let state = self.state.lock().unwrap();
        Ok(HeartbeatResponse {
            success: true,
            needs_register: !state.agents.contains_key(&request.agent_id),
            timestamp: Utc::now(),
            topology: Some(TopologyUpdate {
                version: state.version,
                agents: state.agents.values().cloned().collect(),
                capabilities: state.capabilities.clone(),
            }),
        })
    }

    async fn update_endpoint(&self, request: &EndpointUpdateRequest) -> RegistryResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(agent) = state.agents.get_mut(&request.agent_id) {
            *agent = agent.with_endpoint(request.endpoint.clone());
        }
        Ok(())
    }

    async fn deregister(&self, agent_id: AgentId) -> RegistryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.agents.remove(&agent_id);
        state.capabilities.retain(|c| c.agent_id() != agent_id);
        state.deregistrations += 1;
        state.version += 1;
        Ok(())
    }
}

fn endpoint(port: u16) -> Endpoint {
    Endpoint::new(Scheme::Http, "localhost", port).unwrap()
}

fn agent(name: &str, port: u16) -> AgentDescriptor {
    AgentDescriptor::builder(AgentId::random())
        .name(name)
        .and_then(|b| b.version("1.0.0"))
        .map(|b| b.endpoint(endpoint(port)))
        .and_then(AgentDescriptorBuilder::build)
        .unwrap()
}

fn capability(name: &str, owner: AgentId, deps: &[&str]) -> CapabilityDescriptor {
    let mut builder = CapabilityDescriptor::builder(name, owner)
        .function_name(name)
        .and_then(|b| b.version("1.0"))
        .unwrap();
    for dep in deps {
        builder = builder.add_dependency(DependencySpec::new(*dep).unwrap());
    }
    builder.build().unwrap()
}

fn fast_config() -> KernelConfig {
    KernelConfig::new("http://registry.test:7000").with_heartbeat(HeartbeatConfig::new(
        Duration::from_millis(10),
        Duration::from_millis(5),
        Duration::from_millis(20),
        HealthThresholds::new(1, 2),
        Duration::from_millis(10),
        2,
    ))
}

#[tokio::test]
async fn kernel_joins_mesh_and_keeps_slots_positionally_aligned() {
    let registry = Arc::new(InMemoryRegistry::default());

    // Only schedule_lookup has a provider; student_lookup stays absent.
    let schedules = agent("schedules", 59901);
    registry.seed(
        schedules.clone(),
        vec![capability("schedule_lookup", schedules.agent_id(), &[])],
    );

    let reporter = agent("reporter", 59900);
    let report = capability(
        "report",
        reporter.agent_id(),
        &["student_lookup", "schedule_lookup"],
    );

    let kernel = MeshKernel::builder(reporter, fast_config())
        .registry(Arc::clone(&registry) as Arc<dyn MeshRegistry>)
        .capability(
            report,
            Arc::new(|_args: Value, ctx: CallContext| async move {
                Ok(json!({
                    "students": ctx.dependency(0).unwrap().is_resolved(),
                    "schedules": ctx.dependency(1).unwrap().is_resolved(),
                }))
            }),
        )
        .build()
        .unwrap();

    kernel.activate().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(kernel.health().state, HealthState::Healthy);

    let result = kernel
        .handle_call("report", Value::Null, &[])
        .await
        .unwrap();
    assert_eq!(result, json!({"students": false, "schedules": true}));

    kernel.shutdown().unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(registry.deregistrations() >= 1);
    assert_eq!(kernel.health().state, HealthState::Deregistered);
}

#[tokio::test]
async fn fan_out_hops_share_the_trace_but_not_spans() {
    let registry = Arc::new(InMemoryRegistry::default());
    let local = agent("fanout", 59910);
    let local_id = local.agent_id();

    let seen = Arc::new(Mutex::new(Vec::<TraceContext>::new()));

    let record = |seen: Arc<Mutex<Vec<TraceContext>>>| {
        move |args: Value, ctx: CallContext| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(*ctx.trace());
                Ok(args)
            }
        }
    };

    let kernel = MeshKernel::builder(local, fast_config())
        .registry(Arc::clone(&registry) as Arc<dyn MeshRegistry>)
        .capability(
            capability("left", local_id, &[]),
            Arc::new(record(Arc::clone(&seen))),
        )
        .capability(
            capability("right", local_id, &[]),
            Arc::new(record(Arc::clone(&seen))),
        )
        .capability(
            capability("fan", local_id, &["left", "right"]),
            Arc::new(|args: Value, ctx: CallContext| async move {
                ctx.call_dependency(0, args.clone()).await?;
                ctx.call_dependency(1, args).await?;
                Ok(Value::Null)
            }),
        )
        .build()
        .unwrap();

    kernel.activate().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let root = TraceContext::new_root();
    let headers: Vec<(String, String)> = root
        .to_headers()
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect();
    kernel
        .handle_call("fan", Value::Null, &headers)
        .await
        .unwrap();

    let recorded = seen.lock().unwrap().clone();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].trace_id(), root.trace_id());
    assert_eq!(recorded[1].trace_id(), root.trace_id());
    assert_eq!(recorded[0].parent_span_id(), Some(root.span_id()));
    assert_eq!(recorded[1].parent_span_id(), Some(root.span_id()));
    assert_ne!(recorded[0].span_id(), recorded[1].span_id());

    kernel.shutdown().unwrap();
}

#[tokio::test]
async fn forgotten_agents_re_register_on_demand() {
    let registry = Arc::new(InMemoryRegistry::default());
    let worker = agent("worker", 59920);
    let worker_id = worker.agent_id();

    let kernel = MeshKernel::builder(worker, fast_config())
        .registry(Arc::clone(&registry) as Arc<dyn MeshRegistry>)
        .capability(
            capability("noop", worker_id, &[]),
            Arc::new(|args: Value, _ctx: CallContext| async move { Ok(args) }),
        )
        .build()
        .unwrap();

    kernel.activate().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Simulate a registry restart that lost this agent; the next heartbeat
    // carries needs_register and the kernel re-registers.
    registry
        .state
        .lock()
        .unwrap()
        .agents
        .remove(&worker_id);
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(
        registry
            .state
            .lock()
            .unwrap()
            .agents
            .contains_key(&worker_id)
    );
    assert_eq!(kernel.health().state, HealthState::Healthy);

    kernel.shutdown().unwrap();
}
