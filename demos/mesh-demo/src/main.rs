//! Two in-process agents joined through an in-memory registry.
//!
//! A math agent offers `addition` (tagged `python`); a calculator agent
//! depends on it with a preference for python providers and exposes
//! `calculate`. The demo activates both kernels, waits for heartbeats to
//! distribute the topology, and invokes `calculate` end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use capmesh::kernel::{
    CallContext, HandlerError, HeartbeatRequest, HeartbeatResponse, KernelConfig, MeshKernel,
    MeshRegistry, RegisterRequest, RegisterResponse, RegistryResult, TopologyUpdate,
};
use capmesh::primitives::{
    AgentDescriptor, AgentDescriptorBuilder, AgentId, CapabilityDescriptor,
    CapabilityDescriptorBuilder, DependencySpec, Endpoint, HealthState, Scheme, TagExpr,
};
use capmesh::resolve::CallOutcome;
use capmesh::trace::TraceContext;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

#[derive(Default)]
struct RegistryState {
    version: u64,
    agents: HashMap<AgentId, AgentDescriptor>,
    capabilities: Vec<CapabilityDescriptor>,
}

/// Single-process registry shared by every kernel in the demo.
#[derive(Default)]
struct InMemoryRegistry {
    state: Mutex<RegistryState>,
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

    async fn update_endpoint(
        &self,
        request: &capmesh::kernel::EndpointUpdateRequest,
    ) -> RegistryResult<()> {
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
        state.version += 1;
        Ok(())
    }
}

fn agent(name: &str, port: u16) -> Result<AgentDescriptor> {
    let endpoint = Endpoint::new(Scheme::Http, "localhost", port)?;
    AgentDescriptor::builder(AgentId::random())
        .name(name)
        .and_then(|b| b.version("0.1.0"))
        .map(|b| b.endpoint(endpoint))
        .and_then(AgentDescriptorBuilder::build)
        .context("building agent descriptor")
}

fn config() -> KernelConfig {
    KernelConfig::new("http://registry.demo:7000")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let registry = Arc::new(InMemoryRegistry::default());

    // Math agent: offers addition, tagged as a python implementation.
    let math_agent = agent("math", 7101)?;
    let addition = CapabilityDescriptor::builder("addition", math_agent.agent_id())
        .function_name("add")
        .and_then(|b| b.version("1.2.0"))
        .and_then(|b| b.add_tag("python"))
        .and_then(CapabilityDescriptorBuilder::build)?;
    let math = MeshKernel::builder(math_agent, config())
        .registry(Arc::clone(&registry) as Arc<dyn MeshRegistry>)
        .capability(
            addition,
            Arc::new(|args: Value, _ctx: CallContext| async move {
                let a = args["a"].as_f64().unwrap_or_default();
                let b = args["b"].as_f64().unwrap_or_default();
                Ok(json!(a + b))
            }),
        )
        .build()?;

    // Calculator agent: depends on addition, preferring python providers.
    let calc_agent = agent("calculator", 7102)?;
    let tags = TagExpr::new().tag("+python")?;
    let addition_dep = DependencySpec::new("addition")?.with_tags(tags);
    let calculate = CapabilityDescriptor::builder("calculate", calc_agent.agent_id())
        .function_name("calculate")
        .and_then(|b| b.version("0.1.0"))?
        .add_dependency(addition_dep)
        .build()?;
    let calc = MeshKernel::builder(calc_agent, config())
        .registry(Arc::clone(&registry) as Arc<dyn MeshRegistry>)
        .capability(
            calculate,
            Arc::new(|args: Value, ctx: CallContext| async move {
                match ctx.call_dependency(0, args).await? {
                    CallOutcome::Value(sum) => Ok(json!({ "sum": sum })),
                    CallOutcome::Unavailable { capability } => Err(HandlerError::failed(format!(
                        "`{capability}` has no provider yet"
                    ))),
                }
            }),
        )
        .build()?;

    math.activate()?;
    calc.activate()?;

    // Let both agents register and pick up each other's capabilities.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let root = TraceContext::new_root();
    let headers: Vec<(String, String)> = root
        .to_headers()
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect();
    let result = calc
        .handle_call("calculate", json!({"a": 19.0, "b": 23.0}), &headers)
        .await
        .map_err(|err| anyhow::anyhow!("calculate failed: {err}"))?;
    info!(%result, trace_id = %root.trace_id(), "calculate returned");

    calc.shutdown()?;
    math.shutdown()?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
