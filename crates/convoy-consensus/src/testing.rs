//! Helpers shared by the unit tests

use crate::catalog::StaticTemplates;
use crate::dispatch::{ExecutionAck, TaskDispatcher, TaskExecution};
use crate::engine::ConsensusEngine;
use async_trait::async_trait;
use convoy_core::{ClientId, ConsensusConfig, Identity, Result, Role};
use std::sync::Arc;

/// Acknowledges every task at once
pub struct InstantAck;

#[async_trait]
impl TaskDispatcher for InstantAck {
    async fn dispatch(&self, task: &TaskExecution) -> Result<ExecutionAck> {
        Ok(ExecutionAck::success(format!("ran {} on {}", task.template_id, task.client_id)))
    }
}

/// Never answers
pub struct NeverAck;

#[async_trait]
impl TaskDispatcher for NeverAck {
    async fn dispatch(&self, _task: &TaskExecution) -> Result<ExecutionAck> {
        std::future::pending().await
    }
}

pub fn engine(config: ConsensusConfig, dispatcher: Arc<dyn TaskDispatcher>) -> ConsensusEngine {
    ConsensusEngine::new(
        config,
        Arc::new(StaticTemplates::new(["tmpl-1", "restart"])),
        dispatcher,
    )
}

pub fn admin(name: &str) -> Identity {
    Identity::new(name).with_role(Role::Admin)
}

pub fn clients(ids: &[&str]) -> Vec<ClientId> {
    ids.iter().map(|id| ClientId::new(*id)).collect()
}
