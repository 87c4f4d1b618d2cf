//! Delivery of approved tasks to target clients

use async_trait::async_trait;
use convoy_core::{ClientId, Message, MessageKind, RequestId, Result, TemplateId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An approved task addressed to one client
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub request_id: RequestId,
    pub template_id: TemplateId,
    pub client_id: ClientId,
    pub note: String,
}

impl TaskExecution {
    pub fn to_message(&self) -> Result<Message> {
        Message::new(MessageKind::TaskExecution, self)
    }
}

/// Client's acknowledgement of an executed task
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAck {
    pub exit_code: i32,
    pub output: String,
}

impl ExecutionAck {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-client result of the execution step
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientOutcome {
    Acknowledged(ExecutionAck),
    Failed(String),
    TimedOut,
}

/// Outcomes of one request's execution, keyed by client
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    outcomes: BTreeMap<ClientId, ClientOutcome>,
}

impl ExecutionReport {
    pub fn record(&mut self, client: ClientId, outcome: ClientOutcome) {
        self.outcomes.insert(client, outcome);
    }

    pub fn get(&self, client: &ClientId) -> Option<&ClientOutcome> {
        self.outcomes.get(client)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientOutcome)> {
        self.outcomes.iter()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Clients that did not acknowledge a successful run
    pub fn failed_clients(&self) -> Vec<ClientId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !matches!(outcome, ClientOutcome::Acknowledged(ack) if ack.succeeded()))
            .map(|(client, _)| client.clone())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_clients().is_empty()
    }
}

/// Sends an approved task to a client and waits for its acknowledgement
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: &TaskExecution) -> Result<ExecutionAck>;
}
