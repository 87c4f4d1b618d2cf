//! Pull-model dispatcher: clients poll for tasks and acknowledge them

use crate::dispatch::{ExecutionAck, TaskDispatcher, TaskExecution};
use async_trait::async_trait;
use convoy_core::{ClientId, ConvoyError, Message, RequestId, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

type AckKey = (ClientId, RequestId);

/// Per-client task queues
#[derive(Default)]
pub struct ClientOutbox {
    /// Tasks not yet picked up, per client
    queues: DashMap<ClientId, VecDeque<TaskExecution>>,

    /// Dispatches waiting for an acknowledgement
    waiting: DashMap<AckKey, oneshot::Sender<ExecutionAck>>,
}

impl ClientOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the tasks queued for a client, as `TaskExecution` messages
    pub fn poll(&self, client: &ClientId) -> Result<Vec<Message>> {
        let tasks: Vec<TaskExecution> = match self.queues.get_mut(client) {
            Some(mut queue) => queue.drain(..).collect(),
            None => Vec::new(),
        };
        tasks.iter().map(TaskExecution::to_message).collect()
    }

    /// Number of tasks waiting to be picked up by a client
    pub fn queued(&self, client: &ClientId) -> usize {
        self.queues.get(client).map(|q| q.len()).unwrap_or(0)
    }

    /// Resolve the dispatch waiting on `(client, request)`
    pub fn acknowledge(&self, client: &ClientId, request: &RequestId, ack: ExecutionAck) -> Result<()> {
        let (_, sender) = self
            .waiting
            .remove(&(client.clone(), request.clone()))
            .ok_or_else(|| ConvoyError::RequestNotFound(request.clone()))?;

        sender
            .send(ack)
            .map_err(|_| ConvoyError::RequestClosed(request.clone()))
    }
}

/// Removes a dispatch's bookkeeping when it finishes or is abandoned
struct Pending<'a> {
    outbox: &'a ClientOutbox,
    key: AckKey,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        self.outbox.waiting.remove(&self.key);
        if let Some(mut queue) = self.outbox.queues.get_mut(&self.key.0) {
            queue.retain(|task| task.request_id != self.key.1);
        }
    }
}

#[async_trait]
impl TaskDispatcher for ClientOutbox {
    async fn dispatch(&self, task: &TaskExecution) -> Result<ExecutionAck> {
        let key = (task.client_id.clone(), task.request_id.clone());
        let (tx, rx) = oneshot::channel();

        self.waiting.insert(key.clone(), tx);
        self.queues
            .entry(task.client_id.clone())
            .or_default()
            .push_back(task.clone());
        let _pending = Pending { outbox: self, key };

        debug!(client = %task.client_id, request_id = %task.request_id, "Queued task");

        rx.await.map_err(|_| ConvoyError::Execution {
            client: task.client_id.clone(),
            reason: "acknowledgement channel closed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::TemplateId;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(client: &str, request: &str) -> TaskExecution {
        TaskExecution {
            request_id: RequestId(request.to_string()),
            template_id: TemplateId::new("uptime"),
            client_id: ClientId::new(client),
            note: String::new(),
        }
    }

    #[tokio::test]
    async fn test_poll_then_acknowledge() {
        let outbox = Arc::new(ClientOutbox::new());
        let client = ClientId::new("web-1");

        let dispatch = {
            let outbox = Arc::clone(&outbox);
            tokio::spawn(async move { outbox.dispatch(&task("web-1", "r-1")).await })
        };

        // Wait until the task is visible to the client
        while outbox.queued(&client) == 0 {
            tokio::task::yield_now().await;
        }
        let messages = outbox.poll(&client).unwrap();
        assert_eq!(messages.len(), 1);
        let received: TaskExecution = messages[0].decode().unwrap();
        assert_eq!(received.request_id, RequestId("r-1".to_string()));

        outbox
            .acknowledge(&client, &received.request_id, ExecutionAck::success("up 3 days"))
            .unwrap();
        let ack = dispatch.await.unwrap().unwrap();
        assert_eq!(ack.output, "up 3 days");
    }

    #[test]
    fn test_acknowledge_unknown_task() {
        let outbox = ClientOutbox::new();
        let err = outbox
            .acknowledge(&ClientId::new("a"), &RequestId("nope".to_string()), ExecutionAck::default())
            .unwrap_err();
        assert!(matches!(err, ConvoyError::RequestNotFound(_)));
    }

    #[tokio::test]
    async fn test_abandoned_dispatch_cleans_up() {
        let outbox = ClientOutbox::new();
        let client = ClientId::new("db-1");

        let result = tokio::time::timeout(Duration::from_millis(20), outbox.dispatch(&task("db-1", "r-9"))).await;
        assert!(result.is_err());

        assert_eq!(outbox.queued(&client), 0);
        assert!(outbox
            .acknowledge(&client, &RequestId("r-9".to_string()), ExecutionAck::default())
            .is_err());
    }
}
