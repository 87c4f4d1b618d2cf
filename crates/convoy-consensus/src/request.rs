//! A single task proposal and its approval state machine

use crate::dispatch::{ClientOutcome, ExecutionReport, TaskDispatcher, TaskExecution};
use crate::engine::EngineShared;
use crate::state::{RequestState, Vote, WaitOutcome};
use convoy_core::{ClientId, ConvoyError, Identity, RequestId, Result, Role, TemplateId, Timestamp};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Completion handler, invoked once with the finished request
pub type Callback = Box<dyn FnOnce(&ConsensusRequest) + Send + 'static>;

/// Approval rules and execution bounds copied from the engine at creation
#[derive(Clone)]
pub(crate) struct RequestPolicy {
    pub quorum: usize,
    pub execution_timeout: Duration,
    pub dispatcher: Arc<dyn TaskDispatcher>,
}

/// Mutable part of a request, serialized behind one lock
struct RequestInner {
    state: RequestState,
    votes: BTreeMap<String, Vote>,
    callbacks: Vec<Callback>,
    history: Vec<(RequestState, Timestamp)>,
    report: Option<ExecutionReport>,
    deleted: bool,
    expiry: Option<JoinHandle<()>>,
}

impl RequestInner {
    fn transition(&mut self, next: RequestState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {}", self.state, next);
        self.state = next;
        self.history.push((next, Timestamp::now()));
    }

    /// Move into a terminal state and hand back the callbacks to run
    fn close(&mut self, terminal: RequestState) -> Vec<Callback> {
        self.transition(terminal);
        let timer = self.expiry.take();
        // The expiry task closes the request itself and must not abort itself
        if terminal != RequestState::Expired {
            if let Some(timer) = timer {
                timer.abort();
            }
        }
        std::mem::take(&mut self.callbacks)
    }
}

enum Decision {
    Wait,
    Approve(RequestState),
    Reject(&'static str),
}

/// A proposal to run a template on a set of clients, gated by approval
pub struct ConsensusRequest {
    id: RequestId,
    template_id: TemplateId,
    client_ids: Vec<ClientId>,
    requester: Identity,
    note: String,
    token: String,
    created_at: Timestamp,

    inner: Mutex<RequestInner>,

    /// Terminal state, set before callbacks run
    terminal: OnceLock<RequestState>,

    /// Signalled after callbacks ran
    done: watch::Sender<Option<RequestState>>,

    policy: RequestPolicy,
    engine: Weak<EngineShared>,
}

impl ConsensusRequest {
    pub(crate) fn new(
        template_id: TemplateId,
        client_ids: Vec<ClientId>,
        requester: Identity,
        note: String,
        policy: RequestPolicy,
        engine: Weak<EngineShared>,
    ) -> Self {
        let created_at = Timestamp::now();
        let (done, _) = watch::channel(None);
        Self {
            id: RequestId::generate(),
            template_id,
            client_ids,
            requester,
            note,
            token: uuid::Uuid::new_v4().simple().to_string(),
            created_at,
            inner: Mutex::new(RequestInner {
                state: RequestState::Pending,
                votes: BTreeMap::new(),
                callbacks: Vec::new(),
                history: vec![(RequestState::Pending, created_at)],
                report: None,
                deleted: false,
                expiry: None,
            }),
            terminal: OnceLock::new(),
            done,
            policy,
            engine,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn template_id(&self) -> &TemplateId {
        &self.template_id
    }

    pub fn client_ids(&self) -> &[ClientId] {
        &self.client_ids
    }

    pub fn requester(&self) -> &Identity {
        &self.requester
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    /// Opaque correlation token
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub async fn state(&self) -> RequestState {
        self.inner.lock().await.state
    }

    /// Terminal state if one was reached; usable from callbacks
    pub fn finished_state(&self) -> Option<RequestState> {
        self.terminal.get().copied()
    }

    pub async fn history(&self) -> Vec<(RequestState, Timestamp)> {
        self.inner.lock().await.history.clone()
    }

    pub async fn votes(&self) -> BTreeMap<String, Vote> {
        self.inner.lock().await.votes.clone()
    }

    pub async fn report(&self) -> Option<ExecutionReport> {
        self.inner.lock().await.report.clone()
    }

    pub async fn is_deleted(&self) -> bool {
        self.inner.lock().await.deleted
    }

    pub(crate) async fn arm_expiry(&self, timer: JoinHandle<()>) {
        let mut inner = self.inner.lock().await;
        if inner.deleted || inner.state != RequestState::Pending {
            timer.abort();
        } else {
            inner.expiry = Some(timer);
        }
    }

    /// Register a completion handler.
    ///
    /// Handlers run in registration order after the terminal transition. A handler
    /// added to an already finished request runs once the earlier handlers have
    /// run; one added to a deleted request never runs.
    pub async fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&ConsensusRequest) + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        if inner.deleted {
            return;
        }
        if !inner.state.is_terminal() {
            inner.callbacks.push(Box::new(callback));
            return;
        }
        drop(inner);

        // Terminal but possibly still running the registered handlers
        let mut done = self.done.subscribe();
        let _ = done.wait_for(Option::is_some).await;
        callback(self);
    }

    /// Evaluate the approval rules; a no-op once the request has left `Pending`
    pub async fn check(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.deleted || inner.state != RequestState::Pending {
            return;
        }

        match self.decide(&inner.votes) {
            Decision::Wait => {
                debug!(request_id = %self.id, votes = inner.votes.len(), "Awaiting votes");
            }
            Decision::Reject(reason) => {
                let callbacks = inner.close(RequestState::Rejected);
                drop(inner);
                info!(request_id = %self.id, reason, "Request rejected");
                self.notify(RequestState::Rejected, callbacks);
            }
            Decision::Approve(approval) => {
                inner.transition(approval);
                inner.transition(RequestState::Executing);
                if let Some(timer) = inner.expiry.take() {
                    timer.abort();
                }
                drop(inner);
                info!(request_id = %self.id, state = %approval, "Request approved");

                let request = Arc::clone(self);
                tokio::spawn(async move {
                    let report = request.execute().await;
                    request.complete(report).await;
                });
            }
        }
    }

    fn decide(&self, votes: &BTreeMap<String, Vote>) -> Decision {
        if self.client_ids.is_empty() {
            return Decision::Reject("no target clients");
        }
        if votes.values().any(|v| *v == Vote::Reject) {
            return Decision::Reject("rejected by vote");
        }
        if self.requester.has_role(Role::Requester) {
            return Decision::Approve(RequestState::AutoApproved);
        }
        let approvals = votes.values().filter(|v| **v == Vote::Approve).count();
        if approvals >= self.policy.quorum.max(1) {
            return Decision::Approve(RequestState::QuorumApproved);
        }
        Decision::Wait
    }

    pub async fn approve(self: &Arc<Self>, voter: &Identity) -> Result<()> {
        self.vote(voter, Vote::Approve).await
    }

    pub async fn reject(self: &Arc<Self>, voter: &Identity) -> Result<()> {
        self.vote(voter, Vote::Reject).await
    }

    /// Record one vote per admin identity, then re-evaluate
    pub async fn vote(self: &Arc<Self>, voter: &Identity, vote: Vote) -> Result<()> {
        if !voter.has_role(Role::Admin) {
            return Err(ConvoyError::Unauthorized(format!("{} may not vote", voter.name)));
        }
        if voter.name == self.requester.name {
            return Err(ConvoyError::Unauthorized(
                "requester cannot vote on their own request".to_string(),
            ));
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.deleted || inner.state != RequestState::Pending {
                return Err(ConvoyError::RequestClosed(self.id.clone()));
            }
            if inner.votes.contains_key(&voter.name) {
                return Err(ConvoyError::AlreadyVoted {
                    request: self.id.clone(),
                    voter: voter.name.clone(),
                });
            }
            inner.votes.insert(voter.name.clone(), vote);
        }
        info!(request_id = %self.id, voter = %voter.name, ?vote, "Vote recorded");

        self.check().await;
        Ok(())
    }

    /// Send the task to every client concurrently, each bounded by the execution timeout
    async fn execute(&self) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let mut tasks = JoinSet::new();

        for client in &self.client_ids {
            // Overwritten by the real outcome unless the dispatch task dies
            report.record(client.clone(), ClientOutcome::Failed("dispatch aborted".to_string()));

            let task = TaskExecution {
                request_id: self.id.clone(),
                template_id: self.template_id.clone(),
                client_id: client.clone(),
                note: self.note.clone(),
            };
            let dispatcher = Arc::clone(&self.policy.dispatcher);
            let deadline = self.policy.execution_timeout;

            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(deadline, dispatcher.dispatch(&task)).await {
                    Ok(Ok(ack)) => ClientOutcome::Acknowledged(ack),
                    Ok(Err(e)) => ClientOutcome::Failed(e.to_string()),
                    Err(_) => ClientOutcome::TimedOut,
                };
                (task.client_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((client, outcome)) => {
                    debug!(request_id = %self.id, client = %client, ?outcome, "Client finished");
                    report.record(client, outcome);
                }
                Err(e) => warn!(request_id = %self.id, error = %e, "Dispatch task failed"),
            }
        }

        report
    }

    async fn complete(&self, report: ExecutionReport) {
        let mut inner = self.inner.lock().await;
        if inner.deleted || inner.state != RequestState::Executing {
            debug!(request_id = %self.id, "Dropping late completion");
            return;
        }
        let failed = report.failed_clients().len();
        inner.report = Some(report);
        let callbacks = inner.close(RequestState::Completed);
        drop(inner);

        info!(request_id = %self.id, failed, "Request completed");
        self.notify(RequestState::Completed, callbacks);
    }

    /// Close a request that never got a decision
    pub(crate) async fn expire(&self) {
        let mut inner = self.inner.lock().await;
        if inner.deleted || inner.state != RequestState::Pending {
            return;
        }
        let callbacks = inner.close(RequestState::Expired);
        drop(inner);

        // Expired requests leave the index so they stop holding capacity
        if let Some(engine) = self.engine.upgrade() {
            engine.remove(&self.id);
        }
        info!(request_id = %self.id, "Request expired");
        self.notify(RequestState::Expired, callbacks);
    }

    fn notify(&self, terminal: RequestState, callbacks: Vec<Callback>) {
        let _ = self.terminal.set(terminal);
        for callback in callbacks {
            callback(self);
        }
        self.done.send_replace(Some(terminal));
    }

    /// Wait for a terminal state, up to `deadline`; resolves after callbacks ran
    pub async fn wait(&self, deadline: Duration) -> WaitOutcome {
        let mut done = self.done.subscribe();
        // Copy the state out so the watch borrow ends before `done` is dropped
        let finished: Option<RequestState> =
            match tokio::time::timeout(deadline, done.wait_for(Option::is_some)).await {
                Ok(Ok(state)) => *state,
                _ => None,
            };
        match finished {
            Some(terminal) => WaitOutcome::Finished(terminal),
            None => WaitOutcome::TimedOut,
        }
    }

    /// Retire the request: drop it from the engine, cancel its timer and
    /// discard pending callbacks. Later transitions become no-ops.
    ///
    /// Returns false if it was already deleted.
    pub async fn delete(&self) -> bool {
        let timer = {
            let mut inner = self.inner.lock().await;
            if inner.deleted {
                return false;
            }
            inner.deleted = true;
            inner.callbacks.clear();
            inner.expiry.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(engine) = self.engine.upgrade() {
            engine.remove(&self.id);
        }
        debug!(request_id = %self.id, "Request deleted");
        true
    }
}

impl std::fmt::Debug for ConsensusRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusRequest")
            .field("id", &self.id)
            .field("template_id", &self.template_id)
            .field("client_ids", &self.client_ids)
            .field("requester", &self.requester.name)
            .finish()
    }
}
