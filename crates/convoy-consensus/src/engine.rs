//! Request registry: creates, indexes and retires consensus requests

use crate::catalog::TemplateCatalog;
use crate::dispatch::TaskDispatcher;
use crate::request::{ConsensusRequest, RequestPolicy};
use crate::state::RequestState;
use convoy_core::{ClientId, ConsensusConfig, ConvoyError, Identity, RequestId, Result, Role, TemplateId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// State shared between the engine handle and its requests
pub(crate) struct EngineShared {
    requests: DashMap<RequestId, Arc<ConsensusRequest>>,

    /// Registry slots taken, reserved before insertion
    occupied: AtomicUsize,
}

impl EngineShared {
    /// Claim a slot unless `limit` are already taken
    fn reserve(&self, limit: usize) -> bool {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .is_ok()
    }

    fn release(&self) {
        self.occupied.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, id: &RequestId) {
        if self.requests.remove(id).is_some() {
            self.release();
        }
    }
}

/// Entry point for creating and tracking approval-gated tasks
#[derive(Clone)]
pub struct ConsensusEngine {
    shared: Arc<EngineShared>,
    catalog: Arc<dyn TemplateCatalog>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(
        config: ConsensusConfig,
        catalog: Arc<dyn TemplateCatalog>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                requests: DashMap::new(),
                occupied: AtomicUsize::new(0),
            }),
            catalog,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Create and index a pending request.
    ///
    /// Unknown templates, empty target lists, unauthorized requesters and a full
    /// registry are rejected. Duplicate client ids are dropped, keeping order.
    pub async fn add_request(
        &self,
        template_id: TemplateId,
        client_ids: Vec<ClientId>,
        requester: &Identity,
        note: &str,
    ) -> Result<Arc<ConsensusRequest>> {
        if !requester.has_role(Role::Admin) && !requester.has_role(Role::Requester) {
            return Err(ConvoyError::Unauthorized(format!(
                "{} may not submit tasks",
                requester.name
            )));
        }
        if !self.catalog.contains(&template_id) {
            return Err(ConvoyError::TemplateNotFound(template_id));
        }

        let mut seen = HashSet::new();
        let client_ids: Vec<ClientId> = client_ids
            .into_iter()
            .filter(|c| !c.0.trim().is_empty())
            .filter(|c| seen.insert(c.clone()))
            .collect();
        if client_ids.is_empty() {
            return Err(ConvoyError::NoTargets);
        }
        if !self.shared.reserve(self.config.max_requests) {
            return Err(ConvoyError::Internal("request registry is full".to_string()));
        }

        let request = Arc::new(ConsensusRequest::new(
            template_id,
            client_ids,
            requester.clone(),
            note.to_string(),
            RequestPolicy {
                quorum: self.config.quorum,
                execution_timeout: self.config.execution_timeout,
                dispatcher: Arc::clone(&self.dispatcher),
            },
            Arc::downgrade(&self.shared),
        ));

        match self.shared.requests.entry(request.id().clone()) {
            Entry::Occupied(_) => {
                self.shared.release();
                return Err(ConvoyError::Internal(format!(
                    "duplicate request id {}",
                    request.id()
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&request));
            }
        }

        let timer = {
            let stale = Arc::downgrade(&request);
            let timeout = self.config.request_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(request) = stale.upgrade() {
                    request.expire().await;
                }
            })
        };
        request.arm_expiry(timer).await;

        info!(
            request_id = %request.id(),
            template = %request.template_id(),
            clients = request.client_ids().len(),
            requester = %requester.name,
            "Request created"
        );
        Ok(request)
    }

    pub fn get(&self, id: &RequestId) -> Option<Arc<ConsensusRequest>> {
        self.shared.requests.get(id).map(|r| Arc::clone(r.value()))
    }

    fn lookup(&self, id: &RequestId) -> Result<Arc<ConsensusRequest>> {
        self.get(id).ok_or_else(|| ConvoyError::RequestNotFound(id.clone()))
    }

    pub async fn approve(&self, id: &RequestId, voter: &Identity) -> Result<()> {
        self.lookup(id)?.approve(voter).await
    }

    pub async fn reject(&self, id: &RequestId, voter: &Identity) -> Result<()> {
        self.lookup(id)?.reject(voter).await
    }

    /// Retire a request by id; false if unknown or already deleted
    pub async fn delete(&self, id: &RequestId) -> bool {
        match self.get(id) {
            Some(request) => request.delete().await,
            None => false,
        }
    }

    /// Requests still waiting for a decision
    pub async fn pending(&self) -> Vec<Arc<ConsensusRequest>> {
        let all: Vec<Arc<ConsensusRequest>> = self
            .shared
            .requests
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut pending = Vec::new();
        for request in all {
            if request.state().await == RequestState::Pending {
                pending.push(request);
            }
        }
        pending
    }

    pub fn len(&self) -> usize {
        self.shared.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.requests.is_empty()
    }
}
