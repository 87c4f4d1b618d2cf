//! Externally triggered health checks that run a template through the engine

use crate::engine::ConsensusEngine;
use crate::state::{RequestState, WaitOutcome};
use convoy_core::{ClientId, ConvoyError, Identity, Result, TemplateId};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

const TOKEN_LEN: usize = 32;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A template plus the clients it runs on, reachable with a secret token
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpCheck {
    pub id: String,
    pub enabled: bool,
    pub template_id: TemplateId,
    pub secure_token: String,
    /// Seconds to wait for the check to finish
    pub timeout: u64,
    pub client_ids: Vec<ClientId>,
}

impl HttpCheck {
    pub fn new(template_id: TemplateId, client_ids: Vec<ClientId>) -> Self {
        let secure_token = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            enabled: true,
            template_id,
            secure_token,
            timeout: DEFAULT_TIMEOUT_SECS,
            client_ids,
        }
    }

    pub fn verify_token(&self, token: &str) -> bool {
        !token.is_empty() && bool::from(token.as_bytes().ct_eq(self.secure_token.as_bytes()))
    }
}

/// Outcome reported to whoever triggered a check
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckOutcome {
    /// Every client acknowledged a successful run
    Passed,
    /// The request finished without a clean run on every client
    Failed {
        state: RequestState,
        failed_clients: Vec<ClientId>,
    },
    /// The check's deadline elapsed first
    TimedOut,
}

/// In-memory set of configured checks
#[derive(Default)]
pub struct CheckRegistry {
    checks: DashMap<String, HttpCheck>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the `id -> check` JSON mapping
    pub fn from_json(raw: &str) -> Result<Self> {
        let checks: BTreeMap<String, HttpCheck> = serde_json::from_str(raw)?;
        Ok(Self {
            checks: checks.into_iter().collect(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        let checks: BTreeMap<String, HttpCheck> = self
            .checks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        Ok(serde_json::to_string(&checks)?)
    }

    pub fn add(&self, check: HttpCheck) {
        self.checks.insert(check.id.clone(), check);
    }

    pub fn get(&self, id: &str) -> Option<HttpCheck> {
        self.checks.get(id).map(|c| c.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<HttpCheck> {
        self.checks.remove(id).map(|(_, check)| check)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// Run a check end to end: create the request, wait for it within the
/// check's timeout, and always retire it afterwards.
pub async fn run_check(
    engine: &ConsensusEngine,
    registry: &CheckRegistry,
    id: &str,
    token: &str,
    system: &Identity,
) -> Result<CheckOutcome> {
    let check = registry
        .get(id)
        .ok_or_else(|| ConvoyError::CheckNotFound(id.to_string()))?;
    if !check.enabled {
        return Err(ConvoyError::CheckDisabled(id.to_string()));
    }
    if !check.verify_token(token) {
        return Err(ConvoyError::Unauthorized("secure token invalid".to_string()));
    }

    let request = engine
        .add_request(check.template_id.clone(), check.client_ids.clone(), system, "")
        .await?;

    request
        .on_complete(|finished| {
            debug!(request_id = %finished.id(), state = ?finished.finished_state(), "Check request finished");
        })
        .await;

    request.check().await;

    let outcome = match request.wait(Duration::from_secs(check.timeout)).await {
        WaitOutcome::Finished(RequestState::Completed) => {
            let failed_clients = request
                .report()
                .await
                .map(|report| report.failed_clients())
                .unwrap_or_default();
            if failed_clients.is_empty() {
                CheckOutcome::Passed
            } else {
                CheckOutcome::Failed {
                    state: RequestState::Completed,
                    failed_clients,
                }
            }
        }
        WaitOutcome::Finished(state) => CheckOutcome::Failed {
            state,
            failed_clients: Vec::new(),
        },
        WaitOutcome::TimedOut => {
            warn!(check = %check.id, request_id = %request.id(), "Check timed out");
            CheckOutcome::TimedOut
        }
    };

    request.delete().await;
    info!(check = %check.id, ?outcome, "Check finished");
    Ok(outcome)
}
