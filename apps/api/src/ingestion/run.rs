//! Analysis runs: one upload taken from raw text to a reviewable decision.
//!
//! Runs live only in memory until a human confirms or discards them. The only
//! re-entrant edge is re-analysis, which drops the previous extraction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::ingestion::models::ExtractionResult;
use crate::ingestion::reconcile::ReconciliationDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Uploaded,
    TextExtracted,
    PromptBuilt,
    ModelInvoked,
    ResponseValidated,
    DecisionComputed,
    Persisted,
    Discarded,
    Failed,
    NothingToAnalyze,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Persisted | RunState::Discarded | RunState::Failed | RunState::NothingToAnalyze
        )
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (*self, next) {
            (Uploaded, TextExtracted)
            | (TextExtracted, PromptBuilt)
            | (TextExtracted, NothingToAnalyze)
            | (PromptBuilt, ModelInvoked)
            | (ModelInvoked, ResponseValidated)
            | (ResponseValidated, DecisionComputed)
            | (DecisionComputed, Persisted) => true,
            // Re-analysis restarts from the built prompt.
            (ResponseValidated | DecisionComputed, PromptBuilt) => true,
            (Uploaded | TextExtracted | PromptBuilt | ModelInvoked, Failed) => true,
            (from, Discarded) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Analysis run {0} not found")]
    NotFound(Uuid),

    #[error("Illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: RunState, to: RunState },
}

/// Why a run failed. Mirrors the extraction and validation error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TextExtraction,
    CertificateError,
    TransportError,
    ProviderError,
    MalformedEnvelope,
    InvalidJson,
    UnexpectedShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTransition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub consultant_id: Uuid,
    pub source_name: String,
    pub state: RunState,
    #[serde(skip)]
    pub cv_text: String,
    #[serde(skip)]
    pub prompt: Option<String>,
    pub extraction: Option<ExtractionResult>,
    pub decision: Option<ReconciliationDecision>,
    pub failure: Option<RunFailure>,
    pub transitions: Vec<RunTransition>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRun {
    pub fn new(consultant_id: Uuid, source_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            consultant_id,
            source_name: source_name.into(),
            state: RunState::Uploaded,
            cv_text: String::new(),
            prompt: None,
            extraction: None,
            decision: None,
            failure: None,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Moves to `next`, recording the transition. Re-analysis and failure clear
    /// any extraction so a partial result is never shown. Terminal states also drop
    /// the CV text and prompt; a persisted run keeps only the decision it applied.
    pub fn advance(&mut self, next: RunState) -> Result<(), RunError> {
        if !self.state.can_transition_to(next) {
            return Err(RunError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        if matches!(next, RunState::PromptBuilt | RunState::Failed | RunState::Discarded) {
            self.extraction = None;
            self.decision = None;
        }
        if next.is_terminal() {
            self.extraction = None;
            self.cv_text = String::new();
            self.prompt = None;
        }
        self.transitions.push(RunTransition {
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        Ok(())
    }

    /// When the run reached a terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        if !self.state.is_terminal() {
            return None;
        }
        self.transitions.last().map(|t| t.at)
    }

    pub fn fail(&mut self, failure: RunFailure) -> Result<(), RunError> {
        self.advance(RunState::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }
}

/// How long a finished run stays readable before it is evicted.
pub const FINISHED_RUN_RETENTION_MINUTES: i64 = 60;

/// In-memory session store for runs, plus one lock per consultant to serialize
/// reconciliation and persistence.
#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<Uuid, AnalysisRun>>>,
    consultant_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    retention: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self {
            runs: Arc::default(),
            consultant_locks: Arc::default(),
            retention: Duration::minutes(FINISHED_RUN_RETENTION_MINUTES),
        }
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run and evicts finished runs past their retention.
    pub async fn insert(&self, run: AnalysisRun) {
        let cutoff = Utc::now() - self.retention;
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, r| r.finished_at().map_or(true, |at| at > cutoff));
        if runs.len() < before {
            debug!("Evicted {} finished analysis runs", before - runs.len());
        }
        runs.insert(run.id, run);
    }

    pub async fn get(&self, run_id: Uuid) -> Result<AnalysisRun, RunError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(RunError::NotFound(run_id))
    }

    /// Stores progress made on a local copy. A run discarded in the meantime stays discarded.
    pub async fn save(&self, run: &AnalysisRun) -> Result<(), RunError> {
        let mut runs = self.runs.write().await;
        if let Some(stored) = runs.get(&run.id) {
            if stored.state == RunState::Discarded && run.state != RunState::Discarded {
                return Err(RunError::IllegalTransition {
                    from: RunState::Discarded,
                    to: run.state,
                });
            }
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    /// Applies a synchronous change under the write lock.
    pub async fn update<T>(
        &self,
        run_id: Uuid,
        change: impl FnOnce(&mut AnalysisRun) -> Result<T, RunError>,
    ) -> Result<(AnalysisRun, T), RunError> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&run_id).ok_or(RunError::NotFound(run_id))?;
        let out = change(run)?;
        Ok((run.clone(), out))
    }

    /// Serializes confirm, reanalyze and discard for one consultant. Confirm holds it
    /// across snapshot read and write so concurrent confirmations see each other's rows.
    pub async fn lock_consultant(&self, consultant_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.consultant_locks.lock().await;
            // An entry nobody holds or waits on is only referenced by the map.
            locks.retain(|id, lock| *id == consultant_id || Arc::strong_count(lock) > 1);
            locks.entry(consultant_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
