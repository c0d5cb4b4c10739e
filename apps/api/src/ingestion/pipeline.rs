use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::ingestion::extract::TextExtractor;
use crate::ingestion::models::{Competences, MissionRecord};
use crate::ingestion::prompts::build_prompt;
use crate::ingestion::reconcile::{
    reconcile, reconcile_extraction, ProfileSnapshot, ReconciliationDecision,
};
use crate::ingestion::repository::{AppliedChanges, ProfileRepository};
use crate::ingestion::run::{
    AnalysisRun, FailureKind, RunError, RunFailure, RunRegistry, RunState,
};
use crate::ingestion::validation::{
    parse_response, sanitize_competences, sanitize_mission, ValidationError,
};
use crate::llm_client::{invoke_with_retry, ExtractionClient, ExtractionError, RetryPolicy};

/// Edited data sent back by the review UI. Absent fields keep the extracted values.
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default)]
    pub missions: Option<Vec<MissionRecord>>,
    #[serde(default)]
    pub competences: Option<Competences>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub run_id: Uuid,
    pub applied: AppliedChanges,
    pub decision: ReconciliationDecision,
}

impl From<&ExtractionError> for RunFailure {
    fn from(e: &ExtractionError) -> Self {
        let kind = match e {
            ExtractionError::Certificate { .. } => FailureKind::CertificateError,
            ExtractionError::Transport { .. } => FailureKind::TransportError,
            ExtractionError::Provider { .. } => FailureKind::ProviderError,
        };
        RunFailure {
            kind,
            reason: e.to_string(),
        }
    }
}

impl From<&ValidationError> for RunFailure {
    fn from(e: &ValidationError) -> Self {
        let kind = match e {
            ValidationError::MalformedEnvelope(_) => FailureKind::MalformedEnvelope,
            ValidationError::InvalidJson { .. } => FailureKind::InvalidJson,
            ValidationError::UnexpectedShape(_) => FailureKind::UnexpectedShape,
        };
        RunFailure {
            kind,
            reason: e.to_string(),
        }
    }
}

/// CV ingestion: text extraction, model call, validation and reconciliation.
/// Nothing reaches the profile until `confirm`.
#[derive(Clone)]
pub struct Pipeline {
    pub llm: Arc<dyn ExtractionClient>,
    pub repo: Arc<dyn ProfileRepository>,
    pub extractor: Arc<dyn TextExtractor>,
    pub runs: RunRegistry,
    pub retry: RetryPolicy,
}

impl Pipeline {
    /// Runs a freshly uploaded CV up to a reviewable decision.
    /// Pipeline-stage failures end the run in `Failed`; they are not returned as errors.
    pub async fn analyze(
        &self,
        consultant_id: Uuid,
        source_name: &str,
        path: &Path,
    ) -> Result<AnalysisRun, AppError> {
        if !self.repo.consultant_exists(consultant_id).await? {
            return Err(AppError::NotFound(format!("Consultant {consultant_id} not found")));
        }
        // Duplicate checks run against the profile as it was when the run started.
        let snapshot = self.repo.load_snapshot(consultant_id).await?;

        let mut run = AnalysisRun::new(consultant_id, source_name);
        self.runs.insert(run.clone()).await;
        info!("Analysis run {} started for consultant {consultant_id} ({source_name})", run.id);

        let text = match self.extractor.extract_text(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Run {}: text extraction failed: {e:#}", run.id);
                run.fail(RunFailure {
                    kind: FailureKind::TextExtraction,
                    reason: format!("{e:#}"),
                })?;
                self.runs.save(&run).await?;
                return Ok(run);
            }
        };
        run.cv_text = text;
        run.advance(RunState::TextExtracted)?;

        if run.cv_text.trim().is_empty() {
            info!("Run {}: no text extracted, nothing to analyze", run.id);
            run.advance(RunState::NothingToAnalyze)?;
            self.runs.save(&run).await?;
            return Ok(run);
        }

        run.prompt = Some(build_prompt(&run.cv_text));
        run.advance(RunState::PromptBuilt)?;
        self.runs.save(&run).await?;

        self.invoke_and_reconcile(run, &snapshot).await
    }

    /// Drops the current extraction and asks the model again.
    pub async fn reanalyze(&self, run_id: Uuid) -> Result<AnalysisRun, AppError> {
        let consultant_id = self.runs.get(run_id).await?.consultant_id;
        let (run, ()) = {
            let _guard = self.runs.lock_consultant(consultant_id).await;
            self.runs
                .update(run_id, |run| run.advance(RunState::PromptBuilt))
                .await?
        };
        info!("Run {run_id}: re-analysis requested");

        let snapshot = self.repo.load_snapshot(consultant_id).await?;
        self.invoke_and_reconcile(run, &snapshot).await
    }

    async fn invoke_and_reconcile(
        &self,
        mut run: AnalysisRun,
        snapshot: &ProfileSnapshot,
    ) -> Result<AnalysisRun, AppError> {
        let prompt = match run.prompt.clone() {
            Some(prompt) => prompt,
            None => build_prompt(&run.cv_text),
        };
        run.advance(RunState::ModelInvoked)?;
        self.runs.save(&run).await?;

        let raw = match invoke_with_retry(self.llm.as_ref(), &prompt, self.retry).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Run {}: model call failed: {e}", run.id);
                run.fail(RunFailure::from(&e))?;
                self.runs.save(&run).await?;
                return Ok(run);
            }
        };

        let extraction = match parse_response(&raw, &run.cv_text) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Run {}: model response rejected: {e}", run.id);
                run.fail(RunFailure::from(&e))?;
                self.runs.save(&run).await?;
                return Ok(run);
            }
        };
        run.advance(RunState::ResponseValidated)?;

        let decision = reconcile_extraction(&extraction, snapshot);
        let summary = decision.summary();
        info!(
            "Run {}: {} new / {} duplicate missions, {} new / {} duplicate skills",
            run.id,
            summary.missions_to_add,
            summary.missions_skipped,
            summary.skills_to_add,
            summary.skills_skipped
        );
        if decision.is_empty() {
            info!("Run {}: no missions or skills found in CV", run.id);
        }
        run.extraction = Some(extraction);
        run.decision = Some(decision);
        run.advance(RunState::DecisionComputed)?;
        self.runs.save(&run).await?;
        Ok(run)
    }

    /// Persists the reviewed data. Reconciliation is re-run against a fresh snapshot
    /// while holding the consultant lock, and all writes share one transaction.
    pub async fn confirm(
        &self,
        run_id: Uuid,
        request: ConfirmRequest,
    ) -> Result<ConfirmResponse, AppError> {
        let consultant_id = self.runs.get(run_id).await?.consultant_id;
        let _guard = self.runs.lock_consultant(consultant_id).await;

        let run = self.runs.get(run_id).await?;
        if !run.state.can_transition_to(RunState::Persisted) {
            return Err(RunError::IllegalTransition {
                from: run.state,
                to: RunState::Persisted,
            }
            .into());
        }
        let extraction = run.extraction.as_ref().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Run {run_id} has a decision but no extraction"))
        })?;

        let missions: Vec<MissionRecord> = request
            .missions
            .unwrap_or_else(|| extraction.missions.clone())
            .into_iter()
            .filter_map(sanitize_mission)
            .collect();
        let competences =
            sanitize_competences(request.competences.unwrap_or_else(|| extraction.competences.clone()));

        let snapshot = self.repo.load_snapshot(consultant_id).await?;
        let decision = reconcile(&missions, &competences, &snapshot);
        let applied = self
            .repo
            .apply(consultant_id, &decision.missions_to_add, &decision.skills_to_add)
            .await?;

        let final_decision = decision.clone();
        self.runs
            .update(run_id, move |run| {
                run.decision = Some(final_decision);
                run.advance(RunState::Persisted)
            })
            .await?;
        info!(
            "Run {run_id}: persisted {} missions and {} skills",
            applied.mission_ids.len(),
            applied.skill_ids.len()
        );

        Ok(ConfirmResponse {
            run_id,
            applied,
            decision,
        })
    }

    /// Abandons a run. Nothing was written, so there is nothing to undo.
    pub async fn discard(&self, run_id: Uuid) -> Result<AnalysisRun, AppError> {
        let consultant_id = self.runs.get(run_id).await?.consultant_id;
        let _guard = self.runs.lock_consultant(consultant_id).await;
        let (run, ()) = self
            .runs
            .update(run_id, |run| run.advance(RunState::Discarded))
            .await?;
        info!("Run {run_id}: discarded");
        Ok(run)
    }

    pub async fn get(&self, run_id: Uuid) -> Result<AnalysisRun, AppError> {
        Ok(self.runs.get(run_id).await?)
    }
}
