use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::audit::{AuditEntry, AuditTrail};
use super::review::{GoldenSetCandidate, ReviewContext};
use crate::agents::{CestResult, EnrichmentResult, NcmResult, ReconciliationResult};
use crate::config::WorkflowConfig;
use crate::error::FlowError;
use crate::product::ProductData;

/// Closed set of workflow stages.
///
/// Confirmation runs ENRICHMENT → NCM_VALIDATION → CEST_VALIDATION →
/// RECONCILIATION → CONFIRMED. Determination runs ENRICHMENT →
/// NCM_DETERMINATION → NCM_REFINEMENT → CEST_DETERMINATION → RECONCILIATION →
/// DETERMINED. MANUAL_REVIEW and ERROR can be entered from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Initialized,
    Enrichment,
    NcmValidation,
    NcmDetermination,
    NcmRefinement,
    CestValidation,
    CestDetermination,
    Reconciliation,
    Confirmed,
    Determined,
    ManualReview,
    Error,
}

impl WorkflowStatus {
    // Position along the pipeline. Parallel stages of the two flows share a rank.
    fn rank(self) -> u8 {
        match self {
            WorkflowStatus::Initialized => 0,
            WorkflowStatus::Enrichment => 1,
            WorkflowStatus::NcmValidation | WorkflowStatus::NcmDetermination => 2,
            WorkflowStatus::NcmRefinement => 3,
            WorkflowStatus::CestValidation | WorkflowStatus::CestDetermination => 4,
            WorkflowStatus::Reconciliation => 5,
            WorkflowStatus::Confirmed | WorkflowStatus::Determined => 6,
            WorkflowStatus::ManualReview | WorkflowStatus::Error => 7,
        }
    }

    /// MANUAL_REVIEW and ERROR: reachable from every non-terminal stage.
    pub fn is_exit(self) -> bool {
        matches!(self, WorkflowStatus::ManualReview | WorkflowStatus::Error)
    }

    pub fn is_terminal(self) -> bool {
        self.is_exit() || self.is_success()
    }

    pub fn is_success(self) -> bool {
        matches!(self, WorkflowStatus::Confirmed | WorkflowStatus::Determined)
    }

    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_exit() || next.rank() > self.rank()
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkflowStatus::Initialized => "INITIALIZED",
            WorkflowStatus::Enrichment => "ENRICHMENT",
            WorkflowStatus::NcmValidation => "NCM_VALIDATION",
            WorkflowStatus::NcmDetermination => "NCM_DETERMINATION",
            WorkflowStatus::NcmRefinement => "NCM_REFINEMENT",
            WorkflowStatus::CestValidation => "CEST_VALIDATION",
            WorkflowStatus::CestDetermination => "CEST_DETERMINATION",
            WorkflowStatus::Reconciliation => "RECONCILIATION",
            WorkflowStatus::Confirmed => "CONFIRMED",
            WorkflowStatus::Determined => "DETERMINED",
            WorkflowStatus::ManualReview => "MANUAL_REVIEW",
            WorkflowStatus::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// What a failed or inconclusive confirmation attempt left behind, handed to
/// the determination pass of a hybrid run as extra context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorAttempt {
    pub status: WorkflowStatus,
    pub ncm: Option<NcmResult>,
    pub cest: Option<CestResult>,
    pub confidence: Option<f64>,
    pub errors: Vec<String>,
}

/// Mutable state of a single product's workflow execution.
///
/// Owned by exactly one task. Status only moves forward along the pipeline
/// (or into MANUAL_REVIEW / ERROR), and the audit trail is append-only.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub session_id: String,
    pub job_id: Option<String>,
    pub product_id: String,
    pub tenant_id: String,
    pub product: ProductData,
    pub enrichment: Option<EnrichmentResult>,
    pub ncm: Option<NcmResult>,
    pub cest: Option<CestResult>,
    pub cest_skip_reason: Option<String>,
    pub reconciliation: Option<ReconciliationResult>,
    pub determination_quality: Option<f64>,
    pub review: Option<ReviewContext>,
    pub golden_set: Option<GoldenSetCandidate>,
    pub prior_attempt: Option<PriorAttempt>,
    pub errors: Vec<String>,
    pub config: WorkflowConfig,
    status: WorkflowStatus,
    audit: AuditTrail,
    deadline: Option<Instant>,
}

impl WorkflowState {
    pub fn new(product: ProductData, tenant_id: impl Into<String>, config: WorkflowConfig) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let product_id = product
            .display_id()
            .map(str::to_string)
            .unwrap_or_else(|| session_id.clone());
        Self {
            session_id,
            job_id: None,
            product_id,
            tenant_id: tenant_id.into(),
            product,
            enrichment: None,
            ncm: None,
            cest: None,
            cest_skip_reason: None,
            reconciliation: None,
            determination_quality: None,
            review: None,
            golden_set: None,
            prior_attempt: None,
            errors: Vec::new(),
            config,
            status: WorkflowStatus::Initialized,
            audit: AuditTrail::new(),
            deadline: None,
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Fresh state for the determination pass of a hybrid run. Identifiers,
    /// product snapshot and audit history carry over; results do not.
    pub fn fallback_from(attempt: &WorkflowState) -> Self {
        let mut audit = AuditTrail::new();
        audit.extend_from(&attempt.audit);

        Self {
            session_id: attempt.session_id.clone(),
            job_id: attempt.job_id.clone(),
            product_id: attempt.product_id.clone(),
            tenant_id: attempt.tenant_id.clone(),
            product: attempt.product.clone(),
            enrichment: None,
            ncm: None,
            cest: None,
            cest_skip_reason: None,
            reconciliation: None,
            determination_quality: None,
            review: None,
            golden_set: None,
            prior_attempt: Some(PriorAttempt {
                status: attempt.status,
                ncm: attempt.ncm.clone(),
                cest: attempt.cest.clone(),
                confidence: attempt.reconciliation.as_ref().map(|r| r.confidence),
                errors: attempt.errors.clone(),
            }),
            errors: Vec::new(),
            config: attempt.config.clone(),
            status: WorkflowStatus::Initialized,
            audit,
            deadline: None,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Moves to `next`, refusing backward moves and moves out of a terminal stage.
    pub fn advance(&mut self, next: WorkflowStatus) -> Result<(), FlowError> {
        if !self.status.can_transition_to(next) {
            return Err(FlowError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records a node failure and forces the ERROR exit. Partial results stay in place.
    pub fn fail(&mut self, stage: WorkflowStatus, message: impl Into<String>) {
        let message = message.into();
        self.audit.push(stage, format!("failed: {message}"));
        self.errors.push(message);
        if !self.status.is_terminal() {
            self.status = WorkflowStatus::Error;
        }
    }

    pub fn record(&mut self, step: WorkflowStatus, message: impl Into<String>) {
        self.audit.push(step, message);
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        self.audit.entries()
    }

    pub fn into_audit(self) -> AuditTrail {
        self.audit
    }

    /// Enriched description when available, the original otherwise.
    pub fn working_description(&self) -> &str {
        self.enrichment
            .as_ref()
            .map(|e| e.enriched_description.as_str())
            .unwrap_or(&self.product.description)
    }

    pub fn enrichment_confidence(&self) -> f64 {
        self.enrichment.as_ref().map(|e| e.confidence).unwrap_or(0.0)
    }

    pub fn ncm_confidence(&self) -> f64 {
        self.ncm.as_ref().map(|n| n.confidence).unwrap_or(0.0)
    }

    pub fn cest_confidence(&self) -> f64 {
        self.cest.as_ref().map(|c| c.confidence).unwrap_or(0.0)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn start_clock(&mut self) {
        self.deadline = Some(Instant::now() + self.config.flow_timeout());
    }
}
