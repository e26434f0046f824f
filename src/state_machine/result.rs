use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audit::AuditEntry;
use super::review::{GoldenSetCandidate, ReviewContext};
use super::state::{WorkflowState, WorkflowStatus};
use crate::agents::NcmCandidate;
use crate::product::ProductData;

/// Strategy used to classify a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
    /// Validate an informed classification.
    Confirmation,
    /// Derive a classification with no usable prior input.
    Determination,
    /// Confirm first, fall back to determination.
    Hybrid,
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowType::Confirmation => write!(f, "CONFIRMATION"),
            WorkflowType::Determination => write!(f, "DETERMINATION"),
            WorkflowType::Hybrid => write!(f, "HYBRID"),
        }
    }
}

/// Classification outcome, including whatever partial data a failed run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub ncm: Option<String>,
    pub ncm_confidence: Option<f64>,
    pub ncm_justification: Option<String>,
    pub candidates: Vec<NcmCandidate>,
    pub cest: Option<String>,
    pub cest_confidence: Option<f64>,
    pub cest_justification: Option<String>,
    pub cest_skip_reason: Option<String>,
    pub enriched_description: Option<String>,
    pub enrichment_confidence: Option<f64>,
    pub reconciliation_confidence: Option<f64>,
    pub determination_quality: Option<f64>,
    pub auto_approved: bool,
    pub golden_set_candidate: bool,
    pub golden_set: Option<GoldenSetCandidate>,
    pub review: Option<ReviewContext>,
}

/// Immutable outcome of one product's workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub session_id: String,
    pub product_id: String,
    pub tenant_id: String,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    pub final_result: FinalResult,
    pub confidence: f64,
    pub requires_review: bool,
    pub execution_time_ms: u64,
    pub audit_trail: Vec<AuditEntry>,
    pub errors: Vec<String>,
    pub error: Option<String>,
}

impl WorkflowResult {
    pub fn from_state(workflow_type: WorkflowType, state: WorkflowState, elapsed: Duration) -> Self {
        let status = state.status();
        let confidence = match status {
            WorkflowStatus::Error => 0.0,
            _ => state
                .reconciliation
                .as_ref()
                .map(|r| r.confidence)
                .or_else(|| state.ncm.as_ref().map(|n| n.confidence))
                .unwrap_or(0.0),
        };
        let auto_approved =
            status.is_success() && confidence >= state.config.auto_approve_threshold;

        let (ncm, cest) = match &state.reconciliation {
            Some(r) => (Some(r.final_ncm.clone()), r.final_cest.clone()),
            None => (
                state.ncm.as_ref().map(|n| n.code.clone()),
                state.cest.as_ref().and_then(|c| c.code.clone()),
            ),
        };

        let final_result = FinalResult {
            ncm,
            ncm_confidence: state.ncm.as_ref().map(|n| n.confidence),
            ncm_justification: state.ncm.as_ref().map(|n| n.justification.clone()),
            candidates: state
                .ncm
                .as_ref()
                .map(|n| n.candidates.clone())
                .unwrap_or_default(),
            cest,
            cest_confidence: state.cest.as_ref().map(|c| c.confidence),
            cest_justification: state.cest.as_ref().map(|c| c.justification.clone()),
            cest_skip_reason: state.cest_skip_reason.clone(),
            enriched_description: state
                .enrichment
                .as_ref()
                .map(|e| e.enriched_description.clone()),
            enrichment_confidence: state.enrichment.as_ref().map(|e| e.confidence),
            reconciliation_confidence: state.reconciliation.as_ref().map(|r| r.confidence),
            determination_quality: state.determination_quality,
            auto_approved,
            golden_set_candidate: state.golden_set.is_some(),
            golden_set: state.golden_set.clone(),
            review: state.review.clone(),
        };

        let error = match status {
            WorkflowStatus::Error => Some(
                state
                    .errors
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "workflow ended in ERROR".to_string()),
            ),
            _ => None,
        };

        Self {
            session_id: state.session_id.clone(),
            product_id: state.product_id.clone(),
            tenant_id: state.tenant_id.clone(),
            workflow_type,
            status,
            final_result,
            confidence,
            requires_review: !status.is_success(),
            execution_time_ms: duration_ms(elapsed),
            errors: state.errors.clone(),
            error,
            audit_trail: state.into_audit().into_entries(),
        }
    }

    /// Result for a run that failed outside any flow node.
    pub fn failure(
        workflow_type: WorkflowType,
        product: &ProductData,
        tenant_id: &str,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        let message = message.into();
        let session_id = uuid::Uuid::new_v4().to_string();
        Self {
            product_id: product
                .display_id()
                .map(str::to_string)
                .unwrap_or_else(|| session_id.clone()),
            session_id,
            tenant_id: tenant_id.to_string(),
            workflow_type,
            status: WorkflowStatus::Error,
            final_result: FinalResult::default(),
            confidence: 0.0,
            requires_review: true,
            execution_time_ms: duration_ms(elapsed),
            audit_trail: Vec::new(),
            errors: vec![message.clone()],
            error: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
