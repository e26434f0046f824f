use async_trait::async_trait;
use tracing::info;

use super::{
    FlowNodes, Transition, agent_error, drive, enrichment_node, error_node, invoke, start_node,
};
use crate::agents::{AgentContext, AgentSet, CestResult, NcmResult};
use crate::error::FlowError;
use crate::router::is_valid_ncm;
use crate::state_machine::{
    ReviewArea, ReviewContext, ReviewFinding, WorkflowState, WorkflowStatus, WorkflowType,
};
use crate::text::digits;

/// Validates a classification the product already carries.
///
/// ENRICHMENT → NCM_VALIDATION → CEST_VALIDATION → RECONCILIATION → CONFIRMED,
/// leaving for MANUAL_REVIEW as soon as a score misses its threshold.
#[derive(Debug, Clone)]
pub struct ConfirmationFlow {
    agents: AgentSet,
}

impl ConfirmationFlow {
    pub fn new(agents: AgentSet) -> Self {
        Self { agents }
    }

    pub async fn run(&self, state: WorkflowState) -> WorkflowState {
        drive(self, state).await
    }

    async fn validate_ncm(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::NcmValidation;
        let informed = match state.product.informed_ncm.as_deref() {
            Some(ncm) if is_valid_ncm(ncm) => digits(ncm),
            Some(_) => {
                return Err(FlowError::MissingData {
                    stage,
                    missing: "a well-formed informed NCM",
                });
            }
            None => {
                return Err(FlowError::MissingData {
                    stage,
                    missing: "an informed NCM",
                });
            }
        };

        let context = AgentContext::for_stage(state, stage);
        let verdict = invoke(
            state.deadline(),
            stage,
            self.agents
                .ncm
                .classify_ncm(state.working_description(), Some(informed.as_str()), &context),
        )
        .await?
        .normalized()
        .map_err(agent_error(stage))?;

        // The agent may rank the informed code anywhere, or not at all.
        let confidence = verdict.confidence_for(&informed).unwrap_or(0.0);
        let justification = if verdict.code == informed {
            verdict.justification.clone()
        } else {
            format!(
                "informed NCM {informed} differs from the suggested {} ({:.2})",
                verdict.code, verdict.confidence
            )
        };
        let threshold = state.config.confidence_threshold;
        state.record(
            stage,
            format!("informed NCM {informed} validated with confidence {confidence:.2} (threshold {threshold:.2})"),
        );
        state.ncm = Some(NcmResult {
            code: informed,
            confidence,
            justification,
            candidates: verdict.candidates,
        });

        if confidence < threshold {
            Ok(Transition::Next(WorkflowStatus::ManualReview))
        } else {
            Ok(Transition::Next(WorkflowStatus::CestValidation))
        }
    }

    async fn validate_cest(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::CestValidation;
        let ncm_code = match &state.ncm {
            Some(ncm) => ncm.code.clone(),
            None => {
                return Err(FlowError::MissingData {
                    stage,
                    missing: "a validated NCM",
                });
            }
        };
        let informed = state.product.informed_cest.as_deref().map(digits);

        let context = AgentContext::for_stage(state, stage);
        let verdict = invoke(
            state.deadline(),
            stage,
            self.agents.cest.classify_cest(
                state.working_description(),
                &ncm_code,
                informed.as_deref(),
                &context,
            ),
        )
        .await?
        .normalized()
        .map_err(agent_error(stage))?;

        // An informed CEST the agent disagrees with is scored by the agent's
        // confidence in its own answer.
        let (code, confidence) = match informed {
            Some(informed) if verdict.code.as_deref() == Some(informed.as_str()) => {
                (Some(informed), verdict.confidence)
            }
            Some(informed) => (Some(informed), 1.0 - verdict.confidence),
            None => (verdict.code.clone(), verdict.confidence),
        };
        let threshold = state.config.cest_confidence_threshold;
        state.record(
            stage,
            format!(
                "CEST {} validated with confidence {confidence:.2} (threshold {threshold:.2})",
                code.as_deref().unwrap_or("not applicable")
            ),
        );
        state.cest = Some(CestResult {
            code,
            confidence,
            justification: verdict.justification,
        });

        if confidence < threshold {
            Ok(Transition::Next(WorkflowStatus::ManualReview))
        } else {
            Ok(Transition::Next(WorkflowStatus::Reconciliation))
        }
    }

    async fn reconcile(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::Reconciliation;
        let Some(ncm) = state.ncm.clone() else {
            return Err(FlowError::MissingData {
                stage,
                missing: "a validated NCM",
            });
        };

        let context = AgentContext::for_stage(state, stage);
        let outcome = invoke(
            state.deadline(),
            stage,
            self.agents
                .reconciler
                .reconcile(&ncm, state.cest.as_ref(), &context),
        )
        .await?
        .normalized()
        .map_err(agent_error(stage))?;

        let threshold = state.config.confidence_threshold;
        let needs_review = outcome.confidence < threshold || outcome.requires_review;
        state.record(
            stage,
            format!(
                "reconciled NCM {} / CEST {} with confidence {:.2}{}",
                outcome.final_ncm,
                outcome.final_cest.as_deref().unwrap_or("-"),
                outcome.confidence,
                if outcome.requires_review { ", flagged for review" } else { "" }
            ),
        );
        state.reconciliation = Some(outcome);

        if needs_review {
            Ok(Transition::Next(WorkflowStatus::ManualReview))
        } else {
            Ok(Transition::Next(WorkflowStatus::Confirmed))
        }
    }

    fn review(&self, state: &mut WorkflowState) -> Transition {
        let findings = review_findings(state);
        let review = ReviewContext::from_findings(&findings);
        info!(session = %state.session_id, "confirmation needs review: {}", review.reason);
        state.record(
            WorkflowStatus::ManualReview,
            format!("manual review: {}", review.reason),
        );
        state.review = Some(review);
        Transition::Halt
    }
}

#[async_trait]
impl FlowNodes for ConfirmationFlow {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::Confirmation
    }

    async fn run_node(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        match state.status() {
            WorkflowStatus::Initialized => Ok(start_node(state, WorkflowType::Confirmation)),
            WorkflowStatus::Enrichment => {
                enrichment_node(&self.agents, state).await?;
                Ok(Transition::Next(WorkflowStatus::NcmValidation))
            }
            WorkflowStatus::NcmValidation => self.validate_ncm(state).await,
            WorkflowStatus::CestValidation => self.validate_cest(state).await,
            WorkflowStatus::Reconciliation => self.reconcile(state).await,
            WorkflowStatus::Confirmed => {
                let ncm = state.reconciliation.as_ref().map(|r| r.final_ncm.clone());
                state.record(
                    WorkflowStatus::Confirmed,
                    format!("classification confirmed: NCM {}", ncm.as_deref().unwrap_or("-")),
                );
                Ok(Transition::Halt)
            }
            WorkflowStatus::ManualReview => Ok(self.review(state)),
            WorkflowStatus::Error => Ok(error_node(state)),
            other => Err(FlowError::UnexpectedStage {
                flow: WorkflowType::Confirmation,
                stage: other,
            }),
        }
    }
}

fn review_findings(state: &WorkflowState) -> Vec<ReviewFinding> {
    let config = &state.config;
    let mut findings = Vec::new();
    if let Some(ncm) = &state.ncm {
        if ncm.confidence < config.confidence_threshold {
            findings.push(ReviewFinding::below(
                ReviewArea::Ncm,
                "NCM validation confidence",
                ncm.confidence,
                config.confidence_threshold,
            ));
        }
    }
    if let Some(cest) = &state.cest {
        if cest.confidence < config.cest_confidence_threshold {
            findings.push(ReviewFinding::below(
                ReviewArea::Cest,
                "CEST validation confidence",
                cest.confidence,
                config.cest_confidence_threshold,
            ));
        }
    }
    if let Some(outcome) = &state.reconciliation {
        if outcome.confidence < config.confidence_threshold {
            findings.push(ReviewFinding::below(
                ReviewArea::Reconciliation,
                "reconciliation confidence",
                outcome.confidence,
                config.confidence_threshold,
            ));
        }
        if outcome.requires_review {
            findings.push(ReviewFinding::flagged(
                ReviewArea::Reconciliation,
                "reconciler flagged the NCM/CEST pair",
            ));
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedAgents;
    use crate::config::WorkflowConfig;
    use crate::product::ProductData;

    fn dipirona() -> ProductData {
        ProductData::new("DIPIRONA SODICA 500MG COMPRIMIDO").with_ncm("30049069")
    }

    async fn run(agents: ScriptedAgents, product: ProductData) -> WorkflowState {
        let (set, _) = agents.into_set();
        let state = WorkflowState::new(product, "tenant-1", WorkflowConfig::default());
        ConfirmationFlow::new(set).run(state).await
    }

    #[tokio::test]
    async fn confirms_strong_classification() {
        let agents = ScriptedAgents::new("30049069", 0.9, 0.9);
        let (set, calls) = agents.into_set();
        let state = WorkflowState::new(dipirona(), "tenant-1", WorkflowConfig::default());
        let state = ConfirmationFlow::new(set).run(state).await;

        assert_eq!(state.status(), WorkflowStatus::Confirmed);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["enrich", "classify_ncm", "classify_cest", "reconcile"]
        );
        // start, enrichment, ncm, cest, reconciliation, completion
        assert_eq!(state.audit_trail().len(), 6);
        let reconciliation = state.reconciliation.as_ref().unwrap();
        assert!((reconciliation.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ncm_threshold_boundary() {
        let below = run(ScriptedAgents::new("30049069", 0.69, 0.9), dipirona()).await;
        assert_eq!(below.status(), WorkflowStatus::ManualReview);
        let review = below.review.as_ref().unwrap();
        assert_eq!(review.low_confidence_areas, vec![ReviewArea::Ncm]);
        assert!(review.reason.contains("NCM validation confidence 0.69"));

        let at = run(ScriptedAgents::new("30049069", 0.70, 0.9), dipirona()).await;
        assert_eq!(at.status(), WorkflowStatus::Confirmed);
    }

    #[tokio::test]
    async fn weak_cest_goes_to_review() {
        let state = run(ScriptedAgents::new("30049069", 0.85, 0.3), dipirona()).await;
        assert_eq!(state.status(), WorkflowStatus::ManualReview);
        assert!(state.reconciliation.is_none());
        let review = state.review.unwrap();
        assert_eq!(review.low_confidence_areas, vec![ReviewArea::Cest]);
        assert!(review.reason.contains("CEST validation confidence 0.30"));
    }

    #[tokio::test]
    async fn informed_code_missing_from_verdict_scores_zero() {
        let agents = ScriptedAgents::new("30042099", 0.95, 0.9);
        let state = run(agents, dipirona()).await;
        assert_eq!(state.status(), WorkflowStatus::ManualReview);
        let ncm = state.ncm.unwrap();
        assert_eq!(ncm.code, "30049069");
        assert_eq!(ncm.confidence, 0.0);
        assert!(ncm.justification.contains("30042099"));
    }

    #[tokio::test]
    async fn disputed_cest_is_scored_against_the_agent() {
        // Agent answers 1300100 with 0.8; the product claims another code.
        let product = dipirona().with_cest("2800100");
        let state = run(ScriptedAgents::new("30049069", 0.9, 0.8), product).await;
        let cest = state.cest.as_ref().unwrap();
        assert_eq!(cest.code.as_deref(), Some("2800100"));
        assert!((cest.confidence - 0.2).abs() < 1e-9);
        assert_eq!(state.status(), WorkflowStatus::ManualReview);
    }

    #[tokio::test]
    async fn reconciler_flag_routes_to_review() {
        let mut agents = ScriptedAgents::new("30049069", 0.9, 0.9);
        agents.reconcile_requires_review = true;
        let state = run(agents, dipirona()).await;
        assert_eq!(state.status(), WorkflowStatus::ManualReview);
        let review = state.review.unwrap();
        assert_eq!(review.low_confidence_areas, vec![ReviewArea::Reconciliation]);
    }

    #[tokio::test]
    async fn agent_failure_keeps_partial_results() {
        let mut agents = ScriptedAgents::new("30049069", 0.9, 0.9);
        agents.fail_ncm = true;
        let state = run(agents, dipirona()).await;

        assert_eq!(state.status(), WorkflowStatus::Error);
        assert!(state.enrichment.is_some());
        assert!(state.ncm.is_none());
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].starts_with("NCM_VALIDATION: agent failed"));
        let steps: Vec<_> = state.audit_trail().iter().map(|e| e.step).collect();
        assert_eq!(
            steps,
            vec![
                WorkflowStatus::Initialized,
                WorkflowStatus::Enrichment,
                WorkflowStatus::NcmValidation,
                WorkflowStatus::Error,
            ]
        );
    }

    #[tokio::test]
    async fn missing_informed_ncm_is_an_error() {
        let product = ProductData::new("DIPIRONA SODICA 500MG COMPRIMIDO");
        let state = run(ScriptedAgents::new("30049069", 0.9, 0.9), product).await;
        assert_eq!(state.status(), WorkflowStatus::Error);
        assert!(state.errors[0].contains("requires an informed NCM"));
    }

    #[tokio::test]
    async fn audit_timestamps_never_decrease() {
        let state = run(ScriptedAgents::new("30049069", 0.9, 0.9), dipirona()).await;
        let trail = state.audit_trail();
        assert!(trail.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_agent_hits_deadline() {
        let mut agents = ScriptedAgents::new("30049069", 0.9, 0.9);
        agents.hang_cest = true;
        let state = run(agents, dipirona()).await;
        assert_eq!(state.status(), WorkflowStatus::Error);
        assert!(state.errors[0].contains("deadline"));
        assert!(state.ncm.is_some());
    }
}
