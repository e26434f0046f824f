use async_trait::async_trait;
use tracing::info;

use super::{
    FlowNodes, Transition, agent_error, drive, enrichment_node, error_node, invoke, start_node,
};
use crate::agents::{AgentContext, AgentSet, EnrichmentResult, NcmResult};
use crate::error::FlowError;
use crate::state_machine::{
    GoldenSetCandidate, ReviewArea, ReviewContext, ReviewFinding, WorkflowState, WorkflowStatus,
    WorkflowType,
};

/// Below this the best NCM candidate is not worth refining, nor a CEST lookup.
pub const MIN_NCM_CONFIDENCE: f64 = 0.3;

/// Minimum determination quality for an automatic result.
pub const MIN_DETERMINATION_QUALITY: f64 = 0.6;

/// Determination quality above which a result is offered to the golden set.
pub const GOLDEN_SET_QUALITY: f64 = 0.8;

const MAX_EVIDENCE_BONUS: f64 = 0.15;

pub(crate) const INSUFFICIENT_NCM: &str = "insufficient NCM";

/// Derives an NCM/CEST classification from the description alone.
///
/// ENRICHMENT → NCM_DETERMINATION → [NCM_REFINEMENT] → CEST_DETERMINATION →
/// RECONCILIATION → DETERMINED.
#[derive(Debug, Clone)]
pub struct DeterminationFlow {
    agents: AgentSet,
}

impl DeterminationFlow {
    pub fn new(agents: AgentSet) -> Self {
        Self { agents }
    }

    pub async fn run(&self, state: WorkflowState) -> WorkflowState {
        drive(self, state).await
    }

    async fn determine_ncm(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::NcmDetermination;
        let context = AgentContext::for_stage(state, stage);
        let result = invoke(
            state.deadline(),
            stage,
            self.agents
                .ncm
                .classify_ncm(state.working_description(), None, &context),
        )
        .await?
        .normalized()
        .map_err(agent_error(stage))?
        .with_top_choice();

        let top = result.confidence;
        state.record(
            stage,
            format!(
                "best NCM {} with confidence {top:.2} out of {} candidate(s)",
                result.code,
                result.candidates.len()
            ),
        );
        state.ncm = Some(result);

        let next = if top < MIN_NCM_CONFIDENCE {
            WorkflowStatus::ManualReview
        } else if top < state.config.confidence_threshold {
            WorkflowStatus::NcmRefinement
        } else {
            WorkflowStatus::CestDetermination
        };
        Ok(Transition::Next(next))
    }

    /// Asks the classifier to rescore its own candidates and adds a bounded
    /// bonus for supporting enrichment evidence. The rescored answer replaces
    /// the first one even when it is weaker.
    async fn refine_ncm(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::NcmRefinement;
        let Some(prior) = state.ncm.clone() else {
            return Err(FlowError::MissingData {
                stage,
                missing: "NCM candidates",
            });
        };

        let context = AgentContext::for_stage(state, stage);
        let rescored = invoke(
            state.deadline(),
            stage,
            self.agents.ncm.classify_ncm(
                state.working_description(),
                Some(prior.code.as_str()),
                &context,
            ),
        )
        .await?
        .normalized()
        .map_err(agent_error(stage))?
        .with_top_choice();

        let mut chosen = rescored;
        let bonus = state
            .enrichment
            .as_ref()
            .map(|e| evidence_bonus(&chosen.code, e))
            .unwrap_or(0.0);
        apply_bonus(&mut chosen, bonus);

        state.record(
            stage,
            format!(
                "refined NCM {} -> {} ({:.2} -> {:.2}, evidence bonus {bonus:.2})",
                prior.code, chosen.code, prior.confidence, chosen.confidence
            ),
        );
        state.ncm = Some(chosen);
        Ok(Transition::Next(WorkflowStatus::CestDetermination))
    }

    async fn determine_cest(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::CestDetermination;
        let Some(ncm) = state.ncm.clone() else {
            return Err(FlowError::MissingData {
                stage,
                missing: "a determined NCM",
            });
        };

        if ncm.confidence < MIN_NCM_CONFIDENCE {
            state.record(
                stage,
                format!(
                    "CEST skipped: {INSUFFICIENT_NCM} ({:.2} < {MIN_NCM_CONFIDENCE:.2})",
                    ncm.confidence
                ),
            );
            state.cest_skip_reason = Some(INSUFFICIENT_NCM.to_string());
            return Ok(Transition::Next(WorkflowStatus::Reconciliation));
        }

        let context = AgentContext::for_stage(state, stage);
        let result = invoke(
            state.deadline(),
            stage,
            self.agents
                .cest
                .classify_cest(state.working_description(), &ncm.code, None, &context),
        )
        .await?
        .normalized()
        .map_err(agent_error(stage))?;

        state.record(
            stage,
            format!(
                "CEST {} for NCM {} with confidence {:.2}",
                result.code.as_deref().unwrap_or("not applicable"),
                ncm.code,
                result.confidence
            ),
        );
        state.cest = Some(result);
        Ok(Transition::Next(WorkflowStatus::Reconciliation))
    }

    async fn reconcile(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        let stage = WorkflowStatus::Reconciliation;
        let Some(ncm) = state.ncm.clone() else {
            return Err(FlowError::MissingData {
                stage,
                missing: "a determined NCM",
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

        let quality = determination_quality(
            state.enrichment_confidence(),
            ncm.confidence,
            state.cest_confidence(),
            outcome.confidence,
        );
        let needs_review = outcome.confidence < state.config.confidence_threshold
            || quality < MIN_DETERMINATION_QUALITY
            || outcome.requires_review;

        state.record(
            stage,
            format!(
                "reconciled NCM {} / CEST {} with confidence {:.2}, determination quality {quality:.2}",
                outcome.final_ncm,
                outcome.final_cest.as_deref().unwrap_or("-"),
                outcome.confidence
            ),
        );
        state.reconciliation = Some(outcome);
        state.determination_quality = Some(quality);

        if needs_review {
            Ok(Transition::Next(WorkflowStatus::ManualReview))
        } else {
            Ok(Transition::Next(WorkflowStatus::Determined))
        }
    }

    fn complete(&self, state: &mut WorkflowState) -> Transition {
        let quality = state.determination_quality.unwrap_or(0.0);
        let golden = match &state.reconciliation {
            Some(outcome) if quality > GOLDEN_SET_QUALITY => Some(GoldenSetCandidate {
                description: state.working_description().to_string(),
                ncm: outcome.final_ncm.clone(),
                cest: outcome.final_cest.clone(),
                rationale: state
                    .ncm
                    .as_ref()
                    .map(|n| n.justification.clone())
                    .unwrap_or_default(),
                quality_score: quality,
            }),
            _ => None,
        };

        let message = match &golden {
            Some(g) => format!(
                "classification determined: NCM {}, golden-set candidate (quality {quality:.2})",
                g.ncm
            ),
            None => format!(
                "classification determined: NCM {}",
                state
                    .reconciliation
                    .as_ref()
                    .map(|r| r.final_ncm.as_str())
                    .unwrap_or("-")
            ),
        };
        state.record(WorkflowStatus::Determined, message);
        state.golden_set = golden;
        Transition::Halt
    }

    fn review(&self, state: &mut WorkflowState) -> Transition {
        let findings = review_findings(state);
        let review = ReviewContext::from_findings(&findings);
        info!(session = %state.session_id, "determination needs review: {}", review.reason);
        state.record(
            WorkflowStatus::ManualReview,
            format!("manual review: {}", review.reason),
        );
        state.review = Some(review);
        Transition::Halt
    }
}

#[async_trait]
impl FlowNodes for DeterminationFlow {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::Determination
    }

    async fn run_node(&self, state: &mut WorkflowState) -> Result<Transition, FlowError> {
        match state.status() {
            WorkflowStatus::Initialized => Ok(start_node(state, WorkflowType::Determination)),
            WorkflowStatus::Enrichment => {
                enrichment_node(&self.agents, state).await?;
                Ok(Transition::Next(WorkflowStatus::NcmDetermination))
            }
            WorkflowStatus::NcmDetermination => self.determine_ncm(state).await,
            WorkflowStatus::NcmRefinement => self.refine_ncm(state).await,
            WorkflowStatus::CestDetermination => self.determine_cest(state).await,
            WorkflowStatus::Reconciliation => self.reconcile(state).await,
            WorkflowStatus::Determined => Ok(self.complete(state)),
            WorkflowStatus::ManualReview => Ok(self.review(state)),
            WorkflowStatus::Error => Ok(error_node(state)),
            other => Err(FlowError::UnexpectedStage {
                flow: WorkflowType::Determination,
                stage: other,
            }),
        }
    }
}

/// `0.2·enrichment + 0.4·ncm + 0.3·cest + 0.1·final`, clamped to [0, 1].
pub fn determination_quality(enrichment: f64, ncm: f64, cest: f64, reconciled: f64) -> f64 {
    (0.2 * enrichment + 0.4 * ncm + 0.3 * cest + 0.1 * reconciled).clamp(0.0, 1.0)
}

/// Support the enrichment stage lends to `code`: similar products sharing the
/// code or its heading, and regulatory hints naming its chapter.
fn evidence_bonus(code: &str, enrichment: &EnrichmentResult) -> f64 {
    let heading = code.get(..4).unwrap_or(code);
    let chapter = code.get(..2).unwrap_or(code);

    let mut bonus = 0.0;
    for similar in &enrichment.similar_products {
        if similar.ncm == code {
            bonus += 0.15 * similar.similarity;
        } else if similar.ncm.starts_with(heading) {
            bonus += 0.05 * similar.similarity;
        }
    }
    let chapter_tag = format!("Chapter {chapter} ");
    if enrichment
        .regulatory_hints
        .iter()
        .any(|h| h.starts_with(&chapter_tag))
    {
        bonus += 0.02;
    }
    bonus.min(MAX_EVIDENCE_BONUS)
}

fn apply_bonus(result: &mut NcmResult, bonus: f64) {
    if bonus <= 0.0 {
        return;
    }
    result.confidence = (result.confidence + bonus).min(1.0);
    let code = result.code.clone();
    let confidence = result.confidence;
    if let Some(candidate) = result.candidates.iter_mut().find(|c| c.code == code) {
        candidate.confidence = confidence;
    }
    result
        .candidates
        .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}

fn review_findings(state: &WorkflowState) -> Vec<ReviewFinding> {
    let threshold = state.config.confidence_threshold;
    let mut findings = Vec::new();

    if let Some(ncm) = &state.ncm {
        if ncm.confidence < MIN_NCM_CONFIDENCE {
            findings.push(ReviewFinding::below(
                ReviewArea::Ncm,
                "NCM determination confidence",
                ncm.confidence,
                MIN_NCM_CONFIDENCE,
            ));
        } else if ncm.confidence < threshold {
            findings.push(ReviewFinding::below(
                ReviewArea::Ncm,
                "NCM determination confidence",
                ncm.confidence,
                threshold,
            ));
        }
    }
    if let Some(outcome) = &state.reconciliation {
        if outcome.confidence < threshold {
            findings.push(ReviewFinding::below(
                ReviewArea::Reconciliation,
                "reconciliation confidence",
                outcome.confidence,
                threshold,
            ));
        }
        if outcome.requires_review {
            findings.push(ReviewFinding::flagged(
                ReviewArea::Reconciliation,
                "reconciler flagged the NCM/CEST pair",
            ));
        }
    }
    if let Some(quality) = state.determination_quality {
        if quality < MIN_DETERMINATION_QUALITY {
            findings.push(ReviewFinding::below(
                ReviewArea::DeterminationQuality,
                "determination quality",
                quality,
                MIN_DETERMINATION_QUALITY,
            ));
        }
    }
    findings
}
