//! Shared state-machine driver for the classification flows.
//!
//! A flow is a set of nodes, one per [`WorkflowStatus`]. The driver runs the
//! node for the current status, applies the transition it returns and stops
//! when a terminal node halts. A node error never leaves the driver: it is
//! recorded on the state, which is then routed to the ERROR node.

mod confirmation;
mod determination;

use std::future::Future;

use async_trait::async_trait;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::agents::{AgentContext, AgentSet};
use crate::error::{AgentError, FlowError};
use crate::state_machine::{WorkflowState, WorkflowStatus, WorkflowType};

pub use confirmation::ConfirmationFlow;
pub use determination::DeterminationFlow;

/// Outcome of running one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Next(WorkflowStatus),
    Halt,
}

#[async_trait]
pub(crate) trait FlowNodes: Send + Sync {
    fn workflow_type(&self) -> WorkflowType;

    async fn run_node(&self, state: &mut WorkflowState) -> Result<Transition, FlowError>;
}

/// Runs `flow` to a terminal status, starting the per-run deadline clock.
pub(crate) async fn drive<F>(flow: &F, mut state: WorkflowState) -> WorkflowState
where
    F: FlowNodes + ?Sized,
{
    state.start_clock();
    loop {
        let stage = state.status();
        match flow.run_node(&mut state).await {
            Ok(Transition::Halt) => break,
            Ok(Transition::Next(next)) => {
                debug!(
                    session = %state.session_id,
                    flow = %flow.workflow_type(),
                    "{stage} -> {next}"
                );
                if let Err(e) = state.advance(next) {
                    state.fail(stage, e.to_string());
                }
            }
            Err(e) => {
                warn!(
                    session = %state.session_id,
                    flow = %flow.workflow_type(),
                    "node {stage} failed: {e}"
                );
                if stage.is_terminal() {
                    break;
                }
                state.fail(stage, e.to_string());
            }
        }
    }
    state
}

/// Awaits an agent call, bounded by the run deadline.
pub(crate) async fn invoke<T, F>(
    deadline: Option<Instant>,
    stage: WorkflowStatus,
    call: F,
) -> Result<T, FlowError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    let outcome = match deadline {
        Some(deadline) => timeout_at(deadline, call)
            .await
            .unwrap_or(Err(AgentError::Timeout)),
        None => call.await,
    };
    outcome.map_err(|source| FlowError::Agent { stage, source })
}

pub(crate) fn agent_error(stage: WorkflowStatus) -> impl Fn(AgentError) -> FlowError {
    move |source| FlowError::Agent { stage, source }
}

pub(crate) fn start_node(state: &mut WorkflowState, workflow_type: WorkflowType) -> Transition {
    let message = match &state.prior_attempt {
        Some(prior) => format!(
            "{workflow_type} started for product {} after {} confirmation attempt",
            state.product_id, prior.status
        ),
        None => format!("{workflow_type} started for product {}", state.product_id),
    };
    state.record(WorkflowStatus::Initialized, message);
    Transition::Next(WorkflowStatus::Enrichment)
}

/// Enrichment is the same in both flows; the caller picks the next stage.
pub(crate) async fn enrichment_node(
    agents: &AgentSet,
    state: &mut WorkflowState,
) -> Result<(), FlowError> {
    let stage = WorkflowStatus::Enrichment;
    let context = AgentContext::for_stage(state, stage);
    let result = invoke(
        state.deadline(),
        stage,
        agents.enrichment.enrich(&state.product.description, &context),
    )
    .await?
    .normalized()
    .map_err(agent_error(stage))?;

    state.record(
        stage,
        format!(
            "enriched description \"{}\" (confidence {:.2}, {} similar products)",
            result.enriched_description,
            result.confidence,
            result.similar_products.len()
        ),
    );
    state.enrichment = Some(result);
    Ok(())
}

pub(crate) fn error_node(state: &mut WorkflowState) -> Transition {
    let message = match state.errors.last() {
        Some(last) => format!("workflow stopped with {} error(s): {last}", state.errors.len()),
        None => "workflow stopped".to_string(),
    };
    state.record(WorkflowStatus::Error, message);
    Transition::Halt
}
