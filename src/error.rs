use thiserror::Error;

use crate::state_machine::{WorkflowStatus, WorkflowType};

#[derive(Debug, Error)]
pub enum NcmFlowError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid or missing workflow configuration. Raised when a
/// [`WorkflowManager`](crate::orchestrator::WorkflowManager) is built, never mid-flow.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a finite value in [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("auto_approve_threshold ({auto_approve}) must not be below confidence_threshold ({confidence})")]
    AutoApproveBelowConfidence { auto_approve: f64, confidence: f64 },

    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("timeout_minutes must be at least 1")]
    ZeroTimeout,

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A call to an external classification agent failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("agent call exceeded the workflow deadline")]
    Timeout,

    #[error("malformed agent response: {0}")]
    MalformedResponse(String),

    #[error("agent failed: {0}")]
    Failed(String),
}

/// Failure of a single workflow node. Absorbed into the workflow state,
/// never propagated past the flow boundary.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{stage}: {source}")]
    Agent {
        stage: WorkflowStatus,
        #[source]
        source: AgentError,
    },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("{stage} requires {missing}")]
    MissingData {
        stage: WorkflowStatus,
        missing: &'static str,
    },

    #[error("{flow} flow has no {stage} node")]
    UnexpectedStage {
        flow: WorkflowType,
        stage: WorkflowStatus,
    },
}
