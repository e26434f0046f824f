//! Fiscal classification of merchandise into NCM and CEST codes.
//!
//! [`WorkflowManager`] picks a strategy per product (confirm the informed
//! classification, determine one from the description, or try both), drives
//! the matching state machine through the injected agents and aggregates
//! statistics. Batches run on a bounded pool, in the foreground or as
//! pollable background jobs.

pub mod agents;
pub mod cli;
pub mod config;
pub mod error;
pub mod flows;
pub mod jobs;
pub mod orchestrator;
pub mod product;
pub mod router;
pub mod state_machine;
pub mod stats;
pub mod text;
pub mod ui;

pub use agents::AgentSet;
pub use config::WorkflowConfig;
pub use error::NcmFlowError;
pub use orchestrator::WorkflowManager;
pub use product::ProductData;
pub use state_machine::{WorkflowResult, WorkflowStatus, WorkflowType};
