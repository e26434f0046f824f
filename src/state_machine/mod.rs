mod audit;
mod result;
mod review;
mod state;

pub use audit::{AuditEntry, AuditTrail};
pub use result::{FinalResult, WorkflowResult, WorkflowType};
pub use review::{GoldenSetCandidate, ReviewArea, ReviewContext, ReviewFinding};
pub use state::{PriorAttempt, WorkflowState, WorkflowStatus};
