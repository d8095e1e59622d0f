//! Error types for the planner.
//!
//! Planning failures fall into a small closed set of kinds. Rule actions do not
//! catch their own failures; anything a rule raises surfaces as `RuleFailure`
//! and aborts the run. Reaching an iteration limit or a deadline is *not* an
//! error: the driver reports it as an `Exhausted` outcome on the returned plan
//! so that callers can decide whether to consume the partial result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    /// Malformed expression or node at entry: bad type inference, an index
    /// out of range, or an operation attempted in the wrong planner state.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No member of the goal subset satisfies the required convention.
    #[error("no implementation found for required traits [{0}]")]
    NoImplementationFound(String),

    /// A rule produced a node whose row type differs from the set it rewrites.
    #[error("rule '{rule}' produced an incompatible row type: {details}")]
    IncompatibleRewrite { rule: String, details: String },

    /// A rule action raised; the run is aborted.
    #[error("rule '{rule}' failed: {message}")]
    RuleFailure { rule: String, message: String },

    /// The caller-supplied cancel flag was observed.
    #[error("planning cancelled")]
    Cancelled,
}

impl PlannerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        PlannerError::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
