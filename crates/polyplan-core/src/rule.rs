//! # Rules
//!
//! A rule is a pattern plus an action. The pattern is an operand tree over
//! node kinds; the action runs against a bound [`RuleCall`] and announces
//! equivalences through [`RuleCall::transform_to`], possibly several times
//! per firing — each call interns one more member into the root's set.
//!
//! Rules are registered with the planner while it is configuring and are
//! shared immutably once a run starts. Rule sets group the rules an adapter
//! contributes so they can be installed (and removed) together.

use crate::error::Result;
use crate::pattern::Operand;
use crate::planner::RuleCall;

/// A transformation or implementation rule.
///
/// Rules must be size-bounded: every `transform_to` either adds a member
/// with a new digest or is a no-op, and the digest space for a bounded input
/// is bounded. The engine does not enforce this; rule authors declare it by
/// construction.
pub trait Rule: Send + Sync {
    /// Unique name; used for removal, diagnostics, and failure reports.
    fn name(&self) -> &str;

    /// The pattern this rule matches.
    fn operand(&self) -> Operand;

    /// Fire against a bound match.
    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()>;
}

/// A named group of rules, as contributed by an adapter.
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<std::sync::Arc<dyn Rule>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), rules: Vec::new() }
    }

    pub fn add(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(std::sync::Arc::new(rule));
        self
    }
}
