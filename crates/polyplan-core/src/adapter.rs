//! # Adapter Contract
//!
//! Storage and engine plugins integrate through this registration
//! interface: an adapter declares its convention, contributes operator
//! definitions to the operator table, and pushes its rules (implementation
//! rules that land logical kinds in its convention, plus conversion routes
//! out of it) into the planner. Installation happens while the planner is
//! configuring; everything an adapter registers is immutable once a run
//! starts.

use crate::error::Result;
use crate::planner::Planner;
use crate::rex::OperatorTable;
use crate::traits::ConventionInfo;

pub trait Adapter {
    fn name(&self) -> &str;

    /// The convention this adapter's physical operators carry.
    fn convention(&self) -> ConventionInfo;

    /// Contribute operator definitions (functions the engine evaluates
    /// natively). Most adapters have none beyond the builtins.
    fn register_operators(&self, _table: &mut OperatorTable) {}

    /// Push this adapter's rules and conversion routes into the planner.
    fn register_rules(&self, planner: &mut Planner) -> Result<()>;
}
