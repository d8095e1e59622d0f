//! # Remote Pushdown Engine
//!
//! Models an external store (a JDBC database, a document store) that can
//! evaluate scans, filters, and projections on its own side. Tables tagged
//! with this adapter's source name scan in the `REMOTE` convention; filters
//! and projections over remote inputs stay remote. The registered
//! conversion route `REMOTE → ENUMERABLE` is where rows cross into the
//! in-process engine — the converter pays the transfer, so the planner
//! prefers plans that push work below it.

use crate::enumerable::ENUMERABLE;
use polyplan_core::adapter::Adapter;
use polyplan_core::algebra::{AlgKind, AlgNode, AlgOp};
use polyplan_core::cost::{Cost, CostModel, DefaultCostModel};
use polyplan_core::pattern::Operand;
use polyplan_core::rule::{Rule, RuleSet};
use polyplan_core::stats::Statistics;
use polyplan_core::traits::{Convention, ConventionInfo, Trait, TraitSet};
use polyplan_core::{Planner, Result, RuleCall};

pub const REMOTE: Convention = Convention("REMOTE");

fn is_logical(node: &AlgNode) -> bool {
    node.traits.convention().is_none()
}

fn remote_traits(call: &RuleCall<'_>) -> TraitSet {
    call.default_traits().replace(Trait::Convention(REMOTE))
}

/// Scan of a table owned by this adapter's source.
pub struct RemoteScanRule {
    pub source: String,
}

impl Rule for RemoteScanRule {
    fn name(&self) -> &str {
        "RemoteScan"
    }

    fn operand(&self) -> Operand {
        Operand::of(AlgKind::Scan).filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Scan { table, .. } = &call.node(0).op else {
            return Ok(());
        };
        if call.catalog().table_source(table).as_deref() != Some(self.source.as_str()) {
            return Ok(());
        }
        let op = call.node(0).op.clone();
        let node = call.make_node(op, remote_traits(call), vec![])?;
        call.transform_to(node)?;
        Ok(())
    }
}

/// Filters and projections evaluate store-side over remote inputs.
macro_rules! remote_impl_rule {
    ($rule:ident, $name:literal, $kind:expr) => {
        pub struct $rule;

        impl Rule for $rule {
            fn name(&self) -> &str {
                $name
            }

            fn operand(&self) -> Operand {
                Operand::with_inputs($kind, vec![Operand::any()]).filtered(is_logical)
            }

            fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
                let op = call.node(0).op.clone();
                let input = call.input(0, 0);
                let child = call.require(input, remote_traits(call))?;
                let node = call.make_node(op, remote_traits(call), vec![child])?;
                call.transform_to(node)?;
                Ok(())
            }
        }
    };
}

remote_impl_rule!(RemoteFilterRule, "RemoteFilter", AlgKind::Filter);
remote_impl_rule!(RemoteProjectRule, "RemoteProject", AlgKind::Project);

/// Wraps a cost model and discounts work carried by the remote convention:
/// the store evaluates pushed-down operators with its own indexes and
/// avoids materializing intermediate rows on our side.
pub struct PushdownCostModel<M: CostModel> {
    inner: M,
    discount: f64,
}

impl PushdownCostModel<DefaultCostModel> {
    pub fn standard() -> Self {
        Self { inner: DefaultCostModel, discount: 0.1 }
    }
}

impl<M: CostModel> CostModel for PushdownCostModel<M> {
    fn node_cost(
        &self,
        op: &AlgOp,
        convention: Convention,
        node_stats: &Statistics,
        input_stats: &[Statistics],
    ) -> Cost {
        let cost = self.inner.node_cost(op, convention, node_stats, input_stats);
        if convention == REMOTE {
            Cost::new(cost.rows, cost.cpu * self.discount, cost.io * self.discount)
        } else {
            cost
        }
    }
}

/// The remote store as an adapter.
pub struct RemoteAdapter {
    pub source: String,
}

impl RemoteAdapter {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }

    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new("remote")
            .add(RemoteScanRule { source: self.source.clone() })
            .add(RemoteFilterRule)
            .add(RemoteProjectRule)
    }
}

impl Adapter for RemoteAdapter {
    fn name(&self) -> &str {
        "remote"
    }

    fn convention(&self) -> ConventionInfo {
        ConventionInfo { convention: REMOTE, interpretable: false }
    }

    fn register_rules(&self, planner: &mut Planner) -> Result<()> {
        planner.register_conversion_route(REMOTE, ENUMERABLE)?;
        planner.add_rule_set(self.rule_set())
    }
}
