//! # Enumerable Engine
//!
//! The in-process execution engine. Its implementation rules map every
//! logical operator kind onto the `ENUMERABLE` convention; inputs are
//! required in the same convention, which is what pulls converter synthesis
//! into play when a child is only available remotely.
//!
//! The enumerable engine cannot read tables owned by an external store, so
//! its scan rule skips sourced tables and leaves them to the owning
//! adapter.

use polyplan_core::adapter::Adapter;
use polyplan_core::algebra::{AlgKind, AlgNode, AlgOp, SubsetId};
use polyplan_core::pattern::Operand;
use polyplan_core::rule::{Rule, RuleSet};
use polyplan_core::traits::{Convention, ConventionInfo, Trait, TraitSet};
use polyplan_core::{Planner, Result, RuleCall};

pub const ENUMERABLE: Convention = Convention("ENUMERABLE");

fn is_logical(node: &AlgNode) -> bool {
    node.traits.convention().is_none()
}

fn enumerable_traits(call: &RuleCall<'_>) -> TraitSet {
    call.default_traits().replace(Trait::Convention(ENUMERABLE))
}

/// Require all of the bound root's inputs in the enumerable convention.
fn enumerable_inputs(call: &mut RuleCall<'_>) -> Result<Vec<SubsetId>> {
    let traits = enumerable_traits(call);
    let inputs: Vec<SubsetId> = (0..call.node(0).inputs.len())
        .map(|i| call.input(0, i))
        .collect();
    inputs
        .into_iter()
        .map(|s| call.require(s, traits.clone()))
        .collect()
}

/// One implementation rule per logical kind: same payload, enumerable
/// convention, enumerable inputs.
macro_rules! enumerable_impl_rule {
    ($rule:ident, $name:literal, $kind:expr) => {
        pub struct $rule;

        impl Rule for $rule {
            fn name(&self) -> &str {
                $name
            }

            fn operand(&self) -> Operand {
                Operand::of($kind).filtered(is_logical)
            }

            fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
                let op = call.node(0).op.clone();
                let inputs = enumerable_inputs(call)?;
                let node = call.make_node(op, enumerable_traits(call), inputs)?;
                call.transform_to(node)?;
                Ok(())
            }
        }
    };
}

enumerable_impl_rule!(EnumerableFilterRule, "EnumerableFilter", AlgKind::Filter);
enumerable_impl_rule!(EnumerableProjectRule, "EnumerableProject", AlgKind::Project);
enumerable_impl_rule!(EnumerableJoinRule, "EnumerableJoin", AlgKind::Join);
enumerable_impl_rule!(EnumerableAggregateRule, "EnumerableAggregate", AlgKind::Aggregate);
enumerable_impl_rule!(EnumerableUnionRule, "EnumerableUnion", AlgKind::Union);
enumerable_impl_rule!(EnumerableValuesRule, "EnumerableValues", AlgKind::Values);
enumerable_impl_rule!(EnumerableModifyRule, "EnumerableModify", AlgKind::Modify);

/// Scan of a table the default store owns. Sourced tables belong to their
/// adapter's convention.
pub struct EnumerableScanRule;

impl Rule for EnumerableScanRule {
    fn name(&self) -> &str {
        "EnumerableScan"
    }

    fn operand(&self) -> Operand {
        Operand::of(AlgKind::Scan).filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Scan { table, .. } = &call.node(0).op else {
            return Ok(());
        };
        if call.catalog().table_source(table).is_some() {
            return Ok(());
        }
        let op = call.node(0).op.clone();
        let node = call.make_node(op, enumerable_traits(call), vec![])?;
        call.transform_to(node)?;
        Ok(())
    }
}

/// Sort delivers its collation as a trait, so a parent requiring that order
/// is satisfied without an extra enforcer.
pub struct EnumerableSortRule;

impl Rule for EnumerableSortRule {
    fn name(&self) -> &str {
        "EnumerableSort"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(AlgKind::Sort, vec![Operand::any()]).filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Sort { collation, .. } = &call.node(0).op else {
            return Ok(());
        };
        let collation = collation.clone();
        let op = call.node(0).op.clone();
        let input = call.input(0, 0);
        let child = call.require(input, enumerable_traits(call))?;
        let traits = enumerable_traits(call).replace(Trait::Collation(collation));
        let node = call.make_node(op, traits, vec![child])?;
        call.transform_to(node)?;
        Ok(())
    }
}

/// The in-process engine as an adapter.
pub struct EnumerableAdapter;

impl EnumerableAdapter {
    pub fn rule_set() -> RuleSet {
        RuleSet::new("enumerable")
            .add(EnumerableScanRule)
            .add(EnumerableFilterRule)
            .add(EnumerableProjectRule)
            .add(EnumerableJoinRule)
            .add(EnumerableAggregateRule)
            .add(EnumerableSortRule)
            .add(EnumerableUnionRule)
            .add(EnumerableValuesRule)
            .add(EnumerableModifyRule)
    }
}

impl Adapter for EnumerableAdapter {
    fn name(&self) -> &str {
        "enumerable"
    }

    fn convention(&self) -> ConventionInfo {
        ConventionInfo { convention: ENUMERABLE, interpretable: true }
    }

    fn register_rules(&self, planner: &mut Planner) -> Result<()> {
        planner.add_rule_set(Self::rule_set())
    }
}
