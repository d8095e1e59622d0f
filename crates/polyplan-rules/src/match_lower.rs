//! Lowers the document surface's `Match` node into a relational `Filter`
//! over the harmonized row, after which the whole filter rule set applies.

use polyplan_core::algebra::{AlgKind, AlgOp};
use polyplan_core::pattern::Operand;
use polyplan_core::rule::Rule;
use polyplan_core::{Result, RuleCall};

pub struct MatchToFilterRule;

impl Rule for MatchToFilterRule {
    fn name(&self) -> &str {
        "MatchToFilter"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(AlgKind::Match, vec![Operand::any()])
            .filtered(|node| node.traits.convention().is_none())
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Match { predicate } = &call.node(0).op else {
            return Ok(());
        };
        let predicate = predicate.clone();
        let input = call.input(0, 0);
        let filter =
            call.make_node(AlgOp::Filter { predicate }, call.default_traits(), vec![input])?;
        call.transform_to(filter)?;
        Ok(())
    }
}
