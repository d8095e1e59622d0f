//! # Join Commutation Rule
//!
//! `A JOIN B` and `B JOIN A` produce the same rows for symmetric join
//! types, and which side ends up left matters to every physical join the
//! engines implement. The swapped join's columns come out in the other
//! order, so the rewrite wraps it in a projection that restores the
//! original column order — the projected result is what lands in the
//! original set.
//!
//! Outer, semi, and anti joins have fixed left/right semantics and are not
//! commuted.

use polyplan_core::algebra::{AlgKind, AlgOp};
use polyplan_core::pattern::Operand;
use polyplan_core::rex::RowExpr;
use polyplan_core::rule::Rule;
use polyplan_core::{Result, RuleCall};

pub struct JoinCommuteRule;

impl Rule for JoinCommuteRule {
    fn name(&self) -> &str {
        "JoinCommute"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(AlgKind::Join, vec![Operand::any(), Operand::any()])
            .filtered(|node| node.traits.convention().is_none())
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Join { join_type, condition } = &call.node(0).op else {
            return Ok(());
        };
        if !join_type.is_symmetric() {
            return Ok(());
        }
        let join_type = *join_type;
        let condition = condition.clone();
        let joint_row = call.node(0).row_type.clone();
        let left = call.input(0, 0);
        let right = call.input(0, 1);
        let left_arity = call.row_type_of(left).arity();
        let right_arity = call.row_type_of(right).arity();

        // Re-aim the condition's references at the swapped input order.
        let swapped_condition = condition.map_input_refs(&|i| {
            let index = if i < left_arity { i + right_arity } else { i - left_arity };
            RowExpr::InputRef { index, ty: joint_row.field(i).expect("in range").ty }
        });

        let logical = call.default_traits();
        let swapped = call.make_node(
            AlgOp::Join { join_type, condition: swapped_condition },
            logical.clone(),
            vec![right, left],
        )?;
        let swapped_subset = call.register_input(swapped)?;

        // Restore the original column order on top of the swapped join.
        let exprs: Vec<RowExpr> = (0..left_arity + right_arity)
            .map(|i| {
                let index = if i < left_arity { i + right_arity } else { i - left_arity };
                RowExpr::InputRef { index, ty: joint_row.field(i).expect("in range").ty }
            })
            .collect();
        let field_names = joint_row.fields.iter().map(|f| f.name.clone()).collect();
        let project = call.make_node(
            AlgOp::Project { exprs, field_names },
            logical,
            vec![swapped_subset],
        )?;
        call.transform_to(project)?;
        Ok(())
    }
}
