//! # Expression Reduction Rules
//!
//! These rules run the row-expression simplifier inside the search. Filter
//! predicates simplify under unknown-as-FALSE (a row where the predicate is
//! unknown is dropped, exactly like a false one); projection expressions
//! simplify value-preserving, under unknown-as-UNKNOWN.
//!
//! Two degenerate outcomes matter for the space: a predicate reduced to
//! `true` makes the filter equivalent to its input — declared through a set
//! merge rather than a new node — and a predicate reduced to `false` makes
//! it equivalent to empty `Values`.

use polyplan_core::algebra::{AlgKind, AlgOp};
use polyplan_core::pattern::Operand;
use polyplan_core::rex::simplify::{Simplifier, UnknownAs};
use polyplan_core::rule::Rule;
use polyplan_core::{Result, RuleCall};

fn is_logical(node: &polyplan_core::algebra::AlgNode) -> bool {
    node.traits.convention().is_none()
}

/// Simplify a filter's predicate in WHERE context.
pub struct ReduceFilterRule;

impl Rule for ReduceFilterRule {
    fn name(&self) -> &str {
        "ReduceFilter"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(AlgKind::Filter, vec![Operand::any()]).filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Filter { predicate } = &call.node(0).op else {
            return Ok(());
        };
        let predicate = predicate.clone();
        let row_type = call.node(0).row_type.clone();
        let input = call.input(0, 0);

        let simplified = {
            let simplifier = Simplifier::new(call.rex());
            simplifier.simplify(&predicate, UnknownAs::False)
        };
        if simplified == predicate {
            return Ok(());
        }
        if simplified.is_true_literal() {
            // The filter passes everything: same result as its input.
            return call.transform_to_subset(input);
        }
        if simplified.is_false_literal() {
            let empty = AlgOp::Values { tuples: Vec::new(), row_type };
            let node = call.make_node(empty, call.default_traits(), vec![])?;
            call.transform_to(node)?;
            return Ok(());
        }
        let logical = call.default_traits();
        let filter =
            call.make_node(AlgOp::Filter { predicate: simplified }, logical, vec![input])?;
        call.transform_to(filter)?;
        Ok(())
    }
}

/// Simplify projection expressions, value-preserving.
pub struct ReduceProjectRule;

impl Rule for ReduceProjectRule {
    fn name(&self) -> &str {
        "ReduceProject"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(AlgKind::Project, vec![Operand::any()]).filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Project { exprs, field_names } = &call.node(0).op else {
            return Ok(());
        };
        let exprs = exprs.clone();
        let field_names = field_names.clone();
        let input = call.input(0, 0);

        let simplified: Vec<_> = {
            let simplifier = Simplifier::new(call.rex());
            exprs
                .iter()
                .map(|e| simplifier.simplify(e, UnknownAs::Unknown))
                .collect()
        };
        if simplified == exprs {
            return Ok(());
        }
        let logical = call.default_traits();
        let project = call.make_node(
            AlgOp::Project { exprs: simplified, field_names },
            logical,
            vec![input],
        )?;
        call.transform_to(project)?;
        Ok(())
    }
}
