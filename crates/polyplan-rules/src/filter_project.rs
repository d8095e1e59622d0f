//! # Filter / Project Interaction Rules
//!
//! The classic pair that reshapes the filter/projection spine of a plan:
//! pushing a filter below a projection exposes it to scans and joins, and
//! collapsing stacked projections removes the indirection the push leaves
//! behind. In a Volcano search neither rewrite replaces the original plan;
//! each interns an equivalent into the same set and the cost model decides.

use polyplan_core::algebra::{AlgKind, AlgOp};
use polyplan_core::pattern::Operand;
use polyplan_core::rex::RowExpr;
use polyplan_core::rule::Rule;
use polyplan_core::{Result, RuleCall};

fn is_logical(node: &polyplan_core::algebra::AlgNode) -> bool {
    node.traits.convention().is_none()
}

/// `Filter(Project(x))` → `Project(Filter'(x))`, rewriting the predicate
/// through the projection expressions.
pub struct PushFilterThroughProjectRule;

impl Rule for PushFilterThroughProjectRule {
    fn name(&self) -> &str {
        "PushFilterThroughProject"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(
            AlgKind::Filter,
            vec![Operand::with_inputs(AlgKind::Project, vec![Operand::any()]).filtered(is_logical)],
        )
        .filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Filter { predicate } = &call.node(0).op else {
            return Ok(());
        };
        let AlgOp::Project { exprs, field_names } = &call.node(1).op else {
            return Ok(());
        };
        let predicate = predicate.clone();
        let exprs = exprs.clone();
        let field_names = field_names.clone();
        let below_project = call.input(1, 0);

        // Substitute each input reference by the projection expression it
        // names, so the predicate reads the pre-projection row.
        let pushed = predicate.map_input_refs(&|i| exprs[i].clone());

        let logical = call.default_traits();
        let filter = call.make_node(
            AlgOp::Filter { predicate: pushed },
            logical.clone(),
            vec![below_project],
        )?;
        let filter_subset = call.register_input(filter)?;
        let project = call.make_node(
            AlgOp::Project { exprs, field_names },
            logical,
            vec![filter_subset],
        )?;
        call.transform_to(project)?;
        Ok(())
    }
}

/// `Project(Project(x))` → `Project(x)` with composed expressions.
pub struct CombineProjectsRule;

impl Rule for CombineProjectsRule {
    fn name(&self) -> &str {
        "CombineProjects"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(
            AlgKind::Project,
            vec![Operand::with_inputs(AlgKind::Project, vec![Operand::any()]).filtered(is_logical)],
        )
        .filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Project { exprs: outer, field_names } = &call.node(0).op else {
            return Ok(());
        };
        let AlgOp::Project { exprs: inner, .. } = &call.node(1).op else {
            return Ok(());
        };
        let composed: Vec<RowExpr> = outer
            .iter()
            .map(|e| e.map_input_refs(&|i| inner[i].clone()))
            .collect();
        let field_names = field_names.clone();
        let below = call.input(1, 0);

        let logical = call.default_traits();
        let project = call.make_node(
            AlgOp::Project { exprs: composed, field_names },
            logical,
            vec![below],
        )?;
        call.transform_to(project)?;
        Ok(())
    }
}

/// `Filter(Filter(x))` → `Filter(p1 AND p2, x)`.
pub struct MergeFiltersRule;

impl Rule for MergeFiltersRule {
    fn name(&self) -> &str {
        "MergeFilters"
    }

    fn operand(&self) -> Operand {
        Operand::with_inputs(
            AlgKind::Filter,
            vec![Operand::with_inputs(AlgKind::Filter, vec![Operand::any()]).filtered(is_logical)],
        )
        .filtered(is_logical)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let AlgOp::Filter { predicate: outer } = &call.node(0).op else {
            return Ok(());
        };
        let AlgOp::Filter { predicate: inner } = &call.node(1).op else {
            return Ok(());
        };
        let merged = call.rex().and(vec![inner.clone(), outer.clone()]);
        let below = call.input(1, 0);

        let logical = call.default_traits();
        let filter = call.make_node(AlgOp::Filter { predicate: merged }, logical, vec![below])?;
        call.transform_to(filter)?;
        Ok(())
    }
}
