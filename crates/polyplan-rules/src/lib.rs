//! # Built-in Planner Rules
//!
//! The default rule library for the polyplan Volcano planner.
//!
//! ## Transformation Rules (logical → logical)
//!
//! - **`PushFilterThroughProjectRule`**: moves a filter below a projection
//!   by rewriting the predicate through the projection expressions.
//! - **`CombineProjectsRule`**: composes two stacked projections into one.
//! - **`MergeFiltersRule`**: conjoins two stacked filters.
//! - **`ReduceFilterRule`** / **`ReduceProjectRule`**: run the row-expression
//!   simplifier over predicates and projection lists; a filter whose
//!   predicate reduces to `true` collapses into its input set, one reducing
//!   to `false` becomes empty `Values`.
//! - **`JoinCommuteRule`**: swaps the sides of symmetric joins, restoring
//!   column order with a projection.
//! - **`MatchToFilterRule`**: lowers document-style `Match` to `Filter` so
//!   the relational rules apply.
//!
//! ## Engines
//!
//! - **`enumerable`**: the in-process engine; implementation rules land
//!   every logical kind in the `ENUMERABLE` convention.
//! - **`remote`**: a pushdown engine for tables owned by an external store;
//!   scans, filters, and projections run remotely, and a registered
//!   converter route ships rows into `ENUMERABLE` where the remote engine
//!   stops.

pub mod enumerable;
pub mod filter_project;
pub mod join_commute;
pub mod match_lower;
pub mod reduce_expressions;
pub mod remote;

use polyplan_core::{Planner, Result};

/// Register the default transformation rules.
pub fn register_default_rules(planner: &mut Planner) -> Result<()> {
    planner.add_rule(filter_project::PushFilterThroughProjectRule)?;
    planner.add_rule(filter_project::CombineProjectsRule)?;
    planner.add_rule(filter_project::MergeFiltersRule)?;
    planner.add_rule(reduce_expressions::ReduceFilterRule)?;
    planner.add_rule(reduce_expressions::ReduceProjectRule)?;
    planner.add_rule(join_commute::JoinCommuteRule)?;
    planner.add_rule(match_lower::MatchToFilterRule)?;
    Ok(())
}
