//! # polyplan-core: Cost-Based Volcano Planner Core
//!
//! This crate implements the core of a cost-based relational query planner
//! for a polystore: a Volcano-style dynamic-programming search over an
//! equivalence-class space, together with the row-expression simplifier that
//! supports it.
//!
//! ## Module Overview
//!
//! - **`rex`**: Typed row (scalar) expressions, the operator table, and the
//!   simplifier (constant folding, CNF conversion, nullability-aware
//!   predicate reduction).
//! - **`types`**: Data types, nullability, and row types.
//! - **`traits`**: Pluggable trait definitions (convention, collation,
//!   distribution) with satisfaction order and conversion synthesis.
//! - **`algebra`**: Relational operators, nodes over input subset handles,
//!   and row-type derivation.
//! - **`space`**: The equivalence search space — sets, subsets, union-find,
//!   digest-based deduplication.
//! - **`pattern`** / **`rule`**: Rule operand patterns and the rule trait.
//! - **`cost`**: Three-component additive cost and the pluggable cost model.
//! - **`stats`** / **`catalog`**: Statistics, derivation formulas,
//!   selectivity estimation, and the catalog interface.
//! - **`planner`**: The driver — importance-ranked rule-call queue,
//!   conversion insertion, bounds and cancellation, best-plan extraction.
//! - **`adapter`**: The registration contract for storage/engine plugins.

pub mod adapter;
pub mod algebra;
pub mod catalog;
pub mod cost;
pub mod error;
pub mod pattern;
pub mod planner;
pub mod rex;
pub mod rule;
pub mod space;
pub mod stats;
pub mod traits;
pub mod types;

pub use error::{PlannerError, Result};
pub use planner::{BestPlan, Outcome, Planner, PlannerConfig, PlannerState, RuleCall};
