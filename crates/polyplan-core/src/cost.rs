//! # Cost Model
//!
//! A cost has three components: estimated output rows, CPU work, and I/O
//! work. Costs are additive — a plan's cost is its node cost plus the sum of
//! its children's costs — and are compared by the weighted scalar
//! `rows × (cpu_weight·cpu + io_weight·io)`, with the raw components as
//! lexicographic tie-breakers.
//!
//! The model is pluggable behind the [`CostModel`] trait; the default
//! implementation prices each operator kind from the statistics of its set
//! and of its inputs. Logical nodes (convention `NONE`) are never priced
//! here: the planner gives them infinite cost directly, which is what forces
//! extraction onto physical members.

use crate::algebra::AlgOp;
use crate::stats::Statistics;
use crate::traits::Convention;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Additive cost with tuple-count, CPU, and I/O components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    pub rows: f64,
    pub cpu: f64,
    pub io: f64,
}

impl Cost {
    pub fn new(rows: f64, cpu: f64, io: f64) -> Self {
        Self { rows, cpu, io }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn infinite() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::INFINITY)
    }

    pub fn is_infinite(&self) -> bool {
        self.rows.is_infinite() || self.cpu.is_infinite() || self.io.is_infinite()
    }

    pub fn plus(&self, other: &Cost) -> Cost {
        Cost::new(self.rows + other.rows, self.cpu + other.cpu, self.io + other.io)
    }

    /// The weighted scalar used for ranking.
    pub fn weighted(&self, weights: &CostWeights) -> f64 {
        self.rows.max(1.0) * (weights.cpu * self.cpu + weights.io * self.io)
    }

    /// Compare by weighted total, then lexicographically by components.
    pub fn compare(&self, other: &Cost, weights: &CostWeights) -> Ordering {
        let a = self.weighted(weights);
        let b = other.weighted(weights);
        a.partial_cmp(&b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.rows.partial_cmp(&other.rows).unwrap_or(Ordering::Equal))
            .then_with(|| self.cpu.partial_cmp(&other.cpu).unwrap_or(Ordering::Equal))
            .then_with(|| self.io.partial_cmp(&other.io).unwrap_or(Ordering::Equal))
    }
}

/// Configurable weights for collapsing a cost into a single comparable
/// scalar. The default makes I/O four times as expensive as CPU.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostWeights {
    pub cpu: f64,
    pub io: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self { cpu: 1.0, io: 4.0 }
    }
}

/// Pluggable per-node costing.
pub trait CostModel: Send + Sync {
    /// The local (non-cumulative) cost of a physical node, given the
    /// statistics of its set and of its input sets.
    fn node_cost(
        &self,
        op: &AlgOp,
        convention: Convention,
        node_stats: &Statistics,
        input_stats: &[Statistics],
    ) -> Cost;
}

/// Default cost model: per-kind formulas over row counts.
#[derive(Debug, Clone, Default)]
pub struct DefaultCostModel;

impl CostModel for DefaultCostModel {
    fn node_cost(
        &self,
        op: &AlgOp,
        _convention: Convention,
        node_stats: &Statistics,
        input_stats: &[Statistics],
    ) -> Cost {
        let rows = node_stats.row_count;
        let input_rows = |i: usize| input_stats.get(i).map(|s| s.row_count).unwrap_or(1.0);
        match op {
            // One pass over the table, paying I/O for every row read.
            AlgOp::Scan { .. } => Cost::new(rows, rows, rows),
            AlgOp::Filter { .. } | AlgOp::Match { .. } => Cost::new(rows, input_rows(0), 0.0),
            AlgOp::Project { exprs, .. } => {
                Cost::new(rows, input_rows(0) * exprs.len().max(1) as f64, 0.0)
            }
            AlgOp::Join { .. } => {
                Cost::new(rows, input_rows(0) + input_rows(1) + rows, 0.0)
            }
            AlgOp::Aggregate { .. } => Cost::new(rows, input_rows(0) + rows, 0.0),
            AlgOp::Sort { .. } => {
                let n = input_rows(0);
                let n_log_n = if n > 1.0 { n * n.log2() } else { 1.0 };
                Cost::new(rows, n_log_n, 0.0)
            }
            AlgOp::Union { .. } => {
                let total: f64 = (0..input_stats.len()).map(input_rows).sum();
                Cost::new(rows, total, 0.0)
            }
            AlgOp::Values { tuples, .. } => Cost::new(rows, tuples.len() as f64, 0.0),
            AlgOp::Modify { .. } => Cost::new(rows, input_rows(0), input_rows(0)),
            // Rows cross an engine boundary: pure transfer cost.
            AlgOp::Converter { .. } => Cost::new(rows, input_rows(0), input_rows(0)),
            AlgOp::Exchange { .. } => Cost::new(rows, 0.0, 2.0 * input_rows(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_comparison_prefers_fewer_rows() {
        let weights = CostWeights::default();
        let cheap = Cost::new(10.0, 100.0, 0.0);
        let pricey = Cost::new(1000.0, 100.0, 0.0);
        assert_eq!(cheap.compare(&pricey, &weights), Ordering::Less);
    }

    #[test]
    fn infinite_cost_never_wins() {
        let weights = CostWeights::default();
        let real = Cost::new(1e9, 1e9, 1e9);
        assert_eq!(real.compare(&Cost::infinite(), &weights), Ordering::Less);
    }

    #[test]
    fn sort_cost_is_superlinear() {
        let model = DefaultCostModel;
        let stats = Statistics::new(1000.0, 100_000.0);
        let sort = AlgOp::Sort {
            collation: crate::traits::Collation::default(),
            offset: None,
            fetch: None,
        };
        let cost = model.node_cost(&sort, Convention("X"), &stats, &[stats.clone()]);
        assert!(cost.cpu > 1000.0);
    }
}
