//! # Statistics for Cost-Based Planning
//!
//! Row counts, sizes, and per-column distinct counts drive the cost model.
//! Statistics for intermediate nodes are derived bottom-up:
//!
//! - **Filter**: output rows = input rows × selectivity; column NDVs scale
//!   with the row reduction.
//! - **Join**: |A ⋈ B| = |A| × |B| / max(NDV(A.key), NDV(B.key)), the
//!   standard equi-join formula under the containment assumption.
//! - **Aggregate**: output rows = product of group-key NDVs, capped by the
//!   input row count.
//!
//! Selectivity estimation follows the usual heuristics: 1/NDV for equality,
//! 1/3 for ranges, independence for conjunctions, inclusion-exclusion for
//! disjunctions, and a 10% default when nothing better is known.

use crate::rex::{OpKind, RowExpr, ScalarValue};
use crate::types::RowType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statistics for a relation (or an equivalence set in the search space).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self { row_count, total_size_bytes, column_stats: HashMap::new() }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }
}

/// Per-column statistics, typically gathered by ANALYZE and stored in the
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values; equality selectivity is 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL, in [0, 1].
    pub null_fraction: f64,
    pub min_value: Option<ScalarValue>,
    pub max_value: Option<ScalarValue>,
    pub avg_value_size: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            min_value: None,
            max_value: None,
            avg_value_size: 8.0,
        }
    }
}

/// Default filter selectivity when nothing better is known.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Range-predicate selectivity heuristic.
pub const RANGE_SELECTIVITY: f64 = 0.33;

/// Estimate the selectivity of a predicate over a relation. Input references
/// resolve to column names through the row type.
pub fn estimate_selectivity(predicate: &RowExpr, stats: &Statistics, row_type: &RowType) -> f64 {
    match predicate {
        RowExpr::Call { op: OpKind::Eq, operands, .. } => {
            // 1/NDV under the uniform distribution assumption.
            for side in operands {
                if let RowExpr::InputRef { index, .. } = side {
                    if let Some(name) = row_type.field(*index).map(|f| f.name.as_str()) {
                        if let Some(cs) = stats.column_stats.get(name) {
                            return 1.0 / cs.distinct_count.max(1.0);
                        }
                    }
                }
            }
            DEFAULT_FILTER_SELECTIVITY
        }
        RowExpr::Call {
            op: OpKind::Lt | OpKind::LtEq | OpKind::Gt | OpKind::GtEq,
            ..
        } => RANGE_SELECTIVITY,
        RowExpr::Call { op: OpKind::And, operands, .. } => operands
            .iter()
            .map(|o| estimate_selectivity(o, stats, row_type))
            .product(),
        RowExpr::Call { op: OpKind::Or, operands, .. } => {
            let product: f64 = operands
                .iter()
                .map(|o| 1.0 - estimate_selectivity(o, stats, row_type))
                .product();
            1.0 - product
        }
        RowExpr::Call { op: OpKind::Not, operands, .. } => {
            1.0 - estimate_selectivity(&operands[0], stats, row_type)
        }
        RowExpr::Literal { value: ScalarValue::Bool(true), .. } => 1.0,
        RowExpr::Literal { value: ScalarValue::Bool(false), .. } => 0.0,
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

/// Derive statistics for filter output.
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 { row_count / input.row_count } else { 1.0 };

    let mut column_stats = HashMap::new();
    for (name, stats) in &input.column_stats {
        let mut cs = stats.clone();
        cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
        column_stats.insert(name.clone(), cs);
    }

    Statistics {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        column_stats,
    }
}

/// Derive statistics for join output from equi-join column pairs.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    join_columns: &[(String, String)],
) -> Statistics {
    let mut selectivity = 1.0_f64;
    for (left_col, right_col) in join_columns {
        let left_ndv = left
            .column_stats
            .get(left_col)
            .map(|s| s.distinct_count)
            .unwrap_or(left.row_count);
        let right_ndv = right
            .column_stats
            .get(right_col)
            .map(|s| s.distinct_count)
            .unwrap_or(right.row_count);
        // Containment assumption: the smaller key domain is contained in the
        // larger one.
        selectivity /= left_ndv.max(right_ndv).max(1.0);
    }

    let row_count = (left.row_count * right.row_count * selectivity).max(1.0);
    let left_width = if left.row_count > 0.0 {
        left.total_size_bytes / left.row_count
    } else {
        100.0
    };
    let right_width = if right.row_count > 0.0 {
        right.total_size_bytes / right.row_count
    } else {
        100.0
    };

    let mut column_stats = HashMap::new();
    for (name, stats) in left.column_stats.iter().chain(right.column_stats.iter()) {
        let mut cs = stats.clone();
        cs.distinct_count = cs.distinct_count.min(row_count);
        column_stats.insert(name.clone(), cs);
    }

    Statistics {
        row_count,
        total_size_bytes: row_count * (left_width + right_width),
        column_stats,
    }
}

/// Derive statistics for aggregate output.
pub fn derive_aggregate_stats(input: &Statistics, group_columns: &[String]) -> Statistics {
    let mut row_count = 1.0_f64;
    for col in group_columns {
        let ndv = input
            .column_stats
            .get(col)
            .map(|s| s.distinct_count)
            .unwrap_or(input.row_count);
        row_count *= ndv;
    }
    row_count = row_count.min(input.row_count).max(1.0);

    Statistics {
        row_count,
        total_size_bytes: row_count * 100.0,
        column_stats: HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rex::{OperatorTable, RexBuilder};
    use crate::types::{DataType, Field, TypeKind};
    use std::sync::Arc;

    #[test]
    fn equality_selectivity_uses_ndv() {
        let b = RexBuilder::new(Arc::new(OperatorTable::with_builtins()));
        let row_type = RowType::new(vec![Field::new("b", DataType::nullable(TypeKind::Int64))]);
        let stats =
            Statistics::new(1000.0, 100_000.0).with_column("b", ColumnStatistics::new(50.0, 0.0));
        let pred = b.eq(b.input_ref(0, DataType::nullable(TypeKind::Int64)), b.int_lit(1));
        let sel = estimate_selectivity(&pred, &stats, &row_type);
        assert!((sel - 0.02).abs() < 1e-9);
    }

    #[test]
    fn join_stats_use_max_ndv() {
        let left = Statistics::new(1000.0, 100_000.0)
            .with_column("k", ColumnStatistics::new(100.0, 0.0));
        let right =
            Statistics::new(500.0, 50_000.0).with_column("fk", ColumnStatistics::new(50.0, 0.0));
        let out = derive_join_stats(&left, &right, &[("k".into(), "fk".into())]);
        assert!((out.row_count - 5000.0).abs() < 1e-6);
    }
}
