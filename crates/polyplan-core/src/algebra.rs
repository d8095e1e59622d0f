//! # Relational Algebra IR
//!
//! Operators are a tagged sum type ([`AlgOp`]) with a kind discriminant
//! ([`AlgKind`]) for pattern matching. Whether a node is logical or physical
//! is not a property of the operator kind but of its convention trait: a
//! `Filter` with convention `NONE` is logical, the same kind carried by an
//! engine convention is that engine's physical filter.
//!
//! Nodes refer to their inputs by *subset handle*, never by concrete node,
//! so a single node simultaneously stands for every equivalent
//! implementation of its inputs. Row types are derived from the operator and
//! the input row types; derivation also validates the operator payload
//! (boolean predicates, in-range input references).

use crate::error::{PlannerError, Result};
use crate::rex::RowExpr;
use crate::traits::{Collation, Convention, Distribution, TraitSet};
use crate::types::{DataType, Field, RowType, TypeFactory, TypeKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of an equivalence set.
pub type SetId = usize;
/// Handle of a subset (a set restricted to one trait set).
pub type SubsetId = usize;
/// Handle of an interned node.
pub type NodeId = usize;

/// Reference to a table, tagged with the storage engine that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
    /// Storage engine tag; `None` for tables of the default store.
    pub source: Option<String>,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self { schema: schema.into(), name: name.into(), source: None }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with at least one match; no right columns in the output.
    Semi,
    /// Left rows with no match.
    Anti,
}

impl JoinType {
    pub fn projects_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    /// Symmetric join types may have their inputs swapped.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, JoinType::Inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    fn display_name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// An aggregate call over an input column (`None` for `COUNT(*)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggCall {
    pub func: AggFunc,
    pub arg: Option<usize>,
    pub distinct: bool,
    pub ty: DataType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifyOp {
    Insert,
    Update,
    Delete,
}

/// The operator payload of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlgOp {
    Scan {
        table: TableRef,
        row_type: RowType,
    },
    Filter {
        predicate: RowExpr,
    },
    Project {
        exprs: Vec<RowExpr>,
        field_names: Vec<String>,
    },
    Join {
        join_type: JoinType,
        condition: RowExpr,
    },
    Aggregate {
        group_keys: Vec<usize>,
        calls: Vec<AggCall>,
    },
    Sort {
        collation: Collation,
        offset: Option<u64>,
        fetch: Option<u64>,
    },
    Union {
        all: bool,
    },
    Values {
        tuples: Vec<Vec<RowExpr>>,
        row_type: RowType,
    },
    /// DML against a table; the input is the source relation.
    Modify {
        table: TableRef,
        op: ModifyOp,
    },
    /// Document-style predicate node produced by the MQL surface; lowered to
    /// `Filter` by a transformation rule.
    Match {
        predicate: RowExpr,
    },
    /// Bridges its input into the target convention.
    Converter {
        target: Convention,
    },
    /// Redistributes rows across workers.
    Exchange {
        distribution: Distribution,
    },
}

/// Kind discriminant for pattern matching, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgKind {
    Scan,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Union,
    Values,
    Modify,
    Match,
    Converter,
    Exchange,
}

impl AlgOp {
    pub fn kind(&self) -> AlgKind {
        match self {
            AlgOp::Scan { .. } => AlgKind::Scan,
            AlgOp::Filter { .. } => AlgKind::Filter,
            AlgOp::Project { .. } => AlgKind::Project,
            AlgOp::Join { .. } => AlgKind::Join,
            AlgOp::Aggregate { .. } => AlgKind::Aggregate,
            AlgOp::Sort { .. } => AlgKind::Sort,
            AlgOp::Union { .. } => AlgKind::Union,
            AlgOp::Values { .. } => AlgKind::Values,
            AlgOp::Modify { .. } => AlgKind::Modify,
            AlgOp::Match { .. } => AlgKind::Match,
            AlgOp::Converter { .. } => AlgKind::Converter,
            AlgOp::Exchange { .. } => AlgKind::Exchange,
        }
    }

    /// How many inputs this operator takes.
    pub fn input_arity(&self) -> InputArity {
        match self {
            AlgOp::Scan { .. } | AlgOp::Values { .. } => InputArity::Exactly(0),
            AlgOp::Join { .. } => InputArity::Exactly(2),
            AlgOp::Union { .. } => InputArity::AtLeast(2),
            _ => InputArity::Exactly(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArity {
    Exactly(usize),
    AtLeast(usize),
}

impl InputArity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            InputArity::Exactly(k) => n == *k,
            InputArity::AtLeast(k) => n >= *k,
        }
    }
}

impl fmt::Display for AlgOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgOp::Scan { table, .. } => write!(f, "Scan({table})"),
            AlgOp::Filter { predicate } => write!(f, "Filter({predicate})"),
            AlgOp::Project { exprs, .. } => {
                write!(f, "Project(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            AlgOp::Join { join_type, condition } => {
                write!(f, "Join({join_type:?}, {condition})")
            }
            AlgOp::Aggregate { group_keys, calls } => {
                write!(f, "Aggregate(keys={group_keys:?}")?;
                for c in calls {
                    write!(f, ", {}(", c.func.display_name())?;
                    match c.arg {
                        Some(a) => write!(f, "${a}")?,
                        None => write!(f, "*")?,
                    }
                    write!(f, ")")?;
                }
                write!(f, ")")
            }
            AlgOp::Sort { collation, offset, fetch } => {
                write!(f, "Sort({collation}")?;
                if let Some(o) = offset {
                    write!(f, ", offset={o}")?;
                }
                if let Some(n) = fetch {
                    write!(f, ", fetch={n}")?;
                }
                write!(f, ")")
            }
            AlgOp::Union { all } => write!(f, "Union(all={all})"),
            AlgOp::Values { tuples, .. } => write!(f, "Values({} rows)", tuples.len()),
            AlgOp::Modify { table, op } => write!(f, "Modify({table}, {op:?})"),
            AlgOp::Match { predicate } => write!(f, "Match({predicate})"),
            AlgOp::Converter { target } => write!(f, "Converter(to={target})"),
            AlgOp::Exchange { distribution } => write!(f, "Exchange({distribution})"),
        }
    }
}

/// An interned relational node: operator, trait set, and input subset
/// handles. Immutable once interned; input handles canonicalize through the
/// space's forward pointers after set merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlgNode {
    pub op: AlgOp,
    pub traits: TraitSet,
    pub inputs: Vec<SubsetId>,
    pub row_type: RowType,
}

/// A recursive tree form used to hand an initial plan to the planner; the
/// driver interns it bottom-up into subsets.
#[derive(Debug, Clone)]
pub struct AlgTree {
    pub op: AlgOp,
    pub traits: TraitSet,
    pub inputs: Vec<AlgTree>,
}

impl AlgTree {
    pub fn new(op: AlgOp, traits: TraitSet, inputs: Vec<AlgTree>) -> Self {
        Self { op, traits, inputs }
    }

    pub fn leaf(op: AlgOp, traits: TraitSet) -> Self {
        Self { op, traits, inputs: Vec::new() }
    }
}

/// Derive (and validate) the row type of an operator over its input row
/// types.
pub fn derive_row_type(op: &AlgOp, inputs: &[RowType]) -> Result<RowType> {
    if !op.input_arity().accepts(inputs.len()) {
        return Err(PlannerError::invalid(format!(
            "{} does not accept {} inputs",
            op,
            inputs.len()
        )));
    }
    match op {
        AlgOp::Scan { row_type, .. } | AlgOp::Values { row_type, .. } => Ok(row_type.clone()),
        AlgOp::Filter { predicate } | AlgOp::Match { predicate } => {
            check_predicate(predicate, &inputs[0])?;
            Ok(inputs[0].clone())
        }
        AlgOp::Sort { .. } | AlgOp::Converter { .. } | AlgOp::Exchange { .. } => {
            Ok(inputs[0].clone())
        }
        AlgOp::Project { exprs, field_names } => {
            if exprs.len() != field_names.len() {
                return Err(PlannerError::invalid(
                    "projection expression and field name counts differ",
                ));
            }
            for e in exprs {
                check_input_refs(e, inputs[0].arity())?;
            }
            Ok(RowType::new(
                exprs
                    .iter()
                    .zip(field_names.iter())
                    .map(|(e, n)| Field::new(n.clone(), e.ty()))
                    .collect(),
            ))
        }
        AlgOp::Join { join_type, condition } => {
            let left = &inputs[0];
            let right = &inputs[1];
            check_input_refs(condition, left.arity() + right.arity())?;
            if condition.ty().kind != TypeKind::Boolean {
                return Err(PlannerError::invalid("join condition is not boolean"));
            }
            let mut fields = Vec::with_capacity(left.arity() + right.arity());
            let (left_nullable, right_nullable) = match join_type {
                JoinType::Inner | JoinType::Semi | JoinType::Anti => (false, false),
                JoinType::Left => (false, true),
                JoinType::Right => (true, false),
                JoinType::Full => (true, true),
            };
            for field in &left.fields {
                let ty = if left_nullable { field.ty.with_nullable(true) } else { field.ty };
                fields.push(Field::new(field.name.clone(), ty));
            }
            if join_type.projects_right() {
                for field in &right.fields {
                    let ty =
                        if right_nullable { field.ty.with_nullable(true) } else { field.ty };
                    fields.push(Field::new(field.name.clone(), ty));
                }
            }
            Ok(RowType::new(fields))
        }
        AlgOp::Aggregate { group_keys, calls } => {
            let input = &inputs[0];
            let mut fields = Vec::with_capacity(group_keys.len() + calls.len());
            for &k in group_keys {
                let field = input.field(k).ok_or_else(|| {
                    PlannerError::invalid(format!("group key {k} out of range"))
                })?;
                fields.push(field.clone());
            }
            for (i, c) in calls.iter().enumerate() {
                if let Some(a) = c.arg {
                    if input.field(a).is_none() {
                        return Err(PlannerError::invalid(format!(
                            "aggregate argument {a} out of range"
                        )));
                    }
                }
                fields.push(Field::new(
                    format!("{}{}", c.func.display_name().to_lowercase(), i),
                    c.ty,
                ));
            }
            Ok(RowType::new(fields))
        }
        AlgOp::Union { .. } => {
            let first = &inputs[0];
            let factory = TypeFactory;
            let mut fields = first.fields.clone();
            for other in &inputs[1..] {
                if other.arity() != first.arity() {
                    return Err(PlannerError::invalid("union branch arities differ"));
                }
                for (field, of) in fields.iter_mut().zip(other.fields.iter()) {
                    field.ty = factory.least_restrictive(field.ty, of.ty).ok_or_else(|| {
                        PlannerError::invalid(format!(
                            "union branch types {} and {} are incompatible",
                            field.ty, of.ty
                        ))
                    })?;
                }
            }
            Ok(RowType::new(fields))
        }
        AlgOp::Modify { .. } => Ok(RowType::new(vec![Field::new(
            "rowcount",
            DataType::not_null(TypeKind::Int64),
        )])),
    }
}

fn check_predicate(predicate: &RowExpr, input: &RowType) -> Result<()> {
    if predicate.ty().kind != TypeKind::Boolean {
        return Err(PlannerError::invalid("predicate is not boolean"));
    }
    check_input_refs(predicate, input.arity())
}

fn check_input_refs(e: &RowExpr, arity: usize) -> Result<()> {
    for index in e.input_refs() {
        if index >= arity {
            return Err(PlannerError::invalid(format!(
                "input reference ${index} out of range (arity {arity})"
            )));
        }
    }
    Ok(())
}

/// A node of the extracted physical plan: a concrete tree with costs, ready
/// for a downstream code generator or interpreter.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub op: AlgOp,
    pub traits: TraitSet,
    pub row_type: RowType,
    pub inputs: Vec<PlanNode>,
    pub cost: crate::cost::Cost,
}

impl PlanNode {
    /// Indented tree rendering for logs and tests.
    pub fn display(&self, indent: usize) -> String {
        let mut out = format!(
            "{}{} [{}] cost={:.1}\n",
            "  ".repeat(indent),
            self.op,
            self.traits,
            self.cost.cpu + self.cost.io,
        );
        for input in &self.inputs {
            out.push_str(&input.display(indent + 1));
        }
        out
    }

    /// Pre-order kinds, handy for structural assertions.
    pub fn kinds(&self) -> Vec<AlgKind> {
        let mut out = vec![self.op.kind()];
        for i in &self.inputs {
            out.extend(i.kinds());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rex::{OperatorTable, RexBuilder};
    use std::sync::Arc;

    fn row_ab() -> RowType {
        RowType::new(vec![
            Field::new("a", DataType::not_null(TypeKind::Int64)),
            Field::new("b", DataType::nullable(TypeKind::Int64)),
        ])
    }

    #[test]
    fn filter_requires_boolean_predicate() {
        let b = RexBuilder::new(Arc::new(OperatorTable::with_builtins()));
        let bad = AlgOp::Filter { predicate: b.int_lit(1) };
        assert!(derive_row_type(&bad, &[row_ab()]).is_err());

        let ok = AlgOp::Filter {
            predicate: b.eq(
                b.input_ref(1, DataType::nullable(TypeKind::Int64)),
                b.int_lit(1),
            ),
        };
        assert_eq!(derive_row_type(&ok, &[row_ab()]).unwrap(), row_ab());
    }

    #[test]
    fn out_of_range_input_ref_is_rejected() {
        let b = RexBuilder::new(Arc::new(OperatorTable::with_builtins()));
        let bad = AlgOp::Filter {
            predicate: b.eq(
                b.input_ref(9, DataType::nullable(TypeKind::Int64)),
                b.int_lit(1),
            ),
        };
        assert!(derive_row_type(&bad, &[row_ab()]).is_err());
    }

    #[test]
    fn outer_join_nullability() {
        let b = RexBuilder::new(Arc::new(OperatorTable::with_builtins()));
        let op = AlgOp::Join {
            join_type: JoinType::Left,
            condition: b.eq(
                b.input_ref(0, DataType::not_null(TypeKind::Int64)),
                b.input_ref(2, DataType::not_null(TypeKind::Int64)),
            ),
        };
        let row = derive_row_type(&op, &[row_ab(), row_ab()]).unwrap();
        assert_eq!(row.arity(), 4);
        assert!(!row.field(0).unwrap().ty.nullable);
        assert!(row.field(2).unwrap().ty.nullable);
        assert!(row.field(3).unwrap().ty.nullable);
    }
}
