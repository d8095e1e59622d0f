//! # Row Expressions
//!
//! Typed scalar expression trees. Row expressions appear inside operator
//! payloads (filter predicates, projection lists, join conditions) and are
//! the input language of the simplifier.
//!
//! Every expression carries a resolved [`DataType`]; nullability propagates
//! according to the operator's strictness. Operators themselves are a closed
//! [`OpKind`] enum plus adapter-registered `Custom` ids; the operator table
//! maps each kind to its metadata (name, return-type inference, operand
//! checker, determinism, monotonicity, null strictness).
//!
//! The [`RexBuilder`] constructs well-typed expressions. Its combinators for
//! the built-in operators compute result types directly; generic calls go
//! through the operator table and are checked.

pub mod simplify;

use crate::error::{PlannerError, Result};
use crate::types::{DataType, TypeFactory, TypeKind};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A constant scalar value. `OrderedFloat` keeps floats usable as hash-map
/// keys, which digest deduplication relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since the Unix epoch.
    Date(i32),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Total order within a kind; `None` across kinds or against NULL.
    pub fn compare(&self, other: &ScalarValue) -> Option<std::cmp::Ordering> {
        use ScalarValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Int32(a), Int32(b)) => a.partial_cmp(b),
            (Int64(a), Int64(b)) => a.partial_cmp(b),
            (Float64(a), Float64(b)) => a.partial_cmp(b),
            (Utf8(a), Utf8(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Cast a value to a target type per the type-assignment matrix.
    /// Returns `None` when the target domain does not admit the value,
    /// leaving the cast to runtime.
    pub fn cast_to(&self, target: &DataType) -> Option<ScalarValue> {
        use ScalarValue::*;
        match (self, target.kind) {
            (Null, _) => Some(Null),
            (Bool(v), TypeKind::Boolean) => Some(Bool(*v)),
            (Int32(v), TypeKind::Int32) => Some(Int32(*v)),
            (Int32(v), TypeKind::Int64) => Some(Int64(*v as i64)),
            (Int32(v), TypeKind::Float64) => Some(Float64(OrderedFloat(*v as f64))),
            (Int64(v), TypeKind::Int64) => Some(Int64(*v)),
            (Int64(v), TypeKind::Int32) => i32::try_from(*v).ok().map(Int32),
            (Int64(v), TypeKind::Float64) => Some(Float64(OrderedFloat(*v as f64))),
            (Float64(v), TypeKind::Float64) => Some(Float64(*v)),
            (Utf8(v), TypeKind::Varchar(None)) => Some(Utf8(v.clone())),
            (Utf8(v), TypeKind::Varchar(Some(p))) if v.len() <= p as usize => {
                Some(Utf8(v.clone()))
            }
            (Int32(v), TypeKind::Varchar(_)) => Some(Utf8(v.to_string())),
            (Int64(v), TypeKind::Varchar(_)) => Some(Utf8(v.to_string())),
            (Date(v), TypeKind::Date) => Some(Date(*v)),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int32(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE({v})"),
        }
    }
}

/// Operator kinds. The closed set covers the relational core; adapters add
/// functions through [`OperatorTable::register`] under `Custom` ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Times,
    Divide,
    UnaryMinus,
    IsNull,
    IsNotNull,
    IsTrue,
    IsNotTrue,
    IsFalse,
    IsNotFalse,
    Case,
    Coalesce,
    NullIf,
    Cast,
    Custom(u32),
}

impl OpKind {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            OpKind::Eq | OpKind::NotEq | OpKind::Lt | OpKind::LtEq | OpKind::Gt | OpKind::GtEq
        )
    }

    /// The comparison with the reversed operand order (`a < b` ⇔ `b > a`).
    pub fn reverse(&self) -> Option<OpKind> {
        Some(match self {
            OpKind::Eq => OpKind::Eq,
            OpKind::NotEq => OpKind::NotEq,
            OpKind::Lt => OpKind::Gt,
            OpKind::LtEq => OpKind::GtEq,
            OpKind::Gt => OpKind::Lt,
            OpKind::GtEq => OpKind::LtEq,
            _ => return None,
        })
    }

    /// The logical negation of a comparison (`NOT (a < b)` ⇔ `a >= b`).
    /// Valid as a rewrite only in contexts where unknown collapses the same
    /// way on both sides, which holds because both forms are strict.
    pub fn negate_comparison(&self) -> Option<OpKind> {
        Some(match self {
            OpKind::Eq => OpKind::NotEq,
            OpKind::NotEq => OpKind::Eq,
            OpKind::Lt => OpKind::GtEq,
            OpKind::LtEq => OpKind::Gt,
            OpKind::Gt => OpKind::LtEq,
            OpKind::GtEq => OpKind::Lt,
            _ => return None,
        })
    }
}

/// Null behavior of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Any null operand makes the result null.
    Strict,
    /// The operator has its own null table (AND, OR, IS NULL, CASE, ...).
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monotonicity {
    NotMonotonic,
    Increasing,
    Decreasing,
}

/// Metadata for one operator: name, strictness, determinism, monotonicity,
/// return-type inference, and operand checking.
#[derive(Clone)]
pub struct OperatorDef {
    pub kind: OpKind,
    pub name: &'static str,
    pub strictness: Strictness,
    pub deterministic: bool,
    pub monotonicity: Monotonicity,
    /// Return-type inference over operand types.
    pub infer_return: fn(&[DataType]) -> Option<DataType>,
    /// Operand checker; `false` rejects the call at construction.
    pub check_operands: fn(&[DataType]) -> bool,
}

fn infer_bool(operands: &[DataType]) -> Option<DataType> {
    let nullable = operands.iter().any(|t| t.nullable);
    Some(DataType::new(TypeKind::Boolean, nullable))
}

fn infer_bool_not_null(_: &[DataType]) -> Option<DataType> {
    Some(DataType::not_null(TypeKind::Boolean))
}

fn infer_arith(operands: &[DataType]) -> Option<DataType> {
    let first = operands.first()?;
    let nullable = operands.iter().any(|t| t.nullable);
    Some(DataType::new(first.kind, nullable))
}

fn infer_first(operands: &[DataType]) -> Option<DataType> {
    operands.first().copied()
}

fn check_bool_operands(operands: &[DataType]) -> bool {
    operands.iter().all(|t| t.kind == TypeKind::Boolean)
}

fn check_same_kind(operands: &[DataType]) -> bool {
    operands
        .windows(2)
        .all(|w| w[0].kind == w[1].kind || (w[0].is_numeric() && w[1].is_numeric()))
}

fn check_any(_: &[DataType]) -> bool {
    true
}

/// Registry of operator definitions, keyed by kind. Built once during
/// single-threaded initialization and shared immutably afterwards.
#[derive(Clone)]
pub struct OperatorTable {
    defs: HashMap<OpKind, OperatorDef>,
    custom_names: HashMap<u32, String>,
}

impl OperatorTable {
    pub fn with_builtins() -> Self {
        let mut table = Self { defs: HashMap::new(), custom_names: HashMap::new() };
        let defs = [
            (OpKind::And, "AND", Strictness::Custom, infer_bool as fn(&[DataType]) -> Option<DataType>, check_bool_operands as fn(&[DataType]) -> bool),
            (OpKind::Or, "OR", Strictness::Custom, infer_bool, check_bool_operands),
            (OpKind::Not, "NOT", Strictness::Strict, infer_bool, check_bool_operands),
            (OpKind::Eq, "=", Strictness::Strict, infer_bool, check_same_kind),
            (OpKind::NotEq, "<>", Strictness::Strict, infer_bool, check_same_kind),
            (OpKind::Lt, "<", Strictness::Strict, infer_bool, check_same_kind),
            (OpKind::LtEq, "<=", Strictness::Strict, infer_bool, check_same_kind),
            (OpKind::Gt, ">", Strictness::Strict, infer_bool, check_same_kind),
            (OpKind::GtEq, ">=", Strictness::Strict, infer_bool, check_same_kind),
            (OpKind::Plus, "+", Strictness::Strict, infer_arith, check_same_kind),
            (OpKind::Minus, "-", Strictness::Strict, infer_arith, check_same_kind),
            (OpKind::Times, "*", Strictness::Strict, infer_arith, check_same_kind),
            (OpKind::Divide, "/", Strictness::Strict, infer_arith, check_same_kind),
            (OpKind::UnaryMinus, "-", Strictness::Strict, infer_arith, check_any),
            (OpKind::IsNull, "IS NULL", Strictness::Custom, infer_bool_not_null, check_any),
            (OpKind::IsNotNull, "IS NOT NULL", Strictness::Custom, infer_bool_not_null, check_any),
            (OpKind::IsTrue, "IS TRUE", Strictness::Custom, infer_bool_not_null, check_bool_operands),
            (OpKind::IsNotTrue, "IS NOT TRUE", Strictness::Custom, infer_bool_not_null, check_bool_operands),
            (OpKind::IsFalse, "IS FALSE", Strictness::Custom, infer_bool_not_null, check_bool_operands),
            (OpKind::IsNotFalse, "IS NOT FALSE", Strictness::Custom, infer_bool_not_null, check_bool_operands),
            (OpKind::Case, "CASE", Strictness::Custom, infer_first, check_any),
            (OpKind::Coalesce, "COALESCE", Strictness::Custom, infer_first, check_any),
            (OpKind::NullIf, "NULLIF", Strictness::Custom, infer_first, check_same_kind),
            (OpKind::Cast, "CAST", Strictness::Strict, infer_first, check_any),
        ];
        for (kind, name, strictness, infer_return, check_operands) in defs {
            table.defs.insert(
                kind,
                OperatorDef {
                    kind,
                    name,
                    strictness,
                    deterministic: true,
                    monotonicity: Monotonicity::NotMonotonic,
                    infer_return,
                    check_operands,
                },
            );
        }
        table
    }

    /// Register an adapter-provided operator under a custom id.
    pub fn register(&mut self, id: u32, name: impl Into<String>, def: OperatorDef) {
        self.custom_names.insert(id, name.into());
        self.defs.insert(OpKind::Custom(id), def);
    }

    pub fn def(&self, kind: OpKind) -> Option<&OperatorDef> {
        self.defs.get(&kind)
    }

    pub fn is_deterministic(&self, kind: OpKind) -> bool {
        self.defs.get(&kind).map(|d| d.deterministic).unwrap_or(true)
    }

    pub fn is_strict(&self, kind: OpKind) -> bool {
        self.defs
            .get(&kind)
            .map(|d| d.strictness == Strictness::Strict)
            .unwrap_or(true)
    }

    pub fn name(&self, kind: OpKind) -> &str {
        match kind {
            OpKind::Custom(id) => self
                .custom_names
                .get(&id)
                .map(|s| s.as_str())
                .unwrap_or("FUN"),
            other => self.defs.get(&other).map(|d| d.name).unwrap_or("?"),
        }
    }
}

/// A typed scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowExpr {
    /// Typed constant; nullability is encoded in the type.
    Literal { value: ScalarValue, ty: DataType },
    /// Positional reference into the surrounding operator's input row.
    InputRef { index: usize, ty: DataType },
    /// Reference into a local expression program's table.
    LocalRef { index: usize, ty: DataType },
    /// Placeholder bound at execution time.
    DynamicParam { index: usize, ty: DataType },
    /// Access to a field of a structured value.
    FieldAccess {
        target: Box<RowExpr>,
        field_index: usize,
        field_name: String,
        ty: DataType,
    },
    /// Reference to a correlation variable from an enclosing query.
    CorrelVariable { name: String, ty: DataType },
    /// Operator application.
    Call {
        op: OpKind,
        operands: Vec<RowExpr>,
        ty: DataType,
    },
}

impl RowExpr {
    pub fn ty(&self) -> DataType {
        match self {
            RowExpr::Literal { ty, .. }
            | RowExpr::InputRef { ty, .. }
            | RowExpr::LocalRef { ty, .. }
            | RowExpr::DynamicParam { ty, .. }
            | RowExpr::FieldAccess { ty, .. }
            | RowExpr::CorrelVariable { ty, .. }
            | RowExpr::Call { ty, .. } => *ty,
        }
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            RowExpr::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self.as_literal(), Some(ScalarValue::Null))
    }

    pub fn is_true_literal(&self) -> bool {
        matches!(self.as_literal(), Some(ScalarValue::Bool(true)))
    }

    pub fn is_false_literal(&self) -> bool {
        matches!(self.as_literal(), Some(ScalarValue::Bool(false)))
    }

    pub fn as_call(&self, kind: OpKind) -> Option<&[RowExpr]> {
        match self {
            RowExpr::Call { op, operands, .. } if *op == kind => Some(operands),
            _ => None,
        }
    }

    /// Total node count, used by the CNF growth bound.
    pub fn node_count(&self) -> usize {
        1 + match self {
            RowExpr::FieldAccess { target, .. } => target.node_count(),
            RowExpr::Call { operands, .. } => operands.iter().map(RowExpr::node_count).sum(),
            _ => 0,
        }
    }

    /// All input indices referenced by this expression.
    pub fn input_refs(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_input_refs(&mut out);
        out
    }

    fn collect_input_refs(&self, out: &mut Vec<usize>) {
        match self {
            RowExpr::InputRef { index, .. } => out.push(*index),
            RowExpr::FieldAccess { target, .. } => target.collect_input_refs(out),
            RowExpr::Call { operands, .. } => {
                for o in operands {
                    o.collect_input_refs(out);
                }
            }
            _ => {}
        }
    }

    /// Rewrite every `InputRef` through `f`. Used by rules that move an
    /// expression across an operator boundary.
    pub fn map_input_refs(&self, f: &impl Fn(usize) -> RowExpr) -> RowExpr {
        match self {
            RowExpr::InputRef { index, .. } => f(*index),
            RowExpr::FieldAccess { target, field_index, field_name, ty } => RowExpr::FieldAccess {
                target: Box::new(target.map_input_refs(f)),
                field_index: *field_index,
                field_name: field_name.clone(),
                ty: *ty,
            },
            RowExpr::Call { op, operands, ty } => RowExpr::Call {
                op: *op,
                operands: operands.iter().map(|o| o.map_input_refs(f)).collect(),
                ty: *ty,
            },
            other => other.clone(),
        }
    }

    /// Flattened conjuncts: `AND(a, AND(b, c))` → `[a, b, c]`.
    pub fn conjuncts(&self) -> Vec<&RowExpr> {
        match self {
            RowExpr::Call { op: OpKind::And, operands, .. } => {
                operands.iter().flat_map(|e| e.conjuncts()).collect()
            }
            other => vec![other],
        }
    }
}

struct DisplayWith<'a>(&'a RowExpr);

impl fmt::Display for DisplayWith<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            RowExpr::Literal { value, ty } => {
                if value.is_null() {
                    write!(f, "null:{}", ty.kind)
                } else {
                    write!(f, "{value}")
                }
            }
            RowExpr::InputRef { index, .. } => write!(f, "${index}"),
            RowExpr::LocalRef { index, .. } => write!(f, "#{index}"),
            RowExpr::DynamicParam { index, .. } => write!(f, "?{index}"),
            RowExpr::FieldAccess { target, field_name, .. } => {
                write!(f, "{}.{}", DisplayWith(target), field_name)
            }
            RowExpr::CorrelVariable { name, .. } => write!(f, "{name}"),
            RowExpr::Call { op: OpKind::Cast, operands, ty } => {
                write!(f, "CAST({}):{}", DisplayWith(&operands[0]), ty)
            }
            RowExpr::Call { op, operands, .. } => {
                write!(f, "{}(", builtin_name(*op))?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", DisplayWith(operand))?;
                }
                write!(f, ")")
            }
        }
    }
}

fn builtin_name(kind: OpKind) -> String {
    match kind {
        OpKind::And => "AND".into(),
        OpKind::Or => "OR".into(),
        OpKind::Not => "NOT".into(),
        OpKind::Eq => "=".into(),
        OpKind::NotEq => "<>".into(),
        OpKind::Lt => "<".into(),
        OpKind::LtEq => "<=".into(),
        OpKind::Gt => ">".into(),
        OpKind::GtEq => ">=".into(),
        OpKind::Plus => "+".into(),
        OpKind::Minus => "-".into(),
        OpKind::Times => "*".into(),
        OpKind::Divide => "/".into(),
        OpKind::UnaryMinus => "-".into(),
        OpKind::IsNull => "IS NULL".into(),
        OpKind::IsNotNull => "IS NOT NULL".into(),
        OpKind::IsTrue => "IS TRUE".into(),
        OpKind::IsNotTrue => "IS NOT TRUE".into(),
        OpKind::IsFalse => "IS FALSE".into(),
        OpKind::IsNotFalse => "IS NOT FALSE".into(),
        OpKind::Case => "CASE".into(),
        OpKind::Coalesce => "COALESCE".into(),
        OpKind::NullIf => "NULLIF".into(),
        OpKind::Cast => "CAST".into(),
        OpKind::Custom(id) => format!("FUN#{id}"),
    }
}

impl fmt::Display for RowExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DisplayWith(self))
    }
}

/// Builder for well-typed expressions. Clone-cheap; shares the operator
/// table.
#[derive(Clone)]
pub struct RexBuilder {
    pub types: TypeFactory,
    table: Arc<OperatorTable>,
}

impl RexBuilder {
    pub fn new(table: Arc<OperatorTable>) -> Self {
        Self { types: TypeFactory, table }
    }

    pub fn table(&self) -> &OperatorTable {
        &self.table
    }

    pub fn literal(&self, value: ScalarValue, ty: DataType) -> RowExpr {
        RowExpr::Literal { value, ty }
    }

    pub fn bool_lit(&self, v: bool) -> RowExpr {
        self.literal(ScalarValue::Bool(v), DataType::not_null(TypeKind::Boolean))
    }

    pub fn int_lit(&self, v: i64) -> RowExpr {
        self.literal(ScalarValue::Int64(v), DataType::not_null(TypeKind::Int64))
    }

    pub fn null_of(&self, kind: TypeKind) -> RowExpr {
        self.literal(ScalarValue::Null, DataType::nullable(kind))
    }

    pub fn null_bool(&self) -> RowExpr {
        self.null_of(TypeKind::Boolean)
    }

    pub fn input_ref(&self, index: usize, ty: DataType) -> RowExpr {
        RowExpr::InputRef { index, ty }
    }

    /// AND over any number of conjuncts. Zero conjuncts is `true`; one
    /// conjunct is itself.
    pub fn and(&self, mut operands: Vec<RowExpr>) -> RowExpr {
        match operands.len() {
            0 => self.bool_lit(true),
            1 => operands.pop().unwrap(),
            _ => {
                let nullable = operands.iter().any(|o| o.ty().nullable);
                RowExpr::Call {
                    op: OpKind::And,
                    operands,
                    ty: DataType::new(TypeKind::Boolean, nullable),
                }
            }
        }
    }

    pub fn or(&self, mut operands: Vec<RowExpr>) -> RowExpr {
        match operands.len() {
            0 => self.bool_lit(false),
            1 => operands.pop().unwrap(),
            _ => {
                let nullable = operands.iter().any(|o| o.ty().nullable);
                RowExpr::Call {
                    op: OpKind::Or,
                    operands,
                    ty: DataType::new(TypeKind::Boolean, nullable),
                }
            }
        }
    }

    pub fn not(&self, operand: RowExpr) -> RowExpr {
        let ty = operand.ty();
        RowExpr::Call { op: OpKind::Not, operands: vec![operand], ty }
    }

    pub fn comparison(&self, op: OpKind, left: RowExpr, right: RowExpr) -> RowExpr {
        debug_assert!(op.is_comparison());
        let nullable = left.ty().nullable || right.ty().nullable;
        RowExpr::Call {
            op,
            operands: vec![left, right],
            ty: DataType::new(TypeKind::Boolean, nullable),
        }
    }

    pub fn eq(&self, left: RowExpr, right: RowExpr) -> RowExpr {
        self.comparison(OpKind::Eq, left, right)
    }

    pub fn is_null(&self, operand: RowExpr) -> RowExpr {
        RowExpr::Call {
            op: OpKind::IsNull,
            operands: vec![operand],
            ty: DataType::not_null(TypeKind::Boolean),
        }
    }

    pub fn is_not_null(&self, operand: RowExpr) -> RowExpr {
        RowExpr::Call {
            op: OpKind::IsNotNull,
            operands: vec![operand],
            ty: DataType::not_null(TypeKind::Boolean),
        }
    }

    pub fn postfix(&self, op: OpKind, operand: RowExpr) -> RowExpr {
        RowExpr::Call {
            op,
            operands: vec![operand],
            ty: DataType::not_null(TypeKind::Boolean),
        }
    }

    pub fn cast(&self, operand: RowExpr, target: DataType) -> RowExpr {
        RowExpr::Call { op: OpKind::Cast, operands: vec![operand], ty: target }
    }

    /// CASE with flattened `[cond1, result1, ..., condN, resultN, else]`
    /// operands.
    pub fn case(&self, operands: Vec<RowExpr>, ty: DataType) -> RowExpr {
        RowExpr::Call { op: OpKind::Case, operands, ty }
    }

    pub fn coalesce(&self, operands: Vec<RowExpr>, ty: DataType) -> RowExpr {
        RowExpr::Call { op: OpKind::Coalesce, operands, ty }
    }

    /// Generic checked call through the operator table.
    pub fn call(&self, op: OpKind, operands: Vec<RowExpr>) -> Result<RowExpr> {
        let def = self
            .table
            .def(op)
            .ok_or_else(|| PlannerError::invalid(format!("unregistered operator {op:?}")))?;
        let operand_types: Vec<DataType> = operands.iter().map(RowExpr::ty).collect();
        if !(def.check_operands)(&operand_types) {
            return Err(PlannerError::invalid(format!(
                "operands do not conform to operator {}",
                def.name
            )));
        }
        let ty = (def.infer_return)(&operand_types).ok_or_else(|| {
            PlannerError::invalid(format!("cannot infer return type for {}", def.name))
        })?;
        Ok(RowExpr::Call { op, operands, ty })
    }
}

/// A local expression program: a table of expressions that `LocalRef`s index
/// into, plus projections and an optional condition over that table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Program {
    pub exprs: Vec<RowExpr>,
    pub projects: Vec<usize>,
    pub condition: Option<usize>,
}

impl Program {
    /// `LocalRef` indices must stay within the expression table, and may
    /// only refer backwards.
    pub fn validate(&self) -> Result<()> {
        for (i, expr) in self.exprs.iter().enumerate() {
            validate_local_refs(expr, i)?;
        }
        for &p in self.projects.iter().chain(self.condition.iter()) {
            if p >= self.exprs.len() {
                return Err(PlannerError::invalid(format!(
                    "program reference {p} out of range ({} exprs)",
                    self.exprs.len()
                )));
            }
        }
        Ok(())
    }
}

fn validate_local_refs(expr: &RowExpr, bound: usize) -> Result<()> {
    match expr {
        RowExpr::LocalRef { index, .. } if *index >= bound => Err(PlannerError::invalid(
            format!("local reference #{index} ahead of its definition"),
        )),
        RowExpr::FieldAccess { target, .. } => validate_local_refs(target, bound),
        RowExpr::Call { operands, .. } => {
            for o in operands {
                validate_local_refs(o, bound)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> RexBuilder {
        RexBuilder::new(Arc::new(OperatorTable::with_builtins()))
    }

    #[test]
    fn call_checks_operands() {
        let b = builder();
        let bad = b.call(
            OpKind::And,
            vec![b.int_lit(1), b.bool_lit(true)],
        );
        assert!(bad.is_err());

        let ok = b.call(OpKind::And, vec![b.bool_lit(true), b.bool_lit(false)]).unwrap();
        assert_eq!(ok.ty(), DataType::not_null(TypeKind::Boolean));
    }

    #[test]
    fn nullability_propagates_into_calls() {
        let b = builder();
        let x = b.input_ref(0, DataType::nullable(TypeKind::Int64));
        let cmp = b.eq(x.clone(), b.int_lit(1));
        assert!(cmp.ty().nullable);
        // IS NULL is never nullable, whatever its operand.
        assert!(!b.is_null(x).ty().nullable);
    }

    #[test]
    fn display_is_stable() {
        let b = builder();
        let e = b.and(vec![
            b.eq(b.input_ref(0, DataType::nullable(TypeKind::Int64)), b.int_lit(5)),
            b.is_not_null(b.input_ref(1, DataType::nullable(TypeKind::Varchar(None)))),
        ]);
        assert_eq!(e.to_string(), "AND(=($0, 5), IS NOT NULL($1))");
    }

    #[test]
    fn program_rejects_forward_local_refs() {
        let b = builder();
        let program = Program {
            exprs: vec![
                RowExpr::LocalRef { index: 1, ty: DataType::not_null(TypeKind::Int64) },
                b.int_lit(1),
            ],
            projects: vec![0],
            condition: None,
        };
        assert!(program.validate().is_err());

        let ok = Program {
            exprs: vec![b.int_lit(1), RowExpr::LocalRef { index: 0, ty: DataType::not_null(TypeKind::Int64) }],
            projects: vec![1],
            condition: None,
        };
        assert!(ok.validate().is_ok());
    }
}
