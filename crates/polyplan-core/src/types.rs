//! # Data Types and Row Types
//!
//! The planner's type system is deliberately small: enough kinds to type the
//! scalar values that appear in plans, with nullability carried on the type
//! rather than on the expression. Nullability matters everywhere in the
//! simplifier (`x = x` folds differently for nullable and non-null `x`), so
//! every expression carries a fully resolved [`DataType`].
//!
//! Row types describe the output shape of an algebra node. Two row types are
//! *compatible* when they agree on arity and kinds; field names and
//! nullability may differ, which is the harmonization applied when equivalent
//! expressions land in the same set.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type kind, without nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Boolean,
    Int32,
    Int64,
    Float64,
    /// Variable-length character data with an optional precision bound.
    /// `None` means unbounded.
    Varchar(Option<u32>),
    /// Days since the Unix epoch.
    Date,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Boolean => write!(f, "BOOLEAN"),
            TypeKind::Int32 => write!(f, "INTEGER"),
            TypeKind::Int64 => write!(f, "BIGINT"),
            TypeKind::Float64 => write!(f, "DOUBLE"),
            TypeKind::Varchar(Some(p)) => write!(f, "VARCHAR({p})"),
            TypeKind::Varchar(None) => write!(f, "VARCHAR"),
            TypeKind::Date => write!(f, "DATE"),
        }
    }
}

/// A resolved scalar type: kind plus nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl DataType {
    pub const fn new(kind: TypeKind, nullable: bool) -> Self {
        Self { kind, nullable }
    }

    pub const fn not_null(kind: TypeKind) -> Self {
        Self::new(kind, false)
    }

    pub const fn nullable(kind: TypeKind) -> Self {
        Self::new(kind, true)
    }

    pub fn with_nullable(self, nullable: bool) -> Self {
        Self { nullable, ..self }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Int32 | TypeKind::Int64 | TypeKind::Float64
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// A named field of a row type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// The output row shape of an algebra node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowType {
    pub fields: Vec<Field>,
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    /// Structural compatibility: same arity and kinds. Field names and
    /// nullability are harmonized when sets merge, so they do not
    /// participate in the comparison.
    pub fn compatible_with(&self, other: &RowType) -> bool {
        self.arity() == other.arity()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.ty.kind == b.ty.kind)
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", field.name, field.ty)?;
        }
        write!(f, ")")
    }
}

/// Factory for derived types. Owned by the cluster; rules and the simplifier
/// reach it through the expression builder.
#[derive(Debug, Clone, Default)]
pub struct TypeFactory;

impl TypeFactory {
    /// The least restrictive type covering both inputs, used to harmonize
    /// union branches. Returns `None` when the kinds are unrelated.
    pub fn least_restrictive(&self, a: DataType, b: DataType) -> Option<DataType> {
        let nullable = a.nullable || b.nullable;
        if a.kind == b.kind {
            return Some(DataType::new(a.kind, nullable));
        }
        let kind = match (a.kind, b.kind) {
            (TypeKind::Int32, TypeKind::Int64) | (TypeKind::Int64, TypeKind::Int32) => {
                TypeKind::Int64
            }
            (TypeKind::Int32, TypeKind::Float64)
            | (TypeKind::Float64, TypeKind::Int32)
            | (TypeKind::Int64, TypeKind::Float64)
            | (TypeKind::Float64, TypeKind::Int64) => TypeKind::Float64,
            (TypeKind::Varchar(x), TypeKind::Varchar(y)) => TypeKind::Varchar(match (x, y) {
                (Some(x), Some(y)) => Some(x.max(y)),
                _ => None,
            }),
            _ => return None,
        };
        Some(DataType::new(kind, nullable))
    }

    /// Whether a cast from `from` to `to` loses no information: identity,
    /// widening numeric casts, and char-precision widening only.
    pub fn is_lossless_cast(&self, from: DataType, to: DataType) -> bool {
        if from.kind == to.kind {
            return true;
        }
        matches!(
            (from.kind, to.kind),
            (TypeKind::Int32, TypeKind::Int64) | (TypeKind::Int32, TypeKind::Float64)
        ) || matches!(
            (from.kind, to.kind),
            (TypeKind::Varchar(Some(a)), TypeKind::Varchar(Some(b))) if a <= b
        ) || matches!(
            (from.kind, to.kind),
            (TypeKind::Varchar(_), TypeKind::Varchar(None))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_ignores_names_and_nullability() {
        let a = RowType::new(vec![
            Field::new("a", DataType::not_null(TypeKind::Int64)),
            Field::new("b", DataType::nullable(TypeKind::Varchar(None))),
        ]);
        let b = RowType::new(vec![
            Field::new("x", DataType::nullable(TypeKind::Int64)),
            Field::new("y", DataType::not_null(TypeKind::Varchar(None))),
        ]);
        assert!(a.compatible_with(&b));

        let c = RowType::new(vec![Field::new("a", DataType::not_null(TypeKind::Int64))]);
        assert!(!a.compatible_with(&c));
    }

    #[test]
    fn lossless_casts() {
        let tf = TypeFactory;
        assert!(tf.is_lossless_cast(
            DataType::not_null(TypeKind::Int32),
            DataType::not_null(TypeKind::Int64)
        ));
        assert!(!tf.is_lossless_cast(
            DataType::not_null(TypeKind::Int64),
            DataType::not_null(TypeKind::Int32)
        ));
        assert!(tf.is_lossless_cast(
            DataType::not_null(TypeKind::Varchar(Some(10))),
            DataType::not_null(TypeKind::Varchar(Some(20)))
        ));
        assert!(!tf.is_lossless_cast(
            DataType::not_null(TypeKind::Varchar(Some(20))),
            DataType::not_null(TypeKind::Varchar(Some(10)))
        ));
    }
}
