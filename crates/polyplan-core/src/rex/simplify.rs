//! # Row-Expression Simplifier
//!
//! Normalizes and folds scalar expressions during planning and rule firing.
//! The simplifier is pure: it takes an expression, an unknown-as mode, and an
//! optional predicate context, and returns an equivalent expression. Under
//! three-valued logic, "equivalent" means equal wherever the input is
//! defined, and equal as a filter under the chosen mode.
//!
//! The entry point is [`Simplifier::simplify`], which runs the rewrite to a
//! fixpoint so that `simplify(simplify(e)) == simplify(e)`.
//!
//! Internally a sub-expression that must evaluate to null raises the
//! [`AlwaysNull`] signal; it unwinds to the nearest non-strict operator or to
//! the public boundary, where it becomes a null literal or a constant boolean
//! per the mode.

use super::{OpKind, RexBuilder, RowExpr, ScalarValue};
use crate::types::{DataType, TypeKind};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Interpretation of SQL `unknown` at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownAs {
    /// Keep three-valued logic.
    Unknown,
    /// Collapse `unknown` to `true` (e.g. under `NOT` in a filter).
    True,
    /// Collapse `unknown` to `false` (`WHERE`-context).
    False,
}

impl UnknownAs {
    fn negate(self) -> UnknownAs {
        match self {
            UnknownAs::Unknown => UnknownAs::Unknown,
            UnknownAs::True => UnknownAs::False,
            UnknownAs::False => UnknownAs::True,
        }
    }
}

/// Internal signal: the sub-expression under simplification must be null.
#[derive(Debug)]
pub(crate) struct AlwaysNull;

type SimpResult<T> = Result<T, AlwaysNull>;

/// A conjunction of facts believed true over the surrounding row.
#[derive(Debug, Clone, Default)]
pub struct PredicateContext {
    facts: Vec<RowExpr>,
}

impl PredicateContext {
    pub fn new(facts: Vec<RowExpr>) -> Self {
        let facts = facts
            .iter()
            .flat_map(|f| f.conjuncts().into_iter().cloned().collect::<Vec<_>>())
            .collect();
        Self { facts }
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Whether the facts imply `e`.
    pub fn implies(&self, e: &RowExpr) -> bool {
        self.facts.iter().any(|f| {
            f == e
                || match (as_range_atom(f), as_range_atom(e)) {
                    (Some(fa), Some(ea)) if fa.key == ea.key => {
                        comparison_implies(fa.op, fa.value, ea.op, ea.value)
                    }
                    _ => false,
                }
        })
    }

    /// Whether the facts imply `NOT e`.
    pub fn implies_not(&self, e: &RowExpr) -> bool {
        self.facts.iter().any(|f| {
            f.as_call(OpKind::Not).map(|ops| &ops[0] == e).unwrap_or(false)
                || e.as_call(OpKind::Not).map(|ops| &ops[0] == f).unwrap_or(false)
                || match (as_range_atom(f), as_range_atom(e)) {
                    (Some(fa), Some(ea)) if fa.key == ea.key => {
                        comparison_excludes(fa.op, fa.value, ea.op, ea.value)
                    }
                    _ => false,
                }
        })
    }
}

/// A comparison against a literal, normalized so the literal is on the right.
struct RangeAtom<'a> {
    key: &'a RowExpr,
    op: OpKind,
    value: &'a ScalarValue,
}

fn as_range_atom(e: &RowExpr) -> Option<RangeAtom<'_>> {
    let RowExpr::Call { op, operands, .. } = e else {
        return None;
    };
    if !op.is_comparison() || operands.len() != 2 {
        return None;
    }
    match (&operands[0], &operands[1]) {
        (key, RowExpr::Literal { value, .. }) if !value.is_null() && key.as_literal().is_none() => {
            Some(RangeAtom { key, op: *op, value })
        }
        (RowExpr::Literal { value, .. }, key) if !value.is_null() && key.as_literal().is_none() => {
            Some(RangeAtom { key, op: op.reverse()?, value })
        }
        _ => None,
    }
}

/// `x <fop> fv` ⇒ `x <eop> ev`, conservatively.
fn comparison_implies(fop: OpKind, fv: &ScalarValue, eop: OpKind, ev: &ScalarValue) -> bool {
    let Some(cmp) = fv.compare(ev) else { return false };
    use OpKind::*;
    match (fop, eop) {
        (Eq, Eq) => cmp == Ordering::Equal,
        (Eq, NotEq) => cmp != Ordering::Equal,
        (Eq, Gt) => cmp == Ordering::Greater,
        (Eq, GtEq) => cmp != Ordering::Less,
        (Eq, Lt) => cmp == Ordering::Less,
        (Eq, LtEq) => cmp != Ordering::Greater,
        (Gt, Gt) | (Gt, GtEq) | (GtEq, GtEq) => cmp != Ordering::Less,
        (GtEq, Gt) => cmp == Ordering::Greater,
        (Gt, NotEq) => cmp != Ordering::Less,
        (GtEq, NotEq) => cmp == Ordering::Greater,
        (Lt, Lt) | (Lt, LtEq) | (LtEq, LtEq) => cmp != Ordering::Greater,
        (LtEq, Lt) => cmp == Ordering::Less,
        (Lt, NotEq) => cmp != Ordering::Greater,
        (LtEq, NotEq) => cmp == Ordering::Less,
        _ => false,
    }
}

/// `x <fop> fv` ⇒ `NOT (x <eop> ev)`, conservatively.
fn comparison_excludes(fop: OpKind, fv: &ScalarValue, eop: OpKind, ev: &ScalarValue) -> bool {
    use OpKind::*;
    match eop {
        Eq => comparison_implies(fop, fv, NotEq, ev),
        NotEq => comparison_implies(fop, fv, Eq, ev),
        Gt => comparison_implies(fop, fv, LtEq, ev),
        GtEq => comparison_implies(fop, fv, Lt, ev),
        Lt => comparison_implies(fop, fv, GtEq, ev),
        LtEq => comparison_implies(fop, fv, Gt, ev),
        _ => false,
    }
}

const MAX_PASSES: usize = 6;

/// The simplification engine. Construct once per scratch scope; it borrows
/// the cluster's expression builder and is otherwise stateless.
pub struct Simplifier<'a> {
    rex: &'a RexBuilder,
    context: PredicateContext,
}

impl<'a> Simplifier<'a> {
    pub fn new(rex: &'a RexBuilder) -> Self {
        Self { rex, context: PredicateContext::default() }
    }

    pub fn with_context(rex: &'a RexBuilder, context: PredicateContext) -> Self {
        Self { rex, context }
    }

    /// Simplify `e` under the given unknown-as mode, to a fixpoint.
    pub fn simplify(&self, e: &RowExpr, mode: UnknownAs) -> RowExpr {
        let mut current = e.clone();
        for _ in 0..MAX_PASSES {
            match self.simp(&current, mode) {
                Ok(next) => {
                    if next == current {
                        return current;
                    }
                    current = next;
                }
                Err(AlwaysNull) => return self.null_result(e, mode),
            }
        }
        current
    }

    /// What an always-null expression becomes at the public boundary.
    fn null_result(&self, e: &RowExpr, mode: UnknownAs) -> RowExpr {
        if e.ty().kind == TypeKind::Boolean {
            match mode {
                UnknownAs::Unknown => self.rex.null_bool(),
                UnknownAs::True => self.rex.bool_lit(true),
                UnknownAs::False => self.rex.bool_lit(false),
            }
        } else {
            self.rex.null_of(e.ty().kind)
        }
    }

    fn simp(&self, e: &RowExpr, mode: UnknownAs) -> SimpResult<RowExpr> {
        if e.ty().kind == TypeKind::Boolean
            && e.as_literal().is_none()
            && !self.context.is_empty()
        {
            if self.context.implies(e) {
                return Ok(self.rex.bool_lit(true));
            }
            if self.context.implies_not(e) {
                return Ok(self.rex.bool_lit(false));
            }
        }
        match e {
            RowExpr::Call { op, operands, ty } => self.simp_call(*op, operands, *ty, mode),
            RowExpr::FieldAccess { target, field_index, field_name, ty } => {
                let target = self.simp(target, UnknownAs::Unknown)?;
                if target.is_null_literal() {
                    return Err(AlwaysNull);
                }
                Ok(RowExpr::FieldAccess {
                    target: Box::new(target),
                    field_index: *field_index,
                    field_name: field_name.clone(),
                    ty: *ty,
                })
            }
            other => Ok(other.clone()),
        }
    }

    /// Simplify a child of a non-strict operator: an always-null child is a
    /// value, not a signal, so it materializes as a null literal.
    fn simp_absorbing(&self, e: &RowExpr, mode: UnknownAs) -> RowExpr {
        match self.simp(e, mode) {
            Ok(out) => out,
            Err(AlwaysNull) => self.rex.null_of(e.ty().kind),
        }
    }

    fn simp_call(
        &self,
        op: OpKind,
        operands: &[RowExpr],
        ty: DataType,
        mode: UnknownAs,
    ) -> SimpResult<RowExpr> {
        match op {
            OpKind::And => self.simp_and(operands, mode),
            OpKind::Or => self.simp_or(operands, mode),
            OpKind::Not => self.simp_not(&operands[0], mode),
            _ if op.is_comparison() => self.simp_comparison(op, operands),
            OpKind::Plus | OpKind::Minus | OpKind::Times | OpKind::Divide => {
                self.simp_arith(op, operands, ty)
            }
            OpKind::UnaryMinus => self.simp_unary_minus(&operands[0], ty),
            OpKind::IsNull => self.simp_is_null(&operands[0], false),
            OpKind::IsNotNull => self.simp_is_null(&operands[0], true),
            OpKind::IsTrue | OpKind::IsNotTrue | OpKind::IsFalse | OpKind::IsNotFalse => {
                self.simp_is_bool(op, &operands[0])
            }
            OpKind::Case => self.simp_case(operands, ty),
            OpKind::Coalesce => self.simp_coalesce(operands, ty),
            OpKind::NullIf => self.simp_nullif(operands, ty),
            OpKind::Cast => self.simp_cast(&operands[0], ty),
            OpKind::Custom(_) => {
                let strict = self.rex.table().is_strict(op);
                let mut out = Vec::with_capacity(operands.len());
                for o in operands {
                    let s = if strict {
                        self.simp(o, UnknownAs::Unknown)?
                    } else {
                        self.simp_absorbing(o, UnknownAs::Unknown)
                    };
                    if strict && s.is_null_literal() {
                        return Err(AlwaysNull);
                    }
                    out.push(s);
                }
                Ok(RowExpr::Call { op, operands: out, ty })
            }
            // Remaining kinds were dispatched above.
            _ => Ok(RowExpr::Call { op, operands: operands.to_vec(), ty }),
        }
    }

    // ---------------------------------------------------------------------
    // Boolean connectives
    // ---------------------------------------------------------------------

    fn simp_and(&self, operands: &[RowExpr], mode: UnknownAs) -> SimpResult<RowExpr> {
        let mut terms: Vec<RowExpr> = Vec::new();
        let mut seen: HashSet<RowExpr> = HashSet::new();
        let mut has_null = false;

        let mut pending: Vec<RowExpr> = operands.to_vec();
        let mut i = 0;
        while i < pending.len() {
            let t = self.simp_absorbing(&pending[i], mode);
            i += 1;
            if let Some(inner) = t.as_call(OpKind::And) {
                pending.splice(i..i, inner.iter().cloned());
                continue;
            }
            if t.is_true_literal() {
                continue;
            }
            if t.is_false_literal() {
                return Ok(self.rex.bool_lit(false));
            }
            if t.is_null_literal() {
                match mode {
                    UnknownAs::False => return Ok(self.rex.bool_lit(false)),
                    UnknownAs::True => continue,
                    UnknownAs::Unknown => {
                        has_null = true;
                        continue;
                    }
                }
            }
            if seen.insert(t.clone()) {
                terms.push(t);
            }
        }

        // Absorption: x AND (x OR y) = x.
        terms.retain(|t| {
            t.as_call(OpKind::Or)
                .map(|ds| !ds.iter().any(|d| seen.contains(d) && d != t))
                .unwrap_or(true)
        });

        // x AND NOT x: false for non-null x, unknown for null x.
        let negation_pair = terms.iter().position(|t| {
            t.as_call(OpKind::Not)
                .map(|inner| terms.iter().any(|u| *u == inner[0]))
                .unwrap_or(false)
        });
        if let Some(pos) = negation_pair {
            let x = terms[pos].as_call(OpKind::Not).unwrap()[0].clone();
            if mode == UnknownAs::False || !x.ty().nullable {
                return Ok(self.rex.bool_lit(false));
            }
            terms.retain(|t| *t != x && t.as_call(OpKind::Not).map(|i| i[0] != x).unwrap_or(true));
            terms.insert(0, self.rex.is_null(x));
            has_null = true;
        }

        // Range reasoning over literal comparisons.
        match self.reduce_ranges(terms, mode) {
            Ok(reduced) => terms = reduced,
            Err(Contradiction) => return Ok(self.rex.bool_lit(false)),
        }

        let keep_null = has_null && mode == UnknownAs::Unknown;
        if terms.is_empty() {
            return if keep_null {
                Ok(self.rex.null_bool())
            } else {
                Ok(self.rex.bool_lit(true))
            };
        }
        if keep_null {
            terms.insert(0, self.rex.null_bool());
        }
        Ok(self.rex.and(terms))
    }

    fn simp_or(&self, operands: &[RowExpr], mode: UnknownAs) -> SimpResult<RowExpr> {
        let mut terms: Vec<RowExpr> = Vec::new();
        let mut seen: HashSet<RowExpr> = HashSet::new();
        let mut has_null = false;

        let mut pending: Vec<RowExpr> = operands.to_vec();
        let mut i = 0;
        while i < pending.len() {
            let t = self.simp_absorbing(&pending[i], mode);
            i += 1;
            if let Some(inner) = t.as_call(OpKind::Or) {
                pending.splice(i..i, inner.iter().cloned());
                continue;
            }
            if t.is_false_literal() {
                continue;
            }
            if t.is_true_literal() {
                return Ok(self.rex.bool_lit(true));
            }
            if t.is_null_literal() {
                match mode {
                    UnknownAs::True => return Ok(self.rex.bool_lit(true)),
                    UnknownAs::False => continue,
                    UnknownAs::Unknown => {
                        has_null = true;
                        continue;
                    }
                }
            }
            if seen.insert(t.clone()) {
                terms.push(t);
            }
        }

        // Absorption: x OR (x AND y) = x.
        terms.retain(|t| {
            t.as_call(OpKind::And)
                .map(|cs| !cs.iter().any(|c| seen.contains(c) && c != t))
                .unwrap_or(true)
        });

        // x OR NOT x: true for non-null x, unknown for null x.
        let negation_pair = terms.iter().position(|t| {
            t.as_call(OpKind::Not)
                .map(|inner| terms.iter().any(|u| *u == inner[0]))
                .unwrap_or(false)
        });
        if let Some(pos) = negation_pair {
            let x = terms[pos].as_call(OpKind::Not).unwrap()[0].clone();
            if mode == UnknownAs::True || !x.ty().nullable {
                return Ok(self.rex.bool_lit(true));
            }
            terms.retain(|t| *t != x && t.as_call(OpKind::Not).map(|i| i[0] != x).unwrap_or(true));
            terms.insert(0, self.rex.is_not_null(x));
            has_null = true;
        }

        let keep_null = has_null && mode == UnknownAs::Unknown;
        if terms.is_empty() {
            return if keep_null {
                Ok(self.rex.null_bool())
            } else {
                Ok(self.rex.bool_lit(false))
            };
        }
        if keep_null {
            terms.insert(0, self.rex.null_bool());
        }
        Ok(self.rex.or(terms))
    }

    fn simp_not(&self, operand: &RowExpr, mode: UnknownAs) -> SimpResult<RowExpr> {
        let child = self.simp_absorbing(operand, mode.negate());
        if child.is_true_literal() {
            return Ok(self.rex.bool_lit(false));
        }
        if child.is_false_literal() {
            return Ok(self.rex.bool_lit(true));
        }
        if child.is_null_literal() {
            return Ok(self.rex.null_bool());
        }
        if let RowExpr::Call { op, operands, .. } = &child {
            // NOT NOT x = x.
            if *op == OpKind::Not {
                return self.simp(&operands[0], mode);
            }
            // NOT over a comparison is the negated comparison.
            if let Some(negated) = op.negate_comparison() {
                return self.simp(
                    &self.rex.comparison(negated, operands[0].clone(), operands[1].clone()),
                    mode,
                );
            }
            // De Morgan.
            if *op == OpKind::And {
                let inverted = operands.iter().map(|o| self.rex.not(o.clone())).collect();
                return self.simp(&self.rex.or(inverted), mode);
            }
            if *op == OpKind::Or {
                let inverted = operands.iter().map(|o| self.rex.not(o.clone())).collect();
                return self.simp(&self.rex.and(inverted), mode);
            }
        }
        Ok(self.rex.not(child))
    }

    // ---------------------------------------------------------------------
    // Comparisons and arithmetic
    // ---------------------------------------------------------------------

    fn simp_comparison(&self, op: OpKind, operands: &[RowExpr]) -> SimpResult<RowExpr> {
        let left = self.simp(&operands[0], UnknownAs::Unknown)?;
        let right = self.simp(&operands[1], UnknownAs::Unknown)?;
        if left.is_null_literal() || right.is_null_literal() {
            return Err(AlwaysNull);
        }

        if let (Some(lv), Some(rv)) = (left.as_literal(), right.as_literal()) {
            if let Some(ordering) = lv.compare(rv) {
                let v = match op {
                    OpKind::Eq => ordering == Ordering::Equal,
                    OpKind::NotEq => ordering != Ordering::Equal,
                    OpKind::Lt => ordering == Ordering::Less,
                    OpKind::LtEq => ordering != Ordering::Greater,
                    OpKind::Gt => ordering == Ordering::Greater,
                    OpKind::GtEq => ordering != Ordering::Less,
                    _ => unreachable!(),
                };
                return Ok(self.rex.bool_lit(v));
            }
        }

        if left == right && is_deterministic(self.rex, &left) {
            return Ok(match op {
                // Reflexive: true for non-null, unknown for null.
                OpKind::Eq | OpKind::LtEq | OpKind::GtEq => {
                    if left.ty().nullable {
                        self.rex.is_not_null(left)
                    } else {
                        self.rex.bool_lit(true)
                    }
                }
                // Irreflexive: false for non-null, unknown for null.
                _ => {
                    if left.ty().nullable {
                        self.rex
                            .and(vec![self.rex.null_bool(), self.rex.is_null(left)])
                    } else {
                        self.rex.bool_lit(false)
                    }
                }
            });
        }

        Ok(self.rex.comparison(op, left, right))
    }

    fn simp_arith(&self, op: OpKind, operands: &[RowExpr], ty: DataType) -> SimpResult<RowExpr> {
        let left = self.simp(&operands[0], UnknownAs::Unknown)?;
        let right = self.simp(&operands[1], UnknownAs::Unknown)?;
        if left.is_null_literal() || right.is_null_literal() {
            return Err(AlwaysNull);
        }
        if let (Some(lv), Some(rv)) = (left.as_literal(), right.as_literal()) {
            // Overflow or division by zero skips the fold.
            if let Some(v) = fold_arith(op, lv, rv) {
                return Ok(self.rex.literal(v, ty.with_nullable(false)));
            }
        }
        Ok(RowExpr::Call { op, operands: vec![left, right], ty })
    }

    fn simp_unary_minus(&self, operand: &RowExpr, ty: DataType) -> SimpResult<RowExpr> {
        let child = self.simp(operand, UnknownAs::Unknown)?;
        if child.is_null_literal() {
            return Err(AlwaysNull);
        }
        if let Some(v) = child.as_literal() {
            let folded = match v {
                ScalarValue::Int32(i) => i.checked_neg().map(ScalarValue::Int32),
                ScalarValue::Int64(i) => i.checked_neg().map(ScalarValue::Int64),
                ScalarValue::Float64(f) => Some(ScalarValue::Float64(-*f)),
                _ => None,
            };
            if let Some(v) = folded {
                return Ok(self.rex.literal(v, ty.with_nullable(false)));
            }
        }
        if let Some(inner) = child.as_call(OpKind::UnaryMinus) {
            return Ok(inner[0].clone());
        }
        Ok(RowExpr::Call { op: OpKind::UnaryMinus, operands: vec![child], ty })
    }

    // ---------------------------------------------------------------------
    // Null tests
    // ---------------------------------------------------------------------

    fn simp_is_null(&self, operand: &RowExpr, negated: bool) -> SimpResult<RowExpr> {
        let child = self.simp_absorbing(operand, UnknownAs::Unknown);
        if let Some(v) = child.as_literal() {
            return Ok(self.rex.bool_lit(v.is_null() != negated));
        }
        if !child.ty().nullable && is_deterministic(self.rex, &child) {
            return Ok(self.rex.bool_lit(negated));
        }
        Ok(if negated {
            self.rex.is_not_null(child)
        } else {
            self.rex.is_null(child)
        })
    }

    fn simp_is_bool(&self, op: OpKind, operand: &RowExpr) -> SimpResult<RowExpr> {
        let child = self.simp_absorbing(operand, UnknownAs::Unknown);
        if let Some(v) = child.as_literal() {
            let out = match (op, v) {
                (OpKind::IsTrue, ScalarValue::Bool(b)) => *b,
                (OpKind::IsTrue, ScalarValue::Null) => false,
                (OpKind::IsNotTrue, ScalarValue::Bool(b)) => !*b,
                (OpKind::IsNotTrue, ScalarValue::Null) => true,
                (OpKind::IsFalse, ScalarValue::Bool(b)) => !*b,
                (OpKind::IsFalse, ScalarValue::Null) => false,
                (OpKind::IsNotFalse, ScalarValue::Bool(b)) => *b,
                (OpKind::IsNotFalse, ScalarValue::Null) => true,
                _ => return Ok(self.rex.postfix(op, child)),
            };
            return Ok(self.rex.bool_lit(out));
        }
        if !child.ty().nullable {
            return match op {
                OpKind::IsTrue | OpKind::IsNotFalse => Ok(child),
                _ => self.simp_not(&child, UnknownAs::Unknown),
            };
        }
        Ok(self.rex.postfix(op, child))
    }

    // ---------------------------------------------------------------------
    // CASE, COALESCE, NULLIF, CAST
    // ---------------------------------------------------------------------

    fn simp_case(&self, operands: &[RowExpr], ty: DataType) -> SimpResult<RowExpr> {
        // Layout: [cond0, result0, ..., condN, resultN, else].
        if operands.len() % 2 == 0 {
            return Ok(RowExpr::Call { op: OpKind::Case, operands: operands.to_vec(), ty });
        }
        let n = operands.len() / 2;
        let mut branches: Vec<(RowExpr, RowExpr)> = Vec::with_capacity(n);
        let mut else_expr = self.simp_absorbing(&operands[operands.len() - 1], UnknownAs::Unknown);

        for pair in operands[..operands.len() - 1].chunks(2) {
            // A condition whose value is unknown selects no branch, so it
            // simplifies under unknown-as-FALSE regardless of context.
            let cond = self.simp_absorbing(&pair[0], UnknownAs::False);
            if cond.is_false_literal() || cond.is_null_literal() {
                continue;
            }
            let result = self.simp_absorbing(&pair[1], UnknownAs::Unknown);
            if cond.is_true_literal() {
                else_expr = result;
                break;
            }
            // Collapse equal adjacent results into OR-combined conditions.
            if let Some(last) = branches.last_mut() {
                if last.1 == result {
                    last.0 = self.rex.or(vec![last.0.clone(), cond]);
                    continue;
                }
            }
            branches.push((cond, result));
        }

        // Trailing branches that produce the else value are redundant.
        while let Some(last) = branches.last() {
            if last.1 == else_expr && is_deterministic(self.rex, &last.0) {
                branches.pop();
            } else {
                break;
            }
        }

        if branches.is_empty() {
            if else_expr.is_null_literal() {
                return Err(AlwaysNull);
            }
            return Ok(else_expr);
        }

        // Boolean CASE reduces to a condition.
        if branches.len() == 1 && ty.kind == TypeKind::Boolean {
            let (cond, result) = &branches[0];
            if result.is_true_literal() && else_expr.is_false_literal() {
                return Ok(if cond.ty().nullable {
                    self.rex.postfix(OpKind::IsTrue, cond.clone())
                } else {
                    cond.clone()
                });
            }
            if result.is_false_literal() && else_expr.is_true_literal() {
                return Ok(if cond.ty().nullable {
                    self.rex.postfix(OpKind::IsNotTrue, cond.clone())
                } else {
                    self.simp_not(cond, UnknownAs::Unknown)?
                });
            }
        }

        let mut out = Vec::with_capacity(branches.len() * 2 + 1);
        for (c, r) in branches {
            out.push(c);
            out.push(r);
        }
        out.push(else_expr);
        Ok(self.rex.case(out, ty))
    }

    fn simp_coalesce(&self, operands: &[RowExpr], ty: DataType) -> SimpResult<RowExpr> {
        let mut out: Vec<RowExpr> = Vec::new();
        let mut seen: HashSet<RowExpr> = HashSet::new();
        for o in operands {
            let s = self.simp_absorbing(o, UnknownAs::Unknown);
            if s.is_null_literal() {
                continue;
            }
            if seen.contains(&s) && is_deterministic(self.rex, &s) {
                continue;
            }
            let terminal = !s.ty().nullable;
            seen.insert(s.clone());
            out.push(s);
            // Arguments after the first provably non-null one are dead.
            if terminal {
                break;
            }
        }
        match out.len() {
            0 => Err(AlwaysNull),
            1 => Ok(out.pop().unwrap()),
            _ => Ok(self.rex.coalesce(out, ty)),
        }
    }

    fn simp_nullif(&self, operands: &[RowExpr], ty: DataType) -> SimpResult<RowExpr> {
        let left = self.simp(&operands[0], UnknownAs::Unknown)?;
        let right = self.simp_absorbing(&operands[1], UnknownAs::Unknown);
        if left.is_null_literal() {
            return Err(AlwaysNull);
        }
        // NULLIF(a, null): the comparison is never true, so the result is a.
        if right.is_null_literal() {
            return Ok(left);
        }
        if let (Some(lv), Some(rv)) = (left.as_literal(), right.as_literal()) {
            if let Some(ordering) = lv.compare(rv) {
                return if ordering == Ordering::Equal {
                    Err(AlwaysNull)
                } else {
                    Ok(left)
                };
            }
        }
        Ok(RowExpr::Call { op: OpKind::NullIf, operands: vec![left, right], ty })
    }

    fn simp_cast(&self, operand: &RowExpr, target: DataType) -> SimpResult<RowExpr> {
        let child = self.simp(operand, UnknownAs::Unknown)?;
        if child.is_null_literal() {
            return Err(AlwaysNull);
        }
        // No-op cast within the same kind.
        if child.ty().kind == target.kind && self.rex.types.is_lossless_cast(child.ty(), target)
        {
            return Ok(child);
        }
        // cast(cast(x, T), T) = cast(x, T).
        if let Some(inner) = child.as_call(OpKind::Cast) {
            if child.ty().kind == target.kind {
                return self.simp_cast(&inner[0], target);
            }
        }
        if let Some(v) = child.as_literal() {
            if let Some(folded) = v.cast_to(&target) {
                return Ok(self.rex.literal(folded, target.with_nullable(false)));
            }
        }
        Ok(self.rex.cast(child, target))
    }

    // ---------------------------------------------------------------------
    // Range reasoning
    // ---------------------------------------------------------------------

    /// Collect per-key interval constraints from the conjuncts, reject empty
    /// intervals, and drop dominated constraints.
    fn reduce_ranges(
        &self,
        terms: Vec<RowExpr>,
        mode: UnknownAs,
    ) -> Result<Vec<RowExpr>, Contradiction> {
        use std::collections::HashMap;
        #[derive(Default, Clone)]
        struct Range {
            lower: Option<(ScalarValue, bool)>,
            upper: Option<(ScalarValue, bool)>,
        }
        let mut ranges: HashMap<RowExpr, Range> = HashMap::new();
        let mut nullable_key_seen = false;

        for t in &terms {
            let Some(atom) = as_range_atom(t) else { continue };
            if !is_deterministic(self.rex, atom.key) {
                continue;
            }
            if atom.key.ty().nullable {
                nullable_key_seen = true;
            }
            let range = ranges.entry(atom.key.clone()).or_default();
            let v = atom.value.clone();
            match atom.op {
                OpKind::Gt | OpKind::GtEq | OpKind::Eq => {
                    let incl = atom.op != OpKind::Gt;
                    let tighter = match &range.lower {
                        None => true,
                        Some((cur, cur_incl)) => match v.compare(cur) {
                            Some(Ordering::Greater) => true,
                            Some(Ordering::Equal) => *cur_incl && !incl,
                            _ => false,
                        },
                    };
                    if tighter {
                        range.lower = Some((v.clone(), incl));
                    }
                }
                _ => {}
            }
            let range = ranges.get_mut(atom.key).unwrap();
            match atom.op {
                OpKind::Lt | OpKind::LtEq | OpKind::Eq => {
                    let incl = atom.op != OpKind::Lt;
                    let tighter = match &range.upper {
                        None => true,
                        Some((cur, cur_incl)) => match atom.value.compare(cur) {
                            Some(Ordering::Less) => true,
                            Some(Ordering::Equal) => *cur_incl && !incl,
                            _ => false,
                        },
                    };
                    if tighter {
                        range.upper = Some((atom.value.clone(), incl));
                    }
                }
                _ => {}
            }
        }

        // Empty interval: lower above upper, or touching with an open end.
        let empty = ranges.values().any(|r| match (&r.lower, &r.upper) {
            (Some((lo, lo_incl)), Some((hi, hi_incl))) => match lo.compare(hi) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => !(*lo_incl && *hi_incl),
                _ => false,
            },
            _ => false,
        });
        if empty && (mode == UnknownAs::False || !nullable_key_seen) {
            return Err(Contradiction);
        }
        if empty {
            return Ok(terms);
        }

        // Keep only the binding constraint per key and bound.
        let mut lower_kept: HashSet<RowExpr> = HashSet::new();
        let mut upper_kept: HashSet<RowExpr> = HashSet::new();
        let kept = terms
            .into_iter()
            .filter(|t| {
                let Some(atom) = as_range_atom(t) else { return true };
                let Some(range) = ranges.get(atom.key) else { return true };
                match atom.op {
                    OpKind::Eq => true,
                    OpKind::Gt | OpKind::GtEq => {
                        let binding = matches!(
                            &range.lower,
                            Some((v, incl))
                                if v == atom.value && *incl == (atom.op == OpKind::GtEq)
                        );
                        binding && lower_kept.insert(atom.key.clone())
                    }
                    OpKind::Lt | OpKind::LtEq => {
                        let binding = matches!(
                            &range.upper,
                            Some((v, incl))
                                if v == atom.value && *incl == (atom.op == OpKind::LtEq)
                        );
                        binding && upper_kept.insert(atom.key.clone())
                    }
                    _ => true,
                }
            })
            .collect();
        Ok(kept)
    }

    // ---------------------------------------------------------------------
    // CNF and factor pulling
    // ---------------------------------------------------------------------

    /// Conjunctive normal form with a growth bound. When the converted form
    /// would exceed `max_factor ×` the original node count, the original
    /// expression is returned unchanged.
    pub fn to_cnf(&self, e: &RowExpr, max_factor: usize) -> RowExpr {
        let mut budget = e.node_count().saturating_mul(max_factor) as isize;
        match self.cnf(e, &mut budget) {
            Ok(out) => out,
            Err(CnfTooLarge) => e.clone(),
        }
    }

    fn cnf(&self, e: &RowExpr, budget: &mut isize) -> Result<RowExpr, CnfTooLarge> {
        match e {
            RowExpr::Call { op: OpKind::And, operands, .. } => {
                let mut conjuncts = Vec::new();
                for o in operands {
                    let c = self.cnf(o, budget)?;
                    match c.as_call(OpKind::And) {
                        Some(inner) => conjuncts.extend(inner.iter().cloned()),
                        None => conjuncts.push(c),
                    }
                }
                Ok(self.rex.and(conjuncts))
            }
            RowExpr::Call { op: OpKind::Or, operands, .. } => {
                let mut disjuncts = Vec::new();
                for o in operands {
                    let d = self.cnf(o, budget)?;
                    match d.as_call(OpKind::Or) {
                        Some(inner) => disjuncts.extend(inner.iter().cloned()),
                        None => disjuncts.push(d),
                    }
                }
                // Distribute the first AND over the rest, left to right.
                let and_pos = disjuncts
                    .iter()
                    .position(|d| d.as_call(OpKind::And).is_some());
                match and_pos {
                    None => Ok(self.rex.or(disjuncts)),
                    Some(pos) => {
                        let inner: Vec<RowExpr> =
                            disjuncts[pos].as_call(OpKind::And).unwrap().to_vec();
                        let mut clauses = Vec::with_capacity(inner.len());
                        for conjunct in inner {
                            let mut alt = disjuncts.clone();
                            alt[pos] = conjunct;
                            let clause = self.cnf(&self.rex.or(alt), budget)?;
                            match clause.as_call(OpKind::And) {
                                Some(cs) => clauses.extend(cs.iter().cloned()),
                                None => clauses.push(clause),
                            }
                        }
                        Ok(self.rex.and(clauses))
                    }
                }
            }
            leaf => {
                *budget -= leaf.node_count() as isize;
                if *budget < 0 {
                    return Err(CnfTooLarge);
                }
                Ok(leaf.clone())
            }
        }
    }

    /// Lift common factors out of disjunctions and conjunctions without
    /// normalizing: `(a AND b) OR (a AND c)` → `a AND (b OR c)`, and dually
    /// `(a OR b) AND (a OR c)` → `a OR (b AND c)`.
    pub fn pull_factors(&self, e: &RowExpr) -> RowExpr {
        match e {
            RowExpr::Call { op: OpKind::Or, operands, .. } => {
                let parts: Vec<RowExpr> = operands.iter().map(|o| self.pull_factors(o)).collect();
                self.pull_common(&parts, OpKind::And, OpKind::Or)
            }
            RowExpr::Call { op: OpKind::And, operands, .. } => {
                let parts: Vec<RowExpr> = operands.iter().map(|o| self.pull_factors(o)).collect();
                self.pull_common(&parts, OpKind::Or, OpKind::And)
            }
            other => other.clone(),
        }
    }

    /// Shared body of `pull_factors`: `inner` is the connective factors are
    /// lifted out of, `outer` joins the parts.
    fn pull_common(&self, parts: &[RowExpr], inner: OpKind, outer: OpKind) -> RowExpr {
        let rebuild_outer = |terms: Vec<RowExpr>| match outer {
            OpKind::Or => self.rex.or(terms),
            _ => self.rex.and(terms),
        };
        let rebuild_inner = |terms: Vec<RowExpr>| match inner {
            OpKind::Or => self.rex.or(terms),
            _ => self.rex.and(terms),
        };
        if parts.len() < 2 {
            return rebuild_outer(parts.to_vec());
        }
        let factors_of = |p: &RowExpr| -> Vec<RowExpr> {
            match p.as_call(inner) {
                Some(fs) => fs.to_vec(),
                None => vec![p.clone()],
            }
        };
        let first = factors_of(&parts[0]);
        let common: Vec<RowExpr> = first
            .into_iter()
            .filter(|f| parts[1..].iter().all(|p| factors_of(p).contains(f)))
            .collect();
        if common.is_empty() {
            return rebuild_outer(parts.to_vec());
        }
        let mut residues = Vec::with_capacity(parts.len());
        for p in parts {
            let rest: Vec<RowExpr> = factors_of(p)
                .into_iter()
                .filter(|f| !common.contains(f))
                .collect();
            if rest.is_empty() {
                // One part is exactly the common factors; it absorbs the rest.
                return rebuild_inner(common);
            }
            residues.push(rebuild_inner(rest));
        }
        let mut out = common;
        out.push(rebuild_outer(residues));
        rebuild_inner(out)
    }
}

struct Contradiction;
struct CnfTooLarge;

// -------------------------------------------------------------------------
// Analysis predicates
// -------------------------------------------------------------------------

/// Whether the expression is a pure function of its inputs.
pub fn is_deterministic(rex: &RexBuilder, e: &RowExpr) -> bool {
    match e {
        RowExpr::Call { op, operands, .. } => {
            rex.table().is_deterministic(*op)
                && operands.iter().all(|o| is_deterministic(rex, o))
        }
        RowExpr::FieldAccess { target, .. } => is_deterministic(rex, target),
        _ => true,
    }
}

/// Whether `e` is always null, given expressions known to be null.
pub fn is_null(rex: &RexBuilder, e: &RowExpr, known_nulls: &[RowExpr]) -> bool {
    if e.is_null_literal() || known_nulls.contains(e) {
        return true;
    }
    match e {
        RowExpr::Call { op, operands, .. } if rex.table().is_strict(*op) => {
            operands.iter().any(|o| is_null(rex, o, known_nulls))
        }
        _ => false,
    }
}

/// Whether `e` can never evaluate to `true` (it is false or null), given
/// expressions known to be null.
pub fn is_not_true(rex: &RexBuilder, e: &RowExpr, known_nulls: &[RowExpr]) -> bool {
    if e.is_false_literal() || is_null(rex, e, known_nulls) {
        return true;
    }
    match e {
        RowExpr::Call { op: OpKind::And, operands, .. } => {
            operands.iter().any(|o| is_not_true(rex, o, known_nulls))
        }
        RowExpr::Call { op: OpKind::Or, operands, .. } => {
            operands.iter().all(|o| is_not_true(rex, o, known_nulls))
        }
        _ => false,
    }
}

fn fold_arith(op: OpKind, l: &ScalarValue, r: &ScalarValue) -> Option<ScalarValue> {
    use ScalarValue::*;
    match (l, r) {
        (Int32(a), Int32(b)) => {
            let v = match op {
                OpKind::Plus => a.checked_add(*b),
                OpKind::Minus => a.checked_sub(*b),
                OpKind::Times => a.checked_mul(*b),
                OpKind::Divide => (*b != 0).then(|| a.checked_div(*b)).flatten(),
                _ => None,
            };
            v.map(Int32)
        }
        (Int64(a), Int64(b)) => {
            let v = match op {
                OpKind::Plus => a.checked_add(*b),
                OpKind::Minus => a.checked_sub(*b),
                OpKind::Times => a.checked_mul(*b),
                OpKind::Divide => (*b != 0).then(|| a.checked_div(*b)).flatten(),
                _ => None,
            };
            v.map(Int64)
        }
        (Float64(a), Float64(b)) => {
            let v = match op {
                OpKind::Plus => a.0 + b.0,
                OpKind::Minus => a.0 - b.0,
                OpKind::Times => a.0 * b.0,
                OpKind::Divide => {
                    if b.0 == 0.0 {
                        return None;
                    }
                    a.0 / b.0
                }
                _ => return None,
            };
            Some(Float64(ordered_float::OrderedFloat(v)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rex::OperatorTable;
    use std::sync::Arc;

    fn builder() -> RexBuilder {
        RexBuilder::new(Arc::new(OperatorTable::with_builtins()))
    }

    fn nullable_int(b: &RexBuilder, i: usize) -> RowExpr {
        b.input_ref(i, DataType::nullable(TypeKind::Int64))
    }

    #[test]
    fn and_with_false_is_false() {
        let b = builder();
        let s = Simplifier::new(&b);
        let x = nullable_int(&b, 0);
        let e = b.and(vec![b.eq(x, b.int_lit(1)), b.bool_lit(false)]);
        assert_eq!(s.simplify(&e, UnknownAs::Unknown), b.bool_lit(false));
    }

    #[test]
    fn overflow_skips_fold() {
        let b = builder();
        let s = Simplifier::new(&b);
        let e = b
            .call(OpKind::Plus, vec![b.int_lit(i64::MAX), b.int_lit(1)])
            .unwrap();
        assert_eq!(s.simplify(&e, UnknownAs::Unknown), e);
    }

    #[test]
    fn range_contradiction_is_false_in_filter_context() {
        let b = builder();
        let s = Simplifier::new(&b);
        let x = nullable_int(&b, 0);
        let e = b.and(vec![
            b.comparison(OpKind::Gt, x.clone(), b.int_lit(5)),
            b.comparison(OpKind::Lt, x, b.int_lit(3)),
        ]);
        assert_eq!(s.simplify(&e, UnknownAs::False), b.bool_lit(false));
    }

    #[test]
    fn dominated_range_constraint_is_dropped() {
        let b = builder();
        let s = Simplifier::new(&b);
        let x = nullable_int(&b, 0);
        let e = b.and(vec![
            b.comparison(OpKind::Gt, x.clone(), b.int_lit(3)),
            b.comparison(OpKind::Gt, x.clone(), b.int_lit(5)),
        ]);
        assert_eq!(
            s.simplify(&e, UnknownAs::Unknown),
            b.comparison(OpKind::Gt, x, b.int_lit(5))
        );
    }
}
