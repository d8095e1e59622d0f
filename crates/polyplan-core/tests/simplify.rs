//! Behavioral suite for the row-expression simplifier: boolean algebra,
//! nullability-aware comparison folding, CASE/COALESCE/NULLIF/CAST
//! normalization, CNF with its growth bound, factor pulling, predicate
//! context, and idempotence.

use polyplan_core::rex::simplify::{PredicateContext, Simplifier, UnknownAs};
use polyplan_core::rex::{OpKind, OperatorTable, RexBuilder, RowExpr};
use polyplan_core::types::{DataType, TypeKind};
use std::sync::Arc;

fn builder() -> RexBuilder {
    RexBuilder::new(Arc::new(OperatorTable::with_builtins()))
}

/// Nullable boolean input reference.
fn vbool(b: &RexBuilder, i: usize) -> RowExpr {
    b.input_ref(i, DataType::nullable(TypeKind::Boolean))
}

/// Nullable / non-null bigint input references.
fn vint(b: &RexBuilder, i: usize) -> RowExpr {
    b.input_ref(i, DataType::nullable(TypeKind::Int64))
}

fn vint_nn(b: &RexBuilder, i: usize) -> RowExpr {
    b.input_ref(i, DataType::not_null(TypeKind::Int64))
}

/// Simplify under UNKNOWN and check the rendering.
fn check(b: &RexBuilder, e: RowExpr, expected: &str) {
    let s = Simplifier::new(b);
    assert_eq!(s.simplify(&e, UnknownAs::Unknown).to_string(), expected, "input: {e}");
}

/// Simplify under UNKNOWN and FALSE, checking both renderings.
fn check2(b: &RexBuilder, e: RowExpr, expected_unknown: &str, expected_false: &str) {
    let s = Simplifier::new(b);
    assert_eq!(
        s.simplify(&e, UnknownAs::Unknown).to_string(),
        expected_unknown,
        "unknown-as-UNKNOWN, input: {e}"
    );
    assert_eq!(
        s.simplify(&e, UnknownAs::False).to_string(),
        expected_false,
        "unknown-as-FALSE, input: {e}"
    );
}

fn check_unchanged(b: &RexBuilder, e: RowExpr) {
    let s = Simplifier::new(b);
    assert_eq!(s.simplify(&e, UnknownAs::Unknown), e, "input: {e}");
}

// -------------------------------------------------------------------------
// Boolean algebra
// -------------------------------------------------------------------------

#[test]
fn and_constant_folding_and_dedup() {
    let b = builder();
    let (x, y) = (vbool(&b, 0), vbool(&b, 1));
    check(&b, b.and(vec![x.clone(), y.clone(), b.bool_lit(true)]), "AND($0, $1)");
    check(&b, b.and(vec![x.clone(), y.clone(), b.bool_lit(false)]), "false");
    check(&b, b.and(vec![x.clone(), y.clone(), x.clone()]), "AND($0, $1)");
    check(&b, b.or(vec![x.clone(), y.clone(), b.bool_lit(false)]), "OR($0, $1)");
    check(&b, b.or(vec![x.clone(), y, b.bool_lit(true)]), "true");
    check(&b, b.or(vec![x.clone(), x]), "$0");
}

#[test]
fn absorption() {
    let b = builder();
    let (x, y) = (vbool(&b, 0), vbool(&b, 1));
    check(&b, b.and(vec![x.clone(), b.or(vec![x.clone(), y.clone()])]), "$0");
    check(&b, b.or(vec![x.clone(), b.and(vec![x, y])]), "$0");
}

#[test]
fn negation_pairs() {
    let b = builder();
    let x = vbool(&b, 0);
    // Nullable x: value is false when x is non-null, unknown otherwise.
    check2(
        &b,
        b.and(vec![x.clone(), b.not(x.clone())]),
        "AND(null:BOOLEAN, IS NULL($0))",
        "false",
    );
    let x_nn = b.input_ref(0, DataType::not_null(TypeKind::Boolean));
    check(&b, b.and(vec![x_nn.clone(), b.not(x_nn.clone())]), "false");
    check(&b, b.or(vec![x_nn.clone(), b.not(x_nn)]), "true");
}

#[test]
fn double_negation_and_de_morgan() {
    let b = builder();
    let (x, y) = (vbool(&b, 0), vbool(&b, 1));
    check(&b, b.not(b.not(x.clone())), "$0");
    check(&b, b.not(b.and(vec![x.clone(), y.clone()])), "OR(NOT($0), NOT($1))");
    check(&b, b.not(b.or(vec![x, y])), "AND(NOT($0), NOT($1))");
}

#[test]
fn not_over_comparison_negates_it() {
    let b = builder();
    let x = vint(&b, 0);
    check(&b, b.not(b.eq(x.clone(), b.int_lit(1))), "<>($0, 1)");
    check(&b, b.not(b.comparison(OpKind::Lt, x, b.int_lit(1))), ">=($0, 1)");
}

// -------------------------------------------------------------------------
// Comparison folding
// -------------------------------------------------------------------------

#[test]
fn literal_comparisons_fold() {
    let b = builder();
    check(&b, b.eq(b.int_lit(1), b.int_lit(1)), "true");
    check(&b, b.eq(b.int_lit(1), b.int_lit(2)), "false");
    check(&b, b.comparison(OpKind::Lt, b.int_lit(2), b.int_lit(1)), "false");
    check(&b, b.comparison(OpKind::GtEq, b.int_lit(2), b.int_lit(1)), "true");
}

#[test]
fn reflexive_comparisons_on_nullable_become_is_not_null() {
    let b = builder();
    let i = vint(&b, 0);
    // x = x on nullable x is IS NOT NULL(x) under both modes.
    check2(&b, b.eq(i.clone(), i.clone()), "IS NOT NULL($0)", "IS NOT NULL($0)");
    check2(
        &b,
        b.comparison(OpKind::LtEq, i.clone(), i.clone()),
        "IS NOT NULL($0)",
        "IS NOT NULL($0)",
    );
    check2(
        &b,
        b.comparison(OpKind::GtEq, i.clone(), i.clone()),
        "IS NOT NULL($0)",
        "IS NOT NULL($0)",
    );
}

#[test]
fn reflexive_comparisons_on_non_nullable_fold_to_constants() {
    let b = builder();
    let h = vint_nn(&b, 0);
    check(&b, b.eq(h.clone(), h.clone()), "true");
    check(&b, b.comparison(OpKind::LtEq, h.clone(), h.clone()), "true");
    check(&b, b.comparison(OpKind::NotEq, h.clone(), h.clone()), "false");
    check(&b, b.comparison(OpKind::Lt, h.clone(), h.clone()), "false");
    check(&b, b.comparison(OpKind::Gt, h.clone(), h), "false");
}

#[test]
fn irreflexive_comparisons_on_nullable() {
    let b = builder();
    let i = vint(&b, 0);
    check2(
        &b,
        b.comparison(OpKind::NotEq, i.clone(), i.clone()),
        "AND(null:BOOLEAN, IS NULL($0))",
        "false",
    );
    check2(
        &b,
        b.comparison(OpKind::Lt, i.clone(), i),
        "AND(null:BOOLEAN, IS NULL($0))",
        "false",
    );
}

#[test]
fn distinct_operands_stay_unchanged() {
    let b = builder();
    let e = b.eq(vint(&b, 0), vint(&b, 1));
    check_unchanged(&b, e);
}

// -------------------------------------------------------------------------
// Null tests
// -------------------------------------------------------------------------

#[test]
fn is_null_of_literals() {
    let b = builder();
    // IS NULL(non-null literal) is false; IS NOT NULL(null literal) is false.
    check(&b, b.is_null(b.int_lit(1)), "false");
    check(&b, b.is_not_null(b.null_of(TypeKind::Int64)), "false");
    check(&b, b.is_null(b.null_of(TypeKind::Int64)), "true");
}

#[test]
fn is_null_of_non_nullable_ref() {
    let b = builder();
    check(&b, b.is_null(vint_nn(&b, 0)), "false");
    check(&b, b.is_not_null(vint_nn(&b, 0)), "true");
    check_unchanged(&b, b.is_null(vint(&b, 0)));
}

#[test]
fn is_true_family() {
    let b = builder();
    let c = vbool(&b, 0);
    check(&b, b.postfix(OpKind::IsTrue, b.null_bool()), "false");
    check(&b, b.postfix(OpKind::IsNotTrue, b.null_bool()), "true");
    check(&b, b.postfix(OpKind::IsFalse, b.bool_lit(false)), "true");
    let c_nn = b.input_ref(0, DataType::not_null(TypeKind::Boolean));
    check(&b, b.postfix(OpKind::IsTrue, c_nn), "$0");
    check_unchanged(&b, b.postfix(OpKind::IsTrue, c));
}

// -------------------------------------------------------------------------
// CASE / COALESCE / NULLIF / CAST
// -------------------------------------------------------------------------

#[test]
fn case_drops_false_branches_and_truncates_on_true() {
    let b = builder();
    let ty = DataType::nullable(TypeKind::Int64);
    let (x, y) = (vint(&b, 0), vint(&b, 1));
    // CASE WHEN false THEN x ELSE y => y
    check(
        &b,
        b.case(vec![b.bool_lit(false), x.clone(), y.clone()], ty),
        "$1",
    );
    // CASE WHEN true THEN x ELSE y => x
    check(&b, b.case(vec![b.bool_lit(true), x, y], ty), "$0");
}

#[test]
fn case_merges_adjacent_equal_results() {
    let b = builder();
    let ty = DataType::nullable(TypeKind::Int64);
    let (c1, c2) = (vbool(&b, 0), vbool(&b, 1));
    let (x, y) = (vint(&b, 2), vint(&b, 3));
    let e = b.case(vec![c1.clone(), x.clone(), c2.clone(), x.clone(), y.clone()], ty);
    let expected = b.case(vec![b.or(vec![c1, c2]), x, y], ty);
    let s = Simplifier::new(&b);
    assert_eq!(s.simplify(&e, UnknownAs::Unknown), expected);
}

#[test]
fn boolean_case_reduces_to_its_condition() {
    let b = builder();
    let ty = DataType::not_null(TypeKind::Boolean);
    let c = vbool(&b, 0);
    check(
        &b,
        b.case(vec![c.clone(), b.bool_lit(true), b.bool_lit(false)], ty),
        "IS TRUE($0)",
    );
    check(
        &b,
        b.case(vec![c.clone(), b.bool_lit(false), b.bool_lit(true)], ty),
        "IS NOT TRUE($0)",
    );
    let c_nn = b.input_ref(0, DataType::not_null(TypeKind::Boolean));
    check(
        &b,
        b.case(vec![c_nn, b.bool_lit(true), b.bool_lit(false)], ty),
        "$0",
    );
}

#[test]
fn coalesce_reduction() {
    let b = builder();
    let ty = DataType::nullable(TypeKind::Int64);
    let (x, y) = (vint(&b, 0), vint(&b, 1));
    let h = vint_nn(&b, 2);
    // Null and duplicate arguments drop.
    check(
        &b,
        b.coalesce(vec![b.null_of(TypeKind::Int64), x.clone(), x.clone(), y.clone()], ty),
        "COALESCE($0, $1)",
    );
    // Arguments after the first provably non-null one drop.
    check(&b, b.coalesce(vec![x.clone(), h, y], ty), "COALESCE($0, $2)");
    // All-null folds to null.
    check(
        &b,
        b.coalesce(
            vec![b.null_of(TypeKind::Int64), b.null_of(TypeKind::Int64)],
            ty,
        ),
        "null:BIGINT",
    );
    // A single survivor replaces the call.
    check(&b, b.coalesce(vec![b.null_of(TypeKind::Int64), x], ty), "$0");
}

#[test]
fn nullif_folds_literals() {
    let b = builder();
    let ty = DataType::nullable(TypeKind::Int64);
    let mk = |l: i64, r: i64| RowExpr::Call {
        op: OpKind::NullIf,
        operands: vec![b.int_lit(l), b.int_lit(r)],
        ty,
    };
    check(&b, mk(1, 1), "null:BIGINT");
    check(&b, mk(1, 2), "1");
}

#[test]
fn cast_elimination() {
    let b = builder();
    let int_nn = DataType::not_null(TypeKind::Int64);
    let x = vint(&b, 0);
    // No-op cast.
    check(&b, b.cast(x.clone(), DataType::nullable(TypeKind::Int64)), "$0");
    // cast(cast(x, T), T) collapses.
    let v = b.input_ref(0, DataType::not_null(TypeKind::Varchar(None)));
    let e = b.cast(b.cast(v, int_nn), int_nn);
    check(&b, e, "CAST($0):BIGINT NOT NULL");
    // Literal casts fold when the target admits the value.
    let lit32 = b.literal(
        polyplan_core::rex::ScalarValue::Int32(5),
        DataType::not_null(TypeKind::Int32),
    );
    check(&b, b.cast(lit32, int_nn), "5");
}

// -------------------------------------------------------------------------
// Arithmetic
// -------------------------------------------------------------------------

#[test]
fn arithmetic_folds_and_overflow_is_skipped() {
    let b = builder();
    let plus = |l: RowExpr, r: RowExpr| b.call(OpKind::Plus, vec![l, r]).unwrap();
    check(&b, plus(b.int_lit(2), b.int_lit(3)), "5");
    check_unchanged(&b, plus(b.int_lit(i64::MAX), b.int_lit(1)));
    let div = b.call(OpKind::Divide, vec![b.int_lit(1), b.int_lit(0)]).unwrap();
    check_unchanged(&b, div);
}

// -------------------------------------------------------------------------
// CNF
// -------------------------------------------------------------------------

/// `(a1 ∧ b1) ∨ (a2 ∧ b2) ∨ (a3 ∧ b3)` over six distinct references.
fn three_dnf(b: &RexBuilder) -> RowExpr {
    b.or(vec![
        b.and(vec![vbool(b, 0), vbool(b, 1)]),
        b.and(vec![vbool(b, 2), vbool(b, 3)]),
        b.and(vec![vbool(b, 4), vbool(b, 5)]),
    ])
}

#[test]
fn cnf_respects_the_growth_bound() {
    let b = builder();
    let s = Simplifier::new(&b);
    let e = three_dnf(&b);
    // Expansion would produce 8 clauses; a factor of 2 forbids it.
    assert_eq!(s.to_cnf(&e, 2), e);
    assert_eq!(s.to_cnf(&e, 1), e);
}

#[test]
fn cnf_expands_in_declared_order_when_allowed() {
    let b = builder();
    let s = Simplifier::new(&b);
    let e = three_dnf(&b);
    let out = s.to_cnf(&e, 16);
    let clause = |i: usize, j: usize, k: usize| b.or(vec![vbool(&b, i), vbool(&b, j), vbool(&b, k)]);
    let expected = b.and(vec![
        clause(0, 2, 4),
        clause(0, 2, 5),
        clause(0, 3, 4),
        clause(0, 3, 5),
        clause(1, 2, 4),
        clause(1, 2, 5),
        clause(1, 3, 4),
        clause(1, 3, 5),
    ]);
    assert_eq!(out, expected);
}

#[test]
fn cnf_of_flat_expression_never_grows() {
    let b = builder();
    let s = Simplifier::new(&b);
    let e = b.and(vec![vbool(&b, 0), vbool(&b, 1)]);
    assert_eq!(s.to_cnf(&e, 1), e);
}

// -------------------------------------------------------------------------
// Factor pulling
// -------------------------------------------------------------------------

#[test]
fn pull_factors_lifts_common_conjuncts() {
    let b = builder();
    let s = Simplifier::new(&b);
    let (a, x, y) = (vbool(&b, 0), vbool(&b, 1), vbool(&b, 2));
    let e = b.or(vec![
        b.and(vec![a.clone(), x.clone()]),
        b.and(vec![a.clone(), y.clone()]),
    ]);
    let expected = b.and(vec![a.clone(), b.or(vec![x.clone(), y.clone()])]);
    assert_eq!(s.pull_factors(&e), expected);

    // Dual form over a conjunction of disjunctions.
    let e2 = b.and(vec![b.or(vec![a.clone(), x.clone()]), b.or(vec![a.clone(), y.clone()])]);
    let expected2 = b.or(vec![a, b.and(vec![x, y])]);
    assert_eq!(s.pull_factors(&e2), expected2);
}

// -------------------------------------------------------------------------
// Predicate context
// -------------------------------------------------------------------------

#[test]
fn context_implication_forces_constants() {
    let b = builder();
    let i = vint(&b, 0);
    let fact = b.eq(i.clone(), b.int_lit(5));
    let s = Simplifier::with_context(&b, PredicateContext::new(vec![fact]));
    // P => e gives true; P => not e gives false.
    assert_eq!(
        s.simplify(&b.eq(i.clone(), b.int_lit(5)), UnknownAs::False),
        b.bool_lit(true)
    );
    assert_eq!(
        s.simplify(&b.comparison(OpKind::Gt, i.clone(), b.int_lit(3)), UnknownAs::False),
        b.bool_lit(true)
    );
    assert_eq!(
        s.simplify(&b.eq(i.clone(), b.int_lit(7)), UnknownAs::False),
        b.bool_lit(false)
    );
    assert_eq!(
        s.simplify(&b.comparison(OpKind::Lt, i, b.int_lit(4)), UnknownAs::False),
        b.bool_lit(false)
    );
}

// -------------------------------------------------------------------------
// Idempotence
// -------------------------------------------------------------------------

#[test]
fn simplify_is_idempotent() {
    let b = builder();
    let i = vint(&b, 0);
    let x = vbool(&b, 1);
    let samples = vec![
        b.eq(i.clone(), i.clone()),
        b.comparison(OpKind::Lt, i.clone(), i.clone()),
        b.and(vec![x.clone(), b.not(x.clone())]),
        b.or(vec![x.clone(), b.not(x.clone())]),
        b.and(vec![
            b.comparison(OpKind::Gt, i.clone(), b.int_lit(3)),
            b.comparison(OpKind::Gt, i.clone(), b.int_lit(5)),
        ]),
        b.not(b.and(vec![x.clone(), vbool(&b, 2)])),
        b.case(
            vec![x.clone(), b.bool_lit(true), b.bool_lit(false)],
            DataType::not_null(TypeKind::Boolean),
        ),
        b.coalesce(
            vec![b.null_of(TypeKind::Int64), i.clone(), i.clone()],
            DataType::nullable(TypeKind::Int64),
        ),
        b.is_null(b.cast(i, DataType::nullable(TypeKind::Int64))),
    ];
    for mode in [UnknownAs::Unknown, UnknownAs::True, UnknownAs::False] {
        let s = Simplifier::new(&b);
        for e in &samples {
            let once = s.simplify(e, mode);
            let twice = s.simplify(&once, mode);
            assert_eq!(once, twice, "not idempotent for {e} under {mode:?}");
        }
    }
}
