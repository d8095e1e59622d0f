//! End-to-end planning scenarios: filter push-through-project with project
//! collapsing, set merging through equivalent rewrites, convention
//! insertion between engines, cancellation, and bound handling.
//!
//! Each test builds a small logical tree against an in-memory catalog, runs
//! the Volcano search with the default rule library plus one or two
//! engines, and asserts on the extracted plan's shape, conventions, and
//! statistics.

use polyplan_core::algebra::{AlgKind, AlgOp, AlgTree, TableRef};
use polyplan_core::catalog::InMemoryCatalog;
use polyplan_core::planner::{Outcome, Planner, PlannerState};
use polyplan_core::rex::{OperatorTable, RexBuilder};
use polyplan_core::stats::{ColumnStatistics, Statistics};
use polyplan_core::traits::{Collation, CollationKey, Trait, TraitSet};
use polyplan_core::types::{DataType, Field, RowType, TypeKind};
use polyplan_core::PlannerError;
use polyplan_rules::enumerable::{EnumerableAdapter, ENUMERABLE};
use polyplan_rules::remote::{PushdownCostModel, RemoteAdapter, REMOTE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rex() -> RexBuilder {
    RexBuilder::new(Arc::new(OperatorTable::with_builtins()))
}

fn row_ab() -> RowType {
    RowType::new(vec![
        Field::new("a", DataType::not_null(TypeKind::Int64)),
        Field::new("b", DataType::nullable(TypeKind::Int64)),
    ])
}

/// Catalog with `s.t(a, b)`: 1000 rows, NDV(b) = 50.
fn catalog_with_t() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    let stats = Statistics::new(1000.0, 100_000.0)
        .with_column("a", ColumnStatistics::new(1000.0, 0.0))
        .with_column("b", ColumnStatistics::new(50.0, 0.1));
    catalog.add_table(&TableRef::new("s", "t"), row_ab(), stats);
    catalog
}

fn standard_planner(catalog: InMemoryCatalog) -> Planner {
    let mut planner = Planner::new(Arc::new(catalog));
    polyplan_rules::register_default_rules(&mut planner).unwrap();
    planner.install(&EnumerableAdapter).unwrap();
    planner
}

fn enumerable_goal(planner: &Planner) -> TraitSet {
    planner.default_traits().replace(Trait::Convention(ENUMERABLE))
}

fn scan_t(planner: &Planner) -> AlgTree {
    AlgTree::leaf(
        AlgOp::Scan { table: TableRef::new("s", "t"), row_type: row_ab() },
        planner.default_traits(),
    )
}

/// `Project[a]( Filter[b = 1]( Project[a, b]( Scan[t] ) ) )` — the filter
/// has a projection below it to push through.
fn project_filter_project_tree(planner: &Planner, b: &RexBuilder) -> AlgTree {
    let logical = planner.default_traits();
    let a_ref = b.input_ref(0, DataType::not_null(TypeKind::Int64));
    let b_ref = b.input_ref(1, DataType::nullable(TypeKind::Int64));

    let inner_project = AlgTree::new(
        AlgOp::Project {
            exprs: vec![a_ref.clone(), b_ref.clone()],
            field_names: vec!["a".into(), "b".into()],
        },
        logical.clone(),
        vec![scan_t(planner)],
    );
    let filter = AlgTree::new(
        AlgOp::Filter { predicate: b.eq(b_ref, b.int_lit(1)) },
        logical.clone(),
        vec![inner_project],
    );
    AlgTree::new(
        AlgOp::Project { exprs: vec![a_ref], field_names: vec!["a".into()] },
        logical,
        vec![filter],
    )
}

// ---------------------------------------------------------------------------
// Scenario: filter push-through-project
// ---------------------------------------------------------------------------

#[test]
fn filter_pushes_through_project_and_projects_collapse() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    let tree = project_filter_project_tree(&planner, &b);
    let goal = planner.set_root(tree, enumerable_goal(&planner)).unwrap();

    let best = planner.find_best_plan().unwrap();
    assert_eq!(best.outcome, Outcome::Complete);
    assert_eq!(planner.state(), PlannerState::Done);

    // The cheapest member has the filter below a single collapsed
    // projection, reading the scan directly.
    assert_eq!(
        best.plan.kinds(),
        vec![AlgKind::Project, AlgKind::Filter, AlgKind::Scan]
    );
    let mut node = &best.plan;
    loop {
        assert_eq!(node.traits.convention(), ENUMERABLE);
        match node.inputs.first() {
            Some(child) => node = child,
            None => break,
        }
    }

    // Output cardinality is selectivity(b = 1) × |t| = 1000 / 50.
    let goal_set = planner.space().set_of_subset(goal);
    let rows = planner.set_stats(goal_set).row_count;
    assert!((rows - 20.0).abs() < 1e-6, "expected 20 rows, got {rows}");
}

// ---------------------------------------------------------------------------
// Scenario: set merge via equivalent rewrite
// ---------------------------------------------------------------------------

#[test]
fn equivalent_predicates_merge_sets() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    let logical = planner.default_traits();
    let b_ref = b.input_ref(1, DataType::nullable(TypeKind::Int64));

    // Two filters whose predicates are canonically equal: `b = 1 AND b = 1`
    // simplifies to `b = 1`.
    let filter_dup = AlgTree::new(
        AlgOp::Filter {
            predicate: b.and(vec![
                b.eq(b_ref.clone(), b.int_lit(1)),
                b.eq(b_ref.clone(), b.int_lit(1)),
            ]),
        },
        logical.clone(),
        vec![scan_t(&planner)],
    );
    let filter_plain = AlgTree::new(
        AlgOp::Filter { predicate: b.eq(b_ref, b.int_lit(1)) },
        logical.clone(),
        vec![scan_t(&planner)],
    );
    let union = AlgTree::new(
        AlgOp::Union { all: true },
        logical,
        vec![filter_dup, filter_plain],
    );

    let goal = planner.set_root(union, enumerable_goal(&planner)).unwrap();
    planner.find_best_plan().unwrap();

    // Every logical filter over the scan now lives in one equivalence set.
    let space = planner.space();
    let filter_sets: Vec<_> = (0..space.num_nodes())
        .filter(|&id| {
            space.node(id).op.kind() == AlgKind::Filter
                && space.node(id).traits.convention().is_none()
        })
        .map(|id| space.set_of_subset(space.subset_of_node(id)))
        .collect();
    assert!(filter_sets.len() >= 2);
    assert!(
        filter_sets.windows(2).all(|w| w[0] == w[1]),
        "logical filters ended up in sets {filter_sets:?}"
    );
    assert!(planner.best_cost(goal).is_some());
}

// ---------------------------------------------------------------------------
// Scenario: convention insertion
// ---------------------------------------------------------------------------

#[test]
fn convention_insertion_bridges_remote_to_enumerable() {
    let b = rex();
    let mut catalog = InMemoryCatalog::new();
    let remote_table = TableRef::new("s", "r").with_source("jdbc");
    let stats = Statistics::new(100.0, 10_000.0)
        .with_column("a", ColumnStatistics::new(100.0, 0.0))
        .with_column("b", ColumnStatistics::new(10.0, 0.0));
    catalog.add_table(&remote_table, row_ab(), stats);

    let mut planner = Planner::new(Arc::new(catalog))
        .with_cost_model(Arc::new(PushdownCostModel::standard()));
    polyplan_rules::register_default_rules(&mut planner).unwrap();
    planner.install(&EnumerableAdapter).unwrap();
    planner.install(&RemoteAdapter::new("jdbc")).unwrap();

    let logical = planner.default_traits();
    let a_ref = b.input_ref(0, DataType::not_null(TypeKind::Int64));
    let scan = AlgTree::leaf(
        AlgOp::Scan { table: remote_table, row_type: row_ab() },
        logical.clone(),
    );
    let project = AlgTree::new(
        AlgOp::Project { exprs: vec![a_ref], field_names: vec!["a".into()] },
        logical.clone(),
        vec![scan],
    );
    let sort = AlgTree::new(
        AlgOp::Sort {
            collation: Collation::of(vec![CollationKey::asc(0)]),
            offset: None,
            fetch: None,
        },
        logical,
        vec![project],
    );

    planner.set_root(sort, enumerable_goal(&planner)).unwrap();
    let best = planner.find_best_plan().unwrap();

    // Sort runs in-process; the projection is pushed to the store, and a
    // converter ships the rows across the engine boundary.
    assert_eq!(
        best.plan.kinds(),
        vec![AlgKind::Sort, AlgKind::Converter, AlgKind::Project, AlgKind::Scan]
    );
    assert_eq!(best.plan.traits.convention(), ENUMERABLE);
    let converter = &best.plan.inputs[0];
    assert_eq!(converter.traits.convention(), ENUMERABLE);
    let project = &converter.inputs[0];
    assert_eq!(project.traits.convention(), REMOTE);
    assert_eq!(project.inputs[0].traits.convention(), REMOTE);
}

// ---------------------------------------------------------------------------
// Scenario: join commutation
// ---------------------------------------------------------------------------

#[test]
fn join_commutation_explores_both_orders() {
    let b = rex();
    let mut catalog = catalog_with_t();
    let row_cd = RowType::new(vec![
        Field::new("c", DataType::not_null(TypeKind::Int64)),
        Field::new("d", DataType::nullable(TypeKind::Int64)),
    ]);
    let stats = Statistics::new(10.0, 1000.0).with_column("c", ColumnStatistics::new(10.0, 0.0));
    catalog.add_table(&TableRef::new("s", "u"), row_cd.clone(), stats);

    let mut planner = standard_planner(catalog);
    let logical = planner.default_traits();
    let scan_u = AlgTree::leaf(
        AlgOp::Scan { table: TableRef::new("s", "u"), row_type: row_cd },
        logical.clone(),
    );
    let condition = b.eq(
        b.input_ref(0, DataType::not_null(TypeKind::Int64)),
        b.input_ref(2, DataType::not_null(TypeKind::Int64)),
    );
    let join = AlgTree::new(
        AlgOp::Join { join_type: polyplan_core::algebra::JoinType::Inner, condition },
        logical,
        vec![scan_t(&planner), scan_u],
    );

    let goal = planner.set_root(join, enumerable_goal(&planner)).unwrap();
    let best = planner.find_best_plan().unwrap();
    assert_eq!(best.outcome, Outcome::Complete);

    // The swapped order lives in the space as its own set, wrapped by the
    // order-restoring projection in the root set.
    let space = planner.space();
    let logical_joins = (0..space.num_nodes())
        .filter(|&id| {
            space.node(id).op.kind() == AlgKind::Join
                && space.node(id).traits.convention().is_none()
        })
        .count();
    assert!(logical_joins >= 2, "expected the commuted join to be interned");

    // The direct order needs no projection wrapper and wins.
    assert_eq!(
        best.plan.kinds(),
        vec![AlgKind::Join, AlgKind::Scan, AlgKind::Scan]
    );
    assert!(planner.best_cost(goal).is_some());
}

// ---------------------------------------------------------------------------
// Scenario: match lowering
// ---------------------------------------------------------------------------

#[test]
fn match_lowers_to_filter_before_implementation() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    let logical = planner.default_traits();
    let b_ref = b.input_ref(1, DataType::nullable(TypeKind::Int64));
    let match_tree = AlgTree::new(
        AlgOp::Match { predicate: b.eq(b_ref, b.int_lit(7)) },
        logical,
        vec![scan_t(&planner)],
    );
    planner.set_root(match_tree, enumerable_goal(&planner)).unwrap();
    let best = planner.find_best_plan().unwrap();
    // The match node itself has no physical form; the lowered filter wins.
    assert_eq!(best.plan.kinds(), vec![AlgKind::Filter, AlgKind::Scan]);
}

// ---------------------------------------------------------------------------
// Scenario: cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancellation_is_observed_between_rule_calls() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    let flag = Arc::new(AtomicBool::new(false));
    planner.set_cancel_flag(flag.clone());

    let tree = project_filter_project_tree(&planner, &b);
    planner.set_root(tree, enumerable_goal(&planner)).unwrap();
    flag.store(true, Ordering::SeqCst);

    match planner.find_best_plan() {
        Err(PlannerError::Cancelled) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(planner.state(), PlannerState::Cancelled);
    // Partial state remains queryable.
    assert!(planner.space().num_nodes() > 0);
    assert!(planner.space().num_sets() > 0);
}

// ---------------------------------------------------------------------------
// Bounds and state machine
// ---------------------------------------------------------------------------

#[test]
fn iteration_limit_reports_exhausted() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    planner.set_iteration_limit(0);
    let tree = project_filter_project_tree(&planner, &b);
    planner.set_root(tree, enumerable_goal(&planner)).unwrap();

    // No rule ever fires, so no physical member exists to extract.
    match planner.find_best_plan() {
        Err(PlannerError::NoImplementationFound(_)) => {}
        other => panic!("expected NoImplementationFound, got {other:?}"),
    }
    assert_eq!(planner.state(), PlannerState::Exhausted);
}

#[test]
fn expired_deadline_reports_exhausted() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    planner.set_deadline(std::time::Instant::now() - std::time::Duration::from_millis(1));
    let tree = project_filter_project_tree(&planner, &b);
    planner.set_root(tree, enumerable_goal(&planner)).unwrap();

    match planner.find_best_plan() {
        Err(PlannerError::NoImplementationFound(_)) => {}
        other => panic!("expected NoImplementationFound, got {other:?}"),
    }
    assert_eq!(planner.state(), PlannerState::Exhausted);
}

#[test]
fn planning_without_an_engine_fails_cleanly() {
    let b = rex();
    let mut planner = Planner::new(Arc::new(catalog_with_t()));
    polyplan_rules::register_default_rules(&mut planner).unwrap();
    let tree = project_filter_project_tree(&planner, &b);
    planner.set_root(tree, enumerable_goal(&planner)).unwrap();

    match planner.find_best_plan() {
        Err(PlannerError::NoImplementationFound(_)) => {}
        other => panic!("expected NoImplementationFound, got {other:?}"),
    }
    assert_eq!(planner.state(), PlannerState::Failed);
}

#[test]
fn configuration_is_frozen_after_seeding() {
    let b = rex();
    let mut planner = standard_planner(catalog_with_t());
    let tree = project_filter_project_tree(&planner, &b);
    planner.set_root(tree, enumerable_goal(&planner)).unwrap();

    let err = polyplan_rules::register_default_rules(&mut planner);
    assert!(matches!(err, Err(PlannerError::InvalidInput(_))));
}
