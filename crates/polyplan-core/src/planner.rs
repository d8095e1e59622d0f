//! # Volcano Planner Driver
//!
//! The driver owns the search space, the rule registry, and the rule-call
//! queue, and runs the Volcano fixpoint: register the root tree, create rule
//! calls for every matched pattern, pop the most important call, fire it,
//! and repeat until the queue drains or a bound fires.
//!
//! ## Importance
//!
//! A rule call inherits the importance of the subset its root node belongs
//! to. The goal subset has importance 1.0; importance propagates downward
//! through parent nodes scaled by the child's share of the parent's input
//! cost, and a subset takes the maximum over its parents. Queue entries
//! re-key on dequeue, which absorbs importance drift caused by set merges.
//!
//! ## States
//!
//! `Configuring → Seeded → Running → {Done | Cancelled | Exhausted |
//! Failed}`. Rules and trait defs may only be added while configuring;
//! `set_root` seeds the space; `find_best_plan` runs the loop and extracts
//! the cheapest plan from the goal subset.
//!
//! Cancellation is cooperative: the flag is polled once per dequeue and
//! before every `transform_to`. Deadlines use a monotonic clock at the same
//! points and produce an `Exhausted` outcome rather than an error.

use crate::adapter::Adapter;
use crate::algebra::{
    derive_row_type, AlgNode, AlgOp, AlgTree, NodeId, PlanNode, SetId, SubsetId,
};
use crate::catalog::Catalog;
use crate::cost::{Cost, CostModel, CostWeights, DefaultCostModel};
use crate::error::{PlannerError, Result};
use crate::pattern::match_operand;
use crate::rex::{OperatorTable, OpKind, RexBuilder, RowExpr};
use crate::rule::Rule;
use crate::space::Space;
use crate::stats::{self, Statistics};
use crate::traits::{ConventionInfo, Convention, TraitDef, TraitRegistry, TraitSet, Trait, ConversionKind};
use crate::types::TypeFactory;
use ordered_float::OrderedFloat;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Shared per-planner context: type factory, expression builder, operator
/// table. Frozen when the root is registered.
#[derive(Clone)]
pub struct Cluster {
    pub types: TypeFactory,
    pub rex: RexBuilder,
    pub operators: Arc<OperatorTable>,
}

impl Cluster {
    fn new(operators: Arc<OperatorTable>) -> Self {
        Self { types: TypeFactory, rex: RexBuilder::new(operators.clone()), operators }
    }
}

/// Configuration knobs for one planning run.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Upper bound on fired rule calls.
    pub iteration_limit: u64,
    /// Weights used to collapse costs for comparison.
    pub cost_weights: CostWeights,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { iteration_limit: 200_000, cost_weights: CostWeights::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    Configuring,
    Seeded,
    Running,
    Done,
    Cancelled,
    Exhausted,
    Failed,
}

/// How the run ended when a plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The rule queue drained.
    Complete,
    /// The iteration limit or deadline fired; the plan is the best known.
    Exhausted,
}

/// The extracted cheapest plan.
#[derive(Debug)]
pub struct BestPlan {
    pub plan: PlanNode,
    pub cost: Cost,
    pub outcome: Outcome,
}

/// A bound rule call waiting in the queue.
struct PendingCall {
    rule: Arc<dyn Rule>,
    binding: Vec<NodeId>,
    importance: OrderedFloat<f64>,
    seq: u64,
}

impl PartialEq for PendingCall {
    fn eq(&self, other: &Self) -> bool {
        self.importance == other.importance && self.seq == other.seq
    }
}
impl Eq for PendingCall {}
impl PartialOrd for PendingCall {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingCall {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on importance; ties pop in insertion order.
        self.importance
            .cmp(&other.importance)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The planner.
pub struct Planner {
    operators: OperatorTable,
    cluster: Option<Cluster>,
    catalog: Arc<dyn Catalog>,
    cost_model: Arc<dyn CostModel>,
    config: PlannerConfig,
    traits: TraitRegistry,
    rules: Vec<Arc<dyn Rule>>,
    space: Space,
    queue: BinaryHeap<PendingCall>,
    fired: HashSet<(String, Vec<NodeId>)>,
    seq: u64,
    state: PlannerState,
    root: Option<SubsetId>,
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
    iterations: u64,
    stats_cache: HashMap<SetId, Statistics>,
    max_pattern_depth: usize,
}

impl Planner {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            operators: OperatorTable::with_builtins(),
            cluster: None,
            catalog,
            cost_model: Arc::new(DefaultCostModel),
            config: PlannerConfig::default(),
            traits: TraitRegistry::standard(),
            rules: Vec::new(),
            space: Space::new(),
            queue: BinaryHeap::new(),
            fired: HashSet::new(),
            seq: 0,
            state: PlannerState::Configuring,
            root: None,
            cancel: None,
            deadline: None,
            iterations: 0,
            stats_cache: HashMap::new(),
            max_pattern_depth: 1,
        }
    }

    pub fn with_cost_model(mut self, model: Arc<dyn CostModel>) -> Self {
        self.cost_model = model;
        self
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    // -----------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------

    fn ensure_configuring(&self, what: &str) -> Result<()> {
        if self.state != PlannerState::Configuring {
            return Err(PlannerError::invalid(format!(
                "{what} is only allowed while the planner is configuring"
            )));
        }
        Ok(())
    }

    pub fn add_rule(&mut self, rule: impl Rule + 'static) -> Result<()> {
        self.add_rule_arc(Arc::new(rule))
    }

    pub fn add_rule_arc(&mut self, rule: Arc<dyn Rule>) -> Result<()> {
        self.ensure_configuring("add_rule")?;
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(PlannerError::invalid(format!(
                "rule '{}' is already registered",
                rule.name()
            )));
        }
        self.max_pattern_depth = self.max_pattern_depth.max(rule.operand().depth());
        self.rules.push(rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, name: &str) -> Result<()> {
        self.ensure_configuring("remove_rule")?;
        self.rules.retain(|r| r.name() != name);
        Ok(())
    }

    pub fn add_rule_set(&mut self, set: crate::rule::RuleSet) -> Result<()> {
        for rule in set.rules {
            self.add_rule_arc(rule)?;
        }
        Ok(())
    }

    pub fn add_trait_def(&mut self, def: Box<dyn TraitDef>) -> Result<()> {
        self.ensure_configuring("add_trait_def")?;
        self.traits.add(def);
        Ok(())
    }

    pub fn register_convention(&mut self, info: ConventionInfo) -> Result<()> {
        self.ensure_configuring("register_convention")?;
        self.traits.convention_def_mut().register_convention(info);
        Ok(())
    }

    pub fn register_conversion_route(&mut self, from: Convention, to: Convention) -> Result<()> {
        self.ensure_configuring("register_conversion_route")?;
        self.traits.convention_def_mut().register_route(from, to);
        Ok(())
    }

    /// Install an adapter: its convention, operators, and rules.
    pub fn install(&mut self, adapter: &dyn Adapter) -> Result<()> {
        self.ensure_configuring("install")?;
        self.traits
            .convention_def_mut()
            .register_convention(adapter.convention());
        adapter.register_operators(&mut self.operators);
        adapter.register_rules(self)
    }

    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn set_iteration_limit(&mut self, limit: u64) {
        self.config.iteration_limit = limit;
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn traits(&self) -> &TraitRegistry {
        &self.traits
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn cluster(&self) -> &Cluster {
        self.cluster
            .as_ref()
            .expect("cluster is available once the root is registered")
    }

    pub fn default_traits(&self) -> TraitSet {
        self.traits.default_traits()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    // -----------------------------------------------------------------
    // Seeding
    // -----------------------------------------------------------------

    /// Register the initial logical tree and the goal trait set. Returns
    /// the goal subset.
    pub fn set_root(&mut self, tree: AlgTree, required: TraitSet) -> Result<SubsetId> {
        self.ensure_configuring("set_root")?;
        self.cluster = Some(Cluster::new(Arc::new(self.operators.clone())));
        let root_subset = self.register_tree(tree)?;
        let goal = self.require_trait(root_subset, required)?;
        self.root = Some(goal);
        self.state = PlannerState::Seeded;
        debug!(
            "seeded: {} nodes, {} sets, {} pending rule calls",
            self.space.num_nodes(),
            self.space.num_sets(),
            self.queue.len()
        );
        Ok(goal)
    }

    fn register_tree(&mut self, tree: AlgTree) -> Result<SubsetId> {
        let mut inputs = Vec::with_capacity(tree.inputs.len());
        for child in tree.inputs {
            inputs.push(self.register_tree(child)?);
        }
        let input_types: Vec<_> = inputs
            .iter()
            .map(|&s| self.space.set_row_type(self.space.set_of_subset(s)).clone())
            .collect();
        let row_type = derive_row_type(&tree.op, &input_types)?;
        let node = AlgNode { op: tree.op, traits: tree.traits, inputs, row_type };
        Ok(self.register(node, None)?.1)
    }

    /// Intern a node, schedule rule calls for every pattern it completes,
    /// and invalidate memoized costs along the ancestor chain.
    fn register(&mut self, node: AlgNode, target_set: Option<SetId>) -> Result<(NodeId, SubsetId)> {
        let interned = self.space.intern(node, target_set, &self.traits)?;
        // A digest hit can still have merged sets, so costs are invalidated
        // either way.
        self.invalidate_ancestors(interned.node);
        if interned.is_new {
            // A new member may be the missing provider for a sibling
            // subset's requirement.
            let set = self.space.set_of_subset(interned.subset);
            self.expand_conversions(set)?;
            self.match_rules_for(interned.node);
            // Patterns deeper than one operand can be completed by a new
            // node appearing below an existing parent.
            if self.max_pattern_depth > 1 {
                let mut frontier = vec![interned.node];
                for _ in 1..self.max_pattern_depth {
                    let mut next = Vec::new();
                    for n in frontier {
                        for parent in self.space.ancestors(self.space.subset_of_node(n)) {
                            self.match_rules_for(parent);
                            next.push(parent);
                        }
                    }
                    frontier = next;
                }
            }
        }
        Ok((interned.node, interned.subset))
    }

    fn match_rules_for(&mut self, node: NodeId) {
        let rules = self.rules.clone();
        for rule in rules {
            let operand = rule.operand();
            for binding in match_operand(&self.space, node, &operand) {
                let key = (rule.name().to_string(), binding.clone());
                if self.fired.contains(&key) {
                    continue;
                }
                self.fired.insert(key);
                let importance = self.importance_of_node(binding[0]);
                self.seq += 1;
                trace!(
                    "queue rule '{}' on node {} (importance {:.4})",
                    rule.name(),
                    binding[0],
                    importance
                );
                self.queue.push(PendingCall {
                    rule: rule.clone(),
                    binding,
                    importance: OrderedFloat(importance),
                    seq: self.seq,
                });
            }
        }
    }

    /// Drop memoized best costs for the node's set and everything above it.
    fn invalidate_ancestors(&mut self, node: NodeId) {
        let mut visited: HashSet<SetId> = HashSet::new();
        let mut frontier = vec![self.space.set_of_subset(self.space.subset_of_node(node))];
        while let Some(set) = frontier.pop() {
            if !visited.insert(set) {
                continue;
            }
            let subsets: Vec<SubsetId> = self.space.subsets_of_set(set).to_vec();
            for subset in subsets {
                self.space.set_best(subset, None);
            }
            for parent in self.space.ancestors(self.space.subsets_of_set(set)[0]) {
                frontier.push(self.space.set_of_subset(self.space.subset_of_node(parent)));
            }
        }
    }

    // -----------------------------------------------------------------
    // Traits and conversions
    // -----------------------------------------------------------------

    /// The subset of the same set carrying `required`, with conversion
    /// chains synthesized from every populated sibling subset. New members
    /// interned later re-run the synthesis, so a requirement registered
    /// before its provider still gets its converter.
    pub fn require_trait(&mut self, subset: SubsetId, required: TraitSet) -> Result<SubsetId> {
        let set = self.space.set_of_subset(subset);
        let target = self.space.ensure_subset(set, required, &self.traits);
        self.expand_conversions(set)?;
        Ok(self.space.canonical_subset(target))
    }

    /// Synthesize conversion chains from every populated subset of `set`
    /// toward every sibling subset it does not already satisfy. Re-entrant
    /// through `register`; digest deduplication makes repeated expansion a
    /// no-op.
    fn expand_conversions(&mut self, set: SetId) -> Result<()> {
        let set = self.space.find(set);
        let subsets = self.space.subsets_of_set(set).to_vec();
        for &target in &subsets {
            if self.space.canonical_subset(target) != target {
                continue;
            }
            let required = self.space.subset(target).traits().clone();
            for &sibling in &subsets {
                if sibling == target
                    || self.space.canonical_subset(sibling) != sibling
                    || self.space.subset_members(sibling).is_empty()
                {
                    continue;
                }
                let sibling_traits = self.space.subset(sibling).traits().clone();
                if self.traits.satisfies(&sibling_traits, &required) {
                    continue;
                }
                self.convert_chain(set, sibling, sibling_traits, &required)?;
            }
        }
        Ok(())
    }

    /// Build one conversion chain slot by slot: convention first, then
    /// collation, then distribution, then custom defs. Bails silently when
    /// a slot has no registered conversion.
    fn convert_chain(
        &mut self,
        set: SetId,
        from: SubsetId,
        from_traits: TraitSet,
        required: &TraitSet,
    ) -> Result<()> {
        let row_type = self.space.set_row_type(set).clone();
        let mut current_traits = from_traits;
        let mut current_input = from;
        for slot in 0..self.traits.slot_count() {
            let def = self.traits.def(slot);
            let actual = current_traits
                .slots()
                .get(slot)
                .cloned()
                .unwrap_or_else(|| def.default_trait());
            let Some(wanted) = required.slots().get(slot).cloned() else {
                continue;
            };
            if def.satisfies(&actual, &wanted) {
                continue;
            }
            let Some(conversion) = def.conversion(&actual, &wanted) else {
                trace!("no conversion from subset {from} to [{required}]");
                return Ok(());
            };
            let (op, delivered) = match conversion {
                ConversionKind::Convert { to, .. } => {
                    (AlgOp::Converter { target: to }, Trait::Convention(to))
                }
                ConversionKind::SortBy(c) => (
                    AlgOp::Sort { collation: c.clone(), offset: None, fetch: None },
                    Trait::Collation(c),
                ),
                ConversionKind::ExchangeTo(d) => {
                    (AlgOp::Exchange { distribution: d.clone() }, Trait::Distribution(d))
                }
            };
            current_traits = current_traits.replace(delivered);
            let node = AlgNode {
                op,
                traits: current_traits.clone(),
                inputs: vec![current_input],
                row_type: row_type.clone(),
            };
            let (_, home) = self.register(node, Some(set))?;
            current_input = home;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Statistics and costs
    // -----------------------------------------------------------------

    /// Statistics of a set, derived from a representative member and
    /// memoized per leader.
    pub fn set_stats(&mut self, set: SetId) -> Statistics {
        self.set_stats_guarded(set, &mut HashSet::new())
    }

    fn set_stats_guarded(&mut self, set: SetId, in_progress: &mut HashSet<SetId>) -> Statistics {
        let set = self.space.find(set);
        if let Some(cached) = self.stats_cache.get(&set) {
            return cached.clone();
        }
        if !in_progress.insert(set) {
            return Statistics::new(1000.0, 100_000.0);
        }
        let Some(member) = self.space.first_member(set) else {
            in_progress.remove(&set);
            return Statistics::new(1000.0, 100_000.0);
        };
        let node = self.space.node(member).clone();
        let input_sets: Vec<SetId> = node
            .inputs
            .iter()
            .map(|&s| self.space.set_of_subset(s))
            .collect();
        let input_stats: Vec<Statistics> = input_sets
            .iter()
            .map(|&s| self.set_stats_guarded(s, in_progress))
            .collect();
        let input_types: Vec<_> = input_sets
            .iter()
            .map(|&s| self.space.set_row_type(s).clone())
            .collect();

        let derived = match &node.op {
            AlgOp::Scan { table, .. } => self
                .catalog
                .table_stats(table)
                .unwrap_or_else(|| Statistics::new(1000.0, 100_000.0)),
            AlgOp::Filter { predicate } | AlgOp::Match { predicate } => {
                let selectivity =
                    stats::estimate_selectivity(predicate, &input_stats[0], &input_types[0]);
                stats::derive_filter_stats(&input_stats[0], selectivity)
            }
            AlgOp::Join { condition, .. } => {
                let pairs = equi_join_columns(condition, &input_types[0], &input_types[1]);
                stats::derive_join_stats(&input_stats[0], &input_stats[1], &pairs)
            }
            AlgOp::Aggregate { group_keys, .. } => {
                let cols: Vec<String> = group_keys
                    .iter()
                    .filter_map(|&k| input_types[0].field(k).map(|f| f.name.clone()))
                    .collect();
                stats::derive_aggregate_stats(&input_stats[0], &cols)
            }
            AlgOp::Union { .. } => {
                let rows: f64 = input_stats.iter().map(|s| s.row_count).sum();
                let bytes: f64 = input_stats.iter().map(|s| s.total_size_bytes).sum();
                Statistics::new(rows.max(1.0), bytes)
            }
            AlgOp::Values { tuples, .. } => {
                Statistics::new(tuples.len() as f64, tuples.len() as f64 * 100.0)
            }
            AlgOp::Modify { .. } => Statistics::new(1.0, 100.0),
            AlgOp::Project { .. }
            | AlgOp::Sort { .. }
            | AlgOp::Converter { .. }
            | AlgOp::Exchange { .. } => input_stats[0].clone(),
        };
        in_progress.remove(&set);
        self.stats_cache.insert(set, derived.clone());
        derived
    }

    /// Cumulative cost of one member: its local cost plus the best costs of
    /// its input subsets. `None` when the node is logical or any input has
    /// no feasible plan.
    fn cumulative_cost(
        &mut self,
        node_id: NodeId,
        visiting: &mut HashSet<SubsetId>,
    ) -> Option<Cost> {
        let node = self.space.node(node_id).clone();
        let convention = node.traits.convention();
        if convention.is_none() {
            return None;
        }
        let mut total = {
            let set = self.space.set_of_subset(self.space.subset_of_node(node_id));
            let node_stats = self.set_stats(set);
            let input_stats: Vec<Statistics> = node
                .inputs
                .iter()
                .map(|&s| self.set_stats(self.space.set_of_subset(s)))
                .collect();
            self.cost_model
                .node_cost(&node.op, convention, &node_stats, &input_stats)
        };
        for &input in &node.inputs {
            let (_, child_cost) = self.best_of(input, visiting)?;
            total = total.plus(&child_cost);
        }
        Some(total)
    }

    /// Memoized cheapest member of a subset. Revisiting a subset mid-walk
    /// means a recursive equivalence; such members are priced infinite.
    fn best_of(
        &mut self,
        subset: SubsetId,
        visiting: &mut HashSet<SubsetId>,
    ) -> Option<(NodeId, Cost)> {
        let subset = self.space.canonical_subset(subset);
        if let Some(best) = self.space.subset(subset).best {
            return Some(best);
        }
        if !visiting.insert(subset) {
            return None;
        }
        let weights = self.config.cost_weights;
        let mut best: Option<(NodeId, Cost)> = None;
        for member in self.space.subset_members(subset).to_vec() {
            let Some(cost) = self.cumulative_cost(member, visiting) else {
                continue;
            };
            let better = match &best {
                None => true,
                // Strict improvement keeps the earliest-interned member on
                // ties.
                Some((_, current)) => {
                    cost.compare(current, &weights) == std::cmp::Ordering::Less
                }
            };
            if better {
                best = Some((member, cost));
            }
        }
        visiting.remove(&subset);
        if best.is_some() && visiting.is_empty() {
            // Only memoize walks that were not truncated by a cycle guard.
            self.space.set_best(subset, best);
        }
        best
    }

    /// Public cost query for a subset.
    pub fn best_cost(&mut self, subset: SubsetId) -> Option<Cost> {
        self.best_of(subset, &mut HashSet::new()).map(|(_, c)| c)
    }

    // -----------------------------------------------------------------
    // Importance
    // -----------------------------------------------------------------

    fn importance_of_node(&mut self, node: NodeId) -> f64 {
        let subset = self.space.subset_of_node(node);
        self.importance_of_subset(subset)
    }

    fn importance_of_subset(&mut self, subset: SubsetId) -> f64 {
        self.importance_rec(subset, &mut HashSet::new())
    }

    /// Importance 1.0 at the goal set, decaying downward by the child's
    /// relative share of its parent's input cost; max over parents.
    fn importance_rec(&mut self, subset: SubsetId, visited: &mut HashSet<SubsetId>) -> f64 {
        let subset = self.space.canonical_subset(subset);
        let set = self.space.set_of_subset(subset);
        match self.root {
            Some(root) if self.space.set_of_subset(root) == set => return 1.0,
            None => return 0.5,
            _ => {}
        }
        if !visited.insert(subset) {
            return 0.0;
        }
        let own_cost = self.cost_proxy(subset);
        let mut best = 0.0_f64;
        for parent in self.space.ancestors(subset) {
            let parent_subset = self.space.subset_of_node(parent);
            let parent_importance = self.importance_rec(parent_subset, visited);
            if parent_importance <= best {
                continue;
            }
            let input_total: f64 = self
                .space
                .node(parent)
                .inputs
                .clone()
                .iter()
                .map(|&i| self.cost_proxy(i))
                .sum();
            let relative = own_cost / (1.0 + input_total);
            best = best.max(parent_importance * relative.min(1.0));
        }
        visited.remove(&subset);
        best
    }

    /// Best-known weighted cost, falling back to the row-count estimate
    /// before any physical member exists.
    fn cost_proxy(&mut self, subset: SubsetId) -> f64 {
        let subset = self.space.canonical_subset(subset);
        if let Some((_, cost)) = self.space.subset(subset).best {
            return cost.weighted(&self.config.cost_weights).max(1.0);
        }
        let set = self.space.set_of_subset(subset);
        self.set_stats(set).row_count.max(1.0)
    }

    // -----------------------------------------------------------------
    // The fixpoint loop
    // -----------------------------------------------------------------

    fn check_cancel(&mut self) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(AtomicOrdering::Relaxed) {
                self.state = PlannerState::Cancelled;
                return Err(PlannerError::Cancelled);
            }
        }
        Ok(())
    }

    /// Run the search to its fixpoint (or bound) and extract the cheapest
    /// plan for the goal subset.
    pub fn find_best_plan(&mut self) -> Result<BestPlan> {
        if self.state != PlannerState::Seeded {
            return Err(PlannerError::invalid(format!(
                "find_best_plan requires a seeded planner (state is {:?})",
                self.state
            )));
        }
        self.state = PlannerState::Running;
        let goal = self
            .root
            .ok_or_else(|| PlannerError::invalid("no root registered"))?;

        let mut outcome = Outcome::Complete;
        loop {
            self.check_cancel()?;
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    debug!("deadline reached after {} rule calls", self.iterations);
                    outcome = Outcome::Exhausted;
                    break;
                }
            }
            if self.iterations >= self.config.iteration_limit {
                debug!("iteration limit reached");
                outcome = Outcome::Exhausted;
                break;
            }
            let Some(call) = self.queue.pop() else {
                break;
            };
            // Re-key on dequeue: merges and cost updates may have changed
            // the importance since this call was enqueued.
            let fresh = self.importance_of_node(call.binding[0]);
            if fresh + 1e-9 < call.importance.0 {
                let demote = self
                    .queue
                    .peek()
                    .map(|next| next.importance.0 > fresh)
                    .unwrap_or(false);
                if demote {
                    self.queue.push(PendingCall {
                        importance: OrderedFloat(fresh),
                        ..call
                    });
                    continue;
                }
            }

            self.iterations += 1;
            let rule = call.rule.clone();
            trace!("firing rule '{}' on node {}", rule.name(), call.binding[0]);
            let mut rule_call = RuleCall {
                planner: self,
                rule_name: rule.name().to_string(),
                binding: call.binding,
            };
            if let Err(err) = rule.on_match(&mut rule_call) {
                return Err(self.fail_rule(rule.name(), err));
            }
        }

        let plan = match self.extract(goal, &mut HashSet::new()) {
            Some(plan) => plan,
            None => {
                self.state = if outcome == Outcome::Complete {
                    PlannerState::Failed
                } else {
                    PlannerState::Exhausted
                };
                let traits = self.space.subset(goal).traits().clone();
                return Err(PlannerError::NoImplementationFound(traits.to_string()));
            }
        };
        self.state = match outcome {
            Outcome::Complete => PlannerState::Done,
            Outcome::Exhausted => PlannerState::Exhausted,
        };
        debug!(
            "planning finished: cost={:.1}, {} rule calls, {} nodes",
            plan.cost.cpu + plan.cost.io,
            self.iterations,
            self.space.num_nodes()
        );
        Ok(BestPlan { cost: plan.cost, outcome, plan })
    }

    fn fail_rule(&mut self, rule: &str, err: PlannerError) -> PlannerError {
        match err {
            PlannerError::Cancelled => {
                self.state = PlannerState::Cancelled;
                PlannerError::Cancelled
            }
            e @ PlannerError::IncompatibleRewrite { .. } => {
                self.state = PlannerState::Failed;
                e
            }
            other => {
                self.state = PlannerState::Failed;
                PlannerError::RuleFailure { rule: rule.to_string(), message: other.to_string() }
            }
        }
    }

    /// Extract the cheapest tree under a subset. An already-visited subset
    /// signals a recursive equivalence; the caller then tries its
    /// next-cheapest member.
    fn extract(&mut self, subset: SubsetId, visited: &mut HashSet<SubsetId>) -> Option<PlanNode> {
        let subset = self.space.canonical_subset(subset);
        if !visited.insert(subset) {
            return None;
        }
        let weights = self.config.cost_weights;
        let mut candidates: Vec<(NodeId, Cost)> = Vec::new();
        for member in self.space.subset_members(subset).to_vec() {
            if let Some(cost) = self.cumulative_cost(member, &mut HashSet::new()) {
                candidates.push((member, cost));
            }
        }
        candidates.sort_by(|a, b| a.1.compare(&b.1, &weights));

        let mut result = None;
        'candidates: for (member, cost) in candidates {
            let node = self.space.node(member).clone();
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for &input in &node.inputs {
                match self.extract(input, visited) {
                    Some(child) => inputs.push(child),
                    None => continue 'candidates,
                }
            }
            result = Some(PlanNode {
                op: node.op,
                traits: node.traits,
                row_type: node.row_type,
                inputs,
                cost,
            });
            break;
        }
        visited.remove(&subset);
        result
    }
}

/// A bound rule invocation: the rule's window onto the planner while it
/// fires. `transform_to` announces an equivalent of the binding root.
pub struct RuleCall<'a> {
    planner: &'a mut Planner,
    rule_name: String,
    binding: Vec<NodeId>,
}

impl RuleCall<'_> {
    /// The i-th bound node, in pattern pre-order (0 is the root).
    pub fn node(&self, i: usize) -> &AlgNode {
        self.planner.space.node(self.binding[i])
    }

    pub fn node_id(&self, i: usize) -> NodeId {
        self.binding[i]
    }

    /// The canonical input handle of bound node `i`.
    pub fn input(&self, i: usize, input: usize) -> SubsetId {
        let node = self.planner.space.node(self.binding[i]);
        self.planner.space.canonical_subset(node.inputs[input])
    }

    pub fn row_type_of(&self, subset: SubsetId) -> crate::types::RowType {
        self.planner
            .space
            .set_row_type(self.planner.space.set_of_subset(subset))
            .clone()
    }

    pub fn rex(&self) -> &RexBuilder {
        &self.planner.cluster().rex
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.planner.catalog.as_ref()
    }

    pub fn default_traits(&self) -> TraitSet {
        self.planner.default_traits()
    }

    /// Subset of the same set as `subset` carrying `traits`, with
    /// conversions synthesized as needed.
    pub fn require(&mut self, subset: SubsetId, traits: TraitSet) -> Result<SubsetId> {
        self.planner.require_trait(subset, traits)
    }

    /// Build a node over input subsets, deriving (and validating) its row
    /// type.
    pub fn make_node(
        &self,
        op: AlgOp,
        traits: TraitSet,
        inputs: Vec<SubsetId>,
    ) -> Result<AlgNode> {
        let input_types: Vec<_> = inputs.iter().map(|&s| self.row_type_of(s)).collect();
        let row_type = derive_row_type(&op, &input_types)?;
        Ok(AlgNode { op, traits, inputs, row_type })
    }

    /// Intern an intermediate node in its own set (or whichever set its
    /// digest already lives in) and return its subset handle. Used for the
    /// inner nodes of a multi-level rewrite.
    pub fn register_input(&mut self, node: AlgNode) -> Result<SubsetId> {
        self.planner.check_cancel()?;
        Ok(self.planner.register(node, None)?.1)
    }

    /// Intern `node` as an equivalent of the binding root.
    pub fn transform_to(&mut self, node: AlgNode) -> Result<NodeId> {
        self.planner.check_cancel()?;
        let root_set = self
            .planner
            .space
            .set_of_subset(self.planner.space.subset_of_node(self.binding[0]));
        if !self
            .planner
            .space
            .set_row_type(root_set)
            .compatible_with(&node.row_type)
        {
            return Err(PlannerError::IncompatibleRewrite {
                rule: self.rule_name.clone(),
                details: format!(
                    "set row type {} vs rewrite row type {}",
                    self.planner.space.set_row_type(root_set),
                    node.row_type
                ),
            });
        }
        let (id, _) = self.planner.register(node, Some(root_set))?;
        Ok(id)
    }

    /// Declare the binding root equivalent to an existing subset (e.g. a
    /// filter whose predicate simplified to `true` is equivalent to its
    /// input). Merges the two sets.
    pub fn transform_to_subset(&mut self, subset: SubsetId) -> Result<()> {
        self.planner.check_cancel()?;
        let root_set = self
            .planner
            .space
            .set_of_subset(self.planner.space.subset_of_node(self.binding[0]));
        let other = self.planner.space.set_of_subset(subset);
        if root_set == other {
            return Ok(());
        }
        let leader = self
            .planner
            .space
            .merge_sets(root_set, other, &self.planner.traits)?;
        let anchor = self.planner.space.subsets_of_set(leader)[0];
        let members = self.planner.space.subset_members(anchor).to_vec();
        if let Some(&m) = members.first() {
            self.planner.invalidate_ancestors(m);
        }
        Ok(())
    }
}

/// Equi-join column-name pairs of a join condition, resolved against the
/// left and right input row types.
fn equi_join_columns(
    condition: &RowExpr,
    left: &crate::types::RowType,
    right: &crate::types::RowType,
) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for conjunct in condition.conjuncts() {
        let RowExpr::Call { op: OpKind::Eq, operands, .. } = conjunct else {
            continue;
        };
        let (RowExpr::InputRef { index: a, .. }, RowExpr::InputRef { index: b, .. }) =
            (&operands[0], &operands[1])
        else {
            continue;
        };
        let (l, r) = if *a < left.arity() { (*a, *b) } else { (*b, *a) };
        if l < left.arity() && r >= left.arity() {
            if let (Some(lf), Some(rf)) = (left.field(l), right.field(r - left.arity())) {
                pairs.push((lf.name.clone(), rf.name.clone()));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_calls_order_by_importance_then_insertion() {
        fn call(importance: f64, seq: u64) -> PendingCall {
            struct Noop;
            impl Rule for Noop {
                fn name(&self) -> &str {
                    "noop"
                }
                fn operand(&self) -> crate::pattern::Operand {
                    crate::pattern::Operand::any()
                }
                fn on_match(&self, _: &mut RuleCall<'_>) -> Result<()> {
                    Ok(())
                }
            }
            PendingCall {
                rule: Arc::new(Noop),
                binding: vec![0],
                importance: OrderedFloat(importance),
                seq,
            }
        }
        let mut heap = BinaryHeap::new();
        heap.push(call(0.5, 1));
        heap.push(call(0.9, 2));
        heap.push(call(0.9, 3));
        heap.push(call(0.1, 4));
        assert_eq!(heap.pop().unwrap().seq, 2);
        assert_eq!(heap.pop().unwrap().seq, 3);
        assert_eq!(heap.pop().unwrap().seq, 1);
        assert_eq!(heap.pop().unwrap().seq, 4);
    }
}
