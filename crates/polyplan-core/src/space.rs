//! # Equivalence Search Space
//!
//! The space holds every node the planner has seen, partitioned into
//! [`Set`]s (equivalence classes: nodes producing the same result) and
//! [`Subset`]s (a set narrowed to one trait manifestation). Nodes, sets, and
//! subsets live in arenas and are addressed by index; nothing is freed
//! until the planner is torn down.
//!
//! Deduplication is digest-based: a node's digest is a canonical string over
//! its kind, payload, canonical input subset ids, and trait set. Interning a
//! digest twice yields the same node, and when a rule produces a node whose
//! digest already lives in a *different* set, the two sets are merged.
//!
//! Merging is union-find with path compression. The follower's subsets
//! forward to the leader's matching subsets; foreign references redirect
//! lazily through the forward pointers on next access, while the follower's
//! parent nodes are re-digested eagerly (a digest collision there cascades
//! into further merges, processed from a worklist).

use crate::algebra::{AlgNode, NodeId, SetId, SubsetId};
use crate::cost::Cost;
use crate::error::{PlannerError, Result};
use crate::traits::{TraitRegistry, TraitSet};
use crate::types::RowType;
use std::collections::HashMap;
use tracing::trace;

/// An equivalence class of nodes.
pub struct Set {
    /// Union-find parent; equal to the set's own id while it leads.
    parent: SetId,
    row_type: RowType,
    subsets: Vec<SubsetId>,
    /// Nodes whose inputs include a subset of this set.
    parents: Vec<NodeId>,
}

/// A set restricted to one trait set.
pub struct Subset {
    set: SetId,
    traits: TraitSet,
    /// Members whose delivered traits satisfy this subset's traits, in
    /// insertion order.
    members: Vec<NodeId>,
    /// Memoized cheapest member and its cumulative cost.
    pub best: Option<(NodeId, Cost)>,
    /// Lazy redirect installed when the owning set merged away.
    forwarded: Option<SubsetId>,
}

impl Subset {
    pub fn traits(&self) -> &TraitSet {
        &self.traits
    }

    pub fn set(&self) -> SetId {
        self.set
    }
}

/// Result of interning one node.
pub struct Interned {
    pub node: NodeId,
    /// The node's home subset (exact trait match), canonicalized.
    pub subset: SubsetId,
    /// False when the digest was already present.
    pub is_new: bool,
}

#[derive(Default)]
pub struct Space {
    nodes: Vec<AlgNode>,
    node_digests: Vec<String>,
    node_subset: Vec<SubsetId>,
    sets: Vec<Set>,
    subsets: Vec<Subset>,
    digest_map: HashMap<String, NodeId>,
}

impl Space {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live (leader) sets.
    pub fn num_sets(&self) -> usize {
        (0..self.sets.len()).filter(|&s| self.sets[s].parent == s).count()
    }

    pub fn node(&self, id: NodeId) -> &AlgNode {
        &self.nodes[id]
    }

    pub fn node_digest(&self, id: NodeId) -> &str {
        &self.node_digests[id]
    }

    /// The node's home subset, canonicalized.
    pub fn subset_of_node(&self, id: NodeId) -> SubsetId {
        self.canonical_subset(self.node_subset[id])
    }

    pub fn subset(&self, id: SubsetId) -> &Subset {
        &self.subsets[self.canonical_subset(id)]
    }

    pub fn subset_members(&self, id: SubsetId) -> &[NodeId] {
        &self.subsets[self.canonical_subset(id)].members
    }

    pub fn set_of_subset(&self, id: SubsetId) -> SetId {
        self.find(self.subsets[self.canonical_subset(id)].set)
    }

    pub fn subsets_of_set(&self, set: SetId) -> &[SubsetId] {
        &self.sets[self.find(set)].subsets
    }

    pub fn set_row_type(&self, set: SetId) -> &RowType {
        &self.sets[self.find(set)].row_type
    }

    /// Parent nodes of the subset's set, for rule re-triggering.
    pub fn ancestors(&self, subset: SubsetId) -> Vec<NodeId> {
        self.sets[self.set_of_subset(subset)].parents.clone()
    }

    /// A representative member of the set, for statistics derivation.
    pub fn first_member(&self, set: SetId) -> Option<NodeId> {
        self.sets[self.find(set)]
            .subsets
            .iter()
            .flat_map(|&s| self.subsets[s].members.iter())
            .copied()
            .next()
    }

    pub fn set_best(&mut self, subset: SubsetId, best: Option<(NodeId, Cost)>) {
        let id = self.canonical_subset(subset);
        self.subsets[id].best = best;
    }

    /// Union-find leader, without compression.
    pub fn find(&self, set: SetId) -> SetId {
        let mut s = set;
        while self.sets[s].parent != s {
            s = self.sets[s].parent;
        }
        s
    }

    fn find_compress(&mut self, set: SetId) -> SetId {
        let leader = self.find(set);
        let mut s = set;
        while self.sets[s].parent != s {
            let next = self.sets[s].parent;
            self.sets[s].parent = leader;
            s = next;
        }
        leader
    }

    /// Follow forward pointers to the surviving subset.
    pub fn canonical_subset(&self, subset: SubsetId) -> SubsetId {
        let mut s = subset;
        while let Some(next) = self.subsets[s].forwarded {
            s = next;
        }
        s
    }

    /// Canonical digest over kind, payload, canonical input subsets, and
    /// traits.
    pub fn digest_of(&self, node: &AlgNode) -> String {
        let inputs: Vec<SubsetId> =
            node.inputs.iter().map(|&i| self.canonical_subset(i)).collect();
        format!("{}#{:?}#[{}]", node.op, inputs, node.traits)
    }

    /// Intern a node. When `target_set` is given, the node is asserted
    /// equivalent to that set; a digest hit in a different set merges the
    /// two.
    pub fn intern(
        &mut self,
        mut node: AlgNode,
        target_set: Option<SetId>,
        registry: &TraitRegistry,
    ) -> Result<Interned> {
        for input in node.inputs.iter_mut() {
            *input = self.canonical_subset(*input);
        }
        let digest = self.digest_of(&node);

        if let Some(&existing) = self.digest_map.get(&digest) {
            let existing_set = self.set_of_subset(self.node_subset[existing]);
            if let Some(target) = target_set {
                let target = self.find_compress(target);
                if target != existing_set {
                    self.merge_sets(existing_set, target, registry)?;
                }
            }
            return Ok(Interned {
                node: existing,
                subset: self.subset_of_node(existing),
                is_new: false,
            });
        }

        let set = match target_set {
            Some(s) => self.find_compress(s),
            None => {
                let id = self.sets.len();
                self.sets.push(Set {
                    parent: id,
                    row_type: node.row_type.clone(),
                    subsets: Vec::new(),
                    parents: Vec::new(),
                });
                id
            }
        };

        let node_id = self.nodes.len();
        let home = self.ensure_subset(set, node.traits.clone(), registry);
        // The home subset plus every sibling whose requirement the node's
        // delivered traits satisfy.
        for subset_id in self.sets[set].subsets.clone() {
            let accepts = registry.satisfies(&node.traits, &self.subsets[subset_id].traits);
            if accepts && !self.subsets[subset_id].members.contains(&node_id) {
                self.subsets[subset_id].members.push(node_id);
            }
        }

        for &input in &node.inputs {
            let input_set = self.set_of_subset(input);
            if !self.sets[input_set].parents.contains(&node_id) {
                self.sets[input_set].parents.push(node_id);
            }
        }

        trace!("interned node {node_id} into set {set}: {digest}");
        self.digest_map.insert(digest.clone(), node_id);
        self.nodes.push(node);
        self.node_digests.push(digest);
        self.node_subset.push(home);
        Ok(Interned { node: node_id, subset: home, is_new: true })
    }

    /// The subset of `set` with exactly `traits`, creating it (and pulling
    /// in satisfying members) if absent.
    pub fn ensure_subset(
        &mut self,
        set: SetId,
        traits: TraitSet,
        registry: &TraitRegistry,
    ) -> SubsetId {
        let set = self.find_compress(set);
        if let Some(&existing) = self.sets[set]
            .subsets
            .iter()
            .find(|&&s| self.subsets[s].traits == traits)
        {
            return existing;
        }
        let id = self.subsets.len();
        let members: Vec<NodeId> = self.sets[set]
            .subsets
            .iter()
            .flat_map(|&s| self.subsets[s].members.iter().copied())
            .filter(|&m| registry.satisfies(&self.nodes[m].traits, &traits))
            .collect();
        let mut deduped = Vec::with_capacity(members.len());
        for m in members {
            if !deduped.contains(&m) {
                deduped.push(m);
            }
        }
        self.subsets.push(Subset {
            set,
            traits,
            members: deduped,
            best: None,
            forwarded: None,
        });
        self.sets[set].subsets.push(id);
        id
    }

    /// Union two equivalence sets. The lower set id survives as leader; the
    /// follower's subsets forward into the leader, its parents re-digest,
    /// and any resulting digest collisions merge further sets.
    pub fn merge_sets(
        &mut self,
        a: SetId,
        b: SetId,
        registry: &TraitRegistry,
    ) -> Result<SetId> {
        let mut worklist = vec![(a, b)];
        let mut result = self.find_compress(a);

        while let Some((a, b)) = worklist.pop() {
            let la = self.find_compress(a);
            let lb = self.find_compress(b);
            if la == lb {
                continue;
            }
            let (leader, follower) = if la < lb { (la, lb) } else { (lb, la) };
            if !self.sets[leader]
                .row_type
                .compatible_with(&self.sets[follower].row_type)
            {
                return Err(PlannerError::invalid(format!(
                    "cannot merge sets {leader} and {follower}: row types {} vs {} differ",
                    self.sets[leader].row_type, self.sets[follower].row_type
                )));
            }
            trace!("merging set {follower} into {leader}");
            self.sets[follower].parent = leader;

            // Re-home or forward the follower's subsets.
            for subset_id in std::mem::take(&mut self.sets[follower].subsets) {
                let traits = self.subsets[subset_id].traits.clone();
                let target = self.sets[leader]
                    .subsets
                    .iter()
                    .copied()
                    .find(|&s| self.subsets[s].traits == traits);
                match target {
                    Some(target) => {
                        let members = std::mem::take(&mut self.subsets[subset_id].members);
                        for m in members {
                            if !self.subsets[target].members.contains(&m) {
                                self.subsets[target].members.push(m);
                            }
                        }
                        self.subsets[subset_id].forwarded = Some(target);
                        self.subsets[subset_id].best = None;
                    }
                    None => {
                        self.subsets[subset_id].set = leader;
                        self.sets[leader].subsets.push(subset_id);
                    }
                }
            }

            // Cross-pollinate: every member of the merged set joins each
            // subset whose requirement it satisfies.
            let all_members: Vec<NodeId> = self.sets[leader]
                .subsets
                .iter()
                .flat_map(|&s| self.subsets[s].members.iter().copied())
                .collect();
            for subset_id in self.sets[leader].subsets.clone() {
                for &m in &all_members {
                    let accepts =
                        registry.satisfies(&self.nodes[m].traits, &self.subsets[subset_id].traits);
                    if accepts && !self.subsets[subset_id].members.contains(&m) {
                        self.subsets[subset_id].members.push(m);
                    }
                }
            }

            // Merge parent lists and invalidate memoized costs.
            let follower_parents = std::mem::take(&mut self.sets[follower].parents);
            for p in follower_parents {
                if !self.sets[leader].parents.contains(&p) {
                    self.sets[leader].parents.push(p);
                }
            }
            for &subset_id in &self.sets[leader].subsets {
                self.subsets[subset_id].best = None;
            }

            // Eagerly re-digest the merged set's parents; a collision means
            // two formerly distinct parents became identical, so their sets
            // merge too.
            for parent in self.sets[leader].parents.clone() {
                let mut updated = self.nodes[parent].clone();
                for input in updated.inputs.iter_mut() {
                    *input = self.canonical_subset(*input);
                }
                let new_digest = self.digest_of(&updated);
                let old_digest = self.node_digests[parent].clone();
                if new_digest == old_digest {
                    continue;
                }
                self.nodes[parent] = updated;
                if self.digest_map.get(&old_digest) == Some(&parent) {
                    self.digest_map.remove(&old_digest);
                }
                match self.digest_map.get(&new_digest) {
                    Some(&other) if other != parent => {
                        let sa = self.set_of_subset(self.node_subset[parent]);
                        let sb = self.set_of_subset(self.node_subset[other]);
                        if sa != sb {
                            worklist.push((sa, sb));
                        }
                    }
                    _ => {
                        self.digest_map.insert(new_digest.clone(), parent);
                    }
                }
                self.node_digests[parent] = new_digest;
            }

            result = leader;
        }
        Ok(self.find_compress(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{derive_row_type, AlgOp, TableRef};
    use crate::types::{DataType, Field, RowType, TypeKind};

    fn scan_node(registry: &TraitRegistry, name: &str) -> AlgNode {
        let row_type = RowType::new(vec![Field::new("a", DataType::not_null(TypeKind::Int64))]);
        let op = AlgOp::Scan { table: TableRef::new("s", name), row_type: row_type.clone() };
        AlgNode { op, traits: registry.default_traits(), inputs: vec![], row_type }
    }

    #[test]
    fn interning_twice_returns_the_same_subset() {
        let registry = TraitRegistry::standard();
        let mut space = Space::new();
        let first = space.intern(scan_node(&registry, "t"), None, &registry).unwrap();
        let second = space.intern(scan_node(&registry, "t"), None, &registry).unwrap();
        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.node, second.node);
        assert_eq!(first.subset, second.subset);
        assert_eq!(space.num_nodes(), 1);
    }

    #[test]
    fn distinct_digests_get_distinct_sets() {
        let registry = TraitRegistry::standard();
        let mut space = Space::new();
        let a = space.intern(scan_node(&registry, "t"), None, &registry).unwrap();
        let b = space.intern(scan_node(&registry, "u"), None, &registry).unwrap();
        assert_ne!(
            space.set_of_subset(a.subset),
            space.set_of_subset(b.subset)
        );
        assert_eq!(space.num_sets(), 2);
    }

    #[test]
    fn merge_redirects_subsets_and_reparents() {
        let registry = TraitRegistry::standard();
        let mut space = Space::new();
        let a = space.intern(scan_node(&registry, "t"), None, &registry).unwrap();
        let b = space.intern(scan_node(&registry, "u"), None, &registry).unwrap();
        let set_a = space.set_of_subset(a.subset);
        let set_b = space.set_of_subset(b.subset);
        let leader = space.merge_sets(set_a, set_b, &registry).unwrap();
        assert_eq!(space.find(set_a), leader);
        assert_eq!(space.find(set_b), leader);
        assert_eq!(space.num_sets(), 1);
        // Both scans are now members of one subset.
        assert_eq!(space.subset_members(a.subset).len(), 2);
    }

    #[test]
    fn merge_cascades_through_identical_parents() {
        let registry = TraitRegistry::standard();
        let mut space = Space::new();
        let scan_a = space.intern(scan_node(&registry, "t"), None, &registry).unwrap();
        let scan_b = space.intern(scan_node(&registry, "u"), None, &registry).unwrap();

        // Identical filters over the two scans.
        let rex = crate::rex::RexBuilder::new(std::sync::Arc::new(
            crate::rex::OperatorTable::with_builtins(),
        ));
        let pred = rex.eq(
            rex.input_ref(0, DataType::not_null(TypeKind::Int64)),
            rex.int_lit(1),
        );
        let mk_filter = |space: &Space, input: SubsetId| {
            let op = AlgOp::Filter { predicate: pred.clone() };
            let row_type =
                derive_row_type(&op, &[space.set_row_type(space.set_of_subset(input)).clone()])
                    .unwrap();
            AlgNode { op, traits: registry.default_traits(), inputs: vec![input], row_type }
        };
        let f_a = {
            let n = mk_filter(&space, scan_a.subset);
            space.intern(n, None, &registry).unwrap()
        };
        let f_b = {
            let n = mk_filter(&space, scan_b.subset);
            space.intern(n, None, &registry).unwrap()
        };
        assert_ne!(
            space.set_of_subset(f_a.subset),
            space.set_of_subset(f_b.subset)
        );

        // Merging the scans makes the filters identical; their sets must
        // merge transitively.
        let sa = space.set_of_subset(scan_a.subset);
        let sb = space.set_of_subset(scan_b.subset);
        space.merge_sets(sa, sb, &registry).unwrap();
        assert_eq!(
            space.set_of_subset(f_a.subset),
            space.set_of_subset(f_b.subset)
        );
    }

}
