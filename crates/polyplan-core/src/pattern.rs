//! # Rule Operand Patterns
//!
//! A rule's pattern is an operand tree. The root operand matches a node
//! kind (optionally narrowed by a predicate); each child operand matches
//! against the members of the corresponding input subset. Children may be
//! positional, unordered, or left entirely open with [`OperandChildren::Any`].
//!
//! Matching happens when a node is interned: every successful binding of a
//! pattern over the new node (or over a parent that the new node completes)
//! becomes a pending rule call. A binding records the matched nodes of the
//! concrete operands in pre-order; open child positions are reached through
//! the bound parent's input handles instead.

use crate::algebra::{AlgKind, AlgNode, NodeId};
use crate::space::Space;

/// Predicate narrowing an operand beyond its kind.
pub type OperandPredicate = fn(&AlgNode) -> bool;

/// Child-matching policy of an operand.
#[derive(Clone)]
pub enum OperandChildren {
    /// One pattern per input, in position order.
    Positional(Vec<Operand>),
    /// Each pattern must match a distinct input, in any order.
    Unordered(Vec<Operand>),
    /// Inputs are not inspected.
    Any,
}

/// One node of a pattern tree.
#[derive(Clone)]
pub struct Operand {
    pub kind: Option<AlgKind>,
    pub predicate: Option<OperandPredicate>,
    pub children: OperandChildren,
}

impl Operand {
    /// Match any node, without looking at inputs.
    pub fn any() -> Self {
        Self { kind: None, predicate: None, children: OperandChildren::Any }
    }

    /// Match a kind, without looking at inputs.
    pub fn of(kind: AlgKind) -> Self {
        Self { kind: Some(kind), predicate: None, children: OperandChildren::Any }
    }

    /// Match a kind with positional child patterns.
    pub fn with_inputs(kind: AlgKind, children: Vec<Operand>) -> Self {
        Self { kind: Some(kind), predicate: None, children: OperandChildren::Positional(children) }
    }

    /// Match a kind with unordered child patterns.
    pub fn with_unordered_inputs(kind: AlgKind, children: Vec<Operand>) -> Self {
        Self { kind: Some(kind), predicate: None, children: OperandChildren::Unordered(children) }
    }

    pub fn filtered(mut self, predicate: OperandPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn matches_node(&self, node: &AlgNode) -> bool {
        self.kind.map(|k| node.op.kind() == k).unwrap_or(true)
            && self.predicate.map(|p| p(node)).unwrap_or(true)
    }

    /// Depth of this pattern tree; bounds how far up the ancestor chain an
    /// intern must re-trigger matching.
    pub fn depth(&self) -> usize {
        let child_depth = match &self.children {
            OperandChildren::Any => 0,
            OperandChildren::Positional(cs) | OperandChildren::Unordered(cs) => {
                cs.iter().map(Operand::depth).max().unwrap_or(0)
            }
        };
        1 + child_depth
    }
}

/// All bindings of `operand` rooted at `node_id`. Each binding lists the
/// matched nodes of the concrete operands in pre-order.
pub fn match_operand(space: &Space, node_id: NodeId, operand: &Operand) -> Vec<Vec<NodeId>> {
    let node = space.node(node_id);
    if !operand.matches_node(node) {
        return Vec::new();
    }
    let child_bindings = match &operand.children {
        OperandChildren::Any => vec![Vec::new()],
        OperandChildren::Positional(patterns) => {
            if node.inputs.len() != patterns.len() {
                return Vec::new();
            }
            let per_child: Vec<Vec<Vec<NodeId>>> = node
                .inputs
                .iter()
                .zip(patterns.iter())
                .map(|(&subset, pattern)| match_subset(space, subset, pattern))
                .collect();
            cartesian(&per_child)
        }
        OperandChildren::Unordered(patterns) => {
            if node.inputs.len() < patterns.len() {
                return Vec::new();
            }
            let mut out = Vec::new();
            let mut used = vec![false; node.inputs.len()];
            permute(space, node, patterns, 0, &mut used, &mut Vec::new(), &mut out);
            out
        }
    };
    child_bindings
        .into_iter()
        .map(|mut rest| {
            let mut binding = vec![node_id];
            binding.append(&mut rest);
            binding
        })
        .collect()
}

/// Bindings of a pattern against any member of a subset.
fn match_subset(space: &Space, subset: crate::algebra::SubsetId, pattern: &Operand) -> Vec<Vec<NodeId>> {
    if matches!(pattern.children, OperandChildren::Any)
        && pattern.kind.is_none()
        && pattern.predicate.is_none()
    {
        // A fully open operand binds nothing; the rule reaches the input
        // through the parent's subset handle.
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for &member in space.subset_members(subset) {
        out.extend(match_operand(space, member, pattern));
    }
    out
}

fn permute(
    space: &Space,
    node: &AlgNode,
    patterns: &[Operand],
    index: usize,
    used: &mut Vec<bool>,
    acc: &mut Vec<Vec<NodeId>>,
    out: &mut Vec<Vec<NodeId>>,
) {
    if index == patterns.len() {
        out.push(acc.iter().flatten().copied().collect());
        return;
    }
    for (i, &subset) in node.inputs.iter().enumerate() {
        if used[i] {
            continue;
        }
        for binding in match_subset(space, subset, &patterns[index]) {
            used[i] = true;
            acc.push(binding);
            permute(space, node, patterns, index + 1, used, acc, out);
            acc.pop();
            used[i] = false;
        }
    }
}

fn cartesian(per_child: &[Vec<Vec<NodeId>>]) -> Vec<Vec<NodeId>> {
    let mut out: Vec<Vec<NodeId>> = vec![Vec::new()];
    for child in per_child {
        if child.is_empty() {
            return Vec::new();
        }
        let mut next = Vec::with_capacity(out.len() * child.len());
        for prefix in &out {
            for binding in child {
                let mut combined = prefix.clone();
                combined.extend_from_slice(binding);
                next.push(combined);
            }
        }
        out = next;
    }
    out
}
