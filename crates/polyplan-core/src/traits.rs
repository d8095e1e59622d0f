//! # Physical Traits
//!
//! A trait is a physical property of a node: the convention by which it
//! exchanges rows, the collation of its output, or its distribution across
//! workers. Each registered [`TraitDef`] owns one slot of the fixed-length
//! [`TraitSet`] every node carries.
//!
//! Conventions distinguish logical from physical nodes: [`Convention::NONE`]
//! marks a node that cannot be executed and satisfies no requirement except
//! itself. When a required manifestation is not delivered natively, the
//! governing def synthesizes a conversion (a converter node between
//! conventions, a sort for collation, an exchange for distribution), which
//! then participates in the search like any other node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A calling convention: the protocol by which an operator's rows are
/// consumed. Conventions are static singletons registered by adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Convention(pub &'static str);

impl Convention {
    /// The convention of purely logical nodes; unimplementable.
    pub const NONE: Convention = Convention("NONE");

    pub fn is_none(&self) -> bool {
        *self == Convention::NONE
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sort key of a collation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollationKey {
    pub index: usize,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl CollationKey {
    pub fn asc(index: usize) -> Self {
        Self { index, ascending: true, nulls_first: false }
    }
}

/// Output ordering. An empty key list means "no ordering promised".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collation {
    pub keys: Vec<CollationKey>,
}

impl Collation {
    pub fn of(keys: Vec<CollationKey>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `self` satisfies `required` when the required keys are a prefix of
    /// the delivered keys.
    pub fn satisfies(&self, required: &Collation) -> bool {
        required.keys.len() <= self.keys.len()
            && required
                .keys
                .iter()
                .zip(self.keys.iter())
                .all(|(r, p)| r == p)
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, k) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}{}", k.index, if k.ascending { "" } else { " DESC" })?;
        }
        write!(f, "]")
    }
}

/// How rows are spread across workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distribution {
    /// No promise.
    Any,
    /// All rows on a single worker.
    Single,
    /// Every row on every worker.
    Broadcast,
    /// Hash-partitioned on the given column indices.
    Hash(Vec<usize>),
    /// Load-balanced without data locality.
    RoundRobin,
}

impl Distribution {
    pub fn satisfies(&self, required: &Distribution) -> bool {
        matches!(required, Distribution::Any) || self == required
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Any => write!(f, "any"),
            Distribution::Single => write!(f, "single"),
            Distribution::Broadcast => write!(f, "broadcast"),
            Distribution::Hash(keys) => write!(f, "hash{keys:?}"),
            Distribution::RoundRobin => write!(f, "round-robin"),
        }
    }
}

/// A manifestation of one trait definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trait {
    Convention(Convention),
    Collation(Collation),
    Distribution(Distribution),
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trait::Convention(c) => write!(f, "{c}"),
            Trait::Collation(c) => write!(f, "{c}"),
            Trait::Distribution(d) => write!(f, "{d}"),
        }
    }
}

/// What a trait def synthesizes to bridge an unsatisfied requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionKind {
    /// Insert a converter node targeting the given convention.
    Convert { from: Convention, to: Convention },
    /// Insert a sort delivering the given collation.
    SortBy(Collation),
    /// Insert an exchange delivering the given distribution.
    ExchangeTo(Distribution),
}

/// A pluggable trait definition: one slot of the trait set, with its default
/// manifestation, partial order, and conversion factory.
pub trait TraitDef: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_trait(&self) -> Trait;

    /// Whether this def governs the given manifestation.
    fn governs(&self, t: &Trait) -> bool;

    /// Whether holding `actual` satisfies a requirement of `required`.
    fn satisfies(&self, actual: &Trait, required: &Trait) -> bool;

    /// A conversion from `actual` to `required`, or `None` when no
    /// conversion exists.
    fn conversion(&self, actual: &Trait, required: &Trait) -> Option<ConversionKind>;
}

/// Convention slot. Conversion routes between concrete conventions are
/// registered by adapters during planner configuration.
#[derive(Default)]
pub struct ConventionDef {
    routes: Vec<(Convention, Convention)>,
    registered: Vec<ConventionInfo>,
}

/// Metadata an adapter declares for its convention.
#[derive(Debug, Clone)]
pub struct ConventionInfo {
    pub convention: Convention,
    /// Whether a downstream interpreter (rather than generated code)
    /// consumes this convention's operators.
    pub interpretable: bool,
}

impl ConventionDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_convention(&mut self, info: ConventionInfo) {
        self.registered.push(info);
    }

    pub fn register_route(&mut self, from: Convention, to: Convention) {
        if !self.routes.contains(&(from, to)) {
            self.routes.push((from, to));
        }
    }

    pub fn conventions(&self) -> &[ConventionInfo] {
        &self.registered
    }
}

impl TraitDef for ConventionDef {
    fn name(&self) -> &'static str {
        "convention"
    }

    fn default_trait(&self) -> Trait {
        Trait::Convention(Convention::NONE)
    }

    fn governs(&self, t: &Trait) -> bool {
        matches!(t, Trait::Convention(_))
    }

    fn satisfies(&self, actual: &Trait, required: &Trait) -> bool {
        match (actual, required) {
            // NONE satisfies only NONE; concrete conventions must match.
            (Trait::Convention(a), Trait::Convention(r)) => a == r,
            _ => false,
        }
    }

    fn conversion(&self, actual: &Trait, required: &Trait) -> Option<ConversionKind> {
        let (Trait::Convention(from), Trait::Convention(to)) = (actual, required) else {
            return None;
        };
        if from.is_none() || to.is_none() {
            return None;
        }
        self.routes
            .contains(&(*from, *to))
            .then(|| ConversionKind::Convert { from: *from, to: *to })
    }
}

/// Collation slot; conversion is a sort in the input's convention.
#[derive(Default)]
pub struct CollationDef;

impl TraitDef for CollationDef {
    fn name(&self) -> &'static str {
        "collation"
    }

    fn default_trait(&self) -> Trait {
        Trait::Collation(Collation::default())
    }

    fn governs(&self, t: &Trait) -> bool {
        matches!(t, Trait::Collation(_))
    }

    fn satisfies(&self, actual: &Trait, required: &Trait) -> bool {
        match (actual, required) {
            (Trait::Collation(a), Trait::Collation(r)) => a.satisfies(r),
            _ => false,
        }
    }

    fn conversion(&self, _actual: &Trait, required: &Trait) -> Option<ConversionKind> {
        match required {
            Trait::Collation(c) if !c.is_empty() => Some(ConversionKind::SortBy(c.clone())),
            _ => None,
        }
    }
}

/// Distribution slot; conversion is an exchange.
#[derive(Default)]
pub struct DistributionDef;

impl TraitDef for DistributionDef {
    fn name(&self) -> &'static str {
        "distribution"
    }

    fn default_trait(&self) -> Trait {
        Trait::Distribution(Distribution::Any)
    }

    fn governs(&self, t: &Trait) -> bool {
        matches!(t, Trait::Distribution(_))
    }

    fn satisfies(&self, actual: &Trait, required: &Trait) -> bool {
        match (actual, required) {
            (Trait::Distribution(a), Trait::Distribution(r)) => a.satisfies(r),
            _ => false,
        }
    }

    fn conversion(&self, _actual: &Trait, required: &Trait) -> Option<ConversionKind> {
        match required {
            Trait::Distribution(Distribution::Any) => None,
            Trait::Distribution(d) => Some(ConversionKind::ExchangeTo(d.clone())),
            _ => None,
        }
    }
}

/// The registered trait definitions, in slot order. Slot 0 is always the
/// convention def. Built during planner configuration; immutable while a
/// run is in flight.
pub struct TraitRegistry {
    convention: ConventionDef,
    extra: Vec<Box<dyn TraitDef>>,
}

impl TraitRegistry {
    /// The standard registry: convention, collation, distribution.
    pub fn standard() -> Self {
        Self {
            convention: ConventionDef::new(),
            extra: vec![Box::new(CollationDef), Box::new(DistributionDef)],
        }
    }

    pub fn add(&mut self, def: Box<dyn TraitDef>) {
        self.extra.push(def);
    }

    pub fn slot_count(&self) -> usize {
        1 + self.extra.len()
    }

    pub fn def(&self, slot: usize) -> &dyn TraitDef {
        if slot == 0 {
            &self.convention
        } else {
            self.extra[slot - 1].as_ref()
        }
    }

    pub fn convention_def(&self) -> &ConventionDef {
        &self.convention
    }

    pub fn convention_def_mut(&mut self) -> &mut ConventionDef {
        &mut self.convention
    }

    /// The default trait set: one default manifestation per slot.
    pub fn default_traits(&self) -> TraitSet {
        TraitSet {
            traits: (0..self.slot_count())
                .map(|slot| self.def(slot).default_trait())
                .collect(),
        }
    }

    pub fn satisfies(&self, actual: &TraitSet, required: &TraitSet) -> bool {
        (0..self.slot_count()).all(|slot| {
            let def = self.def(slot);
            match (actual.traits.get(slot), required.traits.get(slot)) {
                (Some(a), Some(r)) => def.satisfies(a, r),
                // A missing required slot is unconstrained.
                (_, None) => true,
                (None, Some(r)) => def.satisfies(&def.default_trait(), r),
            }
        })
    }
}

/// A fixed-length vector of manifestations, one per registered def.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitSet {
    traits: Vec<Trait>,
}

impl TraitSet {
    pub fn new(traits: Vec<Trait>) -> Self {
        Self { traits }
    }

    pub fn slots(&self) -> &[Trait] {
        &self.traits
    }

    pub fn convention(&self) -> Convention {
        self.traits
            .iter()
            .find_map(|t| match t {
                Trait::Convention(c) => Some(*c),
                _ => None,
            })
            .unwrap_or(Convention::NONE)
    }

    pub fn collation(&self) -> Collation {
        self.traits
            .iter()
            .find_map(|t| match t {
                Trait::Collation(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn distribution(&self) -> Distribution {
        self.traits
            .iter()
            .find_map(|t| match t {
                Trait::Distribution(d) => Some(d.clone()),
                _ => None,
            })
            .unwrap_or(Distribution::Any)
    }

    /// Replace the manifestation in the slot governing `t`.
    pub fn replace(&self, t: Trait) -> TraitSet {
        let mut traits = self.traits.clone();
        let slot = traits.iter().position(|slot| {
            matches!(
                (slot, &t),
                (Trait::Convention(_), Trait::Convention(_))
                    | (Trait::Collation(_), Trait::Collation(_))
                    | (Trait::Distribution(_), Trait::Distribution(_))
            )
        });
        match slot {
            Some(i) => traits[i] = t,
            None => traits.push(t),
        }
        TraitSet { traits }
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.traits.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{t}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_satisfies_only_none() {
        let registry = TraitRegistry::standard();
        let none = registry.default_traits();
        let enumerable = none.replace(Trait::Convention(Convention("TEST")));
        assert!(registry.satisfies(&none, &none));
        assert!(!registry.satisfies(&none, &enumerable));
        assert!(!registry.satisfies(&enumerable, &none));
        assert!(registry.satisfies(&enumerable, &enumerable));
    }

    #[test]
    fn collation_prefix_satisfaction() {
        let delivered = Collation::of(vec![CollationKey::asc(0), CollationKey::asc(1)]);
        let required = Collation::of(vec![CollationKey::asc(0)]);
        assert!(delivered.satisfies(&required));
        assert!(!required.satisfies(&delivered));
        assert!(delivered.satisfies(&Collation::default()));
    }

    #[test]
    fn conversion_routes_are_directional() {
        let mut def = ConventionDef::new();
        let a = Convention("A");
        let b = Convention("B");
        def.register_route(a, b);
        assert!(def
            .conversion(&Trait::Convention(a), &Trait::Convention(b))
            .is_some());
        assert!(def
            .conversion(&Trait::Convention(b), &Trait::Convention(a))
            .is_none());
    }
}
