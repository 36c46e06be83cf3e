//! Conflict resolution: collapse a sibling set into one value.
//!
//! A resolver is a pure reduction. It never touches storage and never sees
//! causal history; it only gets the concurrent versions that a fetch found.

use crate::value::SiblingSet;
use siblingkv_common::Location;
use siblingkv_config::ResolverKind;
use std::collections::BTreeSet;

/// A resolver declined to merge a sibling set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unresolved conflict at {location}: {siblings} siblings ({reason})")]
pub struct UnresolvedConflict {
    pub location: Location,
    pub siblings: usize,
    pub reason: String,
}

impl UnresolvedConflict {
    pub fn new<T>(set: &SiblingSet<T>, reason: impl Into<String>) -> Self {
        Self {
            location: set.location().clone(),
            siblings: set.len(),
            reason: reason.into(),
        }
    }
}

pub trait ConflictResolver<T>: Send + Sync {
    /// Reduce `siblings` to a single value. A one-member set must resolve to
    /// that member.
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict>;
}

impl<T, F> ConflictResolver<T> for F
where
    F: Fn(SiblingSet<T>) -> Result<T, UnresolvedConflict> + Send + Sync,
{
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict> {
        self(siblings)
    }
}

fn only_member<T>(siblings: SiblingSet<T>) -> Result<T, SiblingSet<T>> {
    if siblings.is_conflict() {
        return Err(siblings);
    }
    // Non-empty by construction.
    match siblings.into_iter().next() {
        Some(sibling) => Ok(sibling.value),
        None => unreachable!("sibling sets are never empty"),
    }
}

/// No implicit merge: more than one sibling is always an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manual;

impl<T> ConflictResolver<T> for Manual {
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict> {
        only_member(siblings)
            .map_err(|set| UnresolvedConflict::new(&set, "manual resolution required"))
    }
}

/// Keep the newest sibling by `(last_modified_ms, vtag)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl<T> ConflictResolver<T> for LastWriterWins {
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict> {
        let newest = siblings
            .into_iter()
            .max_by(|a, b| {
                (a.last_modified_ms, &a.vtag).cmp(&(b.last_modified_ms, &b.vtag))
            });
        match newest {
            Some(sibling) => Ok(sibling.value),
            None => unreachable!("sibling sets are never empty"),
        }
    }
}

/// A value that is an owner identity plus a set of members.
pub trait SetLike: Sized {
    type Item: Ord + Clone;

    /// Identity field (for example a cart's owner). `None` when unset.
    fn identity(&self) -> Option<&str>;

    fn members(&self) -> Box<dyn Iterator<Item = &Self::Item> + '_>;

    /// Build a value from a merged identity and member set.
    ///
    /// Members arrive in `Ord` order. Sibling order carries no meaning, so
    /// a type that keeps insertion order gets its members back sorted after
    /// a merge; equality as a set is unaffected.
    fn assemble(identity: Option<String>, members: BTreeSet<Self::Item>) -> Self;
}

impl<I: Ord + Clone> SetLike for BTreeSet<I> {
    type Item = I;

    fn identity(&self) -> Option<&str> {
        None
    }

    fn members(&self) -> Box<dyn Iterator<Item = &I> + '_> {
        Box::new(self.iter())
    }

    fn assemble(_identity: Option<String>, members: BTreeSet<I>) -> Self {
        members
    }
}

/// Set union across siblings.
///
/// Removals are not tracked, so an item deleted on one side and kept or
/// re-added on another comes back.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionMerge;

impl<T: SetLike> ConflictResolver<T> for UnionMerge {
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict> {
        let siblings = match only_member(siblings) {
            Ok(value) => return Ok(value),
            Err(set) => set,
        };

        let mut identity: Option<&str> = None;
        for value in siblings.values() {
            match (identity, value.identity()) {
                (None, Some(id)) => identity = Some(id),
                (Some(seen), Some(id)) if seen != id => {
                    let (a, b) = if seen < id { (seen, id) } else { (id, seen) };
                    tracing::warn!(
                        "identity disagreement at {}: {:?} vs {:?}",
                        siblings.location(),
                        a,
                        b
                    );
                    siblingkv_metrics::metrics().identity_disagreements.inc();
                    return Err(UnresolvedConflict::new(
                        &siblings,
                        format!("siblings disagree on identity: {a:?} vs {b:?}"),
                    ));
                }
                _ => {}
            }
        }

        let members: BTreeSet<T::Item> = siblings
            .values()
            .flat_map(|value| value.members().cloned())
            .collect();
        Ok(T::assemble(identity.map(str::to_owned), members))
    }
}

/// Resolver chosen by configuration. Works for any value type; `Union`
/// only merges through [`SetStrategy`], and refuses siblings otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolverStrategy {
    #[default]
    Manual,
    LastWriterWins,
    Union,
}

impl From<ResolverKind> for ResolverStrategy {
    fn from(kind: ResolverKind) -> Self {
        match kind {
            ResolverKind::Manual => Self::Manual,
            ResolverKind::LastWriterWins => Self::LastWriterWins,
            ResolverKind::Union => Self::Union,
        }
    }
}

impl<T> ConflictResolver<T> for ResolverStrategy {
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict> {
        match self {
            Self::Manual => Manual.resolve(siblings),
            Self::LastWriterWins => LastWriterWins.resolve(siblings),
            Self::Union => only_member(siblings).map_err(|set| {
                UnresolvedConflict::new(&set, "union merge needs a set-like value")
            }),
        }
    }
}

/// A configured [`ResolverStrategy`] for set-like values, where `Union`
/// runs [`UnionMerge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetStrategy(pub ResolverStrategy);

impl From<ResolverStrategy> for SetStrategy {
    fn from(strategy: ResolverStrategy) -> Self {
        Self(strategy)
    }
}

impl From<ResolverKind> for SetStrategy {
    fn from(kind: ResolverKind) -> Self {
        Self(kind.into())
    }
}

impl<T: SetLike> ConflictResolver<T> for SetStrategy {
    fn resolve(&self, siblings: SiblingSet<T>) -> Result<T, UnresolvedConflict> {
        match self.0 {
            ResolverStrategy::Union => UnionMerge.resolve(siblings),
            other => other.resolve(siblings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{CausalContext, Sibling};

    #[derive(Debug, Clone, PartialEq)]
    struct Cart {
        owner: Option<String>,
        items: BTreeSet<String>,
    }

    impl Cart {
        fn new(owner: &str, items: &[&str]) -> Self {
            Self {
                owner: Some(owner.to_string()),
                items: items.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl SetLike for Cart {
        type Item = String;

        fn identity(&self) -> Option<&str> {
            self.owner.as_deref()
        }

        fn members(&self) -> Box<dyn Iterator<Item = &String> + '_> {
            Box::new(self.items.iter())
        }

        fn assemble(identity: Option<String>, members: BTreeSet<String>) -> Self {
            Self {
                owner: identity,
                items: members,
            }
        }
    }

    fn set<T>(values: Vec<T>) -> SiblingSet<T> {
        let members = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Sibling::new(v, i as u64, format!("t{i}")))
            .collect();
        SiblingSet::new(Location::new("carts", "ann"), CausalContext::empty(), members).unwrap()
    }

    #[test]
    fn test_singleton_resolves_to_itself() {
        let cart = Cart::new("ann", &["apple"]);
        assert_eq!(UnionMerge.resolve(set(vec![cart.clone()])).unwrap(), cart);
        assert_eq!(Manual.resolve(set(vec![cart.clone()])).unwrap(), cart);
        assert_eq!(LastWriterWins.resolve(set(vec![cart.clone()])).unwrap(), cart);
    }

    #[test]
    fn test_union_is_idempotent() {
        let cart = Cart::new("ann", &["apple", "pear"]);
        let merged = UnionMerge.resolve(set(vec![cart.clone(), cart.clone()])).unwrap();
        assert_eq!(merged, cart);
    }

    #[test]
    fn test_union_is_commutative() {
        let a = Cart::new("ann", &["apple"]);
        let b = Cart::new("ann", &["pear", "plum"]);
        let ab = UnionMerge.resolve(set(vec![a.clone(), b.clone()])).unwrap();
        let ba = UnionMerge.resolve(set(vec![b, a])).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab, Cart::new("ann", &["apple", "pear", "plum"]));
    }

    #[test]
    fn test_union_is_associative() {
        let a = Cart::new("ann", &["apple"]);
        let b = Cart::new("ann", &["pear"]);
        let c = Cart::new("ann", &["apple", "fig"]);

        let flat = UnionMerge.resolve(set(vec![a.clone(), b.clone(), c.clone()])).unwrap();
        let ab = UnionMerge.resolve(set(vec![a, b])).unwrap();
        let nested = UnionMerge.resolve(set(vec![ab, c])).unwrap();
        assert_eq!(flat, nested);
    }

    #[test]
    fn test_concurrent_delete_is_undone_by_add() {
        // One side removed "pear", the other added "fig" on top of it.
        let removed = Cart::new("ann", &["apple"]);
        let added = Cart::new("ann", &["apple", "pear", "fig"]);
        let merged = UnionMerge.resolve(set(vec![removed, added])).unwrap();
        assert!(merged.items.contains("pear"));
        assert!(merged.items.contains("fig"));
    }

    #[test]
    fn test_union_takes_identity_from_carrier() {
        let anonymous = Cart {
            owner: None,
            items: ["apple".to_string()].into_iter().collect(),
        };
        let owned = Cart::new("ann", &["pear"]);
        let merged = UnionMerge.resolve(set(vec![anonymous, owned])).unwrap();
        assert_eq!(merged.owner.as_deref(), Some("ann"));
        assert_eq!(merged.items.len(), 2);
    }

    #[test]
    fn test_identity_disagreement_is_unresolved() {
        let before = siblingkv_metrics::metrics().identity_disagreements.get();
        let err = UnionMerge
            .resolve(set(vec![Cart::new("bob", &["a"]), Cart::new("ann", &["b"])]))
            .unwrap_err();
        assert_eq!(err.siblings, 2);
        assert!(err.reason.contains("\"ann\" vs \"bob\""));
        assert!(siblingkv_metrics::metrics().identity_disagreements.get() > before);
    }

    #[test]
    fn test_manual_refuses_siblings() {
        let err = Manual.resolve(set(vec!["a", "b"])).unwrap_err();
        assert_eq!(err.location, Location::new("carts", "ann"));
        assert_eq!(err.siblings, 2);
    }

    #[test]
    fn test_last_writer_wins_ignores_order() {
        let members = vec![
            Sibling::new("old", 10, "z"),
            Sibling::new("new", 20, "a"),
            Sibling::new("tie-low", 20, "0"),
        ];
        let mut reversed = members.clone();
        reversed.reverse();
        let loc = Location::new("b", "k");
        let fwd = SiblingSet::new(loc.clone(), CausalContext::empty(), members).unwrap();
        let rev = SiblingSet::new(loc, CausalContext::empty(), reversed).unwrap();
        assert_eq!(LastWriterWins.resolve(fwd).unwrap(), "new");
        assert_eq!(LastWriterWins.resolve(rev).unwrap(), "new");
    }

    #[test]
    fn test_btreeset_union_and_strategy() {
        let a: BTreeSet<u32> = [1, 2].into_iter().collect();
        let b: BTreeSet<u32> = [2, 3].into_iter().collect();
        let union = SetStrategy::from(ResolverKind::Union);
        let merged = union.resolve(set(vec![a.clone(), b.clone()])).unwrap();
        assert_eq!(merged, BTreeSet::from([1, 2, 3]));
        assert!(SetStrategy::default().resolve(set(vec![a, b])).is_err());
        assert_eq!(union, SetStrategy(ResolverStrategy::Union));
    }

    #[test]
    fn test_strategy_for_plain_values() {
        let values = || set(vec!["older".to_string(), "newer".to_string()]);
        let lww = ResolverStrategy::from(ResolverKind::LastWriterWins);
        assert_eq!(lww.resolve(values()).unwrap(), "newer");
        assert!(ResolverStrategy::Manual.resolve(values()).is_err());

        let err = ResolverStrategy::Union.resolve(values()).unwrap_err();
        assert_eq!(err.reason, "union merge needs a set-like value");
        let single = set(vec!["only".to_string()]);
        assert_eq!(ResolverStrategy::Union.resolve(single).unwrap(), "only");
    }

    #[test]
    fn test_closure_resolver() {
        let longest = |s: SiblingSet<String>| -> Result<String, UnresolvedConflict> {
            Ok(s.into_iter().map(|x| x.value).max_by_key(|v| v.len()).unwrap_or_default())
        };
        let merged = longest
            .resolve(set(vec!["ab".to_string(), "abcd".to_string(), "a".to_string()]))
            .unwrap();
        assert_eq!(merged, "abcd");
    }
}
