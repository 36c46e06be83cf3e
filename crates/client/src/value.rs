//! Decoded versions, sibling sets and fetch results.

use siblingkv_common::Location;

/// Causal context returned by a read and echoed by a later write so the
/// engine can tell a descendant from a concurrent write. Opaque to the
/// client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CausalContext(Vec<u8>);

impl CausalContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One decoded version of a key.
///
/// Equality looks only at `value`: two siblings holding the same decoded
/// data are equal even if their tags or timestamps differ.
#[derive(Debug, Clone)]
pub struct Sibling<T> {
    pub value: T,
    pub last_modified_ms: u64,
    pub vtag: String,
}

impl<T> Sibling<T> {
    pub fn new(value: T, last_modified_ms: u64, vtag: impl Into<String>) -> Self {
        Self {
            value,
            last_modified_ms,
            vtag: vtag.into(),
        }
    }
}

impl<T: PartialEq> PartialEq for Sibling<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// All current versions of one key. Never empty.
///
/// Members keep the order the engine returned them in, for debugging only;
/// nothing may depend on it.
#[derive(Debug, Clone)]
pub struct SiblingSet<T> {
    location: Location,
    context: CausalContext,
    members: Vec<Sibling<T>>,
}

impl<T> SiblingSet<T> {
    /// Group versions of `location`. Zero versions means the key is absent,
    /// so no set is built.
    pub fn new(
        location: Location,
        context: CausalContext,
        members: Vec<Sibling<T>>,
    ) -> Option<Self> {
        if members.is_empty() {
            return None;
        }
        Some(Self {
            location,
            context,
            members,
        })
    }

    pub fn single(location: Location, context: CausalContext, member: Sibling<T>) -> Self {
        Self {
            location,
            context,
            members: vec![member],
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn context(&self) -> &CausalContext {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// More than one concurrent version.
    pub fn is_conflict(&self) -> bool {
        self.members.len() > 1
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sibling<T>> {
        self.members.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.members.iter().map(|s| &s.value)
    }

    /// Split into the location, the context and the members.
    pub fn into_parts(self) -> (Location, CausalContext, Vec<Sibling<T>>) {
        (self.location, self.context, self.members)
    }
}

impl<T> IntoIterator for SiblingSet<T> {
    type Item = Sibling<T>;
    type IntoIter = std::vec::IntoIter<Sibling<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

/// What a fetch (or a store with `return_body`) hands back.
#[derive(Debug, Clone)]
pub enum Fetched<T> {
    /// Exactly one logical value: the only version, or the resolver's merge.
    Value { value: T, context: CausalContext },
    /// Unresolved siblings, surfaced because the caller asked for them.
    Siblings(SiblingSet<T>),
}

impl<T> Fetched<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value { value, .. } => Some(value),
            Self::Siblings(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value { value, .. } => Some(value),
            Self::Siblings(_) => None,
        }
    }

    pub fn siblings(&self) -> Option<&SiblingSet<T>> {
        match self {
            Self::Siblings(set) => Some(set),
            Self::Value { .. } => None,
        }
    }

    /// Context to pass to a write that should supersede what was read.
    pub fn context(&self) -> &CausalContext {
        match self {
            Self::Value { context, .. } => context,
            Self::Siblings(set) => set.context(),
        }
    }
}
