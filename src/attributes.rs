use crate::error::{invalid_argument, SessionResult};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Attribute values are shared handles so that dirtiness can be judged by identity.
pub type AttributeValue = Arc<Value>;

/// Decides whether overwriting `old` with `new` counts as a change.
///
/// Only consulted when a previous value exists; writing a fresh key is always a change.
pub trait DirtyPredicate: Send + Sync + fmt::Debug {
    fn is_dirty(&self, old: &AttributeValue, new: &AttributeValue) -> bool;
}

/// Default predicate: a write is dirty unless it stores the very same handle again.
///
/// Structurally equal values behind distinct handles are dirty. Callers that rebuild
/// values on every request and want equality semantics should use
/// [`EqualityDirtyPredicate`].
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityDirtyPredicate;

impl DirtyPredicate for IdentityDirtyPredicate {
    fn is_dirty(&self, old: &AttributeValue, new: &AttributeValue) -> bool {
        !Arc::ptr_eq(old, new)
    }
}

/// Compares values structurally.
#[derive(Clone, Copy, Debug, Default)]
pub struct EqualityDirtyPredicate;

impl DirtyPredicate for EqualityDirtyPredicate {
    fn is_dirty(&self, old: &AttributeValue, new: &AttributeValue) -> bool {
        old != new
    }
}

/// Every write is a change, even re-storing the same handle.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysDirtyPredicate;

impl DirtyPredicate for AlwaysDirtyPredicate {
    fn is_dirty(&self, _old: &AttributeValue, _new: &AttributeValue) -> bool {
        true
    }
}

/// Attribute names written or removed since the last commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaTracker {
    dirty: bool,
    changed: BTreeSet<String>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, name: &str) {
        self.dirty = true;
        if !self.changed.contains(name) {
            self.changed.insert(name.to_owned());
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn changed_keys(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn clear(&mut self) {
        self.dirty = false;
        self.changed.clear();
    }
}

/// Session attributes keyed by name, iterated in name order.
#[derive(Clone)]
pub struct AttributeMap {
    entries: BTreeMap<String, AttributeValue>,
    tracker: DeltaTracker,
    predicate: Arc<dyn DirtyPredicate>,
}

impl Default for AttributeMap {
    fn default() -> Self {
        Self::with_predicate(Arc::new(IdentityDirtyPredicate))
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeMap")
            .field("entries", &self.entries)
            .field("changed", &self.tracker.changed)
            .finish()
    }
}

impl PartialEq for AttributeMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicate(predicate: Arc<dyn DirtyPredicate>) -> Self {
        Self {
            entries: BTreeMap::new(),
            tracker: DeltaTracker::new(),
            predicate,
        }
    }

    pub fn predicate(&self) -> &Arc<dyn DirtyPredicate> {
        &self.predicate
    }

    pub(crate) fn set_predicate(&mut self, predicate: Arc<dyn DirtyPredicate>) {
        self.predicate = predicate;
    }

    /// Stores `value` under `name` and returns the previous value.
    ///
    /// A JSON `null` removes the attribute.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> SessionResult<Option<AttributeValue>> {
        validate_name(name)?;
        let value = value.into();
        if value.is_null() {
            return Ok(self.remove_entry(name));
        }
        let previous = self.entries.insert(name.to_owned(), Arc::clone(&value));
        let dirty = match &previous {
            Some(old) => self.predicate.is_dirty(old, &value),
            None => true,
        };
        if dirty {
            self.tracker.mark(name);
        }
        Ok(previous)
    }

    pub fn remove(&mut self, name: &str) -> SessionResult<Option<AttributeValue>> {
        validate_name(name)?;
        Ok(self.remove_entry(name))
    }

    fn remove_entry(&mut self, name: &str) -> Option<AttributeValue> {
        let removed = self.entries.remove(name);
        if removed.is_some() {
            self.tracker.mark(name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> + '_ {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_delta(&self) -> bool {
        self.tracker.is_dirty()
    }

    pub fn changed_names(&self) -> &BTreeSet<String> {
        self.tracker.changed_keys()
    }

    pub fn tracker(&self) -> &DeltaTracker {
        &self.tracker
    }

    /// Changed names paired with their current value; `None` marks a removal.
    pub fn delta_entries(&self) -> impl Iterator<Item = (&str, Option<&AttributeValue>)> + '_ {
        self.tracker
            .changed_keys()
            .iter()
            .map(|name| (name.as_str(), self.entries.get(name)))
    }

    pub fn commit(&mut self) {
        self.tracker.clear();
    }

    /// Writes without recording a change; used when rebuilding state from a payload.
    pub(crate) fn load(&mut self, name: String, value: AttributeValue) {
        self.entries.insert(name, value);
    }

    pub(crate) fn unload(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

fn validate_name(name: &str) -> SessionResult<()> {
    if name.trim().is_empty() {
        return Err(invalid_argument("attribute name must not be empty"));
    }
    Ok(())
}
