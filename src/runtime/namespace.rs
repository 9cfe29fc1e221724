//! Versioned name-to-value mappings
//!
//! Module globals, builtins, class attributes and module attributes all live
//! in a [`Namespace`]. Each binding owns a stable slot index, and the keys
//! version changes whenever the set of keys changes (insertion of a new key
//! or removal). Rebinding an existing key keeps both the slot and the
//! version, so a guard on the version plus a cached slot stays valid across
//! value updates.

use super::value::Value;
use super::KEYS_VERSIONS;
use rustc_hash::FxHashMap as HashMap;
use std::fmt;
use std::rc::Rc;

struct Slot {
    key: Rc<str>,
    /// `None` once the key has been removed
    value: Option<Value>,
}

pub struct Namespace {
    slots: Vec<Slot>,
    index: HashMap<Rc<str>, usize>,
    keys_version: u32,
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::default(),
            keys_version: KEYS_VERSIONS.next(),
        }
    }

    /// Current keys version; 0 means the namespace cannot be guarded
    #[inline]
    pub fn keys_version(&self) -> u32 {
        self.keys_version
    }

    fn bump_version(&mut self) {
        self.keys_version = KEYS_VERSIONS.next();
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index_of(name).and_then(|index| self.value_at(index))
    }

    /// Slot index of a live key
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Value in a slot, bounds-checked; `None` for removed or unknown slots
    #[inline]
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(|slot| slot.value.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Bind a name. Only a new key changes the keys version.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(&index) = self.index.get(name) {
            self.slots[index].value = Some(value);
            return;
        }
        let key: Rc<str> = Rc::from(name);
        self.index.insert(Rc::clone(&key), self.slots.len());
        self.slots.push(Slot {
            key,
            value: Some(value),
        });
        self.bump_version();
    }

    /// Unbind a name. Its slot is never reused.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.index.remove(name)?;
        self.bump_version();
        self.slots[index].value.take()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Live bindings in slot order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.value.as_ref().map(|value| (&*slot.key, value)))
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_key_changes_version() {
        let mut ns = Namespace::new();
        let v0 = ns.keys_version();
        assert_ne!(v0, 0);
        ns.set("a", Value::Int(1));
        let v1 = ns.keys_version();
        assert_ne!(v0, v1);
        ns.set("a", Value::Int(2));
        assert_eq!(ns.keys_version(), v1);
        assert_eq!(ns.get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_slots_are_stable() {
        let mut ns = Namespace::new();
        ns.set("a", Value::Int(1));
        ns.set("b", Value::Int(2));
        let b = ns.index_of("b").unwrap();
        ns.remove("a");
        assert_eq!(ns.index_of("b"), Some(b));
        assert_eq!(ns.value_at(b), Some(&Value::Int(2)));
        assert_eq!(ns.value_at(0), None);
        assert_eq!(ns.value_at(99), None);
    }

    #[test]
    fn test_remove_and_readd() {
        let mut ns = Namespace::new();
        ns.set("a", Value::Int(1));
        let old_index = ns.index_of("a").unwrap();
        let before = ns.keys_version();
        assert_eq!(ns.remove("a"), Some(Value::Int(1)));
        assert_ne!(ns.keys_version(), before);
        assert!(ns.remove("a").is_none());
        assert!(ns.is_empty());

        ns.set("a", Value::Int(3));
        assert_ne!(ns.index_of("a"), Some(old_index));
        assert_eq!(ns.len(), 1);
        let keys: Vec<_> = ns.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a"]);
    }

    #[test]
    fn test_distinct_namespaces_have_distinct_versions() {
        assert_ne!(Namespace::new().keys_version(), Namespace::new().keys_version());
    }
}
