//! Story flags set by choice effects.

use crate::story::Effects;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flag name to boolean mapping for one playthrough.
///
/// Absent flags read as `false`. A store is never edited in place by the
/// engine; taking a choice produces a new store via [`FlagStore::with_effects`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagStore {
    flags: BTreeMap<String, bool>,
}

impl FlagStore {
    /// Create an empty flag store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a flag.
    pub fn get(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Whether the flag has ever been assigned.
    pub fn contains(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// A copy of this store with the effect assignments written over it.
    pub fn with_effects(&self, effects: &Effects) -> Self {
        let mut flags = self.flags.clone();
        for (name, value) in &effects.set {
            flags.insert(name.clone(), *value);
        }
        Self { flags }
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for FlagStore {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_flag_is_false() {
        let flags = FlagStore::new();
        assert!(!flags.get("met_fox"));
        assert!(!flags.contains("met_fox"));
    }

    #[test]
    fn test_with_effects_overwrites_only_named_keys() {
        let flags: FlagStore = [("lantern", true), ("key", false)].into_iter().collect();
        let effects = Effects {
            set: [("key".to_string(), true), ("map".to_string(), false)].into(),
        };

        let next = flags.with_effects(&effects);

        assert!(next.get("lantern"));
        assert!(next.get("key"));
        assert!(next.contains("map"));
        assert!(!next.get("map"));
        // Original untouched
        assert!(!flags.get("key"));
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn test_serde_roundtrip_shape() {
        let flags: FlagStore = [("a", true)].into_iter().collect();
        let json = serde_json::to_value(&flags).unwrap();
        assert_eq!(json["flags"]["a"], true);
    }
}
