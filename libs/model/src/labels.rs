//! Label maps: label key to the multiset of values recorded for it.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Occurrence count of each value under one label key.
pub type ValueCounter = BTreeMap<String, u32>;

/// Labels carried by a node, a pod or a set of scheduled instances.
///
/// The same key may be recorded with several values (one per instance that
/// contributed it), so each key maps to a counter rather than a single value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(BTreeMap<String, ValueCounter>);

impl LabelMap {
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parse `key:value` strings. A label without `:` records an empty value.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut map = Self::new();
        for label in labels {
            let (key, value) = match label.as_ref().split_once(':') {
                Some((key, value)) => (key, value),
                None => (label.as_ref(), ""),
            };
            map.insert(key, value);
        }
        map
    }

    /// Record one occurrence of `value` under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        *self
            .0
            .entry(key.into())
            .or_default()
            .entry(value.into())
            .or_insert(0) += 1;
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn values(&self, key: &str) -> Option<&ValueCounter> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ValueCounter)> {
        self.0.iter()
    }

    /// Remove the occurrences recorded in `other`. Values whose count drops
    /// to zero disappear, and so do keys left without values.
    pub fn subtract(&mut self, other: &LabelMap) {
        for (key, counter) in &other.0 {
            let Some(mine) = self.0.get_mut(key) else {
                continue;
            };
            for (value, count) in counter {
                if let Some(current) = mine.get_mut(value) {
                    *current = current.saturating_sub(*count);
                    if *current == 0 {
                        mine.remove(value);
                    }
                }
            }
            if mine.is_empty() {
                self.0.remove(key);
            }
        }
    }
}

impl AddAssign<&LabelMap> for LabelMap {
    fn add_assign(&mut self, rhs: &LabelMap) {
        for (key, counter) in &rhs.0 {
            let mine = self.0.entry(key.clone()).or_default();
            for (value, count) in counter {
                *mine.entry(value.clone()).or_insert(0) += count;
            }
        }
    }
}

impl Add<&LabelMap> for &LabelMap {
    type Output = LabelMap;

    fn add(self, rhs: &LabelMap) -> LabelMap {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_labels_splits_on_first_colon() {
        let map = LabelMap::from_labels(&["app:web", "zone:az1:rack2", "gpu"]);
        assert!(map.values("app").unwrap().contains_key("web"));
        assert!(map.values("zone").unwrap().contains_key("az1:rack2"));
        assert!(map.values("gpu").unwrap().contains_key(""));
    }

    #[test]
    fn test_merge_counts_values() {
        let a = LabelMap::new().with("app", "web");
        let b = LabelMap::new().with("app", "web").with("app", "db");
        let merged = &a + &b;
        let values = merged.values("app").unwrap();
        assert_eq!(values.get("web"), Some(&2));
        assert_eq!(values.get("db"), Some(&1));
    }

    #[test]
    fn test_subtract_removes_drained_keys() {
        let mut map = LabelMap::new().with("app", "web").with("tier", "front");
        map.subtract(&LabelMap::new().with("app", "web"));
        assert!(!map.contains_key("app"));
        assert!(map.contains_key("tier"));
    }
}
