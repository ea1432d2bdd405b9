//! Disjoint half-open interval map with last-write-wins carving.

use std::collections::BTreeMap;

/// Maps keys to values through disjoint `[lower, upper)` ranges.
///
/// A later `add` takes precedence over every earlier binding it overlaps:
/// those bindings are clipped to the parts that lie outside the new range.
#[derive(Debug, Clone)]
pub struct IntervalCategorizer<K, V> {
    // lower bound -> (upper bound, value)
    bindings: BTreeMap<K, (K, V)>,
    default: Option<V>,
}

impl<K: Ord + Copy, V: Clone> IntervalCategorizer<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: BTreeMap::new(),
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(default: V) -> Self {
        Self {
            bindings: BTreeMap::new(),
            default: Some(default),
        }
    }

    pub fn set_default(&mut self, default: V) {
        self.default = Some(default);
    }

    /// Bind `[lower, upper)` to `value`. Empty ranges are ignored.
    pub fn add(&mut self, lower: K, upper: K, value: V) -> &mut Self {
        if lower >= upper {
            return self;
        }
        let overlapping: Vec<K> = self
            .bindings
            .range(..upper)
            .filter(|(_, (u, _))| *u > lower)
            .map(|(l, _)| *l)
            .collect();
        for l in overlapping {
            let Some((u, v)) = self.bindings.remove(&l) else {
                continue;
            };
            if l < lower {
                self.bindings.insert(l, (lower, v.clone()));
            }
            if u > upper {
                self.bindings.insert(upper, (u, v));
            }
        }
        self.bindings.insert(lower, (upper, value));
        self
    }

    /// The value bound to the range containing `key`, else the default.
    #[must_use]
    pub fn get(&self, key: K) -> Option<&V> {
        match self.bindings.range(..=key).next_back() {
            Some((_, (upper, value))) if key < *upper => Some(value),
            _ => self.default.as_ref(),
        }
    }

    /// True when some explicit binding covers `key`.
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.bindings
            .range(..=key)
            .next_back()
            .is_some_and(|(_, (upper, _))| key < *upper)
    }

    /// Bindings in ascending order as `(lower, upper, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (K, K, &V)> {
        self.bindings.iter().map(|(l, (u, v))| (*l, *u, v))
    }
}

impl<K: Ord + Copy, V: Clone> Default for IntervalCategorizer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
