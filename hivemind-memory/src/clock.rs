//! Vector clocks for causal ordering of memory events across nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::MemoryError;

/// Per-node monotonic counters capturing causal order across the cluster.
///
/// For any two clocks exactly one of the following holds: equal,
/// happens-before, happens-after, or concurrent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counters: HashMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance this node's counter by one.
    pub fn increment(&mut self, node_id: &str) {
        *self.counters.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Merge another clock into this one (pointwise max).
    pub fn update(&mut self, other: &VectorClock) {
        for (node, &count) in &other.counters {
            let entry = self.counters.entry(node.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    pub fn get(&self, node_id: &str) -> u64 {
        self.counters.get(node_id).copied().unwrap_or(0)
    }

    /// True when every component of `self` is <= the corresponding
    /// component of `other` and at least one is strictly smaller.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        let mut strictly_smaller = false;

        for (node, &count) in &self.counters {
            let theirs = other.get(node);
            if count > theirs {
                return false;
            }
            if count < theirs {
                strictly_smaller = true;
            }
        }

        // Nodes present only on the other side are implicit zeros here.
        for (node, &count) in &other.counters {
            if count > 0 && !self.counters.contains_key(node) {
                strictly_smaller = true;
            }
        }

        strictly_smaller
    }

    /// Neither clock happens before the other and they are not equal.
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self) && self != other
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.counters).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(raw: &str) -> Result<Self, MemoryError> {
        let counters: HashMap<String, u64> =
            serde_json::from_str(raw).map_err(|e| MemoryError::VectorClockParse {
                message: e.to_string(),
            })?;
        Ok(Self { counters })
    }
}

impl<const N: usize> From<[(&str, u64); N]> for VectorClock {
    fn from(entries: [(&str, u64); N]) -> Self {
        Self {
            counters: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}
