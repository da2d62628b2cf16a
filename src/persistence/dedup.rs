// =============================================================================
// Recent History: Value-equality dedup for persisted records
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

fn default_capacity() -> usize {
    100_000
}

/// How much write history is kept for duplicate suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Remember every record ever written. Memory grows with the session.
    Unbounded,
    /// Remember the most recent `capacity` distinct records (FIFO eviction).
    /// A capacity of 0 disables dedup.
    Bounded {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self::Bounded {
            capacity: default_capacity(),
        }
    }
}

/// Set of already-written records under a [`DedupPolicy`].
pub struct RecentHistory<R> {
    policy: DedupPolicy,
    seen: HashSet<R>,
    order: VecDeque<R>,
}

impl<R: Clone + Eq + Hash> RecentHistory<R> {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, record: &R) -> bool {
        self.seen.contains(record)
    }

    /// Remember `record`. Returns `false` if it was already present.
    pub fn insert(&mut self, record: R) -> bool {
        match self.policy {
            DedupPolicy::Unbounded => self.seen.insert(record),
            DedupPolicy::Bounded { capacity: 0 } => true,
            DedupPolicy::Bounded { capacity } => {
                if self.seen.contains(&record) {
                    return false;
                }
                while self.order.len() >= capacity {
                    if let Some(oldest) = self.order.pop_front() {
                        self.seen.remove(&oldest);
                    }
                }
                self.order.push_back(record.clone());
                self.seen.insert(record);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_remembers_everything() {
        let mut h = RecentHistory::new(DedupPolicy::Unbounded);
        for i in 0..1_000 {
            assert!(h.insert(i));
        }
        assert!(!h.insert(0));
        assert_eq!(h.len(), 1_000);
    }

    #[test]
    fn bounded_forgets_oldest() {
        let mut h = RecentHistory::new(DedupPolicy::Bounded { capacity: 2 });
        assert!(h.insert("a"));
        assert!(h.insert("b"));
        assert!(!h.insert("a"));
        assert!(h.insert("c"));

        assert_eq!(h.len(), 2);
        assert!(!h.contains(&"a"));
        assert!(h.contains(&"b"));
        assert!(h.contains(&"c"));
    }

    #[test]
    fn zero_capacity_disables_dedup() {
        let mut h = RecentHistory::new(DedupPolicy::Bounded { capacity: 0 });
        assert!(h.insert(1));
        assert!(h.insert(1));
        assert!(!h.contains(&1));
    }

    #[test]
    fn policy_deserialises_from_tagged_json() {
        let p: DedupPolicy = serde_json::from_str(r#"{"mode":"unbounded"}"#).unwrap();
        assert_eq!(p, DedupPolicy::Unbounded);

        let p: DedupPolicy = serde_json::from_str(r#"{"mode":"bounded"}"#).unwrap();
        assert_eq!(p, DedupPolicy::Bounded { capacity: 100_000 });
    }
}
