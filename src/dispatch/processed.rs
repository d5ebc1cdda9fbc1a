// src/dispatch/processed.rs
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_CAPACITY: usize = 10_000;

/// In-memory record of mention ids already handled by this process.
/// Oldest ids are evicted past capacity. Not persisted: a restart forgets everything.
#[derive(Debug, Clone)]
pub struct ProcessedSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl Default for ProcessedSet {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ProcessedSet {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap,
        }
    }

    /// Returns false if `id` was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_reports_duplicate() {
        let mut s = ProcessedSet::default();
        assert!(s.insert("at://a"));
        assert!(!s.insert("at://a"));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut s = ProcessedSet::with_capacity(2);
        s.insert("1");
        s.insert("2");
        s.insert("3");
        assert!(!s.contains("1"));
        assert!(s.contains("2") && s.contains("3"));
    }
}
