use std::collections::{HashSet, VecDeque};

use crate::constants::{TIMELINE_CAPACITY, TIMELINE_RETAIN};
use crate::models::ValidatedEvent;
use crate::validation::{filter_event, FilterSettings};

/// Bounded, most-recent-first buffer of timeline records.
///
/// Records are kept in arrival order, not `created_at` order. The buffer may
/// hold up to [`TIMELINE_CAPACITY`] records; the insertion that would exceed
/// it truncates the buffer to the [`TIMELINE_RETAIN`] most recent in one step.
#[derive(Debug, Default)]
pub struct TimelineBuffer {
    events: VecDeque<ValidatedEvent>,
    ids: HashSet<String>,
}

impl TimelineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the head. Returns `false` for an id that is already buffered.
    pub fn insert(&mut self, event: ValidatedEvent) -> bool {
        if !self.ids.insert(event.id.clone()) {
            return false;
        }
        self.events.push_front(event);

        if self.events.len() > TIMELINE_CAPACITY {
            for evicted in self.events.drain(TIMELINE_RETAIN..) {
                self.ids.remove(&evicted.id);
            }
            tracing::debug!(retained = TIMELINE_RETAIN, "timeline collapsed");
        }
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &ValidatedEvent> {
        self.events.iter()
    }

    pub fn snapshot(&self) -> Vec<ValidatedEvent> {
        self.events.iter().cloned().collect()
    }

    /// Distinct authors, in order of their newest record
    pub fn authors(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.events
            .iter()
            .filter(|e| seen.insert(e.pubkey.as_str()))
            .map(|e| e.pubkey.clone())
            .collect()
    }

    /// Re-run the content filter over the buffered records and drop the ones
    /// no longer allowed. Returns how many were dropped.
    pub fn reapply(&mut self, settings: &FilterSettings) -> usize {
        let before = self.events.len();
        let ids = &mut self.ids;
        self.events.retain_mut(|event| {
            event.allowed = filter_event(event, settings);
            if !event.allowed {
                ids.remove(&event.id);
            }
            event.allowed
        });
        before - self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: usize, pubkey: &str, content: &str) -> ValidatedEvent {
        ValidatedEvent {
            id: id.to_string(),
            pubkey: pubkey.to_string(),
            kind: 1,
            created_at: id as u64,
            tags: Vec::new(),
            content: content.to_string(),
            allowed: true,
        }
    }

    #[test]
    fn test_101_inserts_keep_22_to_101_newest_first() {
        let mut buffer = TimelineBuffer::new();
        for id in 1..=101 {
            assert!(buffer.insert(event(id, "pk", "hi")));
            assert!(buffer.len() <= TIMELINE_CAPACITY);
        }

        assert_eq!(buffer.len(), TIMELINE_RETAIN);
        let ids: Vec<usize> = buffer.iter().map(|e| e.id.parse().unwrap()).collect();
        let expected: Vec<usize> = (22..=101).rev().collect();
        assert_eq!(ids, expected);
        assert!(!buffer.contains("21"));
    }

    #[test]
    fn test_grows_to_capacity_before_collapsing() {
        let mut buffer = TimelineBuffer::new();
        for id in 1..=TIMELINE_CAPACITY {
            buffer.insert(event(id, "pk", "hi"));
        }
        assert_eq!(buffer.len(), TIMELINE_CAPACITY);

        buffer.insert(event(TIMELINE_CAPACITY + 1, "pk", "hi"));
        assert_eq!(buffer.len(), TIMELINE_RETAIN);
        buffer.insert(event(TIMELINE_CAPACITY + 2, "pk", "hi"));
        assert_eq!(buffer.len(), TIMELINE_RETAIN + 1);
    }

    #[test]
    fn test_redelivered_id_is_rejected() {
        let mut buffer = TimelineBuffer::new();
        assert!(buffer.insert(event(1, "pk", "first")));
        assert!(!buffer.insert(event(1, "pk", "again")));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.snapshot()[0].content, "first");
    }

    #[test]
    fn test_evicted_id_can_return() {
        let mut buffer = TimelineBuffer::new();
        for id in 1..=101 {
            buffer.insert(event(id, "pk", "hi"));
        }
        assert!(buffer.insert(event(1, "pk", "hi")));
    }

    #[test]
    fn test_authors_are_distinct_newest_first() {
        let mut buffer = TimelineBuffer::new();
        buffer.insert(event(1, "a", "x"));
        buffer.insert(event(2, "b", "x"));
        buffer.insert(event(3, "a", "x"));
        assert_eq!(buffer.authors(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reapply_drops_newly_disallowed() {
        let mut buffer = TimelineBuffer::new();
        buffer.insert(event(1, "a", "pay lnbc100"));
        buffer.insert(event(2, "b", "plain"));

        assert_eq!(buffer.reapply(&FilterSettings::default()), 0);

        let strict = FilterSettings {
            hide_invoice: true,
            ..Default::default()
        };
        assert_eq!(buffer.reapply(&strict), 1);
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.contains("1"));

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
