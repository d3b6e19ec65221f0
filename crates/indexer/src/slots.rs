use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Lifecycle of a work item inside its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Queued,
    Hashing,
    Chunking,
    Vectorizing,
    Persisting,
    Complete,
    Failed,
}

impl SlotStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Hashing => "hashing",
            Self::Chunking => "chunking",
            Self::Vectorizing => "vectorizing",
            Self::Persisting => "persisting",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Point-in-time view of one occupied slot.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub label: String,
    pub size_bytes: u64,
    pub status: SlotStatus,
    pub detail: Option<String>,
    pub acquired_at: Instant,
}

struct SlotsInner {
    slots: Vec<Option<SlotInfo>>,
    free: Vec<usize>,
}

/// Fixed-slot concurrent progress structure. Worker threads acquire a
/// slot, mutate its status as the item advances, and release it; the
/// display reads copy-on-read snapshots and never blocks writers.
///
/// The slot count must equal the worker count exactly so the display shows
/// one line per concurrent item, no more.
pub struct SlotTracker {
    inner: Mutex<SlotsInner>,
    available: Condvar,
    max_slots: usize,
}

impl SlotTracker {
    #[must_use]
    pub fn new(max_slots: usize) -> Self {
        let max_slots = max_slots.max(1);
        Self {
            inner: Mutex::new(SlotsInner {
                slots: (0..max_slots).map(|_| None).collect(),
                free: (0..max_slots).rev().collect(),
            }),
            available: Condvar::new(),
            max_slots,
        }
    }

    #[must_use]
    pub const fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Block until a slot frees up, then claim it for `label`.
    pub fn acquire(&self, label: impl Into<String>, size_bytes: u64) -> usize {
        let label = label.into();
        let mut inner = self.inner.lock().expect("slot tracker poisoned");
        loop {
            if let Some(slot) = inner.free.pop() {
                inner.slots[slot] = Some(SlotInfo {
                    label,
                    size_bytes,
                    status: SlotStatus::Queued,
                    detail: None,
                    acquired_at: Instant::now(),
                });
                return slot;
            }
            inner = self.available.wait(inner).expect("slot tracker poisoned");
        }
    }

    /// Claim a slot without blocking; `None` when all slots are busy.
    pub fn try_acquire(&self, label: impl Into<String>, size_bytes: u64) -> Option<usize> {
        let mut inner = self.inner.lock().expect("slot tracker poisoned");
        let slot = inner.free.pop()?;
        inner.slots[slot] = Some(SlotInfo {
            label: label.into(),
            size_bytes,
            status: SlotStatus::Queued,
            detail: None,
            acquired_at: Instant::now(),
        });
        Some(slot)
    }

    pub fn update_status(&self, slot: usize, status: SlotStatus, detail: Option<String>) {
        let mut inner = self.inner.lock().expect("slot tracker poisoned");
        if let Some(info) = inner.slots.get_mut(slot).and_then(Option::as_mut) {
            info.status = status;
            if detail.is_some() {
                info.detail = detail;
            }
        }
    }

    /// Return the slot to the free pool.
    pub fn release(&self, slot: usize) {
        let mut inner = self.inner.lock().expect("slot tracker poisoned");
        if slot < self.max_slots && inner.slots[slot].is_some() {
            inner.slots[slot] = None;
            inner.free.push(slot);
            self.available.notify_one();
        }
    }

    /// Copy-on-read view for the display; one entry per slot, `None` for
    /// free cells.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Option<SlotInfo>> {
        self.inner.lock().expect("slot tracker poisoned").slots.clone()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .expect("slot tracker poisoned")
            .slots
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn slot_count_equals_configured_workers() {
        let tracker = SlotTracker::new(4);
        assert_eq!(tracker.max_slots(), 4);
        assert_eq!(tracker.snapshot().len(), 4);
    }

    #[test]
    fn acquire_release_cycle() {
        let tracker = SlotTracker::new(2);
        let a = tracker.acquire("a.rs", 100);
        let b = tracker.acquire("b.rs", 200);
        assert_ne!(a, b);
        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.try_acquire("c.rs", 10).is_none());

        tracker.release(a);
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.try_acquire("c.rs", 10).is_some());
    }

    #[test]
    fn no_two_claims_of_the_same_cell() {
        let tracker = SlotTracker::new(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            assert!(seen.insert(tracker.acquire("x", 0)));
        }
    }

    #[test]
    fn status_updates_show_in_snapshot() {
        let tracker = SlotTracker::new(1);
        let slot = tracker.acquire("a.rs", 42);
        tracker.update_status(slot, SlotStatus::Vectorizing, Some("batch 2".to_string()));

        let snapshot = tracker.snapshot();
        let info = snapshot[slot].as_ref().unwrap();
        assert_eq!(info.status, SlotStatus::Vectorizing);
        assert_eq!(info.detail.as_deref(), Some("batch 2"));
        assert_eq!(info.label, "a.rs");
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let tracker = Arc::new(SlotTracker::new(1));
        let slot = tracker.acquire("first", 0);

        let tracker_for_thread = Arc::clone(&tracker);
        let handle = std::thread::spawn(move || tracker_for_thread.acquire("second", 0));

        std::thread::sleep(std::time::Duration::from_millis(50));
        tracker.release(slot);
        let reused = handle.join().unwrap();
        assert_eq!(reused, slot);
    }

    #[test]
    fn concurrent_workers_never_share_a_slot() {
        let tracker = Arc::new(SlotTracker::new(4));
        let mut handles = Vec::new();
        for worker in 0..16 {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let slot = tracker.acquire(format!("w{worker}-{i}"), 0);
                    tracker.update_status(slot, SlotStatus::Complete, None);
                    tracker.release(slot);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.active_count(), 0);
    }
}
