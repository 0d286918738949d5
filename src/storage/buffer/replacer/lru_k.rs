use std::collections::{BTreeSet, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Per-frame bookkeeping: the timestamps of the most recent `k` references
/// and whether the frame currently participates in eviction.
struct FrameRecord {
    history: VecDeque<u64>,
    evictable: bool,
}

struct ReplacerInner {
    frames: HashMap<FrameId, FrameRecord>,
    /// Evictable frames with fewer than `k` recorded references, ordered by
    /// their earliest timestamp. Classical LRU over this set.
    infant: BTreeSet<(u64, FrameId)>,
    /// Evictable frames with exactly `k` references, ordered by the k-th
    /// most recent timestamp. The front has the greatest backward
    /// k-distance.
    mature: BTreeSet<(u64, FrameId)>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K eviction policy for the buffer pool.
///
/// The victim is the evictable frame with the greatest backward k-distance,
/// i.e. the longest interval since its k-th most recent reference. Frames
/// with fewer than `k` references have infinite distance and are evicted
/// first, oldest first. Both candidate sets are ordered, so every operation
/// is logarithmic in the pool size.
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
    k: usize,
    replacer_size: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            inner: Mutex::new(ReplacerInner {
                frames: HashMap::with_capacity(num_frames),
                infant: BTreeSet::new(),
                mature: BTreeSet::new(),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            k,
            replacer_size: num_frames,
        }
    }

    /// Record a reference to `frame_id` at the current logical time. The
    /// history keeps only the `k` most recent timestamps.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {frame_id} out of range"
        );
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;

        let k = self.k;
        let record = inner.frames.entry(frame_id).or_insert(FrameRecord {
            history: VecDeque::with_capacity(k + 1),
            evictable: false,
        });

        let was_evictable = record.evictable;
        let old_key = (*record.history.front().unwrap_or(&0), frame_id);
        let was_infant = record.history.len() < k;

        record.history.push_back(now);
        if record.history.len() > k {
            record.history.pop_front();
        }
        let new_key = (*record.history.front().unwrap(), frame_id);
        let is_infant = record.history.len() < k;

        if was_evictable {
            if was_infant {
                inner.infant.remove(&old_key);
            } else {
                inner.mature.remove(&old_key);
            }
            if is_infant {
                inner.infant.insert(new_key);
            } else {
                inner.mature.insert(new_key);
            }
        }
    }

    /// Toggle a frame's participation in eviction.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {frame_id} out of range"
        );
        let mut inner = self.inner.lock();
        let k = self.k;
        let record = inner
            .frames
            .get_mut(&frame_id)
            .expect("set_evictable on a frame with no recorded access");
        if record.evictable == evictable {
            return;
        }
        record.evictable = evictable;
        let key = (*record.history.front().unwrap(), frame_id);
        let is_infant = record.history.len() < k;

        if evictable {
            inner.evictable_count += 1;
            if is_infant {
                inner.infant.insert(key);
            } else {
                inner.mature.insert(key);
            }
        } else {
            inner.evictable_count -= 1;
            if is_infant {
                inner.infant.remove(&key);
            } else {
                inner.mature.remove(&key);
            }
        }
    }

    /// Choose and remove the victim frame, clearing its history. Returns
    /// `None` when no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let key = *inner.infant.first().or_else(|| inner.mature.first())?;
        let (_, frame_id) = key;
        inner.infant.remove(&key);
        inner.mature.remove(&key);
        inner.frames.remove(&frame_id);
        inner.evictable_count -= 1;
        log::trace!("evicting frame {frame_id}");
        Some(frame_id)
    }

    /// Drop a frame from the replacer entirely, e.g. when its page is
    /// deleted. Removing a tracked non-evictable frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(record) = inner.frames.get(&frame_id) else {
            return;
        };
        assert!(
            record.evictable,
            "cannot remove non-evictable frame {frame_id}"
        );
        let key = (*record.history.front().unwrap(), frame_id);
        if record.history.len() < self.k {
            inner.infant.remove(&key);
        } else {
            inner.mature.remove(&key);
        }
        inner.frames.remove(&frame_id);
        inner.evictable_count -= 1;
    }

    /// Number of frames currently evictable.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infant_evicted_before_mature() {
        // Accesses: A@1 B@2 C@3 A@4 B@5 with k = 2. Only C has fewer than
        // two references, so C goes first; then A, whose 2nd most recent
        // reference (1) is older than B's (2).
        let replacer = LruKReplacer::new(3, 2);
        let (a, b, c) = (0, 1, 2);
        replacer.record_access(a);
        replacer.record_access(b);
        replacer.record_access(c);
        replacer.record_access(a);
        replacer.record_access(b);
        for f in [a, b, c] {
            replacer.set_evictable(f, true);
        }
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(c));
        assert_eq!(replacer.evict(), Some(a));
        assert_eq!(replacer.evict(), Some(b));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_infants_evict_in_lru_order() {
        let replacer = LruKReplacer::new(4, 3);
        for f in 0..4 {
            replacer.record_access(f);
            replacer.set_evictable(f, true);
        }
        // All have a single reference; oldest first timestamp wins.
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_non_evictable_frames_are_skipped() {
        let replacer = LruKReplacer::new(3, 2);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);
        replacer.set_evictable(0, false);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);

        // Frame 0 is still tracked and can come back.
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_history_trimmed_to_k() {
        let replacer = LruKReplacer::new(2, 2);
        // Frame 0 referenced many times; frame 1 twice but earlier.
        for _ in 0..5 {
            replacer.record_access(0);
        }
        replacer.record_access(1);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // Frame 0 retains timestamps {4, 5}, frame 1 {6, 7}. Frame 0's k-th
        // most recent reference is older, so it is the victim.
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_remove_untracked_is_noop() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.remove(1);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_remove_non_evictable_panics() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0);
        replacer.remove(0);
    }

    #[test]
    fn test_evict_returns_frame_to_untracked_state() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));

        // A fresh access starts a new history.
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);
    }
}
