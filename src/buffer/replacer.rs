use crate::buffer::{AccessType, FrameId};

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};

/// Victim-selection policy over frames.
///
/// The pool records every access and toggles evictability as pins come and
/// go; the policy decides which evictable frame to give up. `evict` purges
/// the chosen frame's tracking state, `remove` purges it unconditionally
/// (only legal for evictable frames).
pub trait Replacer: Send {
    fn record_access(&mut self, frame_id: FrameId, access: AccessType);
    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool);
    fn evict(&mut self) -> Option<FrameId>;
    fn remove(&mut self, frame_id: FrameId);
    /// Number of evictable frames.
    fn size(&self) -> usize;
}

struct LruKNode {
    /// Timestamps of the last K accesses, oldest first.
    history: VecDeque<u64>,
    is_evictable: bool,
}

/// LRU-K replacement policy.
///
/// A frame with fewer than K recorded accesses is "cold" and has infinite
/// backward K-distance: cold frames are evicted before any warm frame, by
/// age of their earliest recorded access. Warm frames are evicted by the
/// timestamp of their K-th most recent access, oldest first.
pub struct LruKReplacer {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    curr_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        assert!(k >= 1);
        Self {
            node_store: HashMap::new(),
            current_timestamp: 0,
            curr_size: 0,
            k,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&mut self, frame_id: FrameId, _access: AccessType) {
        self.current_timestamp += 1;
        let node = self.node_store.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::with_capacity(self.k),
            is_evictable: false,
        });
        node.history.push_back(self.current_timestamp);
        if node.history.len() > self.k {
            node.history.pop_front();
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            debug_assert!(false, "set_evictable on untracked frame {frame_id}");
            warn!("set_evictable on untracked frame {frame_id}");
            return;
        };
        if node.is_evictable != evictable {
            node.is_evictable = evictable;
            if evictable {
                self.curr_size += 1;
            } else {
                self.curr_size -= 1;
            }
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        // (warm, earliest kept timestamp), cold frames first, oldest first
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in &self.node_store {
            if !node.is_evictable {
                continue;
            }
            let warm = node.history.len() >= self.k;
            let timestamp = node.history.front().copied().unwrap_or(0);
            let better = match victim {
                None => true,
                Some((_, best_warm, best_ts)) => {
                    (!warm && best_warm) || (warm == best_warm && timestamp < best_ts)
                }
            };
            if better {
                victim = Some((frame_id, warm, timestamp));
            }
        }

        let (frame_id, _, _) = victim?;
        self.node_store.remove(&frame_id);
        self.curr_size -= 1;
        debug!("lru-k evicts frame {frame_id}");
        Some(frame_id)
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.node_store.remove(&frame_id) {
            if node.is_evictable {
                self.curr_size -= 1;
            } else {
                debug_assert!(false, "remove of non-evictable frame {frame_id}");
                warn!("remove of non-evictable frame {frame_id}");
            }
        }
    }

    fn size(&self) -> usize {
        self.curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(replacer: &mut LruKReplacer, frame_id: FrameId) {
        replacer.record_access(frame_id, AccessType::Unknown);
    }

    #[test]
    fn cold_frames_evicted_first_by_age() {
        let mut replacer = LruKReplacer::new(2);

        // interleaved accesses: 1 and 2 become warm, 3 stays cold
        record(&mut replacer, 1);
        record(&mut replacer, 2);
        record(&mut replacer, 1);
        record(&mut replacer, 2);
        record(&mut replacer, 3);
        for frame_id in 1..=3 {
            replacer.set_evictable(frame_id, true);
        }
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(3));

        // 1 gets a fresh access: its second-most-recent access is now newer
        // than 2's, so 2 goes first
        record(&mut replacer, 1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn k_equal_one_degenerates_to_lru() {
        let mut replacer = LruKReplacer::new(1);

        for frame_id in 1..=3 {
            record(&mut replacer, frame_id);
            replacer.set_evictable(frame_id, true);
        }
        record(&mut replacer, 1);

        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn pinned_frames_are_not_victims() {
        let mut replacer = LruKReplacer::new(2);

        record(&mut replacer, 1);
        record(&mut replacer, 2);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(1));
        // 2 was never made evictable
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(2, true);
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn accesses_are_kept_while_pinned() {
        let mut replacer = LruKReplacer::new(2);

        record(&mut replacer, 1);
        record(&mut replacer, 2);
        record(&mut replacer, 2);
        // both pinned; history accumulates anyway
        record(&mut replacer, 1);

        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);

        // both warm; 1's second-most-recent access (t1) is older than 2's (t2)
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn size_tracks_evictable_toggles() {
        let mut replacer = LruKReplacer::new(2);

        record(&mut replacer, 1);
        record(&mut replacer, 2);
        assert_eq!(replacer.size(), 0);

        replacer.set_evictable(1, true);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 0);

        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        replacer.remove(1);
        assert_eq!(replacer.size(), 1);
    }
}
