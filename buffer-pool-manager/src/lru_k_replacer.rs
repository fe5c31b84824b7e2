//! LRU-K replacement policy over buffer pool frames.
//!
//! The replacer tracks the last K access timestamps of every frame and evicts
//! the evictable frame with the largest backward k-distance. Frames with
//! fewer than K recorded accesses have infinite k-distance and are preferred;
//! ties fall back to classic LRU on the oldest recorded access.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::api::{AccessType, FrameId};

#[derive(Debug, Default)]
struct LruKNode {
    /// Up to K most recent access timestamps, oldest first.
    history: VecDeque<u64>,
    is_evictable: bool,
}

#[derive(Debug, Default)]
struct ReplacerState {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    /// Number of evictable nodes.
    curr_size: usize,
}

/// Tracks access history for up to `num_frames` frames and selects eviction
/// victims by backward k-distance.
#[derive(Debug)]
pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "replacer k must be positive");
        Self {
            state: Mutex::new(ReplacerState::default()),
            replacer_size: num_frames,
            k,
        }
    }

    /// Evicts the evictable frame with the largest backward k-distance and
    /// erases its history. Returns `None` if nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.curr_size == 0 {
            return None;
        }

        let now = state.current_timestamp;
        let mut victim: Option<FrameId> = None;
        // Ordered comparison key: the infinite-distance class beats every
        // finite distance, then larger distances win. A frame that was never
        // accessed has the maximum possible distance.
        let mut victim_key = (false, 0u64);
        for (&frame_id, node) in &state.node_store {
            if !node.is_evictable {
                continue;
            }
            let key = match node.history.front() {
                None => (true, u64::MAX),
                Some(&oldest) if node.history.len() < self.k => (true, now - oldest),
                Some(&kth_recent) => (false, now - kth_recent),
            };
            if victim.is_none() || key > victim_key {
                victim = Some(frame_id);
                victim_key = key;
            }
        }

        let frame_id = victim?;
        state.node_store.remove(&frame_id);
        state.curr_size -= 1;
        Some(frame_id)
    }

    /// Records an access to `frame_id` at the current timestamp, creating the
    /// node (non-evictable) if it is not tracked yet. `Scan` accesses leave
    /// the history untouched.
    pub fn record_access(&self, frame_id: FrameId, access_type: AccessType) {
        let mut state = self.state.lock();
        assert!(frame_id < self.replacer_size, "invalid frame id {frame_id}");

        let k = self.k;
        let timestamp = state.current_timestamp;
        let node = state.node_store.entry(frame_id).or_default();
        if access_type == AccessType::Scan {
            return;
        }
        if node.history.len() == k {
            node.history.pop_front();
        }
        node.history.push_back(timestamp);
        state.current_timestamp += 1;
    }

    /// Toggles whether `frame_id` may be evicted, adjusting the evictable
    /// count only on a real transition.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        assert!(frame_id < self.replacer_size, "invalid frame id {frame_id}");

        let node = state.node_store.entry(frame_id).or_default();
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            state.curr_size += 1;
        } else {
            state.curr_size -= 1;
        }
    }

    /// Erases `frame_id` and its history. The frame must currently be
    /// evictable; untracked frames are ignored. Only the buffer pool's page
    /// deletion path calls this.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let Some(node) = state.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "remove called on non-evictable frame {frame_id}"
        );
        state.node_store.remove(&frame_id);
        state.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }
}
