use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::common::types::FrameId;
use crate::storage::buffer::error::BufferPoolError;

/// Per-frame access history: the last `k` access timestamps, oldest first,
/// plus the evictability gate.
struct LruKNode {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKNode {
    fn new(timestamp: u64) -> Self {
        let mut history = VecDeque::new();
        history.push_back(timestamp);
        Self {
            history,
            evictable: false,
        }
    }

    /// Ordering key for victim selection.
    ///
    /// Frames with fewer than k recorded accesses have infinite backward
    /// k-distance and rank ahead of any frame with full history; ties break
    /// by earliest first access. Among full-history frames the oldest k-th
    /// most recent access wins. Since the history is trimmed to k entries,
    /// the front timestamp is the comparison point in both classes.
    fn evict_key(&self, frame_id: FrameId, k: usize) -> (bool, u64, FrameId) {
        let front = *self.history.front().unwrap_or(&0);
        (self.history.len() >= k, front, frame_id)
    }
}

/// LRU-K replacement policy: evict the evictable frame with the largest
/// backward k-distance.
///
/// Not internally synchronized; the buffer pool serializes access under its
/// pool latch.
pub struct LruKReplacer {
    k: usize,
    capacity: usize,
    current_timestamp: u64,
    nodes: HashMap<FrameId, LruKNode>,
    /// Evictable frames ordered by eviction priority (first = next victim)
    evictable: BTreeSet<(bool, u64, FrameId)>,
}

impl LruKReplacer {
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k > 0");
        Self {
            k,
            capacity,
            current_timestamp: 0,
            nodes: HashMap::with_capacity(capacity),
            evictable: BTreeSet::new(),
        }
    }

    /// Record an access to a frame at the current logical timestamp.
    pub fn record_access(&mut self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        self.current_timestamp += 1;
        let timestamp = self.current_timestamp;

        match self.nodes.get_mut(&frame_id) {
            Some(node) => {
                if node.evictable {
                    self.evictable.remove(&node.evict_key(frame_id, self.k));
                }
                node.history.push_back(timestamp);
                if node.history.len() > self.k {
                    node.history.pop_front();
                }
                if node.evictable {
                    self.evictable.insert(node.evict_key(frame_id, self.k));
                }
            }
            None => {
                if self.nodes.len() == self.capacity {
                    return Err(BufferPoolError::ReplacerFull);
                }
                self.nodes.insert(frame_id, LruKNode::new(timestamp));
            }
        }
        Ok(())
    }

    /// Gate a frame in or out of victim selection. Idempotent; unknown
    /// frames are ignored.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(node) = self.nodes.get_mut(&frame_id) else {
            return;
        };
        if node.evictable == evictable {
            return;
        }
        let key = node.evict_key(frame_id, self.k);
        node.evictable = evictable;
        if evictable {
            self.evictable.insert(key);
        } else {
            self.evictable.remove(&key);
        }
    }

    /// Pop and return the highest-priority evictable frame, forgetting its
    /// history.
    pub fn evict(&mut self) -> Option<FrameId> {
        let key = *self.evictable.iter().next()?;
        self.evictable.remove(&key);
        let (_, _, frame_id) = key;
        self.nodes.remove(&frame_id);
        Some(frame_id)
    }

    /// Forcibly forget a frame. The frame must be evictable; removing a
    /// pinned frame is a contract violation.
    pub fn remove(&mut self, frame_id: FrameId) {
        let Some(node) = self.nodes.get(&frame_id) else {
            return;
        };
        assert!(
            node.evictable,
            "attempted to remove non-evictable frame {} from the replacer",
            frame_id
        );
        let key = node.evict_key(frame_id, self.k);
        self.evictable.remove(&key);
        self.nodes.remove(&frame_id);
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}
