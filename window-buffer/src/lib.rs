// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Bounded, time-ordered retention of windowed data sets with overlap queries.

use std::collections::BTreeMap;

use core_types::{Timestamp, TpSet, TriggerCandidate};
use parking_lot::RwLock;

/// Anything covering the closed interval `[start_time, end_time]`.
pub trait Windowed {
    fn start_time(&self) -> Timestamp;
    fn end_time(&self) -> Timestamp;

    fn overlaps(&self, window_start: Timestamp, window_end: Timestamp) -> bool {
        self.start_time() <= window_end && self.end_time() >= window_start
    }
}

impl Windowed for TpSet {
    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Timestamp {
        self.end_time
    }
}

impl Windowed for TriggerCandidate {
    fn start_time(&self) -> Timestamp {
        self.time_start
    }

    fn end_time(&self) -> Timestamp {
        self.time_end
    }
}

/// Entries keyed by `(start_time, insertion sequence)` so equal start times keep a stable order.
type EntryKey = (Timestamp, u64);

/// Keeps at most `capacity` entries, evicting the smallest `start_time` first.
///
/// Safe to share between a producer calling [`add`](Self::add) and readers calling
/// [`get_in_window`](Self::get_in_window).
pub struct WindowedBuffer<T> {
    capacity: usize,
    inner: RwLock<BufferInner<T>>,
}

struct BufferInner<T> {
    entries: BTreeMap<EntryKey, T>,
    next_seq: u64,
}

impl<T: Windowed + Clone> WindowedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(BufferInner {
                entries: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts `entry`, evicting oldest entries past capacity. Returns false when the entry
    /// itself was evicted.
    pub fn add(&self, entry: T) -> bool {
        let mut inner = self.inner.write();
        let key = (entry.start_time(), inner.next_seq);
        inner.next_seq += 1;
        inner.entries.insert(key, entry);
        let mut retained = true;
        while inner.entries.len() > self.capacity {
            if let Some((evicted, _)) = inner.entries.pop_first() {
                retained &= evicted != key;
            }
        }
        retained
    }

    /// Retained entries overlapping `[window_start, window_end]`, ascending by `start_time`.
    pub fn get_in_window(&self, window_start: Timestamp, window_end: Timestamp) -> Vec<T> {
        let inner = self.inner.read();
        inner
            .entries
            .range(..=(window_end, u64::MAX))
            .map(|(_, entry)| entry)
            .filter(|entry| entry.end_time() >= window_start)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }
}
