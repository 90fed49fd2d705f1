//! Per-thread chunk lookup cache: one hot entry in front of a fixed
//! array of LRU slots keyed by packed location.

use std::sync::Arc;

use strata_chunk::Chunk;

pub const SLOT_CAPACITY: usize = 8;

struct Slot {
    key: i64,
    chunk: Arc<Chunk>,
    stamp: u64,
}

/// Not shared between threads; the store keeps one per worker in
/// thread-local storage. Hits revalidate against disposal, so a cached
/// entry can never outlive its unload observably.
pub struct SlotCache {
    last: Option<(i64, Arc<Chunk>)>,
    slots: [Option<Slot>; SLOT_CAPACITY],
    clock: u64,
}

impl SlotCache {
    pub fn new() -> Self {
        Self {
            last: None,
            slots: std::array::from_fn(|_| None),
            clock: 0,
        }
    }

    pub fn get(&mut self, key: i64) -> Option<Arc<Chunk>> {
        if let Some((k, chunk)) = &self.last {
            if *k == key {
                if chunk.is_disposed() {
                    self.last = None;
                } else {
                    return Some(chunk.clone());
                }
            }
        }
        for slot in self.slots.iter_mut() {
            let live = match slot {
                Some(entry) if entry.key == key => {
                    if entry.chunk.is_disposed() {
                        None
                    } else {
                        self.clock += 1;
                        entry.stamp = self.clock;
                        Some(entry.chunk.clone())
                    }
                }
                _ => continue,
            };
            return match live {
                Some(chunk) => {
                    self.last = Some((key, chunk.clone()));
                    Some(chunk)
                }
                None => {
                    *slot = None;
                    None
                }
            };
        }
        None
    }

    /// Installs an entry, evicting the least recently used slot when full.
    pub fn insert(&mut self, key: i64, chunk: Arc<Chunk>) {
        self.clock += 1;
        self.last = Some((key, chunk.clone()));
        let mut empty: Option<usize> = None;
        let mut oldest = (0usize, u64::MAX);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.key == key => {
                    s.chunk = chunk;
                    s.stamp = self.clock;
                    return;
                }
                Some(s) => {
                    if s.stamp < oldest.1 {
                        oldest = (i, s.stamp);
                    }
                }
                None => {
                    if empty.is_none() {
                        empty = Some(i);
                    }
                }
            }
        }
        let victim = empty.unwrap_or(oldest.0);
        self.slots[victim] = Some(Slot {
            key,
            chunk,
            stamp: self.clock,
        });
    }

    pub fn invalidate(&mut self, key: i64) {
        if self.last.as_ref().is_some_and(|(k, _)| *k == key) {
            self.last = None;
        }
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|s| s.key == key) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.last = None;
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for SlotCache {
    fn default() -> Self {
        Self::new()
    }
}
