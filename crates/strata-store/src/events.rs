//! Tick-stamped event bus between the store and its embedder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use strata_blocks::{MaterialId, TopFlags};
use strata_world::ChunkLoc;

/// Everything observable that happens inside the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    // time (published by the embedder, consumed by the store)
    WorldTicked { tick: u64 },
    // chunk lifecycle
    ChunkLoaded { loc: ChunkLoc, newly_generated: bool },
    // edits
    BlockChanged {
        loc: ChunkLoc,
        lx: usize,
        ly: usize,
        old: MaterialId,
        new: MaterialId,
    },
    // derived data
    ChunkColumnUpdated {
        chunk_x: i32,
        local_x: usize,
        new_height: Option<i32>,
        old_height: Option<i32>,
        flag: TopFlags,
    },
    ChunkLightChanged { loc: ChunkLoc, lx: usize, ly: usize },
}

/// An event plus the order and world tick it was published at.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub seq: u64,
    pub tick: u64,
    pub event: WorldEvent,
}

struct SubEntry {
    id: u64,
    tx: Sender<EventEnvelope>,
}

struct BusInner {
    seq: AtomicU64,
    tick: AtomicU64,
    next_sub: AtomicU64,
    subs: Mutex<Vec<SubEntry>>,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) {
        self.subs.lock().retain(|s| s.id != id);
    }
}

/// Fan-out bus: every subscriber gets its own unbounded channel. Publishing
/// never blocks; subscribers that fall behind simply buffer.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                seq: AtomicU64::new(0),
                tick: AtomicU64::new(0),
                next_sub: AtomicU64::new(0),
                subs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// World tick as of the last `WorldTicked` seen.
    pub fn tick(&self) -> u64 {
        self.inner.tick.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> (SubscriptionHandle, Receiver<EventEnvelope>) {
        let (tx, rx) = unbounded();
        let id = self.inner.next_sub.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.lock().push(SubEntry { id, tx });
        let handle = SubscriptionHandle {
            id,
            bus: Arc::downgrade(&self.inner),
        };
        (handle, rx)
    }

    /// Stamps the event and fans it out. Subscribers whose receiver hung up
    /// are pruned here. Returns the sequence number assigned.
    pub fn publish(&self, event: WorldEvent) -> u64 {
        if let WorldEvent::WorldTicked { tick } = &event {
            self.inner.tick.store(*tick, Ordering::Release);
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let env = EventEnvelope {
            seq,
            tick: self.tick(),
            event,
        };
        let mut subs = self.inner.subs.lock();
        subs.retain(|s| s.tx.send(env.clone()).is_ok());
        seq
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Detaches its receiver when dropped; `cancel` is the explicit spelling.
pub struct SubscriptionHandle {
    id: u64,
    bus: Weak<BusInner>,
}

impl SubscriptionHandle {
    pub fn cancel(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
