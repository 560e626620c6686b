use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::actor::{Actor, ActorContext, Event};
use crate::heap::HeapNode;

/// One arena slot. The slot itself is shared memory (any thread may hold an
/// `ActorId` pointing at it); everything mutable is split in two:
///
/// - `generation` and `sched_id` are atomics, readable anywhere;
/// - `info` is owned by the scheduler named by `sched_id` and must only be
///   touched on that scheduler's thread.
///
/// Liveness follows the object-pool publication order: destruction bumps the
/// generation, then a release fence, then the data is cleared. A reader that
/// observed matching generations after an acquire fence is looking at data
/// that was not yet cleared when the check ran.
pub(crate) struct Entry {
    generation: AtomicU64,
    sched_id: AtomicI32,
    heap_pos: AtomicI32,
    info: UnsafeCell<ActorInfo>,
}

// Safety: `info` is only accessed by the scheduler thread that currently
// owns the slot (guarded by `sched_id`, with migration hand-off doing a
// release store that the inbox transfer message synchronizes with).
unsafe impl Send for Entry {}
unsafe impl Sync for Entry {}

impl Entry {
    pub fn new(sched_id: i32, name: String, actor: Box<dyn Actor>) -> Arc<Entry> {
        Arc::new(Entry {
            generation: AtomicU64::new(1),
            sched_id: AtomicI32::new(sched_id),
            heap_pos: AtomicI32::new(-1),
            info: UnsafeCell::new(ActorInfo {
                name,
                actor: Some(actor),
                mailbox: VecDeque::new(),
                context: None,
                in_ready: false,
                running: false,
                migrating: false,
                migrate_dest: -1,
                timeout_at: 0.0,
            }),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Check pattern: use the slot, then verify it was still alive.
    pub fn is_alive(&self, generation: u64) -> bool {
        fence(Ordering::Acquire);
        self.generation.load(Ordering::Relaxed) == generation
    }

    pub fn sched_id(&self) -> i32 {
        self.sched_id.load(Ordering::Acquire)
    }

    /// Hand the slot to another scheduler. Must be the last `info` touch on
    /// the old thread.
    pub fn store_sched_id(&self, sched_id: i32) {
        self.sched_id.store(sched_id, Ordering::Release);
    }

    /// Invalidate every outstanding weak reference.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Safety: caller must be on the scheduler thread named by `sched_id`,
    /// and must not let two returned borrows overlap.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn info(&self) -> &mut ActorInfo {
        &mut *self.info.get()
    }
}

impl HeapNode for Arc<Entry> {
    fn heap_pos(&self) -> i32 {
        self.heap_pos.load(Ordering::Relaxed)
    }

    fn set_heap_pos(&self, pos: i32) {
        self.heap_pos.store(pos, Ordering::Relaxed)
    }
}

/// Scheduler-private state of a live actor.
pub(crate) struct ActorInfo {
    pub name: String,
    /// Taken out of the slot for the duration of an event handler.
    pub actor: Option<Box<dyn Actor>>,
    pub mailbox: VecDeque<Event>,
    pub context: Option<Arc<dyn ActorContext>>,
    pub in_ready: bool,
    pub running: bool,
    /// Set between an event handler asking for migration and the owning
    /// scheduler finalizing the hand-off at the event boundary.
    pub migrating: bool,
    pub migrate_dest: i32,
    /// Pending timeout on the monotonic clock; 0 = none. Survives migration
    /// (the heap node does not).
    pub timeout_at: f64,
}
