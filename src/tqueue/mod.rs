//! Keyed event queues with monotone ids, expiry and at-least-once fan-out.
//! Every queue keeps a FIFO of short-lived events; many independent
//! consumers read the same queue, each advancing its own cursor and
//! forgetting what it has confirmed. Durability is delegated to a storage
//! callback, usually backed by the binlog.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use log::warn;
use rand::rngs::OsRng;
use rand::Rng;
use thiserror::Error;

use crate::binlog::{Binlog, BinlogError, BinlogEvent};
use crate::wire::{Reader, Writer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TQueueError {
    #[error("invalid event id")]
    InvalidEventId,
}

/// Position in a queue's id space `[0, 2·10^9)`; zero means "no event".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(i32);

impl EventId {
    pub const MAX_ID: i32 = 2_000_000_000;

    pub fn from_i32(id: i32) -> Result<EventId, TQueueError> {
        if !(0..EventId::MAX_ID).contains(&id) {
            return Err(TQueueError::InvalidEventId);
        }
        Ok(EventId(id))
    }

    /// A fresh random tail for a previously empty queue.
    pub(crate) fn create_random() -> EventId {
        EventId(OsRng.gen_range(10..EventId::MAX_ID / 2 + 10))
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn next(&self) -> Result<EventId, TQueueError> {
        EventId::from_i32(self.0 + 1)
    }

    pub fn advance(&self, offset: usize) -> Result<EventId, TQueueError> {
        let id = i64::from(self.0) + offset as i64;
        if id > i64::from(i32::MAX) {
            return Err(TQueueError::InvalidEventId);
        }
        EventId::from_i32(id as i32)
    }
}

pub type QueueId = i64;

/// An event as stored: payload plus its durable log record id.
#[derive(Clone, Debug, Default)]
pub struct RawEvent {
    pub log_event_id: u64,
    pub event_id: EventId,
    /// Unix seconds.
    pub expires_at: i32,
    pub data: Vec<u8>,
    pub extra: i64,
}

/// An event as handed to a consumer.
#[derive(Clone, Debug, Default)]
pub struct Event {
    pub id: EventId,
    pub expires_at: i32,
    pub data: Vec<u8>,
    pub extra: i64,
}

/// Durable mirror of the queues. `push` must persist and return the log
/// record id; `pop` erases one record.
pub trait StorageCallback {
    fn push(&mut self, queue_id: QueueId, event: &RawEvent) -> u64;
    fn pop(&mut self, log_event_id: u64);
    fn pop_batch(&mut self, log_event_ids: Vec<u64>) {
        for log_event_id in log_event_ids {
            self.pop(log_event_id);
        }
    }
    fn close(&mut self);
}

#[derive(Default)]
struct Queue {
    /// The id the next push will take; strictly greater than every stored
    /// event's id.
    tail_id: EventId,
    events: VecDeque<RawEvent>,
}

/// Pops per `run_gc` call before it reports `completed = false`.
const GC_BUDGET: i64 = 1000;

#[derive(Default)]
pub struct TQueue {
    queues: IndexMap<QueueId, Queue>,
    callback: Option<Box<dyn StorageCallback>>,
}

impl TQueue {
    pub fn new() -> TQueue {
        TQueue::default()
    }

    pub fn set_callback(&mut self, callback: Box<dyn StorageCallback>) {
        self.callback = Some(callback);
    }

    pub fn extract_callback(&mut self) -> Option<Box<dyn StorageCallback>> {
        self.callback.take()
    }

    /// Low-level append used by replay and by `push`. The event must carry
    /// a valid id; with `log_event_id == 0` it is persisted first. Returns
    /// false when the event cannot extend the queue.
    pub fn do_push(&mut self, queue_id: QueueId, mut raw_event: RawEvent) -> bool {
        debug_assert!(!raw_event.event_id.is_empty());
        let next_tail = match raw_event.event_id.next() {
            Ok(next) => next,
            Err(_) => {
                warn!("dropping event with id at the end of the id space");
                return false;
            }
        };
        let queue = self.queues.entry(queue_id).or_default();
        if let Some(back) = queue.events.back() {
            if raw_event.event_id <= back.event_id {
                warn!(
                    "dropping out-of-order event {} for queue {}",
                    raw_event.event_id.value(),
                    queue_id
                );
                return false;
            }
        }
        if raw_event.log_event_id == 0 {
            if let Some(callback) = &mut self.callback {
                raw_event.log_event_id = callback.push(queue_id, &raw_event);
            }
        }
        queue.tail_id = next_tail;
        queue.events.push_back(raw_event);
        true
    }

    /// Append an event; assigns and returns its id. An empty queue starts
    /// at `hint_new_id` when given, at a random id otherwise. When the id
    /// space is about to wrap, the oldest events are discarded and the
    /// queue restarts from a fresh random tail.
    pub fn push(
        &mut self,
        queue_id: QueueId,
        data: Vec<u8>,
        expires_at: i32,
        extra: i64,
        hint_new_id: EventId,
    ) -> Result<EventId, TQueueError> {
        let event_id = {
            let callback = &mut self.callback;
            let queue = self.queues.entry(queue_id).or_default();
            loop {
                if queue.events.is_empty() {
                    queue.tail_id = if hint_new_id.is_empty() {
                        EventId::create_random()
                    } else {
                        hint_new_id
                    };
                }
                let event_id = queue.tail_id;
                debug_assert!(!event_id.is_empty());
                if event_id.next().is_ok() {
                    break event_id;
                }
                // the id space is exhausted: silently advance past all
                // stored events, which empties the queue
                let mut popped = Vec::new();
                pop_while(queue, &mut popped, |event| event.event_id < event_id);
                notify_pops(callback, popped);
            }
        };

        let raw_event = RawEvent {
            log_event_id: 0,
            event_id,
            expires_at,
            data,
            extra,
        };
        self.do_push(queue_id, raw_event);
        Ok(event_id)
    }

    /// Read up to `out.len()` live events starting at `from_id`. With
    /// `forget_previous`, events below `from_id` are confirmed and popped
    /// first; either way, expired events found during the scan are popped
    /// in place.
    pub fn get(
        &mut self,
        queue_id: QueueId,
        from_id: EventId,
        forget_previous: bool,
        now: i32,
        out: &mut [Event],
    ) -> Result<usize, TQueueError> {
        let callback = &mut self.callback;
        let Some(queue) = self.queues.get_mut(&queue_id) else {
            return Ok(0);
        };

        if forget_previous {
            let mut popped = Vec::new();
            pop_while(queue, &mut popped, |event| event.event_id < from_id);
            notify_pops(callback, popped);
        }
        if out.is_empty() {
            return Ok(0);
        }

        let mut popped = Vec::new();
        let mut index = 0;
        let mut count = 0;
        while index < queue.events.len() && count < out.len() {
            let event = &queue.events[index];
            if event.expires_at < now {
                if event.log_event_id != 0 {
                    popped.push(event.log_event_id);
                }
                queue.events.remove(index);
                continue;
            }
            if event.event_id < from_id {
                index += 1;
                continue;
            }
            out[count] = Event {
                id: event.event_id,
                expires_at: event.expires_at,
                data: event.data.clone(),
                extra: event.extra,
            };
            count += 1;
            index += 1;
        }
        notify_pops(callback, popped);
        Ok(count)
    }

    /// Confirm a single event; no-op when it is not stored.
    pub fn forget(&mut self, queue_id: QueueId, event_id: EventId) {
        let callback = &mut self.callback;
        let Some(queue) = self.queues.get_mut(&queue_id) else {
            return;
        };
        if let Ok(index) = queue
            .events
            .binary_search_by_key(&event_id, |event| event.event_id)
        {
            let event = match queue.events.remove(index) {
                Some(event) => event,
                None => return,
            };
            if event.log_event_id != 0 {
                notify_pops(callback, vec![event.log_event_id]);
            }
        }
    }

    /// Drop all but the newest `keep_count` events; returns what was
    /// dropped.
    pub fn clear(&mut self, queue_id: QueueId, keep_count: usize) -> Vec<RawEvent> {
        let callback = &mut self.callback;
        let Some(queue) = self.queues.get_mut(&queue_id) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        while queue.events.len() > keep_count {
            if let Some(event) = queue.events.pop_front() {
                removed.push(event);
            }
        }
        let popped = removed
            .iter()
            .filter(|event| event.log_event_id != 0)
            .map(|event| event.log_event_id)
            .collect::<Vec<_>>();
        notify_pops(callback, popped);
        removed
    }

    /// Oldest stored id, or empty.
    pub fn get_head(&self, queue_id: QueueId) -> EventId {
        self.queues
            .get(&queue_id)
            .and_then(|queue| queue.events.front())
            .map(|event| event.event_id)
            .unwrap_or_default()
    }

    /// The id the next push will take, or empty for an empty queue.
    pub fn get_tail(&self, queue_id: QueueId) -> EventId {
        self.queues
            .get(&queue_id)
            .filter(|queue| !queue.events.is_empty())
            .map(|queue| queue.tail_id)
            .unwrap_or_default()
    }

    pub fn get_size(&self, queue_id: QueueId) -> usize {
        self.queues
            .get(&queue_id)
            .map(|queue| queue.events.len())
            .unwrap_or(0)
    }

    pub fn total_event_count(&self) -> usize {
        self.queues.values().map(|queue| queue.events.len()).sum()
    }

    /// Pop expired events across all queues, up to a budget. Returns the
    /// number popped and whether the sweep finished.
    pub fn run_gc(&mut self, now: i32) -> (i64, bool) {
        let callback = &mut self.callback;
        let mut popped = Vec::new();
        let mut count: i64 = 0;
        let mut completed = true;

        'queues: for queue in self.queues.values_mut() {
            let mut index = 0;
            while index < queue.events.len() {
                if count >= GC_BUDGET {
                    completed = false;
                    break 'queues;
                }
                if queue.events[index].expires_at < now {
                    if let Some(event) = queue.events.remove(index) {
                        if event.log_event_id != 0 {
                            popped.push(event.log_event_id);
                        }
                        count += 1;
                    }
                } else {
                    index += 1;
                }
            }
        }

        notify_pops(callback, popped);
        (count, completed)
    }

    /// Flush the storage and run `done`.
    pub fn close(&mut self, done: impl FnOnce()) {
        if let Some(mut callback) = self.callback.take() {
            callback.close();
        }
        done();
    }
}

fn pop_while(queue: &mut Queue, popped: &mut Vec<u64>, keep_popping: impl Fn(&RawEvent) -> bool) {
    while let Some(front) = queue.events.front() {
        if !keep_popping(front) {
            break;
        }
        if let Some(event) = queue.events.pop_front() {
            if event.log_event_id != 0 {
                popped.push(event.log_event_id);
            }
        }
    }
}

fn notify_pops(callback: &mut Option<Box<dyn StorageCallback>>, popped: Vec<u64>) {
    if popped.is_empty() {
        return;
    }
    if let Some(callback) = callback {
        callback.pop_batch(popped);
    }
}

/* ---- storage implementations ---- */

/// Keeps the durable mirror in memory; for processes that replay it into a
/// fresh `TQueue` after restart. Share it with the queue through
/// `Rc<RefCell<_>>`.
#[derive(Default)]
pub struct TQueueMemoryStorage {
    next_log_event_id: u64,
    events: BTreeMap<u64, (QueueId, RawEvent)>,
}

impl TQueueMemoryStorage {
    pub fn new() -> TQueueMemoryStorage {
        TQueueMemoryStorage {
            next_log_event_id: 1,
            events: BTreeMap::new(),
        }
    }

    /// Re-push everything into `tqueue`, in log order.
    pub fn replay(&self, tqueue: &mut TQueue) {
        for (&log_event_id, (queue_id, event)) in &self.events {
            let mut event = event.clone();
            event.log_event_id = log_event_id;
            tqueue.do_push(*queue_id, event);
        }
    }
}

impl StorageCallback for Rc<RefCell<TQueueMemoryStorage>> {
    fn push(&mut self, queue_id: QueueId, event: &RawEvent) -> u64 {
        let mut storage = self.borrow_mut();
        let log_event_id = storage.next_log_event_id;
        storage.next_log_event_id += 1;
        storage.events.insert(log_event_id, (queue_id, event.clone()));
        log_event_id
    }

    fn pop(&mut self, log_event_id: u64) {
        self.borrow_mut().events.remove(&log_event_id);
    }

    fn close(&mut self) {}
}

/// Binlog record type of queue events.
pub const TQUEUE_EVENT_TYPE: i32 = 2314;

/// Durable mirror through the binlog: every push appends a record, every
/// pop rewrites it away.
pub struct TQueueBinlogStorage {
    binlog: Rc<RefCell<Binlog>>,
}

impl TQueueBinlogStorage {
    pub fn new(binlog: Rc<RefCell<Binlog>>) -> TQueueBinlogStorage {
        TQueueBinlogStorage { binlog }
    }

    /// Parse one replayed binlog record into `tqueue`; feed this from the
    /// replay callback of [`Binlog::open`].
    pub fn replay(event: &BinlogEvent, tqueue: &mut TQueue) -> Result<(), BinlogError> {
        let corrupt =
            |what: &str| BinlogError::Corruption(format!("tqueue record: {}", what));

        let mut reader = Reader::new(event.data());
        let queue_id = reader.read_i64().map_err(|_| corrupt("missing queue id"))?;
        let event_id = reader.read_i32().map_err(|_| corrupt("missing event id"))?;
        let expires_at = reader.read_i32().map_err(|_| corrupt("missing expiry"))?;
        let extra = reader.read_i64().map_err(|_| corrupt("missing extra"))?;
        let data = reader.read_bytes().map_err(|_| corrupt("missing data"))?;

        let event_id = EventId::from_i32(event_id).map_err(|_| corrupt("bad event id"))?;
        tqueue.do_push(
            queue_id,
            RawEvent {
                log_event_id: event.id,
                event_id,
                expires_at,
                data: data.to_vec(),
                extra,
            },
        );
        Ok(())
    }
}

impl StorageCallback for TQueueBinlogStorage {
    fn push(&mut self, queue_id: QueueId, event: &RawEvent) -> u64 {
        let mut writer = Writer::new();
        writer.write_i64(queue_id);
        writer.write_i32(event.event_id.value());
        writer.write_i32(event.expires_at);
        writer.write_i64(event.extra);
        writer.write_bytes(&event.data);
        self.binlog
            .borrow_mut()
            .add(TQUEUE_EVENT_TYPE, &writer.into_inner())
    }

    fn pop(&mut self, log_event_id: u64) {
        self.binlog.borrow_mut().erase(log_event_id);
    }

    fn close(&mut self) {
        if let Err(err) = self.binlog.borrow_mut().sync() {
            log::error!("failed to sync tqueue binlog: {}", err);
        }
    }
}
