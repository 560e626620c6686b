//! Cooperative actor scheduler. Each scheduler is pinned to one thread and
//! owns its actors outright; concurrency between actors on the same
//! scheduler happens only at event boundaries. Cross-scheduler traffic goes
//! through pollable MPSC inboxes, so a sleeping scheduler is woken through
//! its own poller.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, error, trace, warn};
use slab::Slab;

use crate::actor::arena::Entry;
use crate::actor::event::EventData;
use crate::actor::{Actor, ActorContext, ActorId, ActorOwn, ActorRef, Event};
use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token};
use crate::fd::{PollFlags, PollableFd, PollableFdInfo, PollableFdRef};
use crate::heap::{HeapNode, KHeap};
use crate::queue::Queue;
use crate::time::{self, Timestamp};

mod concurrent;

pub use concurrent::{ConcurrentScheduler, SendGuard};

/// Messages travelling between schedulers.
pub(crate) enum Inbound {
    /// A plain event for an actor that lives (or lived) on the receiver.
    Event { id: ActorId<()>, event: Event },
    /// Ownership hand-off of a migrated actor; the sender has already
    /// release-stored the receiver's id into the slot.
    Register { id: ActorId<()> },
}

const CTX_STOP: u32 = 1;
const CTX_MIGRATE: u32 = 2;

struct EventContextFrame {
    entry: Arc<Entry>,
    flags: u32,
    dest_sched_id: i32,
    link_token: u64,
}

/// Reserved poller token of the scheduler's own inbox.
const INBOX_TOKEN: Token = Token(0);

pub struct Scheduler {
    id: i32,
    epoll: Epoll,
    poll_events: RefCell<Events>,
    inbound: Queue<Inbound>,
    outbound: Vec<Queue<Inbound>>,
    ready: RefCell<VecDeque<Arc<Entry>>>,
    timeout_heap: RefCell<KHeap<Arc<Entry>>>,
    /// Events sent with immediate semantics to an actor that is currently
    /// running; flushed into its mailbox when the handler returns.
    pending_events: RefCell<IndexMap<usize, (Arc<Entry>, Vec<Event>)>>,
    event_stack: RefCell<Vec<EventContextFrame>>,
    fd_table: RefCell<Slab<Arc<PollableFdInfo>>>,
    actor_count: Cell<i32>,
    yield_flag: Cell<bool>,
    finished: Arc<AtomicBool>,
}

thread_local! {
    static SCHEDULER: Cell<*const Scheduler> = const { Cell::new(ptr::null()) };
}

/// Run `f` against the scheduler installed on this thread, if any.
pub(crate) fn try_with<R>(f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
    SCHEDULER.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            None
        } else {
            // Safety: the pointer is installed by a SchedulerGuard on this
            // thread and cleared before the scheduler can move or die.
            Some(f(unsafe { &*ptr }))
        }
    })
}

fn with<R>(what: &str, f: impl FnOnce(&Scheduler) -> R) -> R {
    match try_with(f) {
        Some(r) => r,
        None => panic!("{} requires a scheduler on the current thread", what),
    }
}

/// Installs a scheduler as the thread's current one for the guard's
/// lifetime; restores the previous one on drop.
pub struct SchedulerGuard<'a> {
    prev: *const Scheduler,
    _scheduler: &'a Scheduler,
}

impl<'a> Drop for SchedulerGuard<'a> {
    fn drop(&mut self) {
        SCHEDULER.with(|cell| cell.set(self.prev));
    }
}

impl Scheduler {
    pub(crate) fn new(
        id: i32,
        inboxes: &[Queue<Inbound>],
        finished: Arc<AtomicBool>,
    ) -> io::Result<Scheduler> {
        let epoll = Epoll::new()?;
        let inbound = inboxes[id as usize].clone();
        epoll.add(&inbound, INBOX_TOKEN, Ready::readable(), EpollOpt::level())?;

        Ok(Scheduler {
            id,
            epoll,
            poll_events: RefCell::new(Events::with_capacity(1024)),
            inbound,
            outbound: inboxes.to_vec(),
            ready: RefCell::new(VecDeque::new()),
            timeout_heap: RefCell::new(KHeap::new()),
            pending_events: RefCell::new(IndexMap::new()),
            event_stack: RefCell::new(Vec::new()),
            fd_table: RefCell::new(Slab::new()),
            actor_count: Cell::new(0),
            yield_flag: Cell::new(false),
            finished,
        })
    }

    pub fn sched_id(&self) -> i32 {
        self.id
    }

    pub fn sched_count(&self) -> usize {
        self.outbound.len()
    }

    pub fn actor_count(&self) -> i32 {
        self.actor_count.get()
    }

    pub fn guard(&self) -> SchedulerGuard {
        let prev = SCHEDULER.with(|cell| {
            let prev = cell.get();
            cell.set(self as *const Scheduler);
            prev
        });
        SchedulerGuard {
            prev,
            _scheduler: self,
        }
    }

    /// One iteration of the scheduler loop: drain the inbox, run expired
    /// timers and ready mailboxes, then sleep in the poller until `timeout`,
    /// the next timer, or a wakeup.
    pub fn run(&self, timeout: Timestamp) {
        let _guard = self.guard();
        self.run_no_guard(timeout);
    }

    pub(crate) fn run_no_guard(&self, timeout: Timestamp) {
        self.drain_inbound();
        self.run_timeouts();
        self.run_mailboxes();
        if self.yield_flag.replace(false) {
            return;
        }
        self.run_poll(timeout);
        self.drain_inbound();
        self.run_timeouts();
        self.run_mailboxes();
    }

    /// Ask the scheduler to return from `run` as soon as the current batch
    /// finishes.
    pub fn yield_scheduler(&self) {
        self.yield_flag.set(true);
    }

    /// Wake the scheduler from another thread.
    pub fn wakeup(&self) {
        let _ = self.inbound.wakeup();
    }

    /* ---- actor registration ---- */

    pub fn create_actor<T: Actor>(&self, name: &str, actor: T) -> ActorOwn<T> {
        self.register_actor(self.id, name, actor)
    }

    pub fn create_actor_on_scheduler<T: Actor>(
        &self,
        sched_id: i32,
        name: &str,
        actor: T,
    ) -> ActorOwn<T> {
        self.register_actor(sched_id, name, actor)
    }

    fn register_actor<T: Actor>(&self, sched_id: i32, name: &str, actor: T) -> ActorOwn<T> {
        assert!(
            sched_id >= 0 && (sched_id as usize) < self.outbound.len(),
            "bad scheduler id {}",
            sched_id
        );

        let entry = Entry::new(self.id, name.to_string(), Box::new(actor));
        // a child created while an event runs inherits the creator's context
        let inherited = self
            .current_frame(|frame| {
                // Safety: frame entries belong to this scheduler thread.
                unsafe { frame.entry.info() }.context.clone()
            })
            .flatten();
        if let Some(context) = inherited {
            // Safety: freshly created slot, owned here.
            unsafe { entry.info() }.context = Some(context);
        }

        self.actor_count.set(self.actor_count.get() + 1);
        let id: ActorId<T> = ActorId::new(entry.clone(), entry.generation());
        trace!("create actor \"{}\" on scheduler {}", name, sched_id);

        self.add_to_mailbox(&entry, Event::start());
        if sched_id != self.id {
            self.start_migrate(&entry, sched_id);
        }

        ActorOwn::new(id)
    }

    /* ---- sending ---- */

    pub(crate) fn send(&self, actor_ref: ActorRef, event: Event, immediate: bool) {
        let ActorRef { id, token } = actor_ref;
        let event = event.with_link_token(token);

        let entry = id.entry().clone();
        let sched_id = entry.sched_id();
        if sched_id != self.id {
            self.send_to_other_scheduler(sched_id, id, event);
            return;
        }
        if entry.generation() != id.generation() {
            trace!("dropping event for a dead actor");
            return;
        }

        // Safety: the slot is owned by this scheduler thread; the borrow
        // ends before any dispatch below.
        let (busy, mailbox_empty) = {
            let info = unsafe { entry.info() };
            (info.running || info.migrating, info.mailbox.is_empty())
        };

        if !immediate {
            self.add_to_mailbox(&entry, event);
        } else if busy {
            self.pending_events
                .borrow_mut()
                .entry(Arc::as_ptr(&entry) as usize)
                .or_insert_with(|| (entry.clone(), Vec::new()))
                .1
                .push(event);
        } else if !mailbox_empty {
            self.add_to_mailbox(&entry, event);
        } else {
            self.do_event(&entry, event);
            self.finish_migrate_if_asked(&entry);
        }
    }

    fn send_to_other_scheduler(&self, sched_id: i32, id: ActorId<()>, event: Event) {
        match self.outbound.get(sched_id as usize) {
            Some(queue) => queue.push(Inbound::Event { id, event }),
            None => error!("dropping event for unknown scheduler {}", sched_id),
        }
    }

    fn add_to_mailbox(&self, entry: &Arc<Entry>, event: Event) {
        // Safety: slot owned by this scheduler thread, borrow is scoped.
        let make_ready = {
            let info = unsafe { entry.info() };
            if info.actor.is_none() {
                return;
            }
            info.mailbox.push_back(event);
            !info.in_ready && !info.running && !info.migrating
        };
        if make_ready {
            self.make_ready(entry);
        }
    }

    fn make_ready(&self, entry: &Arc<Entry>) {
        // Safety: slot owned by this scheduler thread.
        let info = unsafe { entry.info() };
        if !info.in_ready {
            info.in_ready = true;
            self.ready.borrow_mut().push_back(entry.clone());
        }
    }

    /* ---- event execution ---- */

    fn current_frame<R>(&self, f: impl FnOnce(&EventContextFrame) -> R) -> Option<R> {
        let stack = self.event_stack.borrow();
        stack.last().map(f)
    }

    /// Execute one event. On return the actor is either still live, stopped
    /// and destroyed, or marked `migrating`; the caller must then call
    /// [`Scheduler::finish_migrate_if_asked`] once it is done touching the
    /// actor's mailbox.
    fn do_event(&self, entry: &Arc<Entry>, event: Event) {
        let link_token = event.link_token;
        // Safety: slot owned by this scheduler thread; the actor box is
        // taken out so no `info` borrow lives across the handler call.
        let actor = {
            let info = unsafe { entry.info() };
            debug_assert!(!info.running, "recursive dispatch into a running actor");
            info.running = true;
            info.actor.take()
        };
        let Some(mut actor) = actor else {
            // Safety: as above.
            unsafe { entry.info() }.running = false;
            return;
        };

        self.event_stack.borrow_mut().push(EventContextFrame {
            entry: entry.clone(),
            flags: 0,
            dest_sched_id: 0,
            link_token,
        });

        match event.data {
            EventData::Start => actor.start_up(),
            EventData::Stop => self.set_frame_flags(CTX_STOP, 0),
            EventData::Yield => actor.wakeup(),
            EventData::Timeout => actor.timeout_expired(),
            EventData::Hangup => {
                if link_token == 0 {
                    actor.hangup();
                } else {
                    actor.hangup_shared();
                }
            }
            EventData::Raw(data) => actor.raw_event(data),
            EventData::Custom(custom) => custom.run(&mut *actor),
        }

        let frame = match self.event_stack.borrow_mut().pop() {
            Some(frame) => frame,
            None => unreachable!("event context stack underflow"),
        };

        {
            // Safety: as above; the handler has returned.
            let info = unsafe { entry.info() };
            info.actor = Some(actor);
            info.running = false;
        }

        self.flush_pending_events(entry);

        if frame.flags & CTX_STOP != 0 {
            self.do_stop_actor(entry);
        } else if frame.flags & CTX_MIGRATE != 0 {
            // Safety: as above.
            let info = unsafe { entry.info() };
            info.migrating = true;
            info.migrate_dest = frame.dest_sched_id;
        }
    }

    fn finish_migrate_if_asked(&self, entry: &Arc<Entry>) {
        // Safety: slot owned by this scheduler thread, scoped borrow.
        let dest = {
            let info = unsafe { entry.info() };
            if !info.migrating {
                return;
            }
            info.migrate_dest
        };
        self.start_migrate(entry, dest);
    }

    fn set_frame_flags(&self, flags: u32, dest_sched_id: i32) {
        let mut stack = self.event_stack.borrow_mut();
        match stack.last_mut() {
            Some(frame) => {
                frame.flags |= flags;
                if flags & CTX_MIGRATE != 0 {
                    frame.dest_sched_id = dest_sched_id;
                }
            }
            None => panic!("not inside an actor event"),
        }
    }

    fn flush_pending_events(&self, entry: &Arc<Entry>) {
        let key = Arc::as_ptr(entry) as usize;
        let pending = self.pending_events.borrow_mut().swap_remove(&key);
        if let Some((_, events)) = pending {
            for event in events {
                self.add_to_mailbox(entry, event);
            }
        }
    }

    fn do_stop_actor(&self, entry: &Arc<Entry>) {
        self.cancel_timeout_for(entry);

        // Safety: slot owned by this scheduler thread; borrows are scoped.
        let actor = {
            let info = unsafe { entry.info() };
            info.in_ready = false;
            info.migrating = false;
            info.mailbox.clear();
            info.timeout_at = 0.0;
            info.actor.take()
        };
        let Some(mut actor) = actor else {
            return;
        };
        trace!("destroy actor \"{}\"", unsafe { entry.info() }.name.as_str());

        actor.tear_down();
        entry.bump_generation();
        // dropping the actor drops its ActorOwn fields, cascading hangups
        // to owned children
        drop(actor);

        let key = Arc::as_ptr(entry) as usize;
        self.pending_events.borrow_mut().swap_remove(&key);
        // Safety: as above.
        unsafe { entry.info() }.context = None;
        self.actor_count.set(self.actor_count.get() - 1);
    }

    /* ---- mailboxes ---- */

    fn run_mailboxes(&self) {
        loop {
            let entry = match self.ready.borrow_mut().pop_front() {
                Some(entry) => entry,
                None => break,
            };
            if entry.sched_id() != self.id {
                // the actor migrated away while queued; its new owner has it
                continue;
            }
            // Safety: slot owned by this scheduler thread, scoped borrow.
            {
                let info = unsafe { entry.info() };
                if info.actor.is_none() {
                    continue;
                }
                info.in_ready = false;
            }
            self.flush_mailbox(&entry);
            if self.yield_flag.get() {
                break;
            }
        }
    }

    fn flush_mailbox(&self, entry: &Arc<Entry>) {
        // Take the current batch; events arriving during execution land in
        // the fresh mailbox and keep the actor in the ready list.
        // Safety: slot owned by this scheduler thread, scoped borrows.
        let mut batch = {
            let info = unsafe { entry.info() };
            mem::take(&mut info.mailbox)
        };

        while let Some(event) = batch.pop_front() {
            self.do_event(entry, event);

            let (stopped, migrating) = {
                let info = unsafe { entry.info() };
                (info.actor.is_none(), info.migrating)
            };
            if stopped {
                // stopped: drop the rest of the batch
                return;
            }
            if migrating {
                // the rest of the batch travels with the actor, ahead of
                // anything that arrived during this batch
                let info = unsafe { entry.info() };
                for event in batch.into_iter().rev() {
                    info.mailbox.push_front(event);
                }
                self.finish_migrate_if_asked(entry);
                return;
            }
        }

        // Safety: as above.
        let non_empty = !unsafe { entry.info() }.mailbox.is_empty();
        if non_empty {
            self.make_ready(entry);
        }
    }

    /* ---- migration ---- */

    fn start_migrate(&self, entry: &Arc<Entry>, dest_sched_id: i32) {
        if dest_sched_id == self.id {
            // Safety: slot owned by this scheduler thread, scoped borrow.
            let make_ready = {
                let info = unsafe { entry.info() };
                info.migrating = false;
                info.migrate_dest = -1;
                !info.mailbox.is_empty() && !info.in_ready
            };
            if make_ready {
                self.make_ready(entry);
            }
            return;
        }
        if dest_sched_id < 0 || dest_sched_id as usize >= self.outbound.len() {
            error!("cannot migrate to unknown scheduler {}", dest_sched_id);
            return;
        }

        if entry.heap_pos() >= 0 {
            self.timeout_heap.borrow_mut().erase(entry);
        }
        self.flush_pending_events(entry);
        // Safety: the last touch of `info` on this thread; the release
        // store below publishes it to the destination.
        {
            let info = unsafe { entry.info() };
            info.in_ready = false;
            info.migrating = false;
            info.migrate_dest = -1;
        }
        trace!("migrate actor to scheduler {}", dest_sched_id);
        self.actor_count.set(self.actor_count.get() - 1);

        let id: ActorId<()> = ActorId::new(entry.clone(), entry.generation());
        entry.store_sched_id(dest_sched_id);
        self.outbound[dest_sched_id as usize].push(Inbound::Register { id });
    }

    fn register_migrated_actor(&self, id: ActorId<()>) {
        let entry = id.entry().clone();
        if entry.sched_id() != self.id || entry.generation() != id.generation() {
            return;
        }
        self.actor_count.set(self.actor_count.get() + 1);
        // Safety: ownership was handed to us by the release store the
        // Register message synchronized with.
        let (timeout_at, has_mail) = {
            let info = unsafe { entry.info() };
            (info.timeout_at, !info.mailbox.is_empty())
        };
        if timeout_at > 0.0 {
            self.timeout_heap
                .borrow_mut()
                .insert(timeout_at, entry.clone());
        }
        if has_mail {
            self.make_ready(&entry);
        }
    }

    /* ---- timers ---- */

    fn set_timeout_at_for(&self, entry: &Arc<Entry>, at: f64) {
        let mut heap = self.timeout_heap.borrow_mut();
        if entry.heap_pos() >= 0 {
            heap.fix(at, entry);
        } else {
            heap.insert(at, entry.clone());
        }
        drop(heap);
        // Safety: slot owned by this scheduler thread.
        unsafe { entry.info() }.timeout_at = at;
    }

    fn cancel_timeout_for(&self, entry: &Arc<Entry>) {
        if entry.heap_pos() >= 0 {
            self.timeout_heap.borrow_mut().erase(entry);
        }
        // Safety: slot owned by this scheduler thread.
        unsafe { entry.info() }.timeout_at = 0.0;
    }

    fn run_timeouts(&self) {
        let now = time::now();
        loop {
            let entry = {
                let mut heap = self.timeout_heap.borrow_mut();
                match heap.top_key() {
                    Some(key) if key <= now => match heap.pop() {
                        Some(entry) => entry,
                        None => break,
                    },
                    _ => break,
                }
            };
            // Safety: slot owned by this scheduler thread.
            unsafe { entry.info() }.timeout_at = 0.0;
            self.do_event(&entry, Event::timeout());
            self.finish_migrate_if_asked(&entry);
        }
    }

    fn next_wait(&self, timeout: Timestamp) -> Duration {
        let mut wait = timeout.remaining();
        if let Some(top) = self.timeout_heap.borrow().top_key() {
            wait = wait.min(top - time::now());
        }
        if wait < 0.0 {
            wait = 0.0;
        }
        Duration::from_secs_f64(wait)
    }

    /* ---- poll ---- */

    fn run_poll(&self, timeout: Timestamp) {
        let wait = self.next_wait(timeout);
        let mut events = self.poll_events.borrow_mut();
        if let Err(err) = self.epoll.wait(&mut events, Some(wait)) {
            if err.kind() != io::ErrorKind::Interrupted {
                error!("poll failed: {}", err);
            }
            return;
        }

        for event in events.iter() {
            if event.token() == INBOX_TOKEN {
                continue; // drained by the caller right after run_poll
            }
            let index = usize::from(event.token()) - 1;
            let info = match self.fd_table.borrow().get(index) {
                Some(info) => info.clone(),
                None => continue,
            };
            let flags = ready_to_poll_flags(event.readiness());
            if info.flags().write_flags(flags) {
                if let Some(observer) = info.observer() {
                    self.send(ActorRef::from(observer), Event::yield_(), false);
                }
            }
        }
    }

    fn drain_inbound(&self) {
        while let Some(message) = self.inbound.pop() {
            match message {
                Inbound::Event { id, event } => self.deliver_inbound(id, event),
                Inbound::Register { id } => self.register_migrated_actor(id),
            }
        }
    }

    fn deliver_inbound(&self, id: ActorId<()>, event: Event) {
        let entry = id.entry().clone();
        let sched_id = entry.sched_id();
        if sched_id != self.id {
            // migrated away before we drained it; forward
            self.send_to_other_scheduler(sched_id, id, event);
            return;
        }
        if entry.generation() != id.generation() {
            return;
        }
        self.add_to_mailbox(&entry, event);
    }

    /* ---- fd subscriptions ---- */

    /// Register `fd` with this scheduler's poller (edge-triggered). The
    /// side-table entry lives until unsubscribed; readiness accumulates in
    /// the fd's `PollFlagsSet` and, when new bits arrive, the fd's observer
    /// actor receives a deferred `Yield`.
    pub fn subscribe(&self, fd: PollableFd, flags: PollFlags) -> io::Result<()> {
        let info = fd.info().clone();
        let index = self.fd_table.borrow_mut().insert(info.clone());
        info.set_token(index + 1);

        let mut interest = Ready::empty();
        if flags.can_read() {
            interest = interest | Ready::readable();
        }
        if flags.can_write() {
            interest = interest | Ready::writable();
        }
        if flags.can_close() {
            interest = interest | Ready::hup();
        }

        let raw = info.raw_fd();
        if let Err(err) = self
            .epoll
            .add(&raw, Token(index + 1), interest, EpollOpt::edge())
        {
            self.fd_table.borrow_mut().remove(index);
            info.set_token(0);
            return Err(err);
        }
        Ok(())
    }

    pub fn unsubscribe(&self, fd: PollableFdRef) -> io::Result<()> {
        let info = fd.info().clone();
        let token = info.take_token();
        if token == 0 {
            return Ok(());
        }
        self.fd_table.borrow_mut().remove(token - 1);
        let raw = info.raw_fd();
        self.epoll.delete(&raw)
    }

    /// Like `unsubscribe`, but required before closing the descriptor:
    /// edge-triggered backends must drop the registration while the fd is
    /// still open.
    pub fn unsubscribe_before_close(&self, fd: PollableFdRef) -> io::Result<()> {
        self.unsubscribe(fd)
    }

    /* ---- shutdown ---- */

    fn clear(&self) {
        // stop everything still queued; idle actors die when their owners
        // drop
        loop {
            let entry = match self.ready.borrow_mut().pop_front() {
                Some(entry) => entry,
                None => break,
            };
            if entry.sched_id() == self.id {
                self.do_stop_actor(&entry);
            }
        }
        loop {
            let entry = match self.timeout_heap.borrow_mut().pop() {
                Some(entry) => entry,
                None => break,
            };
            self.do_stop_actor(&entry);
        }
        while self.inbound.pop().is_some() {}
        if self.actor_count.get() != 0 {
            debug!(
                "scheduler {} finished with {} live actors",
                self.id,
                self.actor_count.get()
            );
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _guard = self.guard();
        self.clear();
    }
}

fn ready_to_poll_flags(ready: Ready) -> PollFlags {
    let mut flags = PollFlags::empty();
    if ready.is_readable() {
        flags = flags | PollFlags::read();
    }
    if ready.is_writable() {
        flags = flags | PollFlags::write();
    }
    if ready.is_hup() {
        flags = flags | PollFlags::close();
    }
    if ready.is_error() {
        flags = flags | PollFlags::error();
    }
    flags
}

/* ---- interface to the current scheduler ---- */

/// Create an actor on the current scheduler.
pub fn create_actor<T: Actor>(name: &str, actor: T) -> ActorOwn<T> {
    with("create_actor", |s| s.create_actor(name, actor))
}

pub fn create_actor_on_scheduler<T: Actor>(sched_id: i32, name: &str, actor: T) -> ActorOwn<T> {
    with("create_actor_on_scheduler", |s| {
        s.create_actor_on_scheduler(sched_id, name, actor)
    })
}

/// Send an event with immediate semantics: when the target is idle on the
/// current scheduler the handler runs before this call returns.
pub fn send_event<R: Into<ActorRef>>(target: R, event: Event) {
    send_event_ref(target.into(), event);
}

/// Send an event with deferred semantics: always through the mailbox, never
/// synchronously. Use to break send cycles.
pub fn send_event_later<R: Into<ActorRef>>(target: R, event: Event) {
    let target = target.into();
    if try_with(|s| s.send(target, event, false)).is_none() {
        warn!("dropping event: no scheduler on this thread");
    }
}

pub(crate) fn send_event_ref(target: ActorRef, event: Event) {
    if try_with(|s| s.send(target, event, true)).is_none() {
        warn!("dropping event: no scheduler on this thread");
    }
}

/// Type-checked delayed call with immediate semantics.
pub fn send_closure<T, F>(id: &ActorId<T>, f: F)
where
    T: Actor,
    F: FnOnce(&mut T) + Send + 'static,
{
    send_event(id, Event::closure(f));
}

/// Type-checked delayed call with deferred semantics.
pub fn send_closure_later<T, F>(id: &ActorId<T>, f: F)
where
    T: Actor,
    F: FnOnce(&mut T) + Send + 'static,
{
    send_event_later(id, Event::closure(f));
}

/* ---- current-actor helpers (valid inside event handlers) ---- */

fn with_current_entry<R>(what: &str, f: impl FnOnce(&Scheduler, &Arc<Entry>) -> R) -> R {
    with(what, |s| {
        let entry = s
            .current_frame(|frame| frame.entry.clone())
            .unwrap_or_else(|| panic!("{} requires a running actor", what));
        f(s, &entry)
    })
}

/// Id of the scheduler installed on this thread.
pub fn current_scheduler_id() -> i32 {
    with("current_scheduler_id", |s| s.sched_id())
}

/// Stop the current actor once the running handler returns.
pub fn stop() {
    with("stop", |s| s.set_frame_flags(CTX_STOP, 0));
}

/// Re-enqueue the current actor; its `wakeup` runs on a later iteration.
pub fn yield_now() {
    with_current_entry("yield_now", |s, entry| {
        let id: ActorId<()> = ActorId::new(entry.clone(), entry.generation());
        s.send(ActorRef::from(&id), Event::yield_(), false);
    });
}

/// Move the current actor to another scheduler at the event boundary.
pub fn migrate(sched_id: i32) {
    with("migrate", |s| s.set_frame_flags(CTX_MIGRATE, sched_id));
}

/// The link token of the reference the current event was sent through; zero
/// for plain ids.
pub fn link_token() -> u64 {
    with("link_token", |s| {
        s.current_frame(|frame| frame.link_token)
            .unwrap_or_else(|| panic!("link_token requires a running actor"))
    })
}

pub fn set_timeout_at(at: f64) {
    with_current_entry("set_timeout_at", |s, entry| s.set_timeout_at_for(entry, at));
}

pub fn set_timeout_in(seconds: f64) {
    set_timeout_at(time::now() + seconds);
}

pub fn cancel_timeout() {
    with_current_entry("cancel_timeout", |s, entry| s.cancel_timeout_for(entry));
}

pub fn has_timeout() -> bool {
    with_current_entry("has_timeout", |_, entry| {
        // Safety: current actor's slot is owned by this thread.
        unsafe { entry.info() }.timeout_at > 0.0
    })
}

/// The current actor's own weak id.
pub fn actor_id<T: Actor>() -> ActorId<T> {
    with_current_entry("actor_id", |_, entry| {
        ActorId::new(entry.clone(), entry.generation())
    })
}

pub fn actor_context() -> Option<Arc<dyn ActorContext>> {
    with_current_entry("actor_context", |_, entry| {
        // Safety: current actor's slot is owned by this thread.
        unsafe { entry.info() }.context.clone()
    })
}

pub fn set_actor_context(context: Arc<dyn ActorContext>) {
    with_current_entry("set_actor_context", |_, entry| {
        // Safety: current actor's slot is owned by this thread.
        unsafe { entry.info() }.context = Some(context);
    });
}

/// Register a descriptor with the current scheduler.
pub fn subscribe(fd: PollableFd, flags: PollFlags) -> io::Result<()> {
    with("subscribe", |s| s.subscribe(fd, flags))
}

pub fn unsubscribe(fd: PollableFdRef) -> io::Result<()> {
    with("unsubscribe", |s| s.unsubscribe(fd))
}

pub fn unsubscribe_before_close(fd: PollableFdRef) -> io::Result<()> {
    with("unsubscribe_before_close", |s| {
        s.unsubscribe_before_close(fd)
    })
}
