use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::error;

use crate::actor::{Actor, ActorOwn};
use crate::queue::Queue;
use crate::scheduler::{Inbound, Scheduler, SchedulerGuard};
use crate::time::Timestamp;

/// Runs `threads_n + 1` schedulers: scheduler 0 on the caller's thread via
/// [`ConcurrentScheduler::run_main`], schedulers `1..=threads_n` each on a
/// worker thread, plus one auxiliary scheduler that never runs and exists
/// only so threads outside the runtime can submit events through
/// [`ConcurrentScheduler::get_send_guard`].
pub struct ConcurrentScheduler {
    schedulers: Vec<Option<Box<Scheduler>>>,
    inboxes: Vec<Queue<Inbound>>,
    finished: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
    aux_lock: Arc<Mutex<()>>,
    running: bool,
}

impl ConcurrentScheduler {
    pub fn new(threads_n: usize) -> io::Result<ConcurrentScheduler> {
        let sched_n = threads_n + 1;
        let total = sched_n + 1; // + auxiliary

        let mut inboxes = Vec::with_capacity(total);
        for _ in 0..total {
            inboxes.push(Queue::unbounded()?);
        }

        let finished = Arc::new(AtomicBool::new(false));
        let mut schedulers = Vec::with_capacity(total);
        for id in 0..total {
            schedulers.push(Some(Box::new(Scheduler::new(
                id as i32,
                &inboxes,
                finished.clone(),
            )?)));
        }

        Ok(ConcurrentScheduler {
            schedulers,
            inboxes,
            finished,
            threads: Vec::new(),
            aux_lock: Arc::new(Mutex::new(())),
            running: false,
        })
    }

    /// Number of runnable schedulers (the auxiliary one not included).
    pub fn sched_count(&self) -> usize {
        self.schedulers.len() - 1
    }

    fn scheduler(&self, sched_id: usize) -> &Scheduler {
        match &self.schedulers[sched_id] {
            Some(scheduler) => scheduler,
            None => panic!("scheduler {} is owned by its worker thread", sched_id),
        }
    }

    /// Create an actor on scheduler `sched_id`. For any scheduler other
    /// than 0 this is only allowed before [`ConcurrentScheduler::start`];
    /// afterwards the target scheduler is owned by its worker thread and
    /// actors reach it by migration instead.
    pub fn create_actor<T: Actor>(
        &self,
        sched_id: usize,
        name: &str,
        actor: T,
    ) -> ActorOwn<T> {
        assert!(sched_id < self.sched_count(), "bad scheduler id {}", sched_id);
        if self.running && sched_id != 0 {
            let main = self.scheduler(0);
            let _guard = main.guard();
            return main.create_actor_on_scheduler(sched_id as i32, name, actor);
        }
        let scheduler = self.scheduler(sched_id);
        let _guard = scheduler.guard();
        scheduler.create_actor(name, actor)
    }

    /// Install a guard on the main scheduler, so the calling thread can use
    /// the free send/create functions directly.
    pub fn main_guard(&self) -> SchedulerGuard {
        self.scheduler(0).guard()
    }

    /// Spawn the worker threads.
    pub fn start(&mut self) {
        assert!(!self.running, "already started");
        self.running = true;
        self.finished.store(false, Ordering::Release);

        for id in 1..self.sched_count() {
            let scheduler = match self.schedulers[id].take() {
                Some(scheduler) => scheduler,
                None => continue,
            };
            let handle = thread::Builder::new()
                .name(format!("hive-sched-{}", id))
                .spawn(move || {
                    while !scheduler.is_finished() {
                        scheduler.run(Timestamp::in_(10.0));
                    }
                });
            match handle {
                Ok(handle) => self.threads.push(handle),
                Err(err) => error!("failed to spawn scheduler thread: {}", err),
            }
        }
    }

    /// Pump the main scheduler once; returns false once the runtime is
    /// finished.
    pub fn run_main(&self, timeout: Timestamp) -> bool {
        if !self.finished.load(Ordering::Acquire) {
            self.scheduler(0).run(timeout);
        }
        !self.finished.load(Ordering::Acquire)
    }

    /// Signal every scheduler to wind down, then join the workers. Actors
    /// still alive are destroyed with their scheduler.
    pub fn finish(&mut self) {
        self.finished.store(true, Ordering::Release);
        for inbox in &self.inboxes {
            let _ = inbox.wakeup();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
        self.running = false;
    }

    /// Borrow the auxiliary scheduler for a foreign thread. Sends made
    /// while the guard is held are routed to the right scheduler through
    /// its inbox. One foreign thread at a time.
    pub fn get_send_guard(&self) -> SendGuard {
        let lock = match self.aux_lock.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        let aux = self.scheduler(self.schedulers.len() - 1);
        SendGuard {
            _scheduler_guard: aux.guard(),
            _lock: lock,
        }
    }
}

impl Drop for ConcurrentScheduler {
    fn drop(&mut self) {
        if self.running {
            self.finish();
        }
    }
}

/// Makes the auxiliary scheduler current on a thread outside the runtime.
pub struct SendGuard<'a> {
    _scheduler_guard: SchedulerGuard<'a>,
    _lock: MutexGuard<'a, ()>,
}
