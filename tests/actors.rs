use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hive::scheduler::{self, send_closure, send_closure_later};
use hive::sys::eventfd::EventFd;
use hive::{Actor, ActorId, ConcurrentScheduler, Event, PollFlags, PollableFd, PollableFdRef, Timestamp};

fn pump(runtime: &ConcurrentScheduler, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        assert!(Instant::now() < deadline, "test timed out");
        runtime.run_main(Timestamp::in_(0.05));
    }
}

struct Ponger {
    count: Arc<AtomicU32>,
}

impl Actor for Ponger {}

impl Ponger {
    fn ping(&mut self, from: ActorId<Pinger>, n: u32) {
        self.count.fetch_add(1, Ordering::Relaxed);
        send_closure(&from, move |pinger| pinger.pong(n + 1));
    }
}

struct Pinger {
    ponger: ActorId<Ponger>,
    count: Arc<AtomicU32>,
    limit: u32,
    done: Arc<AtomicBool>,
}

impl Actor for Pinger {
    fn start_up(&mut self) {
        self.send_ping(0);
    }
}

impl Pinger {
    fn send_ping(&self, n: u32) {
        let me = scheduler::actor_id::<Pinger>();
        send_closure(&self.ponger, move |ponger| ponger.ping(me, n));
    }

    fn pong(&mut self, n: u32) {
        self.count.store(n, Ordering::Relaxed);
        if n >= self.limit {
            self.done.store(true, Ordering::Release);
        } else {
            self.send_ping(n);
        }
    }
}

#[test]
fn ping_pong_across_two_schedulers() {
    let pings = Arc::new(AtomicU32::new(0));
    let pongs = Arc::new(AtomicU32::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let mut runtime = ConcurrentScheduler::new(1).unwrap();
    let ponger = runtime.create_actor(
        1,
        "ponger",
        Ponger {
            count: pings.clone(),
        },
    );
    let pinger = runtime.create_actor(
        0,
        "pinger",
        Pinger {
            ponger: ponger.get(),
            count: pongs.clone(),
            limit: 1000,
            done: done.clone(),
        },
    );
    runtime.start();

    pump(&runtime, || done.load(Ordering::Acquire));

    assert_eq!(pings.load(Ordering::Relaxed), 1000);
    assert_eq!(pongs.load(Ordering::Relaxed), 1000);

    {
        let _guard = runtime.main_guard();
        drop(pinger);
        drop(ponger);
    }
    runtime.finish();
}

#[derive(Default)]
struct Recorder {
    seen: Vec<u32>,
    log: Arc<Mutex<Vec<u32>>>,
}

impl Actor for Recorder {}

impl Recorder {
    fn record(&mut self, value: u32) {
        self.seen.push(value);
        self.log.lock().unwrap().push(value);
    }
}

#[test]
fn deferred_sends_arrive_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = ConcurrentScheduler::new(0).unwrap();
    let recorder = runtime.create_actor(
        0,
        "recorder",
        Recorder {
            seen: Vec::new(),
            log: log.clone(),
        },
    );
    runtime.start();

    {
        let _guard = runtime.main_guard();
        let id = recorder.get();
        for value in 0..100u32 {
            send_closure_later(&id, move |recorder| recorder.record(value));
        }
    }

    pump(&runtime, || log.lock().unwrap().len() == 100);
    assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());

    {
        let _guard = runtime.main_guard();
        drop(recorder);
    }
    runtime.finish();
}

struct HangupCounter {
    hangups: Arc<AtomicU32>,
    destroyed: Arc<AtomicBool>,
}

impl Actor for HangupCounter {
    fn hangup(&mut self) {
        self.hangups.fetch_add(1, Ordering::Relaxed);
        scheduler::stop();
    }

    fn tear_down(&mut self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

#[test]
fn dropping_owner_delivers_one_hangup() {
    let hangups = Arc::new(AtomicU32::new(0));
    let destroyed = Arc::new(AtomicBool::new(false));

    let mut runtime = ConcurrentScheduler::new(0).unwrap();
    let own = runtime.create_actor(
        0,
        "hangup-counter",
        HangupCounter {
            hangups: hangups.clone(),
            destroyed: destroyed.clone(),
        },
    );
    runtime.start();
    let id = own.get();

    {
        let _guard = runtime.main_guard();
        drop(own);
    }
    pump(&runtime, || destroyed.load(Ordering::Acquire));

    assert_eq!(hangups.load(Ordering::Relaxed), 1);
    assert!(!id.is_alive());

    runtime.finish();
}

struct Sleeper {
    fired: Arc<AtomicU32>,
}

impl Actor for Sleeper {
    fn start_up(&mut self) {
        scheduler::set_timeout_in(0.05);
    }

    fn timeout_expired(&mut self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        if self.fired.load(Ordering::Relaxed) < 3 {
            scheduler::set_timeout_in(0.01);
        }
    }
}

#[test]
fn timeouts_fire_and_rearm() {
    let fired = Arc::new(AtomicU32::new(0));
    let mut runtime = ConcurrentScheduler::new(0).unwrap();
    let sleeper = runtime.create_actor(
        0,
        "sleeper",
        Sleeper {
            fired: fired.clone(),
        },
    );
    runtime.start();

    pump(&runtime, || fired.load(Ordering::Relaxed) >= 3);
    assert_eq!(fired.load(Ordering::Relaxed), 3);

    {
        let _guard = runtime.main_guard();
        drop(sleeper);
    }
    runtime.finish();
}

struct TokenRecorder {
    log: Arc<Mutex<Vec<(String, u64)>>>,
}

impl Actor for TokenRecorder {
    fn raw_event(&mut self, data: u64) {
        self.log
            .lock()
            .unwrap()
            .push((format!("raw:{}", data), scheduler::link_token()));
    }

    fn hangup_shared(&mut self) {
        self.log
            .lock()
            .unwrap()
            .push(("hangup_shared".to_string(), scheduler::link_token()));
    }
}

#[test]
fn shared_references_carry_link_tokens() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = ConcurrentScheduler::new(0).unwrap();
    let own = runtime.create_actor(0, "tokens", TokenRecorder { log: log.clone() });
    runtime.start();

    {
        let _guard = runtime.main_guard();
        let shared = own.shared(42);
        scheduler::send_event(&shared, Event::raw(7));
        drop(shared); // delivers a shared hangup carrying the token
    }

    pump(&runtime, || log.lock().unwrap().len() == 2);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("raw:7".to_string(), 42),
            ("hangup_shared".to_string(), 42),
        ]
    );

    {
        let _guard = runtime.main_guard();
        drop(own);
    }
    runtime.finish();
}

struct Traveller {
    observed: Arc<Mutex<Vec<i32>>>,
}

impl Actor for Traveller {}

impl Traveller {
    fn where_are_you(&mut self) {
        self.observed
            .lock()
            .unwrap()
            .push(scheduler::current_scheduler_id());
    }

    fn move_to(&mut self, sched_id: i32) {
        self.where_are_you();
        scheduler::migrate(sched_id);
    }
}

#[test]
fn migration_moves_actor_between_schedulers() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = ConcurrentScheduler::new(1).unwrap();
    let own = runtime.create_actor(
        0,
        "traveller",
        Traveller {
            observed: observed.clone(),
        },
    );
    runtime.start();

    {
        let _guard = runtime.main_guard();
        let id = own.get();
        send_closure_later(&id, |traveller| traveller.move_to(1));
        send_closure_later(&id, |traveller| traveller.where_are_you());
    }

    pump(&runtime, || observed.lock().unwrap().len() == 2);
    assert_eq!(*observed.lock().unwrap(), vec![0, 1]);

    {
        let _guard = runtime.main_guard();
        drop(own);
    }
    runtime.finish();
}

struct FdWatcher {
    eventfd: Arc<EventFd>,
    fd_ref: Option<PollableFdRef>,
    notified: Arc<AtomicU32>,
}

impl Actor for FdWatcher {
    fn start_up(&mut self) {
        let observer = scheduler::actor_id::<FdWatcher>().untyped();
        let fd = PollableFd::new(self.eventfd.as_raw_fd(), Some(observer));
        self.fd_ref = Some(fd.get_ref());
        scheduler::subscribe(fd, PollFlags::read()).unwrap();
    }

    fn loop_(&mut self) {
        let Some(fd_ref) = &self.fd_ref else { return };
        if fd_ref.get_flags().can_read() {
            // drain before clearing: the registration is edge-triggered
            while self.eventfd.read().is_ok() {}
            fd_ref.clear_flags(PollFlags::read());
            self.notified.fetch_add(1, Ordering::Release);
        }
    }

    fn tear_down(&mut self) {
        if let Some(fd_ref) = self.fd_ref.take() {
            scheduler::unsubscribe_before_close(fd_ref).unwrap();
        }
    }
}

#[test]
fn fd_readiness_wakes_observer() {
    let eventfd = Arc::new(EventFd::new().unwrap());
    let notified = Arc::new(AtomicU32::new(0));

    let mut runtime = ConcurrentScheduler::new(0).unwrap();
    let own = runtime.create_actor(
        0,
        "fd-watcher",
        FdWatcher {
            eventfd: eventfd.clone(),
            fd_ref: None,
            notified: notified.clone(),
        },
    );
    runtime.start();

    // let the actor start and register its descriptor
    runtime.run_main(Timestamp::in_(0.05));

    eventfd.write(1).unwrap();
    pump(&runtime, || notified.load(Ordering::Acquire) >= 1);

    // edge-triggered readiness fires again after the fd was drained
    eventfd.write(1).unwrap();
    pump(&runtime, || notified.load(Ordering::Acquire) >= 2);

    {
        // the actor is idle, so the hangup (and its tear_down) runs here
        let _guard = runtime.main_guard();
        drop(own);
    }
    runtime.finish();
}

struct Greedy {
    steps: Arc<AtomicU32>,
}

impl Actor for Greedy {
    fn start_up(&mut self) {
        scheduler::yield_now();
    }

    fn loop_(&mut self) {
        let steps = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if steps < 5 {
            scheduler::yield_now();
        }
    }
}

#[test]
fn yield_requeues_instead_of_spinning() {
    let steps = Arc::new(AtomicU32::new(0));
    let mut runtime = ConcurrentScheduler::new(0).unwrap();
    let own = runtime.create_actor(
        0,
        "greedy",
        Greedy {
            steps: steps.clone(),
        },
    );
    runtime.start();

    pump(&runtime, || steps.load(Ordering::Relaxed) >= 5);
    assert_eq!(steps.load(Ordering::Relaxed), 5);

    {
        let _guard = runtime.main_guard();
        drop(own);
    }
    runtime.finish();
}
