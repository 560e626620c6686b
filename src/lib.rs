//! Cooperative actor runtime with a durable, optionally encrypted event
//! log and keyed event queues: the substrate for building stateful
//! messenger-style services.
//!
//! The crate has three load-bearing parts:
//!
//! - a many-actor, multi-scheduler runtime: one cooperative [`Scheduler`]
//!   per worker thread, location-transparent actor references, migration,
//!   timers folded into each scheduler's poll loop, and hangup propagation
//!   through owning references;
//! - [`Binlog`], a crash-safe append-only record log with
//!   rewrite-in-place semantics, transparent AES-CTR encryption keyed by a
//!   user passphrase, and space reclamation by rewriting the live
//!   projection;
//! - [`TQueue`], time-ordered keyed queues for at-least-once fan-out of
//!   short-lived events, persisted through the binlog.
//!
//! # Example
//!
//! ```no_run
//! use hive::{Actor, ConcurrentScheduler, Timestamp};
//!
//! struct Greeter;
//!
//! impl Actor for Greeter {
//!     fn start_up(&mut self) {
//!         println!("hello");
//!         hive::scheduler::stop();
//!     }
//! }
//!
//! let mut runtime = ConcurrentScheduler::new(2).unwrap();
//! let greeter = runtime.create_actor(0, "greeter", Greeter);
//! runtime.start();
//! runtime.run_main(Timestamp::in_(0.1));
//! drop(greeter);
//! runtime.finish();
//! ```

pub mod sys;

pub mod epoll;
pub mod fd;
pub mod heap;
pub mod queue;
pub mod time;
pub mod waker;
pub mod wire;

pub mod actor;
pub mod scheduler;

pub mod binlog;
pub mod tqueue;

pub use actor::{Actor, ActorContext, ActorId, ActorOwn, ActorRef, ActorShared, CustomEvent, Event};
pub use fd::{PollFlags, PollableFd, PollableFdRef};
pub use scheduler::{ConcurrentScheduler, Scheduler, SendGuard};
pub use time::Timestamp;

pub use binlog::{Binlog, BinlogError, BinlogEvent, BinlogInfo, DbKey};
pub use tqueue::{EventId, TQueue, TQueueBinlogStorage, TQueueMemoryStorage};
