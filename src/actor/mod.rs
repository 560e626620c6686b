use std::any::Any;

pub use context::ActorContext;
pub use event::{CustomEvent, Event};
pub use id::{ActorId, ActorOwn, ActorRef, ActorShared};

pub(crate) mod arena;
mod context;
pub(crate) mod event;
mod id;

/// The capability set of an actor. Every method has a default, so an
/// implementation supplies only the subset it reacts to.
///
/// All methods run on the actor's scheduler thread, one event at a time.
/// Inside any of them the current-actor helpers in [`crate::scheduler`]
/// (`stop`, `yield_now`, `set_timeout_in`, `link_token`, ...) refer to this
/// actor.
pub trait Actor: Any + Send {
    /// First event after the actor is registered.
    fn start_up(&mut self) {}

    /// Runs exactly once, right before the actor is destroyed.
    fn tear_down(&mut self) {}

    /// A `Yield` event arrived (explicit yield, or readiness notification
    /// from a subscribed descriptor). Defaults to [`Actor::loop_`].
    fn wakeup(&mut self) {
        self.loop_();
    }

    /// The actor's main reaction; called through [`Actor::wakeup`].
    fn loop_(&mut self) {}

    fn timeout_expired(&mut self) {}

    /// The owning reference was dropped. Default: stop.
    fn hangup(&mut self) {
        crate::scheduler::stop();
    }

    /// A shared reference was dropped; the link token of that reference is
    /// available through [`crate::scheduler::link_token`].
    fn hangup_shared(&mut self) {}

    /// An opaque 64-bit payload sent with [`Event::raw`].
    fn raw_event(&mut self, _data: u64) {}
}
