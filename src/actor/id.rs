use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::actor::arena::Entry;
use crate::actor::Event;
use crate::scheduler;

/// Weak address of an actor. Cheap to clone, valid to keep after the actor
/// died: sends through a dead id are silently dropped.
pub struct ActorId<T: ?Sized = ()> {
    entry: Arc<Entry>,
    generation: u64,
    _actor: PhantomData<fn(&mut T)>,
}

impl<T: ?Sized> ActorId<T> {
    pub(crate) fn new(entry: Arc<Entry>, generation: u64) -> ActorId<T> {
        ActorId {
            entry,
            generation,
            _actor: PhantomData,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.entry.is_alive(self.generation)
    }

    /// Forget the actor type; routing needs no type information.
    pub fn untyped(&self) -> ActorId<()> {
        ActorId::new(self.entry.clone(), self.generation)
    }

    /// Derive a shared reference carrying `token`. The token must be
    /// non-zero; it is what the target reads through
    /// [`crate::scheduler::link_token`] and what identifies the dropped
    /// reference in `hangup_shared`.
    pub fn shared(&self, token: u64) -> ActorShared<T> {
        assert!(token != 0, "link token must be non-zero");
        ActorShared {
            id: Some(self.clone()),
            token,
        }
    }

    pub(crate) fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T: ?Sized> Clone for ActorId<T> {
    fn clone(&self) -> ActorId<T> {
        ActorId::new(self.entry.clone(), self.generation)
    }
}

impl<T: ?Sized> fmt::Debug for ActorId<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "ActorId({:p}#{})",
            Arc::as_ptr(&self.entry),
            self.generation
        )
    }
}

/// The unique owning reference. Dropping it delivers one `Hangup` to the
/// actor (which stops by default).
pub struct ActorOwn<T: ?Sized = ()> {
    id: Option<ActorId<T>>,
}

impl<T: ?Sized> ActorOwn<T> {
    pub(crate) fn new(id: ActorId<T>) -> ActorOwn<T> {
        ActorOwn { id: Some(id) }
    }

    pub fn get(&self) -> ActorId<T> {
        match &self.id {
            Some(id) => id.clone(),
            None => unreachable!("ActorOwn is never empty while alive"),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.id.as_ref().map(|id| id.is_alive()).unwrap_or(false)
    }

    pub fn shared(&self, token: u64) -> ActorShared<T> {
        self.get().shared(token)
    }

    /// Give up ownership without hanging the actor up.
    pub fn release(mut self) -> ActorId<T> {
        match self.id.take() {
            Some(id) => id,
            None => unreachable!("ActorOwn is never empty while alive"),
        }
    }

    /// Drop ownership and hang the actor up now.
    pub fn reset(&mut self) {
        if let Some(id) = self.id.take() {
            scheduler::send_event(&id, Event::hangup());
        }
    }
}

impl<T: ?Sized> Drop for ActorOwn<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> fmt::Debug for ActorOwn<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match &self.id {
            Some(id) => write!(fmt, "ActorOwn({:?})", id),
            None => write!(fmt, "ActorOwn(released)"),
        }
    }
}

/// A shared reference tagged with an opaque link token, so one actor can
/// tell many peers apart on a single entry point. Dropping it delivers a
/// `Hangup` carrying the token; the target sees `hangup_shared`.
pub struct ActorShared<T: ?Sized = ()> {
    id: Option<ActorId<T>>,
    token: u64,
}

impl<T: ?Sized> ActorShared<T> {
    pub fn get(&self) -> ActorId<T> {
        match &self.id {
            Some(id) => id.clone(),
            None => unreachable!("ActorShared is never empty while alive"),
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_alive(&self) -> bool {
        self.id.as_ref().map(|id| id.is_alive()).unwrap_or(false)
    }

    pub fn release(mut self) -> ActorId<T> {
        match self.id.take() {
            Some(id) => id,
            None => unreachable!("ActorShared is never empty while alive"),
        }
    }
}

impl<T: ?Sized> Drop for ActorShared<T> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            scheduler::send_event_ref(
                ActorRef {
                    id: id.untyped(),
                    token: self.token,
                },
                Event::hangup(),
            );
        }
    }
}

impl<T: ?Sized> fmt::Debug for ActorShared<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match &self.id {
            Some(id) => write!(fmt, "ActorShared({:?}, token = {})", id, self.token),
            None => write!(fmt, "ActorShared(released)"),
        }
    }
}

/// An untyped destination plus the link token to stamp on the event.
pub struct ActorRef {
    pub(crate) id: ActorId<()>,
    pub(crate) token: u64,
}

impl<T: ?Sized> From<&ActorId<T>> for ActorRef {
    fn from(id: &ActorId<T>) -> ActorRef {
        ActorRef {
            id: id.untyped(),
            token: 0,
        }
    }
}

impl<T: ?Sized> From<&ActorOwn<T>> for ActorRef {
    fn from(own: &ActorOwn<T>) -> ActorRef {
        ActorRef::from(&own.get())
    }
}

impl<T: ?Sized> From<&ActorShared<T>> for ActorRef {
    fn from(shared: &ActorShared<T>) -> ActorRef {
        ActorRef {
            id: shared.get().untyped(),
            token: shared.token,
        }
    }
}
