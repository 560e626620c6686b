use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use log::error;

use crate::actor::Actor;

/// A one-shot closure delivered as an event. `run` consumes the box.
pub trait CustomEvent: Send {
    fn run(self: Box<Self>, actor: &mut dyn Actor);
}

pub(crate) enum EventData {
    Start,
    Stop,
    Yield,
    Timeout,
    Hangup,
    Raw(u64),
    Custom(Box<dyn CustomEvent>),
}

/// A tagged payload delivered to an actor's mailbox.
pub struct Event {
    pub(crate) data: EventData,
    pub(crate) link_token: u64,
}

impl Event {
    pub fn start() -> Event {
        Event::from(EventData::Start)
    }

    pub fn stop() -> Event {
        Event::from(EventData::Stop)
    }

    pub fn yield_() -> Event {
        Event::from(EventData::Yield)
    }

    pub fn timeout() -> Event {
        Event::from(EventData::Timeout)
    }

    pub fn hangup() -> Event {
        Event::from(EventData::Hangup)
    }

    pub fn raw(data: u64) -> Event {
        Event::from(EventData::Raw(data))
    }

    pub fn custom<C: CustomEvent + 'static>(custom: C) -> Event {
        Event::from(EventData::Custom(Box::new(custom)))
    }

    /// A typed delayed call: runs `f` on the target actor, which must be of
    /// type `T`.
    pub fn closure<T, F>(f: F) -> Event
    where
        T: Actor,
        F: FnOnce(&mut T) + Send + 'static,
    {
        Event::custom(ClosureEvent {
            f,
            _actor: PhantomData::<fn(&mut T)>,
        })
    }

    pub fn link_token(&self) -> u64 {
        self.link_token
    }

    pub(crate) fn with_link_token(mut self, token: u64) -> Event {
        self.link_token = token;
        self
    }
}

impl From<EventData> for Event {
    fn from(data: EventData) -> Event {
        Event {
            data,
            link_token: 0,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self.data {
            EventData::Start => "Start",
            EventData::Stop => "Stop",
            EventData::Yield => "Yield",
            EventData::Timeout => "Timeout",
            EventData::Hangup => "Hangup",
            EventData::Raw(_) => "Raw",
            EventData::Custom(_) => "Custom",
        };
        write!(fmt, "Event::{}", name)
    }
}

struct ClosureEvent<T, F> {
    f: F,
    _actor: PhantomData<fn(&mut T)>,
}

impl<T, F> CustomEvent for ClosureEvent<T, F>
where
    T: Actor,
    F: FnOnce(&mut T) + Send + 'static,
{
    fn run(self: Box<Self>, actor: &mut dyn Actor) {
        let any: &mut dyn Any = actor;
        match any.downcast_mut::<T>() {
            Some(actor) => (self.f)(actor),
            None => error!("closure event delivered to an actor of another type"),
        }
    }
}
