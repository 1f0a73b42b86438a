//! Bounded FIFO event bus carrying lifecycle notifications from the audio
//! and registry threads to the supervisor loop.
//!
//! Hand-rolled on `Mutex`/`Condvar` rather than a channel crate: the
//! overflow precondition (`|pending| < CAPACITY`) is meant to be an asserted
//! invariant, not an `Err`/block outcome, matching the broker this is
//! modelled on.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Maximum number of events the bus will hold before the producer-side
/// invariant is violated.
pub const CAPACITY: usize = 50;

/// A notification delivered from a realtime or registry thread to the
/// supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AudioStarted,
    AudioStopped,
    AudioProcessed,
    AudioClientChange,
    /// An unrecoverable condition (sample-rate or buffer-size change) was
    /// reported; the supervisor should terminate after handling this.
    Fatal(String),
    /// The bus has been closed; no further events will ever arrive.
    Closed,
}

struct Inner {
    pending: VecDeque<Event>,
    closed: bool,
}

/// A bounded, FIFO, multi-producer single-consumer event channel.
pub struct EventBus {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends `event` to the queue and wakes the consumer.
    ///
    /// # Panics
    ///
    /// Panics if the queue already holds `CAPACITY` events: a full queue
    /// means the supervisor has stopped draining it, which is a logic bug
    /// rather than a condition to recover from.
    pub fn send(&self, event: Event) {
        let mut inner = self.inner.lock().expect("event bus mutex poisoned");
        if inner.closed {
            return;
        }
        assert!(
            inner.pending.len() < CAPACITY,
            "event bus overflow: {} pending events",
            inner.pending.len()
        );
        inner.pending.push_back(event);
        self.ready.notify_one();
    }

    /// Blocks until an event is available, then pops and returns it in FIFO
    /// order. Returns `Event::Closed` forever once `close()` has been
    /// called and the queue has drained.
    pub fn recv(&self) -> Event {
        let mut inner = self.inner.lock().expect("event bus mutex poisoned");
        loop {
            if let Some(event) = inner.pending.pop_front() {
                return event;
            }
            if inner.closed {
                return Event::Closed;
            }
            inner = self.ready.wait(inner).expect("event bus mutex poisoned");
        }
    }

    /// Marks the bus closed and wakes any blocked consumer. Already-queued
    /// events are still delivered before `Closed` starts being returned.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("event bus mutex poisoned");
        inner.closed = true;
        self.ready.notify_all();
    }
}
