//! Change-tuple emission. The control plane is a producer on a bounded
//! MPSC channel; the change-stream worker (out of scope here, an
//! external collaborator) is the consumer. Backpressure policy: when the
//! buffer exceeds its bound, the oldest buffered tuple is dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use kvdb_core::TypedValue;
use parking_lot::{Condvar, Mutex};

/// One committed mutation, as delivered to change-stream subscribers.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub lsn: u64,
    pub key: String,
    pub before: Option<TypedValue>,
    pub after: Option<TypedValue>,
}

struct ChannelInner {
    queue: VecDeque<ChangeEvent>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

/// The control plane's handle on the channel. Not [`Clone`] — one
/// `Database` owns exactly one sender and closes it on drop.
pub(crate) struct ChangeSender {
    inner: Arc<Mutex<ChannelInner>>,
    condvar: Arc<Condvar>,
}

/// A change-stream subscriber's handle. Cloning a receiver would split
/// the queue's items across clones on a first-come basis, which is
/// rarely what a subscriber wants, so this type isn't `Clone` either —
/// `Database::subscribe_changes` hands out exactly one.
pub struct ChangeReceiver {
    inner: Arc<Mutex<ChannelInner>>,
    condvar: Arc<Condvar>,
}

pub(crate) fn change_channel(capacity: usize) -> (ChangeSender, ChangeReceiver) {
    let inner = Arc::new(Mutex::new(ChannelInner {
        queue: VecDeque::with_capacity(capacity.min(256)),
        capacity: capacity.max(1),
        dropped: 0,
        closed: false,
    }));
    let condvar = Arc::new(Condvar::new());
    (
        ChangeSender { inner: inner.clone(), condvar: condvar.clone() },
        ChangeReceiver { inner, condvar },
    )
}

impl ChangeSender {
    /// Pushes an event, dropping the oldest buffered one first if the
    /// channel is at capacity (spec §5's documented at-least-once-is-not-
    /// promised backpressure policy).
    pub(crate) fn send(&self, event: ChangeEvent) {
        let mut inner = self.inner.lock();
        if inner.queue.len() >= inner.capacity {
            inner.queue.pop_front();
            inner.dropped += 1;
        }
        inner.queue.push_back(event);
        self.condvar.notify_one();
    }

    pub(crate) fn close(&self) {
        self.inner.lock().closed = true;
        self.condvar.notify_all();
    }
}

impl ChangeReceiver {
    /// Blocks until an event is available or the channel is closed
    /// (`None`).
    pub fn recv(&self) -> Option<ChangeEvent> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(event) = inner.queue.pop_front() {
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            self.condvar.wait(&mut inner);
        }
    }

    /// Non-blocking poll: `Some(None)` distinguishes "nothing buffered"
    /// from `recv`'s "channel closed", so this returns a plain `Option`
    /// with no event on either case — callers that care about closedness
    /// should use `recv` on its own thread instead.
    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.inner.lock().queue.pop_front()
    }

    /// Number of tuples dropped so far due to the channel being full.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }
}
