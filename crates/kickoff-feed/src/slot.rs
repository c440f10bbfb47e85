//! Single-slot, latest-wins handoff between the fetch producer and the
//! broadcaster.
//!
//! `publish` never blocks and never queues: it puts the item in the slot,
//! replacing whatever the receiver has not taken yet. At most one item is
//! ever in flight, and the receiver always sees the most recent one.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Shared<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    publishers: AtomicUsize,
    closed: AtomicBool,
}

/// Outcome of [`Publisher::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    /// The slot was empty.
    Stored,
    /// An undelivered item was dropped in favor of this one.
    Replaced,
}

/// Producer half. Cloneable; the channel closes when the last clone drops.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a connected publisher/receiver pair with an empty slot.
pub fn channel<T>() -> (Publisher<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        notify: Notify::new(),
        publishers: AtomicUsize::new(1),
        closed: AtomicBool::new(false),
    });
    (
        Publisher {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

impl<T> Publisher<T> {
    pub fn publish(&self, item: T) -> Publish {
        let previous = self.shared.slot.lock().replace(item);
        self.shared.notify.notify_one();
        if previous.is_some() {
            Publish::Replaced
        } else {
            Publish::Stored
        }
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        let _ = self.shared.publishers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        if self.shared.publishers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.closed.store(true, Ordering::Release);
            self.shared.notify.notify_one();
        }
    }
}

impl<T> Receiver<T> {
    /// Wait for the next item. Returns `None` once every publisher is gone
    /// and the slot is empty.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the current item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.shared.slot.lock().take()
    }
}
