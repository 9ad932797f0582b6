//! Bounded SPSC stage queues.
//!
//! Each queue is a `ringbuf::HeapRb` split into one producer and one consumer,
//! plus a `tokio::sync::Notify` so the consumer can await new items without
//! polling. Pushing never waits: when the ring is full the new item is handed
//! back to the caller, which drops it.
//!
//! Dropping the [`StageSender`] closes the queue. The receiver still drains
//! whatever is buffered, then `recv` returns `None`.

pub mod chunk;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tokio::sync::Notify;

struct Shared {
    notify: Notify,
    closed: AtomicBool,
}

/// Producer half of a stage queue.
pub struct StageSender<T> {
    inner: HeapProd<T>,
    shared: Arc<Shared>,
}

/// Consumer half of a stage queue.
pub struct StageReceiver<T> {
    inner: HeapCons<T>,
    shared: Arc<Shared>,
}

/// Create a queue holding at most `capacity` items.
///
/// # Panics
/// Panics if `capacity` is zero. Session config validation rejects that first.
pub fn stage_queue<T>(capacity: usize) -> (StageSender<T>, StageReceiver<T>) {
    let (prod, cons) = HeapRb::<T>::new(capacity).split();
    let shared = Arc::new(Shared {
        notify: Notify::new(),
        closed: AtomicBool::new(false),
    });
    (
        StageSender {
            inner: prod,
            shared: Arc::clone(&shared),
        },
        StageReceiver {
            inner: cons,
            shared,
        },
    )
}

impl<T> StageSender<T> {
    /// Enqueue without waiting. A full queue returns the item in `Err`.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        self.inner.try_push(item)?;
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

impl<T> Drop for StageSender<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl<T> StageReceiver<T> {
    /// Wait for the next item. Returns `None` once the sender is gone and the
    /// queue is drained.
    ///
    /// Cancel-safe: an item is only removed from the ring after the future
    /// resolves, so racing this in `tokio::select!` never loses data.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.inner.try_pop() {
                return Some(item);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                // A push may land between the pop above and the close flag.
                return self.inner.try_pop();
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.try_pop()
    }

    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
