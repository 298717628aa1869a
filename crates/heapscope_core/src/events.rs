//! Frame boundary notifications
//!
//! The engine's frame loop publishes one notification per rendered frame;
//! anything that keeps per-frame counters subscribes to it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`FrameEvents::subscribe`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Publish/subscribe channel for the "new frame" event (no payload).
pub struct FrameEvents {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    frame_index: AtomicU64,
}

impl FrameEvents {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            frame_index: AtomicU64::new(0),
        }
    }

    /// Register a callback invoked on every [`publish_new_frame`].
    ///
    /// Callbacks run while the listener list is locked, so they must not
    /// subscribe or unsubscribe themselves.
    ///
    /// [`publish_new_frame`]: FrameEvents::publish_new_frame
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Notify every listener that a new frame has started.
    pub fn publish_new_frame(&self) {
        let frame = self.frame_index.fetch_add(1, Ordering::Relaxed) + 1;
        // Iterating under the lock keeps publishing allocation-free.
        let listeners = self.listeners.lock();
        tracing::trace!(frame, listeners = listeners.len(), "new frame");
        for (_, listener) in listeners.iter() {
            listener();
        }
    }

    /// Number of frames published so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for FrameEvents {
    fn default() -> Self {
        Self::new()
    }
}
