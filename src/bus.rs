//! Event bus for broadcasting process lifecycle events.
//!
//! [`Bus`] carries the [`Event`] stream from the registry and the
//! per-process supervisors to any number of subscribers. Every published
//! event is stamped with a monotonic sequence number: the broadcast channel
//! drops the oldest events for lagging subscribers, and the gap in `seq`
//! tells a consumer exactly how many it missed for a given process.
//!
//! - [`Bus::publish`] stamps and sends an event to all subscribers.
//! - [`Bus::process`] publishes the common bare lifecycle event of one
//!   process.
//! - [`Bus::subscribe`] creates a new receiver for consuming events.
//!
//! Attach an [`Observer`](crate::observer::Observer) via
//! [`Registry::observe`](crate::registry::Registry::observe) to consume the
//! stream, or subscribe directly for custom integrations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::{Event, EventKind};

/// Broadcast channel for process lifecycle events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    seq: Arc<AtomicU64>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stamps the event with the next sequence number and publishes it.
    ///
    /// Errors are ignored if there are no active subscribers.
    pub fn publish(&self, mut ev: Event) {
        ev.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(ev);
    }

    /// Publishes a bare lifecycle event for one process.
    pub fn process(&self, kind: EventKind, id: &str) {
        self.publish(Event::now(kind).with_process(id));
    }

    /// Subscribes to the bus and returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stamps_publish_order() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();

        bus.process(EventKind::ProcessAdded, "cam1");
        bus.publish(Event::now(EventKind::ProcessRemoved).with_process("cam1"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(first.kind, EventKind::ProcessAdded);
        assert_eq!(first.process.as_deref(), Some("cam1"));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.kind, EventKind::ProcessRemoved);
    }
}
