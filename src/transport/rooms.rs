//! Room hub: one broadcast channel per room
//!
//! Every event emitted for a room reaches all of its current subscribers in
//! emission order. Events emitted while nobody is subscribed are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use super::events::{ProgressEvent, ProgressSink};
use crate::metrics::ROOM_CLIENTS;

/// Events buffered per room before a slow subscriber starts lagging
const ROOM_CAPACITY: usize = 256;

#[derive(Default)]
pub struct RoomHub {
    rooms: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, room: &str) -> broadcast::Sender<ProgressEvent> {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone()
    }

    /// Subscribe to a room, creating it on first use
    pub fn join_room(&self, room: &str) -> RoomSubscription {
        let rx = self.sender(room).subscribe();
        ROOM_CLIENTS.inc();
        debug!(room, "Client joined room");
        RoomSubscription {
            room: room.to_string(),
            rx,
        }
    }

    /// Drop the room once its last subscriber has gone
    pub fn leave_room(&self, subscription: RoomSubscription) {
        let RoomSubscription { room, rx } = subscription;
        drop(rx);
        ROOM_CLIENTS.dec();
        if let Ok(mut rooms) = self.rooms.lock() {
            if rooms.get(&room).map(|tx| tx.receiver_count() == 0).unwrap_or(false) {
                rooms.remove(&room);
                debug!(room = %room, "Room closed");
            }
        }
    }

    pub fn emit(&self, room: &str, event: ProgressEvent) {
        let sender = self
            .rooms
            .lock()
            .ok()
            .and_then(|rooms| rooms.get(room).cloned());
        let delivered = sender.and_then(|tx| tx.send(event).ok()).unwrap_or(0);
        debug!(room, delivered, "Event emitted");
    }

    /// Sink bound to one room
    pub fn sink(self: &Arc<Self>, room: &str) -> Arc<RoomSink> {
        Arc::new(RoomSink {
            hub: self.clone(),
            room: room.to_string(),
        })
    }

    pub fn subscribers(&self, room: &str) -> usize {
        self.rooms
            .lock()
            .ok()
            .and_then(|rooms| rooms.get(room).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

/// Receiving half of a room membership
pub struct RoomSubscription {
    room: String,
    rx: broadcast::Receiver<ProgressEvent>,
}

impl RoomSubscription {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Next event; `None` once the room is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(room = %self.room, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct RoomSink {
    hub: Arc<RoomHub>,
    room: String,
}

impl ProgressSink for RoomSink {
    fn emit(&self, event: ProgressEvent) {
        self.hub.emit(&self.room, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_subscribers_see_events_in_order() {
        let hub = Arc::new(RoomHub::new());
        let mut a = hub.join_room("r1");
        let mut b = hub.join_room("r1");
        let mut other = hub.join_room("r2");

        let sink = hub.sink("r1");
        sink.emit(ProgressEvent::progress("one"));
        sink.emit(ProgressEvent::progress("two"));

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(ProgressEvent::progress("one")));
            assert_eq!(sub.recv().await, Some(ProgressEvent::progress("two")));
        }
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_closes_after_last_leave() {
        let hub = RoomHub::new();
        let a = hub.join_room("r1");
        let b = hub.join_room("r1");
        assert_eq!(hub.subscribers("r1"), 2);

        hub.leave_room(a);
        assert_eq!(hub.subscribers("r1"), 1);
        hub.leave_room(b);
        assert_eq!(hub.subscribers("r1"), 0);
        assert!(hub.rooms.lock().unwrap().is_empty());
    }

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let hub = RoomHub::new();
        hub.emit("empty", ProgressEvent::progress("lost"));
        assert_eq!(hub.subscribers("empty"), 0);
    }
}
