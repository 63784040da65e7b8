use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::NOTIFY_CHANNEL_CAPACITY;
use crate::model::Event;

/// Broadcast hub fanning applied events out per space. Subscribers are
/// room displays and IoT bridges; delivery is lossy for lagging receivers.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a space. Creates the channel if needed.
    pub fn subscribe(&self, space_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(space_id)
            .or_insert_with(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, space_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&space_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a space is removed).
    pub fn remove(&self, space_id: &Ulid) {
        self.channels.remove(space_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let space_id = Ulid::new();
        let mut rx = hub.subscribe(space_id);

        let event = Event::OverrideSet { space_id, seq: 1 };
        hub.send(space_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let space_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(space_id, &Event::SpaceRemoved { id: space_id });
    }

    #[tokio::test]
    async fn removed_channel_drops_receiver() {
        let hub = NotifyHub::new();
        let space_id = Ulid::new();
        let mut rx = hub.subscribe(space_id);
        hub.remove(&space_id);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
