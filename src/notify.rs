use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::AppointmentEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Per-barber broadcast of appointment changes.
///
/// A receiver hearing anything for a barber should treat its day snapshot as stale.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<AppointmentEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes for a barber. Creates the channel if needed.
    pub fn subscribe(&self, barber_id: Ulid) -> broadcast::Receiver<AppointmentEvent> {
        let sender = self
            .channels
            .entry(barber_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, barber_id: Ulid, event: &AppointmentEvent) {
        if let Some(sender) = self.channels.get(&barber_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Close a barber's channel. Open receivers drain what was sent, then see `Closed`.
    pub fn remove(&self, barber_id: &Ulid) {
        self.channels.remove(barber_id);
    }
}
