use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{db::models::Reading, error::NotifierError};

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 256;

/// Push sink for freshly captured readings.
///
/// `publish` must not block. Delivery is best-effort and at-most-once;
/// callers log errors and carry on.
pub trait Notifier: Send + Sync {
    fn publish(&self, reading: &Reading) -> Result<(), NotifierError>;
}

/// Event pushed to live listeners for every committed reading.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingEvent {
    pub event: &'static str,
    pub reading: Reading,
}

impl ReadingEvent {
    pub const CAPTURED: &'static str = "reading.captured";

    pub fn captured(reading: Reading) -> Self {
        Self {
            event: Self::CAPTURED,
            reading,
        }
    }
}

/// In-process fan-out over a [`broadcast`] channel.
///
/// Cheap to clone; every clone publishes into the same channel. When the
/// buffer is full the oldest events are dropped and slow receivers observe
/// `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ReadingEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, reading: &Reading) -> Result<(), NotifierError> {
        match self.sender.send(ReadingEvent::captured(reading.clone())) {
            Ok(listeners) => {
                debug!(listeners, reading_id = %reading.id, "Reading broadcast");
                Ok(())
            }
            // Only fails when nobody is subscribed.
            Err(_) => Err(NotifierError::NoSubscribers),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn reading() -> Reading {
        Reading {
            id: Uuid::new_v4(),
            date: "2024-11-20".parse().unwrap(),
            time_of_day: "10:00:00".parse().unwrap(),
            temperature: 22.5,
            humidity: 55.0,
            fan_active: false,
            alarm_active: false,
            signal: false,
            avg_temperature: None,
            avg_humidity: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_reading() {
        let bus = BroadcastNotifier::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let r = reading();

        bus.publish(&r).unwrap();

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.event, ReadingEvent::CAPTURED);
        assert_eq!(got_a.reading, r);
        assert_eq!(got_b.reading.id, r.id);
    }

    #[test]
    fn publish_without_subscribers_reports_it() {
        let bus = BroadcastNotifier::default();
        let err = bus.publish(&reading()).unwrap_err();
        assert!(matches!(err, NotifierError::NoSubscribers));
    }

    #[test]
    fn clones_share_the_channel() {
        let bus = BroadcastNotifier::new(4);
        let clone = bus.clone();
        let _rx = bus.subscribe();
        assert_eq!(clone.subscriber_count(), 1);
        assert!(clone.publish(&reading()).is_ok());
    }

    #[test]
    fn event_serializes_with_reading_payload() {
        let json = serde_json::to_value(ReadingEvent::captured(reading())).unwrap();
        assert_eq!(json["event"], "reading.captured");
        assert_eq!(json["reading"]["time_of_day"], "10:00:00");
        assert_eq!(json["reading"]["temperature"], 22.5);
    }
}
