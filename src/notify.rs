use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::error::BookingError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "reservation-request.created")]
    RequestCreated,
    #[serde(rename = "host-reviewed-reservation-request")]
    HostReviewed,
    #[serde(rename = "reservation.canceled")]
    ReservationCanceled,
    #[serde(rename = "accommodation.delete")]
    AccommodationDelete,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::RequestCreated,
        Topic::HostReviewed,
        Topic::ReservationCanceled,
        Topic::AccommodationDelete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::RequestCreated => "reservation-request.created",
            Topic::HostReviewed => "host-reviewed-reservation-request",
            Topic::ReservationCanceled => "reservation.canceled",
            Topic::AccommodationDelete => "accommodation.delete",
        }
    }

    pub fn parse(s: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of an outbound notification.
///
/// `user_id` is the receiver: the host for created/canceled, the guest for a
/// host review. `status` is the tag (`"automatic"`, `"accept-request"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notification {
    Reservation {
        user_id: Ulid,
        reservation_id: Ulid,
        status: String,
    },
    HostDeleted {
        #[serde(rename = "id")]
        host_id: Ulid,
    },
}

impl Notification {
    pub fn reservation(receiver: Ulid, reservation_id: Ulid, status: &str) -> Self {
        Notification::Reservation {
            user_id: receiver,
            reservation_id,
            status: status.to_string(),
        }
    }
}

/// Fire-and-forget outbound events. Callers log failures and move on.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: Topic, notification: &Notification) -> Result<(), BookingError>;
}

/// Publish and swallow the error, logging and counting it.
pub(crate) fn publish_or_warn(publisher: &dyn EventPublisher, topic: Topic, notification: &Notification) {
    if let Err(e) = publisher.publish(topic, notification) {
        tracing::warn!("publish to {topic} failed: {e}");
        metrics::counter!(crate::observability::PUBLISH_FAILURES_TOTAL, "topic" => topic.as_str()).increment(1);
    } else {
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "topic" => topic.as_str()).increment(1);
    }
}

/// In-process broadcast hub, one channel per topic.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Notification>>,
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

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, topic: Topic, notification: &Notification) {
        if let Some(sender) = self.channels.get(&topic) {
            let _ = sender.send(notification.clone());
        }
    }
}

impl EventPublisher for NotifyHub {
    fn publish(&self, topic: Topic, notification: &Notification) -> Result<(), BookingError> {
        self.send(topic, notification);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures everything published, in order. Can be told to fail.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub sent: Mutex<Vec<(Topic, Notification)>>,
        pub fail: bool,
    }

    impl RecordingPublisher {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn take(&self) -> Vec<(Topic, Notification)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, topic: Topic, notification: &Notification) -> Result<(), BookingError> {
            if self.fail {
                return Err(BookingError::Storage("broker unavailable".into()));
            }
            self.sent.lock().unwrap().push((topic, notification.clone()));
            Ok(())
        }
    }
}
