//! In-process change notifications.
//!
//! Publishing is fire-and-forget: a missing subscriber or a payload that
//! fails to serialize never fails the operation that published.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

pub const OBJECT_ACCESSED: &str = "accessed";
pub const OBJECT_CREATED: &str = "created";
pub const OBJECT_UPDATED: &str = "updated";
pub const OBJECT_OVERWRITTEN: &str = "overwritten";
pub const OBJECT_DELETED: &str = "deleted";
pub const GROUP_CREATED: &str = "group-created";
pub const GROUP_UPDATED: &str = "group-updated";
pub const GROUP_DELETED: &str = "group-deleted";

/// Every group a client may subscribe to.
pub const EVENT_GROUPS: [&str; 8] = [
    OBJECT_ACCESSED,
    OBJECT_CREATED,
    OBJECT_UPDATED,
    OBJECT_OVERWRITTEN,
    OBJECT_DELETED,
    GROUP_CREATED,
    GROUP_UPDATED,
    GROUP_DELETED,
];

const DEFAULT_CAPACITY: usize = 256;

#[derive(Serialize, Clone, Debug)]
pub struct Event {
    pub group: &'static str,
    pub subject_id: Uuid,
    pub payload: Option<Value>,
    pub published_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish<T: Serialize>(&self, group: &'static str, subject_id: Uuid, payload: Option<&T>) {
        let payload = match payload.map(serde_json::to_value).transpose() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("dropping {} event for {}: payload not serializable: {}", group, subject_id, err);
                return;
            }
        };

        let event = Event {
            group,
            subject_id,
            payload,
            published_at: Utc::now(),
        };
        if self.sender.send(event).is_err() {
            trace!("no subscribers for {} event on {}", group, subject_id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

/// Resolve a client-supplied group name to its static form.
pub fn known_group(name: &str) -> Option<&'static str> {
    EVENT_GROUPS.iter().copied().find(|group| *group == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.publish(OBJECT_CREATED, id, Some(&serde_json::json!({"name": "a"})));
        bus.publish::<()>(OBJECT_OVERWRITTEN, id, None);

        let created = rx.recv().await.unwrap();
        assert_eq!(created.group, OBJECT_CREATED);
        assert_eq!(created.subject_id, id);
        assert_eq!(created.payload.unwrap()["name"], "a");

        let overwritten = rx.recv().await.unwrap();
        assert!(overwritten.payload.is_none());
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        EventBus::default().publish::<()>(OBJECT_DELETED, Uuid::new_v4(), None);
    }

    #[test]
    fn known_groups() {
        assert_eq!(known_group("group-created"), Some(GROUP_CREATED));
        assert_eq!(known_group("nope"), None);
    }
}
