//! Wire types returned by the CRM API and the events dispatched to listeners.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_NOTIFICATION_KIND: &str = "info";

/// A notification as served by `GET /api/notifications`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    /// Severity such as "info" or "warn"; absent or null means "info"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Stable server identifier, when the server supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Notification {
    #[cfg(test)]
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind.into()),
            id: None,
        }
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(DEFAULT_NOTIFICATION_KIND)
    }
}

/// `/api/notifications` body: a bare list, or wrapped in an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum NotificationsBody {
    List(Vec<Notification>),
    Wrapped { notifications: Vec<Notification> },
}

impl NotificationsBody {
    pub(crate) fn into_vec(self) -> Vec<Notification> {
        match self {
            NotificationsBody::List(list) => list,
            NotificationsBody::Wrapped { notifications } => notifications,
        }
    }
}

/// `/api/chats` body. Chat records stay opaque.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ChatsBody {
    List(Vec<Value>),
    Wrapped { chats: Vec<Value> },
}

impl ChatsBody {
    pub(crate) fn into_vec(self) -> Vec<Value> {
        match self {
            ChatsBody::List(list) => list,
            ChatsBody::Wrapped { chats } => chats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A notification seen for the first time within the dedup window
    Notification,
    /// Chats changed since the previous cycle
    ChatsUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Notification(Notification),
    ChatsUpdated(Vec<Value>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Notification(_) => EventKind::Notification,
            Event::ChatsUpdated(_) => EventKind::ChatsUpdated,
        }
    }
}
