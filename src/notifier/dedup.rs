//! Time-bounded set of notifications already shown.
//!
//! A key is remembered for a fixed window from its first sighting. Repeats
//! inside the window do not extend it; once it lapses the same notification
//! counts as new again.

use crate::notifier::messages::Notification;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// How a notification is identified for deduplication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKeyMode {
    /// Message text plus type. Distinct notifications with identical text collapse.
    #[default]
    Content,
    /// Server-supplied id, falling back to content when there is none
    Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Content { message: String, kind: String },
    Id(String),
}

impl DedupKey {
    pub fn derive(notification: &Notification, mode: DedupKeyMode) -> Self {
        match (mode, &notification.id) {
            (DedupKeyMode::Id, Some(id)) if !id.is_null() => {
                let id = match id.as_str() {
                    Some(s) => s.to_string(),
                    None => id.to_string(),
                };
                DedupKey::Id(id)
            }
            _ => DedupKey::Content {
                message: notification.message.clone(),
                kind: notification.kind().to_string(),
            },
        }
    }
}

#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    mode: DedupKeyMode,
    /// Key -> first sighting
    seen: HashMap<DedupKey, Instant>,
}

impl DedupCache {
    pub fn new(window: Duration, mode: DedupKeyMode) -> Self {
        Self {
            window,
            mode,
            seen: HashMap::new(),
        }
    }

    /// Record the notification; true if it was not already shown within the window
    pub fn insert(&mut self, notification: &Notification) -> bool {
        self.insert_at(notification, Instant::now())
    }

    fn insert_at(&mut self, notification: &Notification, now: Instant) -> bool {
        self.expire(now);
        let key = DedupKey::derive(notification, self.mode);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        true
    }

    fn expire(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < window);
    }

    /// Keys currently suppressed
    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
