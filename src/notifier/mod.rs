//! Polling notifier for the CRM's chat and notification feeds.
//!
//! Each cycle fetches notifications and the chats changed since the last
//! cycle, shows each notification once per dedup window, and fires
//! `ChatsUpdated` when anything changed. Polling runs only while the host is
//! visible. Cycles never overlap: the next tick is not awaited until the
//! current cycle's fetches have completed.

pub mod dedup;
pub mod desktop;
pub mod events;
pub mod messages;
pub mod transport;

use crate::common::config::NotifierConfig;
use crate::common::debug::{debug_log, info, warn};
use anyhow::Result;
use chrono::Utc;
use dedup::DedupCache;
use events::EventBus;
use messages::{Event, EventKind, Notification};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use transport::Transport;

/// Whether the notifier's host is currently shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

pub struct Notifier<T> {
    transport: T,
    events: EventBus,
    dedup: DedupCache,
    poll_interval: Duration,
    /// `updated_since` for the next chats fetch, unix ms
    last_update_ms: i64,
    cycles: u64,
}

impl<T: Transport> Notifier<T> {
    pub fn new(transport: T, config: &NotifierConfig) -> Self {
        Self {
            transport,
            events: EventBus::new(),
            dedup: DedupCache::new(config.dedup_window(), config.dedup_key),
            poll_interval: config.poll_interval(),
            last_update_ms: now_ms(),
            cycles: 0,
        }
    }

    /// Register a listener for an event kind
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.events.on(kind, listener);
    }

    pub fn watermark(&self) -> i64 {
        self.last_update_ms
    }

    #[cfg(test)]
    pub fn set_watermark(&mut self, unix_ms: i64) {
        self.last_update_ms = unix_ms;
    }

    /// Completed poll cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Poll until `shutdown` resolves or the visibility sender is dropped.
    ///
    /// While hidden no timer runs. On becoming visible a cycle runs at once
    /// and the interval restarts from there. A cycle in progress when the
    /// host hides or shutdown fires is completed and its results dispatched.
    pub async fn run(
        &mut self,
        mut visibility: watch::Receiver<Visibility>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        let mut ticker: Option<Interval> = None;

        loop {
            let visible = *visibility.borrow_and_update() == Visibility::Visible;

            if !visible {
                if ticker.take().is_some() {
                    debug_log("host hidden, polling suspended");
                }
                tokio::select! {
                    _ = &mut shutdown => break,
                    changed = visibility.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            let poll_interval = self.poll_interval;
            let ticker = ticker.get_or_insert_with(|| {
                debug_log("polling started");
                let mut ticker = interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });

            tokio::select! {
                _ = &mut shutdown => break,
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        debug_log(&format!(
            "notifier stopped after {} cycles, {} notifications suppressed",
            self.cycles,
            self.dedup.len()
        ));
    }

    /// One cycle: both fetches concurrently, each best-effort. The watermark
    /// moves to now even if a fetch failed.
    pub async fn poll_once(&mut self) {
        let since = self.last_update_ms;
        let (notifications, chats) = tokio::join!(
            self.transport.fetch_notifications(),
            self.transport.fetch_updated_chats(since)
        );

        match notifications {
            Ok(list) => {
                self.ingest_notifications(list);
            }
            Err(e) => warn(&format!("notifications fetch failed: {}", e)),
        }
        match chats {
            Ok(chats) => {
                self.ingest_chats(chats);
            }
            Err(e) => warn(&format!("chats fetch failed: {}", e)),
        }

        self.last_update_ms = now_ms();
        self.cycles += 1;
    }

    /// Dedup and dispatch notifications from any transport. Returns how many
    /// were new.
    pub fn ingest_notifications(&mut self, notifications: Vec<Notification>) -> usize {
        let mut dispatched = 0;
        for notification in notifications {
            if !self.dedup.insert(&notification) {
                continue;
            }
            dispatched += 1;
            if self.events.listener_count(EventKind::Notification) == 0 {
                info(&format!("[{}] {}", notification.kind(), notification.message));
                continue;
            }
            self.events.emit(&Event::Notification(notification));
        }
        dispatched
    }

    /// Fire `ChatsUpdated` if the batch is non-empty
    pub fn ingest_chats(&mut self, chats: Vec<Value>) -> bool {
        if chats.is_empty() {
            return false;
        }
        debug_log(&format!("{} chats updated", chats.len()));
        self.events.emit(&Event::ChatsUpdated(chats));
        true
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
