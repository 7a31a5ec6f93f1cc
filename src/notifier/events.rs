//! Minimal publish/subscribe for notifier events.

use crate::common::debug::warn;
use crate::notifier::messages::{Event, EventKind};
use anyhow::Result;
use std::collections::HashMap;

pub type Listener = Box<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Listeners per event kind, called in registration order
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Registering the same closure twice makes it fire twice.
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners.entry(kind).or_default().push(Box::new(listener));
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Call every listener for the event's kind. A failing listener is
    /// logged and does not stop the ones after it. Returns how many failed.
    pub fn emit(&self, event: &Event) -> usize {
        let Some(listeners) = self.listeners.get(&event.kind()) else {
            return 0;
        };
        let mut failed = 0;
        for (idx, listener) in listeners.iter().enumerate() {
            if let Err(e) = listener(event) {
                warn(&format!("{:?} listener #{} failed: {:#}", event.kind(), idx, e));
                failed += 1;
            }
        }
        failed
    }
}
