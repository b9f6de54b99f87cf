// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Automation event notification system.
//!
//! Listeners receive state changes, log lines and unrecoverable errors
//! synchronously, in the order the controller produces them. Nothing is
//! buffered or replayed: a listener registered late only sees what happens
//! after registration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::AutomationError;
use crate::state::AutomationState;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Trait for components that want to receive automation events.
///
/// All methods have default no-op implementations, so listeners can
/// selectively override only the events they care about. Callbacks run
/// inline on the emitting task; a slow listener delays the controller.
pub trait AutomationListener: Send + Sync {
    /// Called after the current state has changed.
    fn on_state_change(&self, _old: AutomationState, _new: AutomationState) {}

    /// Called for every human-readable log line the controller emits.
    fn on_log(&self, _message: &str) {}

    /// Called when a run ends because of an unexpected fault.
    fn on_error(&self, _error: &AutomationError) {}
}

/// Manages registered listeners and dispatches events.
#[derive(Clone, Default)]
pub struct AutomationEventEmitter {
    listeners: Vec<(ListenerId, Arc<dyn AutomationListener>)>,
}

impl fmt::Debug for AutomationEventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationEventEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl AutomationEventEmitter {
    /// Create a new event emitter with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener to receive events.
    /// Returns an ID that can be used to unregister the listener.
    pub fn register(&mut self, listener: Arc<dyn AutomationListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.push((id, listener));
        id
    }

    /// Unregister a listener by its ID. Returns false if it was not registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_state_change(&self, old: AutomationState, new: AutomationState) {
        for (_, listener) in &self.listeners {
            listener.on_state_change(old, new);
        }
    }

    pub fn notify_log(&self, message: &str) {
        for (_, listener) in &self.listeners {
            listener.on_log(message);
        }
    }

    pub fn notify_error(&self, error: &AutomationError) {
        for (_, listener) in &self.listeners {
            listener.on_error(error);
        }
    }
}

/// Owned copy of a notification, for consumers that prefer a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutomationEvent {
    StateChanged {
        from: AutomationState,
        to: AutomationState,
    },
    Log {
        message: String,
    },
    Error {
        state: AutomationState,
        message: String,
    },
}

/// Listener that forwards every notification into an unbounded channel.
///
/// Events are dropped silently once the receiving side is gone.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AutomationEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<AutomationEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver that drains it.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<AutomationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

impl AutomationListener for EventSink {
    fn on_state_change(&self, old: AutomationState, new: AutomationState) {
        let _ = self.tx.send(AutomationEvent::StateChanged { from: old, to: new });
    }

    fn on_log(&self, message: &str) {
        let _ = self.tx.send(AutomationEvent::Log {
            message: message.to_string(),
        });
    }

    fn on_error(&self, error: &AutomationError) {
        let _ = self.tx.send(AutomationEvent::Error {
            state: error.state(),
            message: error.to_string(),
        });
    }
}
