//! Hardware attach/detach notifications.
//!
//! Hosts report hot-plug changes through a [`HotplugNotifier`], which only
//! posts the event into the session worker's queue. The worker then decides,
//! against its own copy of the connection state, whether the event cancels a
//! pending permission request, tears down the active connection, or is
//! unrelated.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use crate::manager::Command;

/// An OS-level device change.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HotplugEvent {
    /// A device appeared.
    Attached(String),
    /// A device disappeared.
    Detached(String),
}

impl HotplugEvent {
    /// Identifier of the device the event is about.
    pub fn device_id(&self) -> &str {
        match self {
            Self::Attached(id) | Self::Detached(id) => id,
        }
    }
}

/// Cloneable handle hosts use to report hot-plug events.
#[derive(Clone)]
pub struct HotplugNotifier {
    tx: Sender<Command>,
    alive: Arc<AtomicBool>,
}

impl HotplugNotifier {
    pub(crate) fn new(tx: Sender<Command>, alive: Arc<AtomicBool>) -> Self {
        Self { tx, alive }
    }

    /// Report an event. Returns `false` once the session has shut down, at
    /// which point watchers should stop.
    pub fn notify(&self, event: HotplugEvent) -> bool {
        self.is_alive()
            && self.tx.send(Command::Hotplug(event)).is_ok()
    }

    /// Report that `device_id` appeared.
    pub fn attached(&self, device_id: impl Into<String>) -> bool {
        self.notify(HotplugEvent::Attached(device_id.into()))
    }

    /// Report that `device_id` disappeared.
    pub fn detached(&self, device_id: impl Into<String>) -> bool {
        self.notify(HotplugEvent::Detached(device_id.into()))
    }

    /// Whether the session is still accepting events.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Events that turn the `previous` device set into `current`.
///
/// Detaches come first so that a device re-enumerated under the same name
/// is seen as removed before it is seen as added again.
pub fn diff(previous: &[String], current: &[String]) -> Vec<HotplugEvent> {
    let before: HashSet<&str> = previous.iter().map(String::as_str).collect();
    let after: HashSet<&str> = current.iter().map(String::as_str).collect();

    let detached = previous
        .iter()
        .filter(|id| !after.contains(id.as_str()))
        .map(|id| HotplugEvent::Detached(id.clone()));
    let attached = current
        .iter()
        .filter(|id| !before.contains(id.as_str()))
        .map(|id| HotplugEvent::Attached(id.clone()));

    detached.chain(attached).collect()
}
