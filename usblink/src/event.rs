//! Events pushed to the registered sink.

use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};

/// Asynchronous output of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Event {
    /// A chunk of received bytes, exactly as the port returned it.
    Data(Vec<u8>),
    /// The read loop hit an unrecoverable error while the device stayed
    /// attached; the connection is closed.
    IoError {
        /// Description of the underlying error.
        message: String,
    },
    /// The connected device was removed; the connection is closed. Reported
    /// once, whether the removal was seen by hot-plug or by a failed read.
    Detached {
        /// Identifier of the removed device.
        device_id: String,
    },
}

impl Event {
    /// Stable event code for the application layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Data(_) => "usb_data",
            Self::IoError { .. } => "usb_io_error",
            Self::Detached { .. } => "usb_device_detached",
        }
    }

    /// Whether this event means the connection is gone.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Receiver of session events.
///
/// Called from the relay thread and the session worker. Implementations must
/// not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn on_event(&self, event: Event);
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn on_event(&self, event: Event) {
        self(event);
    }
}

impl EventSink for Sender<Event> {
    fn on_event(&self, event: Event) {
        // A dropped receiver is the same as no listener
        let _ = self.send(event);
    }
}

/// The single listener slot shared by the session, worker and relay.
#[derive(Clone, Default)]
pub(crate) struct SinkSlot {
    inner: Arc<RwLock<Option<Arc<dyn EventSink>>>>,
}

impl SinkSlot {
    /// Replace the current listener.
    pub(crate) fn set(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(sink);
        }
    }

    /// Remove the current listener.
    pub(crate) fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    /// Deliver to the current listener, or drop if there is none.
    pub(crate) fn emit(&self, event: Event) {
        let sink = self.inner.read().ok().and_then(|slot| slot.clone());
        if let Some(sink) = sink {
            sink.on_event(event);
        }
    }
}
