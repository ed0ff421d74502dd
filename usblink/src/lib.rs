//! # usblink
//!
//! A USB serial session manager.
//!
//! This crate lets an application enumerate USB serial adapters, open one
//! connection at a time, stream received bytes to a listener, write bytes
//! with a bounded timeout, and react to the device being unplugged,
//! including:
//!
//! - Device catalog with driver matching
//! - Permission negotiation for hosts that prompt the user
//! - A single-worker connection state machine
//! - A background read relay per connection
//! - Hot-plug handling for pending and active connections
//!
//! ## Hosts
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//! - **Memory**: an in-memory virtual bus for tests and custom transports
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for descriptors, events and state
//!
//! ## Example
//!
//! ```rust,no_run
//! use usblink::{Event, Session};
//!
//! fn run(session: &Session) -> usblink::Result<()> {
//!     for device in session.list_devices() {
//!         println!("{device}");
//!     }
//!
//!     session.set_event_sink(|event: Event| {
//!         if let Event::Data(bytes) = event {
//!             print!("{}", String::from_utf8_lossy(&bytes));
//!         }
//!     });
//!
//!     session.connect("/dev/ttyUSB0", Some(115200)).wait()?;
//!     session.write(b"AT\r\n").wait()?;
//!     session.disconnect().wait()
//! }
//!
//! # #[cfg(feature = "native")]
//! # fn main() -> usblink::Result<()> {
//! let session = Session::native(usblink::SessionConfig::default())?;
//! run(&session)
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod host;
pub mod hotplug;
mod manager;
mod pending;
pub mod permission;
pub mod port;
mod relay;
mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {host::NativeHost, port::native::NativePort};
pub use {
    catalog::format_listing,
    config::SessionConfig,
    device::{DeviceDescriptor, DeviceKind},
    error::{Error, ErrorKind, Result},
    event::{Event, EventSink},
    host::{DeviceHandle, MemoryHost, SerialDriver, UsbHost},
    hotplug::{HotplugEvent, HotplugNotifier},
    manager::LinkState,
    pending::Pending,
    permission::PermissionResponder,
    port::{LineConfig, SerialPort},
    session::Session,
};
