//! The public session API.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{Sender, channel};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::catalog;
use crate::config::SessionConfig;
use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::event::{EventSink, SinkSlot};
use crate::host::UsbHost;
use crate::hotplug::HotplugNotifier;
use crate::manager::{Command, ConnectionManager, LinkState};
use crate::pending::{Pending, Reply, completion};

/// A USB serial session: one host, at most one open connection.
///
/// Operations are queued to a dedicated worker thread and executed in
/// submission order. Each returns a [`Pending`] handle; callers may block on
/// it, poll it, or drop it.
///
/// Dropping the session closes the connection, fails a pending `connect`
/// with [`Error::Closed`](crate::Error::Closed) and joins the worker.
pub struct Session {
    host: Arc<dyn UsbHost>,
    config: SessionConfig,
    sink: SinkSlot,
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session on `host` and subscribe to its hot-plug events.
    pub fn start(host: impl UsbHost + 'static, config: SessionConfig) -> Result<Self> {
        let host: Arc<dyn UsbHost> = Arc::new(host);
        let sink = SinkSlot::default();
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel();

        let manager = ConnectionManager::new(
            Arc::clone(&host),
            config.clone(),
            sink.clone(),
            tx.clone(),
            Arc::clone(&alive),
        );
        let worker = thread::Builder::new()
            .name("usblink-worker".into())
            .spawn(move || manager.run(rx))?;

        let session = Self {
            host,
            config,
            sink,
            tx,
            worker: Some(worker),
        };
        // On failure the session drops here, which stops the worker.
        session
            .host
            .watch(HotplugNotifier::new(session.tx.clone(), alive))?;
        Ok(session)
    }

    /// Start a session on the OS serial driver.
    #[cfg(feature = "native")]
    pub fn native(config: SessionConfig) -> Result<Self> {
        let host = crate::host::NativeHost::new(&config);
        Self::start(host, config)
    }

    /// Configuration the session was started with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attached devices a serial driver can be matched to.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        catalog::list(self.host.as_ref())
    }

    /// Open `device_id` at `baud` (the configured default when `None`).
    ///
    /// Any existing connection is closed first. If the host has to prompt
    /// for permission, the returned handle stays pending until the prompt is
    /// answered, the device is removed, or the session shuts down.
    pub fn connect(&self, device_id: &str, baud: Option<u32>) -> Pending<()> {
        let device_id = device_id.to_string();
        let baud = baud.unwrap_or(self.config.default_baud);
        self.submit(|reply| Command::Connect {
            device_id,
            baud,
            reply,
        })
    }

    /// Write bytes to the open connection within the configured write timeout.
    pub fn write(&self, data: &[u8]) -> Pending<()> {
        let data = data.to_vec();
        self.submit(|reply| Command::Write { data, reply })
    }

    /// Close the open connection. Always succeeds.
    pub fn disconnect(&self) -> Pending<()> {
        self.submit(|reply| Command::Disconnect { reply })
    }

    /// Snapshot of the connection state, taken after all earlier operations.
    pub fn state(&self) -> Pending<LinkState> {
        self.submit(|reply| Command::State { reply })
    }

    /// Register the event listener, replacing any previous one.
    pub fn set_event_sink(&self, sink: impl EventSink + 'static) {
        self.sink.set(Arc::new(sink));
    }

    /// Remove the event listener. Later events are dropped.
    pub fn clear_event_sink(&self) {
        self.sink.clear();
    }

    fn submit<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Pending<T> {
        let (reply, pending) = completion();
        if self.tx.send(command(reply)).is_err() {
            // The rejected command, and its reply, were dropped: the handle
            // resolves to `Closed`.
            debug!("Session worker is gone, dropping command");
        }
        pending
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Session worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::host::MemoryHost;
    use crate::host::memory::VirtualDevice;

    fn device(id: &str, vid: u16, pid: u16) -> VirtualDevice {
        VirtualDevice::new(DeviceDescriptor::new(id, vid, pid))
    }

    #[test]
    fn test_connect_uses_default_baud() {
        let host = MemoryHost::new();
        host.attach(device("ttyACM0", 0x2341, 0x0043));
        let config = SessionConfig::default().with_default_baud(57600);
        let session = Session::start(host.clone(), config).unwrap();

        session.connect("ttyACM0", None).wait().unwrap();
        assert_eq!(
            session.state().wait().unwrap(),
            LinkState::Open {
                device_id: "ttyACM0".into(),
                baud: 57600,
            }
        );
    }

    #[test]
    fn test_drop_releases_connection() {
        let host = MemoryHost::new();
        host.attach(device("ttyUSB0", 0x1A86, 0x7523));
        {
            let session = Session::start(host.clone(), SessionConfig::default()).unwrap();
            session.connect("ttyUSB0", Some(9600)).wait().unwrap();
            assert_eq!(host.open_ports(), 1);
        }
        assert_eq!(host.open_ports(), 0);
        assert_eq!(host.open_handles(), 0);
    }

    #[test]
    fn test_drop_fails_pending_connect() {
        let host = MemoryHost::new();
        host.attach(device("ttyUSB1", 0x10C4, 0xEA60).requiring_permission());
        let session = Session::start(host.clone(), SessionConfig::default()).unwrap();

        let pending = session.connect("ttyUSB1", None);
        drop(session);
        assert!(matches!(pending.wait(), Err(Error::Closed)));
    }

    #[test]
    fn test_list_devices() {
        let host = MemoryHost::new();
        host.attach(device("ttyUSB0", 0x1A86, 0x7523));
        host.attach(device("hid0", 0x046D, 0xC52B).without_driver());
        let session = Session::start(host, SessionConfig::default()).unwrap();

        let listed = session.list_devices();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ttyUSB0");
    }
}
