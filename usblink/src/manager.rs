//! Connection manager: the state machine run by the session worker.
//!
//! All connection state lives in [`ConnectionManager`], which is owned by a
//! single worker thread. Callers, host callbacks and the I/O relay only post
//! [`Command`]s into its queue, so every transition happens in submission
//! order without locks around the state.
//!
//! ```text
//!            connect (access held)
//!   Idle ----------------------------------------> Open
//!    |  ^                                          |  ^
//!    |  | denied / detached / vanished             |  | connect (tears down
//!    |  |                                          |  |  first)
//!    v  |         granted + opened                 v  |
//!   AwaitingPermission ---------------------------> Open
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};

use log::{debug, info, trace, warn};

use crate::catalog;
use crate::config::SessionConfig;
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::event::{Event, SinkSlot};
use crate::host::{DeviceHandle, UsbHost};
use crate::hotplug::HotplugEvent;
use crate::pending::Reply;
use crate::permission::{Access, PendingPermissionRequest, PermissionNegotiator, Resumed};
use crate::port::{LineConfig, PortReader, SerialPort};
use crate::relay::IoRelay;

/// Messages processed by the session worker.
pub(crate) enum Command {
    Connect {
        device_id: String,
        baud: u32,
        reply: Reply<()>,
    },
    Write {
        data: Vec<u8>,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    State {
        reply: Reply<LinkState>,
    },
    PermissionDecision {
        token: u64,
        device_id: String,
        granted: bool,
    },
    Hotplug(HotplugEvent),
    RelayFailed {
        generation: u64,
        message: String,
    },
    Shutdown,
}

/// Snapshot of the session's connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LinkState {
    /// No connection and no outstanding permission request.
    Idle,
    /// A `connect` is parked on a permission prompt.
    AwaitingPermission {
        /// Device the prompt is for.
        device_id: String,
        /// Baud rate the connection will use once granted.
        baud: u32,
    },
    /// A port is open and its relay is running.
    Open {
        /// Connected device.
        device_id: String,
        /// Configured baud rate.
        baud: u32,
    },
}

impl LinkState {
    /// Whether a connection is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Device the state refers to, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::AwaitingPermission { device_id, .. } | Self::Open { device_id, .. } => {
                Some(device_id)
            },
        }
    }
}

#[derive(Default)]
enum ConnectionState {
    #[default]
    Idle,
    AwaitingPermission(PendingPermissionRequest),
    Open(ActiveConnection),
}

/// Everything acquired for one open connection.
///
/// Dropping it releases the relay, then the port, then the device handle.
struct ActiveConnection {
    device_id: String,
    baud: u32,
    generation: u64,
    handle: Box<dyn DeviceHandle>,
    port: Box<dyn SerialPort>,
    relay: IoRelay,
}

impl ActiveConnection {
    /// Run the open sequence, releasing anything partially acquired on
    /// failure.
    fn establish(
        host: &dyn UsbHost,
        device: &DeviceDescriptor,
        baud: u32,
        generation: u64,
        config: &SessionConfig,
        sink: &SinkSlot,
        tx: &Sender<Command>,
    ) -> Result<Self> {
        let mut driver = host
            .probe_driver(device)
            .ok_or_else(|| Error::DriverMissing(device.id.clone()))?;

        let mut handle = host
            .open_device(device)
            .map_err(|e| Error::OpenFailed {
                device: device.id.clone(),
                reason: e.to_string(),
            })?;

        let Some(mut port) = driver.first_port() else {
            release_handle(handle.as_mut());
            return Err(Error::PortMissing(device.id.clone()));
        };
        debug!("Using port {} of {}", port.name(), device.id);

        // The OS refusing the port (busy, no access, not a tty) is an open
        // failure, not a configuration one.
        if let Err(e) = port.open(handle.as_mut()) {
            release_port(port.as_mut());
            release_handle(handle.as_mut());
            return Err(Error::OpenFailed {
                device: device.id.clone(),
                reason: e.to_string(),
            });
        }

        let configured = configure(port.as_mut(), baud, config).and_then(|reader| {
            IoRelay::start(
                reader,
                &device.id,
                generation,
                config.read_buffer_size,
                sink.clone(),
                tx.clone(),
            )
        });

        match configured {
            Ok(relay) => Ok(Self {
                device_id: device.id.clone(),
                baud,
                generation,
                handle,
                port,
                relay,
            }),
            Err(e) => {
                release_port(port.as_mut());
                release_handle(handle.as_mut());
                Err(Error::ConnectFailed(e.to_string()))
            },
        }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.relay.stop();
        release_port(self.port.as_mut());
        release_handle(self.handle.as_mut());
        debug!(
            "Released connection {} to {}",
            self.generation, self.device_id
        );
    }
}

/// Apply 8-N-1 framing, RTS low and DTR high to an open port, and hand back
/// a reader for the relay.
fn configure(port: &mut dyn SerialPort, baud: u32, config: &SessionConfig) -> Result<PortReader> {
    port.set_parameters(&LineConfig::new(baud))?;
    trace!("Setting RTS low, DTR high on {}", port.name());
    port.set_rts(false)?;
    port.set_dtr(true)?;
    port.reader(config.read_timeout)
}

fn release_port(port: &mut dyn SerialPort) {
    if let Err(e) = port.close() {
        warn!("Failed to close port {}: {e}", port.name());
    }
}

fn release_handle(handle: &mut dyn DeviceHandle) {
    if let Err(e) = handle.close() {
        warn!("Failed to close device {}: {e}", handle.device_id());
    }
}

/// State owned by the session worker.
pub(crate) struct ConnectionManager {
    host: Arc<dyn UsbHost>,
    config: SessionConfig,
    sink: SinkSlot,
    tx: Sender<Command>,
    alive: Arc<AtomicBool>,
    negotiator: PermissionNegotiator,
    state: ConnectionState,
    next_generation: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        host: Arc<dyn UsbHost>,
        config: SessionConfig,
        sink: SinkSlot,
        tx: Sender<Command>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            host,
            config,
            sink,
            negotiator: PermissionNegotiator::new(tx.clone()),
            tx,
            alive,
            state: ConnectionState::Idle,
            next_generation: 0,
        }
    }

    /// Process commands until `Shutdown`.
    pub(crate) fn run(mut self, rx: Receiver<Command>) {
        debug!("Session worker started");
        while let Ok(command) = rx.recv() {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }
        self.shutdown();
        debug!("Session worker stopped");
    }

    pub(crate) fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                device_id,
                baud,
                reply,
            } => self.connect(device_id, baud, reply),
            Command::Write { data, reply } => {
                reply.send(self.write(&data));
            },
            Command::Disconnect { reply } => {
                if self.close_active() {
                    info!("Disconnected");
                }
                reply.send(Ok(()));
            },
            Command::State { reply } => {
                reply.send(Ok(self.link_state()));
            },
            Command::PermissionDecision {
                token,
                device_id,
                granted,
            } => self.on_permission_decision(token, &device_id, granted),
            Command::Hotplug(HotplugEvent::Attached(device_id)) => {
                info!("USB device attached: {device_id}");
            },
            Command::Hotplug(HotplugEvent::Detached(device_id)) => self.on_detached(device_id),
            Command::RelayFailed {
                generation,
                message,
            } => self.on_relay_failed(generation, message),
            Command::Shutdown => self.shutdown(),
        }
    }

    fn connect(&mut self, device_id: String, baud: u32, reply: Reply<()>) {
        if device_id.trim().is_empty() {
            reply.send(Err(Error::InvalidArgument(
                "device id must not be empty".into(),
            )));
            return;
        }
        if baud == 0 {
            reply.send(Err(Error::InvalidArgument(
                "baud rate must be positive".into(),
            )));
            return;
        }
        if let ConnectionState::AwaitingPermission(pending) = &self.state {
            debug!(
                "Rejecting connect to {device_id}: permission pending for {}",
                pending.device_id
            );
            reply.send(Err(Error::Busy(pending.device_id.clone())));
            return;
        }

        if self.close_active() {
            info!("Closed previous connection before connecting to {device_id}");
        }

        let Some(device) = catalog::find(self.host.as_ref(), &device_id) else {
            reply.send(Err(Error::DeviceMissing(device_id)));
            return;
        };

        match self
            .negotiator
            .ensure_access(self.host.as_ref(), &device, baud, reply)
        {
            Access::Granted(reply) => self.open(&device, baud, reply),
            Access::Suspended(pending) => {
                debug!("Connect to {} waiting for permission", pending.device_id);
                self.state = ConnectionState::AwaitingPermission(pending);
            },
        }
    }

    fn open(&mut self, device: &DeviceDescriptor, baud: u32, reply: Reply<()>) {
        self.next_generation += 1;
        let result = ActiveConnection::establish(
            self.host.as_ref(),
            device,
            baud,
            self.next_generation,
            &self.config,
            &self.sink,
            &self.tx,
        );

        match result {
            Ok(connection) => {
                info!("Connected to {} at {baud} baud", connection.device_id);
                self.state = ConnectionState::Open(connection);
                reply.send(Ok(()));
            },
            Err(e) => {
                debug!("Connect to {} failed: {e}", device.id);
                reply.send(Err(e));
            },
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let ConnectionState::Open(connection) = &mut self.state else {
            return Err(Error::NotConnected);
        };
        trace!("Writing {} bytes to {}", data.len(), connection.device_id);
        connection
            .port
            .write(data, self.config.write_timeout)
            .map_err(|e| Error::WriteFailed(e.to_string()))
    }

    fn on_permission_decision(&mut self, token: u64, device_id: &str, granted: bool) {
        let current = matches!(
            &self.state,
            ConnectionState::AwaitingPermission(pending) if pending.matches(token, device_id)
        );
        if !current {
            debug!("Ignoring stale permission decision for {device_id}");
            return;
        }

        let ConnectionState::AwaitingPermission(pending) = std::mem::take(&mut self.state) else {
            return;
        };
        if let Some(Resumed {
            device,
            baud,
            reply,
        }) = self
            .negotiator
            .resolve(self.host.as_ref(), pending, granted)
        {
            self.open(&device, baud, reply);
        }
    }

    fn on_detached(&mut self, device_id: String) {
        match &self.state {
            ConnectionState::AwaitingPermission(pending) if pending.device_id == device_id => {
                info!("USB device {device_id} removed while awaiting permission");
                if let ConnectionState::AwaitingPermission(pending) =
                    std::mem::take(&mut self.state)
                {
                    pending.fail(Error::DeviceDetached(device_id));
                }
            },
            ConnectionState::Open(connection) if connection.device_id == device_id => {
                warn!("Connected USB device {device_id} removed, closing connection");
                self.close_active();
                self.sink.emit(Event::Detached { device_id });
            },
            _ => {
                debug!("USB device detached: {device_id}");
            },
        }
    }

    /// A failed read ends the connection. When the device has also left the
    /// bus the failure is reported as a removal, since the hot-plug notice may
    /// still be on its way; that notice then finds nothing to close.
    fn on_relay_failed(&mut self, generation: u64, message: String) {
        let device_id = match &self.state {
            ConnectionState::Open(connection) if connection.generation == generation => {
                connection.device_id.clone()
            },
            _ => {
                debug!("Ignoring read failure from closed connection {generation}");
                return;
            },
        };
        self.close_active();

        let removed = self
            .host
            .devices()
            .is_ok_and(|devices| !devices.iter().any(|d| d.id == device_id));
        if removed {
            warn!("Connected USB device {device_id} removed, closing connection");
            self.sink.emit(Event::Detached { device_id });
        } else {
            warn!("Closed connection to {device_id} after read failure: {message}");
            self.sink.emit(Event::IoError { message });
        }
    }

    /// Tear down the open connection, if any. A pending permission request
    /// is left alone.
    fn close_active(&mut self) -> bool {
        if !matches!(self.state, ConnectionState::Open(_)) {
            return false;
        }
        drop(std::mem::take(&mut self.state));
        true
    }

    fn link_state(&self) -> LinkState {
        match &self.state {
            ConnectionState::Idle => LinkState::Idle,
            ConnectionState::AwaitingPermission(pending) => LinkState::AwaitingPermission {
                device_id: pending.device_id.clone(),
                baud: pending.baud,
            },
            ConnectionState::Open(connection) => LinkState::Open {
                device_id: connection.device_id.clone(),
                baud: connection.baud,
            },
        }
    }

    fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Release);
        match std::mem::take(&mut self.state) {
            ConnectionState::Idle => {},
            ConnectionState::AwaitingPermission(pending) => pending.fail(Error::Closed),
            ConnectionState::Open(connection) => {
                info!("Closing connection to {} on shutdown", connection.device_id);
                drop(connection);
            },
        }
    }
}
