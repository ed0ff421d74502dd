//! In-memory USB host.
//!
//! A virtual bus that behaves like a real host from the session's point of
//! view: devices can be attached and detached at any time, permission
//! prompts stay outstanding until answered, and each device has a loopback
//! "wire" where received bytes are injected and written bytes are recorded.
//!
//! ```rust
//! use usblink::host::memory::{MemoryHost, VirtualDevice};
//! use usblink::{DeviceDescriptor, Session, SessionConfig};
//!
//! let host = MemoryHost::new();
//! host.attach(VirtualDevice::new(DeviceDescriptor::new("ttyUSB0", 0x1A86, 0x7523)));
//!
//! let session = Session::start(host.clone(), SessionConfig::default()).unwrap();
//! session.connect("ttyUSB0", Some(9600)).wait().unwrap();
//! session.write(b"AT\r\n").wait().unwrap();
//! assert_eq!(host.written("ttyUSB0"), b"AT\r\n");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;

use super::{DeviceHandle, SerialDriver, UsbHost};
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::hotplug::HotplugNotifier;
use crate::permission::PermissionResponder;
use crate::port::{LineConfig, PortReader, SerialPort};

/// A device to attach to a [`MemoryHost`].
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    descriptor: DeviceDescriptor,
    requires_permission: bool,
    has_driver: bool,
    port_count: usize,
    refuses_open: bool,
    port_busy: bool,
    fails_configuration: bool,
}

impl VirtualDevice {
    /// A serial device with one port whose access is already granted.
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            requires_permission: false,
            has_driver: true,
            port_count: 1,
            refuses_open: false,
            port_busy: false,
            fails_configuration: false,
        }
    }

    /// Require a permission prompt before the first open.
    #[must_use]
    pub fn requiring_permission(mut self) -> Self {
        self.requires_permission = true;
        self
    }

    /// No serial driver matches this device.
    #[must_use]
    pub fn without_driver(mut self) -> Self {
        self.has_driver = false;
        self
    }

    /// Number of ports the driver exposes.
    #[must_use]
    pub fn with_port_count(mut self, count: usize) -> Self {
        self.port_count = count;
        self
    }

    /// Opening the device handle fails.
    #[must_use]
    pub fn refusing_open(mut self) -> Self {
        self.refuses_open = true;
        self
    }

    /// The device opens but its port is held elsewhere, so opening the port
    /// fails.
    #[must_use]
    pub fn with_busy_port(mut self) -> Self {
        self.port_busy = true;
        self
    }

    /// Applying line parameters fails.
    #[must_use]
    pub fn failing_configuration(mut self) -> Self {
        self.fails_configuration = true;
        self
    }

    /// The descriptor the host reports for this device.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

/// Virtual USB bus. Cheap to clone; clones share the same bus.
#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Arc<Bus>,
}

#[derive(Default)]
struct Bus {
    state: Mutex<BusState>,
    prompted: Condvar,
    open_handles: Arc<AtomicUsize>,
    open_ports: Arc<AtomicUsize>,
}

#[derive(Default)]
struct BusState {
    devices: Vec<Attached>,
    granted: HashSet<String>,
    prompts: HashMap<String, PermissionResponder>,
    permission_requests: usize,
    notifier: Option<HotplugNotifier>,
    enumeration_fails: bool,
}

struct Attached {
    device: VirtualDevice,
    wire: Arc<Wire>,
}

/// Loopback line of one attached device.
#[derive(Default)]
struct Wire {
    state: Mutex<WireState>,
    readable: Condvar,
}

#[derive(Default)]
struct WireState {
    incoming: VecDeque<io::Result<Vec<u8>>>,
    written: Vec<u8>,
    line: Option<LineConfig>,
    dtr: Option<bool>,
    rts: Option<bool>,
    fail_writes: bool,
}

fn io_error(kind: io::ErrorKind, message: &str) -> Error {
    Error::Io(io::Error::new(kind, message.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryHost {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        lock(&self.inner.state)
    }

    fn wire(&self, device_id: &str) -> Option<Arc<Wire>> {
        self.state()
            .devices
            .iter()
            .find(|attached| attached.device.descriptor.id == device_id)
            .map(|attached| Arc::clone(&attached.wire))
    }

    /// Plug a device in. Replaces an attached device with the same id.
    pub fn attach(&self, device: VirtualDevice) {
        let id = device.descriptor.id.clone();
        let mut state = self.state();
        state
            .devices
            .retain(|attached| attached.device.descriptor.id != id);
        state.devices.push(Attached {
            device,
            wire: Arc::new(Wire::default()),
        });
        if let Some(notifier) = &state.notifier {
            notifier.attached(id);
        }
    }

    /// Unplug a device. Returns `false` if it was not attached.
    ///
    /// As with a real adapter, a pending read on its port fails before the
    /// hot-plug notice goes out. Outstanding permission prompts for it stay
    /// answerable, like a system dialog that outlives the device.
    pub fn detach(&self, device_id: &str) -> bool {
        let mut state = self.state();
        let Some(index) = state
            .devices
            .iter()
            .position(|attached| attached.device.descriptor.id == device_id)
        else {
            return false;
        };
        let removed = state.devices.remove(index);
        state.granted.remove(device_id);

        let unplugged = io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected");
        lock(&removed.wire.state)
            .incoming
            .push_back(Err(unplugged));
        removed.wire.readable.notify_all();

        if let Some(notifier) = &state.notifier {
            notifier.detached(device_id);
        }
        true
    }

    /// Make enumeration fail until reset.
    pub fn set_enumeration_fails(&self, fails: bool) {
        self.state().enumeration_fails = fails;
    }

    /// Number of permission prompts issued so far.
    pub fn permission_requests(&self) -> usize {
        self.state().permission_requests
    }

    /// Block until a prompt for `device_id` is outstanding.
    pub fn wait_for_prompt(&self, device_id: &str, timeout: Duration) -> bool {
        let state = self.state();
        let (state, _) = self
            .inner
            .prompted
            .wait_timeout_while(state, timeout, |state| {
                !state.prompts.contains_key(device_id)
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.prompts.contains_key(device_id)
    }

    /// Answer the outstanding prompt for `device_id`. A grant is remembered
    /// until the device is detached. Returns `false` if no prompt was
    /// outstanding.
    pub fn answer_permission(&self, device_id: &str, granted: bool) -> bool {
        let responder = {
            let mut state = self.state();
            let responder = state.prompts.remove(device_id);
            if granted && responder.is_some() {
                state.granted.insert(device_id.to_string());
            }
            responder
        };
        match responder {
            Some(responder) => {
                responder.resolve(granted);
                true
            },
            None => false,
        }
    }

    /// Device handles currently open.
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::SeqCst)
    }

    /// Ports currently open.
    pub fn open_ports(&self) -> usize {
        self.inner.open_ports.load(Ordering::SeqCst)
    }

    /// Queue bytes for the device to "send" to the session.
    pub fn push_read(&self, device_id: &str, data: &[u8]) -> bool {
        self.push_incoming(device_id, Ok(data.to_vec()))
    }

    /// Queue a read failure.
    pub fn push_read_error(&self, device_id: &str, kind: io::ErrorKind, message: &str) -> bool {
        self.push_incoming(device_id, Err(io::Error::new(kind, message.to_string())))
    }

    fn push_incoming(&self, device_id: &str, item: io::Result<Vec<u8>>) -> bool {
        let Some(wire) = self.wire(device_id) else {
            return false;
        };
        lock(&wire.state).incoming.push_back(item);
        wire.readable.notify_all();
        true
    }

    fn with_wire<T>(&self, device_id: &str, f: impl FnOnce(&mut WireState) -> T) -> Option<T> {
        let wire = self.wire(device_id)?;
        let mut state = lock(&wire.state);
        Some(f(&mut state))
    }

    /// Everything written to the device since it was attached.
    pub fn written(&self, device_id: &str) -> Vec<u8> {
        self.with_wire(device_id, |wire| wire.written.clone()).unwrap_or_default()
    }

    /// Line parameters last applied to the device's port.
    pub fn line_config(&self, device_id: &str) -> Option<LineConfig> {
        self.with_wire(device_id, |wire| wire.line).flatten()
    }

    /// Last DTR level set on the device's port.
    pub fn dtr(&self, device_id: &str) -> Option<bool> {
        self.with_wire(device_id, |wire| wire.dtr).flatten()
    }

    /// Last RTS level set on the device's port.
    pub fn rts(&self, device_id: &str) -> Option<bool> {
        self.with_wire(device_id, |wire| wire.rts).flatten()
    }

    /// Make writes to the device fail until reset.
    pub fn set_fail_writes(&self, device_id: &str, fail: bool) {
        self.with_wire(device_id, |wire| wire.fail_writes = fail);
    }
}

impl UsbHost for MemoryHost {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let state = self.state();
        if state.enumeration_fails {
            return Err(Error::Io(io::Error::other("USB enumeration failed")));
        }
        Ok(state
            .devices
            .iter()
            .map(|attached| attached.device.descriptor.clone())
            .collect())
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        let state = self.state();
        state
            .devices
            .iter()
            .find(|attached| attached.device.descriptor.id == device.id)
            .is_some_and(|attached| {
                !attached.device.requires_permission || state.granted.contains(&device.id)
            })
    }

    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder) {
        debug!("Permission prompt shown for {}", device.id);
        let mut state = self.state();
        state.permission_requests += 1;
        state.prompts.insert(device.id.clone(), responder);
        self.inner.prompted.notify_all();
    }

    fn probe_driver(&self, device: &DeviceDescriptor) -> Option<Box<dyn SerialDriver>> {
        let state = self.state();
        let attached = state
            .devices
            .iter()
            .find(|attached| attached.device.descriptor.id == device.id)?;
        if !attached.device.has_driver {
            return None;
        }

        let ports = (0..attached.device.port_count)
            .map(|index| MemoryPort {
                name: format!("{}:{index}", device.id),
                wire: Arc::clone(&attached.wire),
                open: false,
                busy: attached.device.port_busy,
                fails_configuration: attached.device.fails_configuration,
                open_ports: Arc::clone(&self.inner.open_ports),
            })
            .collect();
        Some(Box::new(MemoryDriver { ports }))
    }

    fn open_device(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>> {
        let state = self.state();
        let attached = state
            .devices
            .iter()
            .find(|attached| attached.device.descriptor.id == device.id)
            .ok_or_else(|| io_error(io::ErrorKind::NotFound, "device not attached"))?;
        if attached.device.refuses_open {
            return Err(io_error(
                io::ErrorKind::PermissionDenied,
                "device refused to open",
            ));
        }

        self.inner.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryHandle {
            device_id: device.id.clone(),
            open: true,
            open_handles: Arc::clone(&self.inner.open_handles),
        }))
    }

    fn watch(&self, notifier: HotplugNotifier) -> Result<()> {
        self.state().notifier = Some(notifier);
        Ok(())
    }
}

struct MemoryDriver {
    ports: Vec<MemoryPort>,
}

impl SerialDriver for MemoryDriver {
    fn port_count(&self) -> usize {
        self.ports.len()
    }

    fn first_port(&mut self) -> Option<Box<dyn SerialPort>> {
        if self.ports.is_empty() {
            return None;
        }
        Some(Box::new(self.ports.remove(0)))
    }
}

struct MemoryHandle {
    device_id: String,
    open: bool,
    open_handles: Arc<AtomicUsize>,
}

impl DeviceHandle for MemoryHandle {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn close(&mut self) -> Result<()> {
        if std::mem::take(&mut self.open) {
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct MemoryPort {
    name: String,
    wire: Arc<Wire>,
    open: bool,
    busy: bool,
    fails_configuration: bool,
    open_ports: Arc<AtomicUsize>,
}

impl MemoryPort {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io_error(io::ErrorKind::NotConnected, "port is not open"))
        }
    }
}

impl SerialPort for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, _handle: &mut dyn DeviceHandle) -> Result<()> {
        if self.busy {
            let message = format!("{} is in use", self.name);
            return Err(io_error(io::ErrorKind::ResourceBusy, &message));
        }
        if !self.open {
            self.open = true;
            self.open_ports.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_parameters(&mut self, config: &LineConfig) -> Result<()> {
        self.ensure_open()?;
        if self.fails_configuration {
            let message = format!("unsupported baud rate {}", config.baud_rate);
            return Err(io_error(io::ErrorKind::InvalidInput, &message));
        }
        lock(&self.wire.state).line = Some(*config);
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.ensure_open()?;
        lock(&self.wire.state).dtr = Some(level);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.ensure_open()?;
        lock(&self.wire.state).rts = Some(level);
        Ok(())
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let mut wire = lock(&self.wire.state);
        if wire.fail_writes {
            return Err(io_error(io::ErrorKind::TimedOut, "write timed out"));
        }
        wire.written.extend_from_slice(data);
        Ok(())
    }

    fn reader(&mut self, timeout: Duration) -> Result<PortReader> {
        self.ensure_open()?;
        Ok(Box::new(MemoryReader {
            wire: Arc::clone(&self.wire),
            timeout,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if std::mem::take(&mut self.open) {
            self.open_ports.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct MemoryReader {
    wire: Arc<Wire>,
    timeout: Duration,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = lock(&self.wire.state);
        let (mut state, _) = self
            .wire
            .readable
            .wait_timeout_while(state, self.timeout, |state| state.incoming.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        match state.incoming.pop_front() {
            Some(Ok(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.incoming.push_front(Ok(data.split_off(n)));
                }
                Ok(n)
            },
            Some(Err(e)) => Err(e),
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
        }
    }
}
