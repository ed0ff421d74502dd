//! Serial port abstraction.
//!
//! A [`SerialPort`] is the communication endpoint a driver exposes on an
//! opened device. The connection manager only talks to this trait, so the
//! same state machine runs against the OS serial driver and against the
//! in-memory host used in tests.
//!
//! ```text
//! +--------------------+
//! | Connection manager |  open / set_parameters / write / close
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+        +-------------+
//! |  SerialPort trait  | -----> |  I/O relay  |  reader() on its own thread
//! +---------+----------+        +-------------+
//!           |
//!     +-----+------+
//!     v            v
//! NativePort   MemoryPort
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::Read;
use std::time::Duration;

use crate::error::Result;
use crate::host::DeviceHandle;

/// Line parameters applied after the port is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LineConfig {
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl LineConfig {
    /// 8-N-1 without flow control at the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BAUD_RATE)
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DataBits {
    /// 5 data bits.
    Five,
    /// 6 data bits.
    Six,
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Blocking reader handed to the I/O relay.
///
/// Reads must return `ErrorKind::TimedOut` (or `WouldBlock`) when no data
/// arrived within the reader's timeout, so the relay can observe stop
/// requests.
pub type PortReader = Box<dyn Read + Send>;

/// A serial endpoint exposed by a driver.
pub trait SerialPort: Send {
    /// Port name for logging.
    fn name(&self) -> &str;

    /// Open the port on an already-opened device handle.
    fn open(&mut self, handle: &mut dyn DeviceHandle) -> Result<()>;

    /// Apply baud rate and framing.
    fn set_parameters(&mut self, config: &LineConfig) -> Result<()>;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Write all bytes, failing if they cannot be written within `timeout`.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Create an independent reader for the background read loop.
    fn reader(&mut self, timeout: Duration) -> Result<PortReader>;

    /// Close the port. Must tolerate being called more than once, and on a
    /// port that never finished opening.
    fn close(&mut self) -> Result<()>;
}
