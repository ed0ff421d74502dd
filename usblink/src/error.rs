//! Error types for usblink.

use std::io;
use thiserror::Error;

/// Result type for usblink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for usblink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The named device is not currently attached.
    #[error("USB device not found for {0}")]
    DeviceMissing(String),

    /// The OS or the user refused access to the device.
    #[error("USB permission denied for {0}")]
    PermissionDenied(String),

    /// A permission request is already outstanding.
    #[error("Another USB permission request is already pending for {0}")]
    Busy(String),

    /// No compatible serial driver matched the device.
    #[error("No USB serial driver for {0}")]
    DriverMissing(String),

    /// The OS refused to open the device handle.
    #[error("Could not open {device}: {reason}")]
    OpenFailed {
        /// Device identifier.
        device: String,
        /// Reason reported by the host.
        reason: String,
    },

    /// The device exposes no usable serial port.
    #[error("No USB serial port exposed by {0}")]
    PortMissing(String),

    /// The operation requires an active connection.
    #[error("USB serial port is not connected")]
    NotConnected,

    /// The write timed out or was rejected.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Uncategorized failure during the open sequence.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The device was removed during a pending or active operation.
    #[error("USB device {0} was removed")]
    DeviceDetached(String),

    /// The session worker has shut down.
    #[error("Session is closed")]
    Closed,

    /// I/O error reported by the host layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Fieldless classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// See [`Error::DeviceMissing`].
    DeviceMissing,
    /// See [`Error::PermissionDenied`].
    PermissionDenied,
    /// See [`Error::Busy`].
    Busy,
    /// See [`Error::DriverMissing`].
    DriverMissing,
    /// See [`Error::OpenFailed`].
    OpenFailed,
    /// See [`Error::PortMissing`].
    PortMissing,
    /// See [`Error::NotConnected`].
    NotConnected,
    /// See [`Error::WriteFailed`].
    WriteFailed,
    /// See [`Error::ConnectFailed`].
    ConnectFailed,
    /// See [`Error::DeviceDetached`].
    DeviceDetached,
    /// See [`Error::Closed`].
    Closed,
    /// Host-level I/O or serial error.
    Io,
}

impl ErrorKind {
    /// Stable code used when errors cross into the application layer.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidArgument => "usb_invalid_argument",
            Self::DeviceMissing => "usb_device_missing",
            Self::PermissionDenied => "usb_permission_denied",
            Self::Busy => "usb_busy",
            Self::DriverMissing => "usb_driver_missing",
            Self::OpenFailed => "usb_open_failed",
            Self::PortMissing => "usb_port_missing",
            Self::NotConnected => "usb_not_connected",
            Self::WriteFailed => "usb_write_failed",
            Self::ConnectFailed => "usb_connect_failed",
            Self::DeviceDetached => "usb_device_detached",
            Self::Closed => "usb_session_closed",
            Self::Io => "usb_io_error",
        }
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::DeviceMissing(_) => ErrorKind::DeviceMissing,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Busy(_) => ErrorKind::Busy,
            Self::DriverMissing(_) => ErrorKind::DriverMissing,
            Self::OpenFailed { .. } => ErrorKind::OpenFailed,
            Self::PortMissing(_) => ErrorKind::PortMissing,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::WriteFailed(_) => ErrorKind::WriteFailed,
            Self::ConnectFailed(_) => ErrorKind::ConnectFailed,
            Self::DeviceDetached(_) => ErrorKind::DeviceDetached,
            Self::Closed => ErrorKind::Closed,
            Self::Io(_) => ErrorKind::Io,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Io,
        }
    }

    /// Stable code for this error, e.g. `usb_permission_denied`.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}
