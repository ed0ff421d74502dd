//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        host::DeviceHandle,
        port::{DataBits, FlowControl, LineConfig, Parity, PortReader, SerialPort, StopBits},
    },
    log::trace,
    std::{io::Write, time::Duration},
};

/// Serial port backed by the OS tty/COM driver.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    open_timeout: Duration,
}

impl NativePort {
    /// Create a closed port for the given device path.
    pub fn new(name: impl Into<String>, open_timeout: Duration) -> Self {
        Self {
            port: None,
            name: name.into(),
            open_timeout,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| {
                Error::Serial(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "Port is closed",
                ))
            })
    }
}

impl SerialPort for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, handle: &mut dyn DeviceHandle) -> Result<()> {
        trace!("Opening {} on handle {}", self.name, handle.device_id());
        let port = serialport::new(&self.name, crate::config::DEFAULT_BAUD_RATE)
            .timeout(self.open_timeout)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn set_parameters(&mut self, config: &LineConfig) -> Result<()> {
        let port = self.port_mut()?;
        port.set_baud_rate(config.baud_rate)?;
        port.set_data_bits(config.data_bits.into())?;
        port.set_parity(config.parity.into())?;
        port.set_stop_bits(config.stop_bits.into())?;
        port.set_flow_control(config.flow_control.into())?;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        self.port_mut()?.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        self.port_mut()?.write_request_to_send(level)?;
        Ok(())
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn reader(&mut self, timeout: Duration) -> Result<PortReader> {
        let mut reader = self.port_mut()?.try_clone()?;
        reader.set_timeout(timeout)?;
        Ok(Box::new(reader))
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the boxed port closes the file descriptor
        if self.port.take().is_some() {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => Self::Five,
            DataBits::Six => Self::Six,
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
