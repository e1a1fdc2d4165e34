//! Native serial port implementation using the `serialport` crate.
//!
//! Serial links carry the protocol unchanged: each 16-byte command goes out
//! in one write and responses are read byte-exact.

use {
    crate::{
        error::{Error, Result},
        port::{Port, SerialConfig},
    },
    log::{debug, trace},
    serialport::ClearBuffer,
    std::io::{ErrorKind, Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening serial port {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            baud_rate: config.baud_rate,
        })
    }

    /// Baud rate the port was opened with.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn inner(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::new(ErrorKind::NotConnected, "port closed")))
    }
}

impl Port for NativePort {
    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        trace!("serial TX {data:02X?}");
        let port = self.inner()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let port = self.inner()?;
        let mut buf = vec![0u8; n];
        match port.read_exact(&mut buf) {
            Ok(()) => {
                trace!("serial RX {buf:02X?}");
                Ok(buf)
            },
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                Err(Error::Timeout(format!("waiting for {n} bytes from serial port")))
            },
            Err(e) => Err(e.into()),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            if let Err(e) = p.clear(ClearBuffer::Input) {
                debug!("Ignoring input flush error: {e}");
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the device
        self.port
            .take();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
