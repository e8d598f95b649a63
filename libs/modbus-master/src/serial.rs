//! Serial device boundary for RTU sessions
//!
//! The RTU transport only talks to a [`SerialDevice`]. The OS binding is
//! [`TokioSerialDevice`] (feature `rtu`); tests substitute in-memory devices
//! through a [`SerialFactory`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Parity, StopBits};
use crate::error::{ModbusError, Result};

/// Serial line parameters of an RTU slave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(
            f,
            "{} @{} {}{}{}",
            self.port,
            self.baud_rate,
            self.data_bits,
            parity,
            u8::from(self.stop_bits)
        )
    }
}

/// Byte-stream capability set an RTU session needs from a serial port
///
/// Dropping the device releases the port.
#[async_trait]
pub trait SerialDevice: Send {
    async fn open(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes; `Ok(0)` when nothing arrived in time
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn is_open(&self) -> bool;

    fn discard_in_buffer(&mut self) -> Result<()>;

    fn discard_out_buffer(&mut self) -> Result<()>;
}

/// Creates a fresh, unopened device for every (re)connect
pub type SerialFactory =
    Arc<dyn Fn(&SerialSettings) -> Result<Box<dyn SerialDevice>> + Send + Sync>;

/// Factory producing OS serial ports, or an error when built without `rtu`
pub fn default_serial_factory() -> SerialFactory {
    Arc::new(|settings: &SerialSettings| {
        #[cfg(feature = "rtu")]
        {
            Ok(Box::new(TokioSerialDevice::new(settings.clone())) as Box<dyn SerialDevice>)
        }
        #[cfg(not(feature = "rtu"))]
        {
            Err(ModbusError::config(format!(
                "Serial port {} requested but RTU support is not compiled in",
                settings.port
            )))
        }
    })
}

#[cfg(feature = "rtu")]
pub use self::native::TokioSerialDevice;

#[cfg(feature = "rtu")]
mod native {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
    use tracing::{debug, info};

    /// Read timeout applied to a single serial read
    const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// `tokio-serial` backed device
    pub struct TokioSerialDevice {
        settings: SerialSettings,
        stream: Option<SerialStream>,
    }

    impl TokioSerialDevice {
        pub fn new(settings: SerialSettings) -> Self {
            Self {
                settings,
                stream: None,
            }
        }

        fn stream(&mut self) -> Result<&mut SerialStream> {
            self.stream.as_mut().ok_or(ModbusError::NotConnected)
        }
    }

    fn serial_error(e: tokio_serial::Error) -> ModbusError {
        ModbusError::Io(e.to_string())
    }

    #[async_trait]
    impl SerialDevice for TokioSerialDevice {
        async fn open(&mut self) -> Result<()> {
            let data_bits = match self.settings.data_bits {
                5 => tokio_serial::DataBits::Five,
                6 => tokio_serial::DataBits::Six,
                7 => tokio_serial::DataBits::Seven,
                8 => tokio_serial::DataBits::Eight,
                other => {
                    return Err(ModbusError::config(format!(
                        "Unsupported data bits {} for {}",
                        other, self.settings.port
                    )))
                },
            };
            let parity = match self.settings.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            };
            let stop_bits = match self.settings.stop_bits {
                StopBits::One => tokio_serial::StopBits::One,
                StopBits::Two => tokio_serial::StopBits::Two,
            };

            debug!("RTU: opening {}", self.settings);
            let stream = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
                .data_bits(data_bits)
                .parity(parity)
                .stop_bits(stop_bits)
                .timeout(DEFAULT_READ_TIMEOUT)
                .open_native_async()
                .map_err(|e| {
                    ModbusError::connection(format!(
                        "Failed to open serial port {}: {}",
                        self.settings.port, e
                    ))
                })?;
            info!("RTU opened: {}", self.settings);
            self.stream = Some(stream);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(mut stream) = self.stream.take() {
                stream.shutdown().await?;
            }
            Ok(())
        }

        async fn write(&mut self, buf: &[u8]) -> Result<()> {
            let stream = self.stream()?;
            stream.write_all(buf).await?;
            stream.flush().await?;
            Ok(())
        }

        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let stream = self.stream()?;
            match tokio::time::timeout(DEFAULT_READ_TIMEOUT, stream.read(buf)).await {
                Ok(result) => Ok(result?),
                Err(_) => Ok(0),
            }
        }

        fn is_open(&self) -> bool {
            self.stream.is_some()
        }

        fn discard_in_buffer(&mut self) -> Result<()> {
            self.stream()?
                .clear(ClearBuffer::Input)
                .map_err(serial_error)
        }

        fn discard_out_buffer(&mut self) -> Result<()> {
            self.stream()?
                .clear(ClearBuffer::Output)
                .map_err(serial_error)
        }
    }
}
