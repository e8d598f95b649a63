//! Modbus Master Engine
//!
//! Polls field devices over Modbus TCP and Modbus RTU for a gateway and turns
//! their registers and bits into timestamped string values. The library
//! supports:
//! - Read function codes FC01-04 and single writes FC05/FC06
//! - TCP (MBAP) and RTU (CRC16) framing
//! - Bit, Int16, Int32 and Float32 decoding with four word/byte orders
//! - Per-slave output aggregation, drained by a periodic publisher
//!
//! # Architecture
//!
//! ```text
//! modbus-master
//!     ├── SessionsHandle (one session per slave, routes writes by hwId)
//!     │     └── ModbusSession = SlaveSession<TcpTransport | RtuTransport>
//!     │           ├── ReadOperation (one polling task each)
//!     │           ├── Decoder (bit / register decoding + SwapMode)
//!     │           └── OutputAggregator (correlation id + second buckets)
//!     ├── config (ModuleConfig JSON model and validation)
//!     └── serial (SerialDevice boundary, tokio-serial behind `rtu`)
//! ```

pub mod config;
pub mod constants;
pub mod crc;
pub mod decoding;
pub mod error;
pub mod handle;
pub mod operation;
pub mod output;
pub mod serial;
pub mod session;
pub mod swap;
pub mod types;

pub use config::{
    ConnectionType, ModuleConfig, Parity, ReadOperationConfig, RetryPolicy, SlaveConfig, StopBits,
    ValidationReport,
};
pub use decoding::{format_float, DecodedValue, Decoder};
pub use error::{ModbusError, Result};
pub use handle::{ModbusSession, SessionsHandle};
pub use operation::{ReadOperation, WriteCommand, WriteOperation};
pub use output::{OutContent, OutData, OutMessage, OutValue, OutputAggregator};
pub use serial::{default_serial_factory, SerialDevice, SerialFactory, SerialSettings};
pub use session::rtu::RtuTransport;
pub use session::tcp::TcpTransport;
pub use session::{SessionState, SlaveSession, Transport};
pub use swap::SwapMode;
pub use types::{DataType, EntityType, FunctionCode};
