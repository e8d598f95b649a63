//! Modbus master error types

use thiserror::Error;

use crate::constants::exception_description;

/// Result type for modbus-master operations
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Errors raised by the master engine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModbusError {
    /// Configuration errors (bad address, count, prefix, missing serial field)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport used before a connection exists
    #[error("Not connected")]
    NotConnected,

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Slave answered with function code | 0x80
    #[error("Modbus exception 0x{code:02X} ({}) for function 0x{function:02X}", describe(.code))]
    Exception { function: u8, code: u8 },

    /// Fewer payload bytes than the decoder needs
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Invalid argument passed to a codec routine
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn describe(code: &u8) -> &'static str {
    exception_description(*code)
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Io(err.to_string())
    }
}

// Helper methods for creating errors
impl ModbusError {
    pub fn config(msg: impl Into<String>) -> Self {
        ModbusError::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ModbusError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ModbusError::Protocol(msg.into())
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        ModbusError::InsufficientData(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ModbusError::InvalidArgument(msg.into())
    }
}
