//! Value decoders
//!
//! A [`Decoder`] turns the payload of a read response into addressed,
//! canonical string values. The decoder is chosen once per operation from
//! its function code and data type.

mod bit;
mod register;

use crate::error::{ModbusError, Result};
use crate::operation::ReadOperation;
use crate::types::{DataType, FunctionCode};

pub use register::format_float;

/// One decoded value and the zero-based address it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedValue {
    pub address: u32,
    pub value: String,
}

impl DecodedValue {
    pub fn new(address: u32, value: impl Into<String>) -> Self {
        Self {
            address,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Bit,
    Int16,
    Int32,
    Float32,
}

impl Decoder {
    /// Pick the decoder for a read function and configured data type
    pub fn select(function: FunctionCode, data_type: DataType) -> Result<Self> {
        match (function, data_type) {
            (FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs, _) => Ok(Self::Bit),
            (
                FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters,
                DataType::Int16,
            ) => Ok(Self::Int16),
            (
                FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters,
                DataType::Int32,
            ) => Ok(Self::Int32),
            (
                FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters,
                DataType::Float32,
            ) => Ok(Self::Float32),
            (
                FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters,
                DataType::Bit,
            ) => Err(ModbusError::config(
                "Bit data type requires a coil or discrete input address",
            )),
            (FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister, _) => Err(
                ModbusError::config(format!("{} is not a read function", function)),
            ),
        }
    }

    /// Bytes consumed per value (zero for bits, which are packed)
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Bit => 0,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
        }
    }

    /// Entities needed for `requested` values
    ///
    /// Registers for the word decoders. For bits this is the number of
    /// payload bytes, `ceil(requested / 8)`.
    pub fn entity_count(&self, requested: u16) -> u16 {
        match self {
            Self::Bit => requested.div_ceil(8),
            _ => (self.byte_size() / 2) as u16 * requested,
        }
    }

    /// Quantity field placed in the read request
    pub fn quantity(&self, requested: u16) -> u16 {
        match self {
            Self::Bit => requested,
            _ => self.entity_count(requested),
        }
    }

    /// Registers (or bits) between consecutive decoded values
    pub fn address_step(&self) -> u32 {
        match self {
            Self::Bit => 1,
            _ => (self.byte_size() / 2) as u32,
        }
    }

    /// Decode `bytes` (the response payload after the byte count)
    pub fn values(&self, bytes: &[u8], operation: &ReadOperation) -> Result<Vec<DecodedValue>> {
        let start = u32::from(operation.address);
        match self {
            Self::Bit => bit::decode(bytes, operation.count, start),
            Self::Int16 | Self::Int32 | Self::Float32 => register::decode(
                *self,
                bytes,
                operation.count,
                start,
                operation.swap_mode,
            ),
        }
    }
}
