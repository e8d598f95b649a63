//! Modbus entity, function code and data type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::EXCEPTION_FLAG;
use crate::error::{ModbusError, Result};

/// Data type of a polled or written value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(alias = "Bool", alias = "bool", alias = "bit")]
    Bit,
    #[serde(alias = "int16", alias = "Int")]
    Int16,
    #[serde(alias = "int32")]
    Int32,
    #[serde(alias = "Float", alias = "float", alias = "float32")]
    Float32,
}

impl DataType {
    /// Number of 16-bit registers one value occupies (zero for bits)
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::Bit => 0,
            DataType::Int16 => 1,
            DataType::Int32 | DataType::Float32 => 2,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bit => "Bit",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Float32 => "Float32",
        };
        f.write_str(name)
    }
}

/// Modbus data model table, selected by the first character of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// `0xxxx`, read/write bits
    Coil,
    /// `1xxxx`, read-only bits
    DiscreteInput,
    /// `3xxxx`, read-only registers
    InputRegister,
    /// `4xxxx`, read/write registers
    HoldingRegister,
}

impl EntityType {
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '0' => Some(Self::Coil),
            '1' => Some(Self::DiscreteInput),
            '3' => Some(Self::InputRegister),
            '4' => Some(Self::HoldingRegister),
            _ => None,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            Self::Coil => '0',
            Self::DiscreteInput => '1',
            Self::InputRegister => '3',
            Self::HoldingRegister => '4',
        }
    }

    pub fn read_function(&self) -> FunctionCode {
        match self {
            Self::Coil => FunctionCode::ReadCoils,
            Self::DiscreteInput => FunctionCode::ReadDiscreteInputs,
            Self::InputRegister => FunctionCode::ReadInputRegisters,
            Self::HoldingRegister => FunctionCode::ReadHoldingRegisters,
        }
    }

    /// Single-entity write function, `None` for read-only tables
    pub fn write_function(&self) -> Option<FunctionCode> {
        match self {
            Self::Coil => Some(FunctionCode::WriteSingleCoil),
            Self::HoldingRegister => Some(FunctionCode::WriteSingleRegister),
            Self::DiscreteInput | Self::InputRegister => None,
        }
    }
}

/// Function codes issued by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
}

impl FunctionCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            _ => None,
        }
    }

    /// Function code a slave answers with when rejecting this request
    pub fn exception_code(&self) -> u8 {
        self.code() | EXCEPTION_FLAG
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02}", self.code())
    }
}

/// Split an entity-prefixed 1-based address such as `40001`
///
/// Returns the entity table and the zero-based wire address.
pub fn parse_address(address: &str) -> Result<(EntityType, u16)> {
    let address = address.trim();
    if address.len() < 5 {
        return Err(ModbusError::config(format!(
            "Address '{}' is too short, expected an entity prefix and at least 4 digits",
            address
        )));
    }

    let mut chars = address.chars();
    let prefix = chars.next().unwrap_or_default();
    let entity = EntityType::from_prefix(prefix).ok_or_else(|| {
        ModbusError::config(format!(
            "Address '{}' has unknown entity prefix '{}'",
            address, prefix
        ))
    })?;

    let digits = chars.as_str();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ModbusError::config(format!(
            "Address '{}' must be numeric after the entity prefix",
            address
        )));
    }

    let number: u32 = digits
        .parse()
        .map_err(|e| ModbusError::config(format!("Address '{}': {}", address, e)))?;
    if number == 0 || number > 65536 {
        return Err(ModbusError::config(format!(
            "Address '{}' is out of range, expected 1..=65536",
            address
        )));
    }

    Ok((entity, (number - 1) as u16))
}
