//! Read and write operations
//!
//! A [`ReadOperation`] is built once from its configuration: the address is
//! parsed, the function code and decoder are derived, and the transport
//! encodes the request frame. Only the response buffer changes per poll.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ReadOperationConfig;
use crate::constants::{COIL_OFF, COIL_ON, MAX_READ_COUNT};
use crate::decoding::Decoder;
use crate::error::{ModbusError, Result};
use crate::swap::{swap, SwapMode};
use crate::types::{parse_address, DataType, EntityType, FunctionCode};

/// Length of the request PDU: FC(1) + Address(2) + Quantity/Value(2)
pub const PDU_LEN: usize = 5;

/// Build a single read/write request PDU
pub fn request_pdu(function: FunctionCode, address: u16, value: u16) -> [u8; PDU_LEN] {
    let address = address.to_be_bytes();
    let value = value.to_be_bytes();
    [function.code(), address[0], address[1], value[0], value[1]]
}

/// Runtime state of one polled quantity
#[derive(Debug, Clone)]
pub struct ReadOperation {
    pub name: String,
    pub unit_id: u8,
    pub start_address: String,
    pub entity: EntityType,
    /// Zero-based wire address
    pub address: u16,
    /// Number of values requested
    pub count: u16,
    pub data_type: DataType,
    pub swap_mode: SwapMode,
    pub polling_interval: Duration,
    pub display_name: String,
    pub correlation_id: String,
    pub function_code: FunctionCode,
    pub decoder: Decoder,
    /// Encoded request frame, filled by the session
    pub request: Vec<u8>,
    /// Last response frame received
    pub response: Option<Vec<u8>>,
}

impl ReadOperation {
    pub fn from_config(name: &str, config: &ReadOperationConfig) -> Result<Self> {
        if config.count == 0 || config.count > MAX_READ_COUNT {
            return Err(ModbusError::config(format!(
                "Operation {}: count {} out of range 1..={}",
                name, config.count, MAX_READ_COUNT
            )));
        }

        let (entity, address) = parse_address(&config.start_address)?;
        let function_code = entity.read_function();
        let decoder = Decoder::select(function_code, config.data_type)?;

        let span = u32::from(decoder.quantity(config.count));
        if u32::from(address) + span > 65536 {
            return Err(ModbusError::config(format!(
                "Operation {}: {} entities from {} run past the end of the address space",
                name, span, config.start_address
            )));
        }

        let display_name = if config.display_name.is_empty() {
            name.to_string()
        } else {
            config.display_name.clone()
        };

        Ok(Self {
            name: name.to_string(),
            unit_id: config.unit_id,
            start_address: config.start_address.trim().to_string(),
            entity,
            address,
            count: config.count,
            data_type: config.data_type,
            swap_mode: config.swap_mode,
            polling_interval: Duration::from_millis(config.polling_interval),
            display_name,
            correlation_id: config.correlation_id.clone(),
            function_code,
            decoder,
            request: Vec::new(),
            response: None,
        })
    }

    /// Quantity field of the read request
    pub fn quantity(&self) -> u16 {
        self.decoder.quantity(self.count)
    }

    pub fn request_pdu(&self) -> [u8; PDU_LEN] {
        request_pdu(self.function_code, self.address, self.quantity())
    }

    /// Render a zero-based address in the configured entity-prefixed form
    ///
    /// `400001` with address 4 becomes `400005`.
    pub fn format_address(&self, zero_based: u32) -> String {
        let width = self.start_address.len().saturating_sub(1);
        format!(
            "{}{:0width$}",
            self.entity.prefix(),
            zero_based + 1,
            width = width
        )
    }
}

/// Write request as delivered to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCommand {
    pub hw_id: String,
    pub unit_id: u8,
    /// Entity-prefixed 1-based address, e.g. `40001` or `00017`
    #[serde(alias = "startAddress")]
    pub address: String,
    pub value: f64,
    /// Defaults to Bit for coils and Int16 for holding registers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub swap_mode: SwapMode,
}

/// Validated write targeting one coil or consecutive holding registers
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperation {
    pub hw_id: String,
    pub unit_id: u8,
    pub entity: EntityType,
    /// Zero-based address of the first register
    pub address: u16,
    pub function_code: FunctionCode,
    pub data_type: DataType,
    pub swap_mode: SwapMode,
    pub value: f64,
}

impl WriteOperation {
    pub fn from_command(command: &WriteCommand) -> Result<Self> {
        let (entity, address) = parse_address(&command.address)?;
        let function_code = entity.write_function().ok_or_else(|| {
            ModbusError::config(format!(
                "Address {} is read-only, only coils and holding registers can be written",
                command.address
            ))
        })?;

        let data_type = match (entity, command.data_type) {
            (EntityType::Coil, _) => DataType::Bit,
            (_, Some(data_type)) => data_type,
            (_, None) => DataType::Int16,
        };

        if !command.value.is_finite() {
            return Err(ModbusError::invalid_argument(format!(
                "Write value for {} must be finite",
                command.address
            )));
        }

        let registers = u32::from(data_type.register_count().max(1));
        if u32::from(address) + registers > 65536 {
            return Err(ModbusError::config(format!(
                "Write to {} runs past the end of the address space",
                command.address
            )));
        }

        Ok(Self {
            hw_id: command.hw_id.clone(),
            unit_id: command.unit_id,
            entity,
            address,
            function_code,
            data_type,
            swap_mode: command.swap_mode,
            value: command.value,
        })
    }

    /// Words to write, one request each at consecutive addresses
    ///
    /// Coils carry 0xFF00/0x0000. Composite values are laid out big-endian,
    /// rearranged by the swap mode, and split into registers.
    pub fn registers(&self) -> Result<Vec<u16>> {
        if self.entity == EntityType::Coil {
            let word = if self.value != 0.0 { COIL_ON } else { COIL_OFF };
            return Ok(vec![word]);
        }

        let mut bytes = match self.data_type {
            DataType::Bit => vec![0, u8::from(self.value != 0.0)],
            DataType::Int16 => {
                let raw = clamp(
                    self.value.round_ties_even(),
                    f64::from(i16::MIN),
                    f64::from(u16::MAX),
                    self,
                );
                let word = if raw < 0.0 {
                    raw as i16 as u16
                } else {
                    raw as u16
                };
                word.to_be_bytes().to_vec()
            },
            DataType::Int32 => {
                let raw = clamp(
                    self.value.round_ties_even(),
                    f64::from(i32::MIN),
                    f64::from(i32::MAX),
                    self,
                );
                (raw as i32).to_be_bytes().to_vec()
            },
            DataType::Float32 => (self.value as f32).to_be_bytes().to_vec(),
        };

        swap(&mut bytes, self.swap_mode)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

fn clamp(value: f64, min: f64, max: f64, operation: &WriteOperation) -> f64 {
    if value < min || value > max {
        warn!(
            "Write value {} for {} at address {} clamped to [{}, {}]",
            operation.value, operation.hw_id, operation.address, min, max
        );
    }
    value.clamp(min, max)
}
