//! Gateway configuration model
//!
//! Mirrors the JSON document handed to the module:
//!
//! ```json
//! {
//!   "publishInterval": 5000,
//!   "slaveConfigs": {
//!     "meter": {
//!       "slaveConnection": "192.168.0.10",
//!       "hwId": "PowerMeter-01",
//!       "operations": {
//!         "voltage": { "unitId": 1, "startAddress": "400001", "count": 2,
//!                      "dataType": "Float32", "displayName": "Voltage" }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CORRELATION_ID, DEFAULT_POLLING_INTERVAL_MS, DEFAULT_PUBLISH_INTERVAL_MS,
    DEFAULT_RETRY_COUNT, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_TCP_PORT,
};
use crate::error::{ModbusError, Result};
use crate::operation::ReadOperation;
use crate::serial::SerialSettings;
use crate::swap::SwapMode;
use crate::types::DataType;

/// Top-level module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Interval between output publications (milliseconds)
    #[serde(default = "default_publish_interval")]
    pub publish_interval: u64,
    /// Slave name → slave configuration
    #[serde(default)]
    pub slave_configs: BTreeMap<String, SlaveConfig>,
}

/// One physical slave device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaveConfig {
    /// IP literal for TCP, port name (`COM3`, `/dev/ttyUSB0`) for RTU
    pub slave_connection: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Milliseconds between retries
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    pub hw_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_bits: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity: Option<Parity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_bits: Option<StopBits>,
    /// Passed through untouched into every output record of this slave
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<BTreeMap<String, String>>,
    pub operations: BTreeMap<String, ReadOperationConfig>,
}

/// One polled quantity as configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOperationConfig {
    /// Milliseconds between polls
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    pub unit_id: u8,
    /// Entity-prefixed 1-based address, e.g. `40001`
    pub start_address: String,
    pub count: u16,
    pub data_type: DataType,
    #[serde(default)]
    pub swap_mode: SwapMode,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_correlation_id")]
    pub correlation_id: String,
}

impl Default for ReadOperationConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            unit_id: 1,
            start_address: "40001".to_string(),
            count: 1,
            data_type: DataType::Int16,
            swap_mode: SwapMode::default(),
            display_name: String::new(),
            correlation_id: default_correlation_id(),
        }
    }
}

// Default value functions for serde
fn default_publish_interval() -> u64 {
    DEFAULT_PUBLISH_INTERVAL_MS
}
fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}
fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}
fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}
fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}
fn default_correlation_id() -> String {
    DEFAULT_CORRELATION_ID.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[serde(alias = "none", alias = "N")]
    None,
    #[serde(alias = "odd", alias = "O")]
    Odd,
    #[serde(alias = "even", alias = "E")]
    Even,
}

/// Serial stop bits, accepted as `1`, `2`, `"One"` or `"Two"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StopBitsRepr", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StopBitsRepr {
    Number(u8),
    Name(String),
}

impl TryFrom<StopBitsRepr> for StopBits {
    type Error = String;

    fn try_from(repr: StopBitsRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            StopBitsRepr::Number(1) => Ok(StopBits::One),
            StopBitsRepr::Number(2) => Ok(StopBits::Two),
            StopBitsRepr::Name(name) if name.eq_ignore_ascii_case("one") => Ok(StopBits::One),
            StopBitsRepr::Name(name) if name.eq_ignore_ascii_case("two") => Ok(StopBits::Two),
            StopBitsRepr::Number(n) => Err(format!("unsupported stop bits: {}", n)),
            StopBitsRepr::Name(name) => Err(format!("unsupported stop bits: {}", name)),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> u8 {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Transport selected by the connection string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Tcp,
    Rtu,
    Unknown,
}

impl ConnectionType {
    pub fn classify(connection: &str) -> Self {
        let connection = connection.trim();
        if connection.parse::<IpAddr>().is_ok() {
            ConnectionType::Tcp
        } else if connection.contains("COM") || connection.contains("/tty") {
            ConnectionType::Rtu
        } else {
            ConnectionType::Unknown
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Tcp => f.write_str("ModbusTCP"),
            ConnectionType::Rtu => f.write_str("ModbusRTU"),
            ConnectionType::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Bounded retry policy shared by reads and sends of one slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub count: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: DEFAULT_RETRY_COUNT,
            interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl SlaveConfig {
    pub fn connection_type(&self) -> ConnectionType {
        ConnectionType::classify(&self.slave_connection)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            count: self.retry_count.max(1),
            interval: Duration::from_millis(self.retry_interval),
        }
    }

    /// Serial parameters for an RTU slave; every field is required
    pub fn serial_settings(&self) -> Result<SerialSettings> {
        let missing = |field: &str| {
            ModbusError::config(format!(
                "Value for {} field is required for serial slave {}",
                field, self.hw_id
            ))
        };
        Ok(SerialSettings {
            port: self.slave_connection.trim().to_string(),
            baud_rate: self.baud_rate.ok_or_else(|| missing("baudRate"))?,
            data_bits: self.data_bits.ok_or_else(|| missing("dataBits"))?,
            parity: self.parity.ok_or_else(|| missing("parity"))?,
            stop_bits: self.stop_bits.ok_or_else(|| missing("stopBits"))?,
        })
    }
}

/// Outcome of [`ModuleConfig::validate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Problems that are logged but do not block the load
    pub warnings: Vec<String>,
    /// Problems that reject the whole configuration
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl ModuleConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ModbusError::config(format!("Invalid module configuration: {}", e)))
    }

    /// Check cross-field rules the serde model cannot express
    ///
    /// Slave-level problems are errors. Operations that would be skipped at
    /// session start are reported as warnings.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.publish_interval == 0 {
            report
                .errors
                .push("publishInterval must be at least 1 ms".to_string());
        }

        // Writes are routed by hwId
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();

        for (name, slave) in &self.slave_configs {
            if slave.hw_id.trim().is_empty() {
                report
                    .errors
                    .push(format!("Slave {}: hwId must not be empty", name));
            } else {
                match owners.entry(slave.hw_id.as_str()) {
                    Entry::Occupied(first) => report.errors.push(format!(
                        "Slave {}: hwId {} is already used by slave {}",
                        name,
                        slave.hw_id,
                        first.get()
                    )),
                    Entry::Vacant(slot) => {
                        slot.insert(name.as_str());
                    },
                }
            }
            if slave.retry_count == 0 {
                report
                    .errors
                    .push(format!("Slave {}: retryCount must be at least 1", name));
            }

            match slave.connection_type() {
                ConnectionType::Tcp => {
                    let ignored = [
                        ("baudRate", slave.baud_rate.is_some()),
                        ("dataBits", slave.data_bits.is_some()),
                        ("parity", slave.parity.is_some()),
                        ("stopBits", slave.stop_bits.is_some()),
                    ];
                    for (field, present) in ignored {
                        if present {
                            report.warnings.push(format!(
                                "Slave {}: as TCP Modbus session is used {} field will be ignored",
                                name, field
                            ));
                        }
                    }
                },
                ConnectionType::Rtu => {
                    if let Err(e) = slave.serial_settings() {
                        report.errors.push(format!("Slave {}: {}", name, e));
                    }
                },
                ConnectionType::Unknown => {
                    report.warnings.push(format!(
                        "Slave {}: connection '{}' is neither an IP address nor a serial port, slave will be skipped",
                        name, slave.slave_connection
                    ));
                },
            }

            for (op_name, op) in &slave.operations {
                if let Err(e) = ReadOperation::from_config(op_name, op) {
                    report.warnings.push(format!(
                        "Slave {}: operation {} will be skipped: {}",
                        name, op_name, e
                    ));
                }
            }
        }

        report
    }
}
