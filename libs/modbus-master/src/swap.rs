//! Byte order permutations applied to a value's raw register window
//!
//! Registers arrive big-endian on the wire, but devices disagree on how
//! multi-register values are laid out. A [`SwapMode`] rearranges the raw
//! window so that it can always be read as big-endian afterwards.
//!
//! For the 32-bit value `0x12345678` stored by the device as:
//! - `BigEndian (ABCD)`: [0x12, 0x34, 0x56, 0x78]
//! - `LittleEndian (DCBA)`: [0x78, 0x56, 0x34, 0x12]
//! - `BigEndianByteSwap (BADC)`: [0x34, 0x12, 0x78, 0x56]
//! - `LittleEndianByteSwap (CDAB)`: [0x56, 0x78, 0x12, 0x34]
//!
//! Every mode is its own inverse, so the same routine converts device
//! layout to big-endian when decoding and big-endian to device layout when
//! writing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SwapMode {
    /// ABCD, no change
    #[default]
    #[serde(alias = "None", alias = "ABCD")]
    BigEndian,

    /// DCBA, whole window reversed
    #[serde(alias = "DCBA")]
    LittleEndian,

    /// BADC, bytes swapped inside each register
    #[serde(alias = "BADC")]
    BigEndianByteSwap,

    /// CDAB, window reversed then bytes swapped inside each register
    #[serde(alias = "CDAB")]
    LittleEndianByteSwap,
}

impl SwapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigEndian => "BigEndian",
            Self::LittleEndian => "LittleEndian",
            Self::BigEndianByteSwap => "BigEndianByteSwap",
            Self::LittleEndianByteSwap => "LittleEndianByteSwap",
        }
    }
}

impl fmt::Display for SwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapMode {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "BIGENDIAN" | "NONE" | "ABCD" => Ok(Self::BigEndian),
            "LITTLEENDIAN" | "DCBA" => Ok(Self::LittleEndian),
            "BIGENDIANBYTESWAP" | "BADC" => Ok(Self::BigEndianByteSwap),
            "LITTLEENDIANBYTESWAP" | "CDAB" => Ok(Self::LittleEndianByteSwap),
            _ => Err(ModbusError::config(format!("Unknown swap mode: {}", s))),
        }
    }
}

/// Apply `mode` to `window` in place
///
/// The window must hold whole registers; an odd length is rejected.
pub fn swap(window: &mut [u8], mode: SwapMode) -> Result<()> {
    if window.len() % 2 != 0 {
        return Err(ModbusError::invalid_argument(format!(
            "swap window must have an even length, got {} bytes",
            window.len()
        )));
    }

    match mode {
        SwapMode::BigEndian => {},
        SwapMode::LittleEndian => window.reverse(),
        SwapMode::BigEndianByteSwap => swap_pairs(window),
        SwapMode::LittleEndianByteSwap => {
            window.reverse();
            swap_pairs(window);
        },
    }
    Ok(())
}

fn swap_pairs(window: &mut [u8]) {
    for pair in window.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
