//! Packed coil/discrete input decoding, LSB first

use super::DecodedValue;
use crate::error::{ModbusError, Result};

pub(super) fn decode(bytes: &[u8], count: u16, start: u32) -> Result<Vec<DecodedValue>> {
    let count = usize::from(count);
    if bytes.len() * 8 < count {
        return Err(ModbusError::insufficient_data(format!(
            "{} bits requested but only {} bytes received",
            count,
            bytes.len()
        )));
    }

    let values = (0..count)
        .map(|index| {
            let bit = (bytes[index / 8] >> (index % 8)) & 0x01;
            DecodedValue::new(start + index as u32, if bit == 1 { "1" } else { "0" })
        })
        .collect();
    Ok(values)
}
