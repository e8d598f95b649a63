//! 16/32-bit register decoding with swap modes

use super::{DecodedValue, Decoder};
use crate::error::{ModbusError, Result};
use crate::swap::{swap, SwapMode};

pub(super) fn decode(
    decoder: Decoder,
    bytes: &[u8],
    count: u16,
    start: u32,
    swap_mode: SwapMode,
) -> Result<Vec<DecodedValue>> {
    let size = decoder.byte_size();
    if size == 0 {
        return Err(ModbusError::invalid_argument(
            "bit payloads are not register values",
        ));
    }
    if bytes.len() < size {
        return Err(ModbusError::insufficient_data(format!(
            "{:?} needs {} bytes per value, payload has {}",
            decoder,
            size,
            bytes.len()
        )));
    }
    if bytes.len() % size != 0 {
        return Err(ModbusError::insufficient_data(format!(
            "payload of {} bytes is not a whole number of {}-byte values",
            bytes.len(),
            size
        )));
    }

    // A short but well-formed payload decodes what it carries
    let available = bytes.len() / size;
    let take = available.min(usize::from(count));
    let step = decoder.address_step();

    let mut values = Vec::with_capacity(take);
    for (index, chunk) in bytes.chunks_exact(size).take(take).enumerate() {
        let mut window = [0u8; 4];
        let window = &mut window[..size];
        window.copy_from_slice(chunk);
        swap(window, swap_mode)?;

        let value = match decoder {
            Decoder::Int16 => i16::from_be_bytes([window[0], window[1]]).to_string(),
            Decoder::Int32 => {
                i32::from_be_bytes([window[0], window[1], window[2], window[3]]).to_string()
            },
            Decoder::Float32 => format_float(f32::from_be_bytes([
                window[0], window[1], window[2], window[3],
            ])),
            Decoder::Bit => continue,
        };
        values.push(DecodedValue::new(start + index as u32 * step, value));
    }
    Ok(values)
}

/// Magnitude from which every `f32` is a whole number
const F32_INTEGRAL: f64 = 8_388_608.0;

/// Magnitude from which values print as `d.dddE+XX`
const SCIENTIFIC_FROM: f64 = 1e15;

/// Round to 3 decimals (ties to even) and print in the shortest invariant form
///
/// Magnitudes of 1e15 and above use a mantissa with a signed, at least
/// two-digit exponent (`3.4028234663852886E+38`). Non-finite values print as
/// `Infinity`, `-Infinity` and `NaN`.
pub fn format_float(value: f32) -> String {
    let value = f64::from(value);
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        let sign = if value < 0.0 { "-" } else { "" };
        return format!("{sign}Infinity");
    }

    let rounded = if value.abs() < F32_INTEGRAL {
        (value * 1000.0).round_ties_even() / 1000.0
    } else {
        value
    };
    if rounded == 0.0 {
        // drop the sign of -0
        return "0".to_string();
    }
    if rounded.abs() >= SCIENTIFIC_FROM {
        return scientific(rounded);
    }
    rounded.to_string()
}

fn scientific(value: f64) -> String {
    let formatted = format!("{:e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}E{sign}{digits:0>2}")
        },
        None => formatted,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_int16_negative() {
        let values = decode(Decoder::Int16, &[0xFF, 0xFE], 1, 0, SwapMode::BigEndian).unwrap();
        assert_eq!(values[0].value, "-2");
    }

    #[test]
    fn test_int32_extremes() {
        let values = decode(
            Decoder::Int32,
            &[0x7F, 0xFF, 0xFF, 0xFF, 0x80, 0x00, 0x00, 0x00],
            2,
            0,
            SwapMode::BigEndian,
        )
        .unwrap();
        assert_eq!(values[0].value, "2147483647");
        assert_eq!(values[1].value, "-2147483648");
        assert_eq!(values[1].address, 2);
    }

    #[test]
    fn test_short_payload_decodes_available_values() {
        let values = decode(
            Decoder::Int32,
            &[0x7F, 0xFF, 0xFF, 0xFF],
            2,
            0,
            SwapMode::BigEndian,
        )
        .unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_ragged_or_empty_payload_rejected() {
        let err = decode(Decoder::Float32, &[1, 2, 3, 4, 5, 6], 2, 0, SwapMode::BigEndian)
            .unwrap_err();
        assert!(matches!(err, ModbusError::InsufficientData(_)));

        let err = decode(Decoder::Int16, &[], 1, 0, SwapMode::BigEndian).unwrap_err();
        assert!(matches!(err, ModbusError::InsufficientData(_)));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(5.5), "5.5");
        assert_eq!(format_float(4000.5554), "4000.555");
        assert_eq!(format_float(-0.0001), "0");
        assert_eq!(format_float(12.0), "12");
        assert_eq!(format_float(-1.25), "-1.25");
    }

    #[test]
    fn test_format_float_large_and_non_finite() {
        assert_eq!(format_float(123_456_792.0), "123456792");
        assert_eq!(format_float(f32::MAX), "3.4028234663852886E+38");
        assert_eq!(format_float(-f32::MAX), "-3.4028234663852886E+38");
        assert_eq!(format_float(1e17), "9.999999843067494E+16");
        assert_eq!(format_float(f32::INFINITY), "Infinity");
        assert_eq!(format_float(f32::NEG_INFINITY), "-Infinity");
        assert_eq!(format_float(f32::NAN), "NaN");
    }

    #[test]
    fn test_float_decode_overflowed_register_pair() {
        // 0x7F800000 is +inf
        let values = decode(
            Decoder::Float32,
            &[0x7F, 0x80, 0x00, 0x00],
            1,
            0,
            SwapMode::BigEndian,
        )
        .unwrap();
        assert_eq!(values[0].value, "Infinity");
    }
}
