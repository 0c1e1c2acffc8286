//! Device identity matching.
//!
//! Vendor/product ids come from the device descriptor; the serial number
//! comes from a UTF-16LE string descriptor and is compared against the
//! caller's UTF-8 selector after normalizing both sides to UTF-16, ordinal
//! and case-insensitive.

use tracing::debug;

use crate::backend::UsbInterface;
use crate::error::{Error, Result};
use crate::types::Selector;

/// Descriptor type byte for string descriptors (USB 3.2 table 9-6).
const STRING_DESCRIPTOR_TYPE: u8 = 0x03;

/// Decide whether the device behind `iface` matches `selector`.
///
/// `Ok(false)` is a plain mismatch. `Err` means this candidate could not be
/// evaluated (descriptor query failed, or the device returned a malformed
/// serial descriptor); the scanner treats both the same way, by skipping the
/// candidate.
pub fn matches<I: UsbInterface>(iface: &I, selector: &Selector) -> Result<bool> {
    let identity = iface.device_identity()?;

    // Vendor/product first: the cheap checks rule out most candidates
    // before any string descriptor round-trip.
    if identity.vendor_id != selector.vendor_id || identity.product_id != selector.product_id {
        return Ok(false);
    }

    let Some(wanted) = &selector.serial else {
        return Ok(true);
    };

    // A device of the right kind that advertises no serial number cannot
    // match a serial-constrained selector.
    let Some(serial_index) = identity.serial_index else {
        debug!(
            vendor_id = format_args!("{:#06x}", identity.vendor_id),
            product_id = format_args!("{:#06x}", identity.product_id),
            "device advertises no serial number descriptor"
        );
        return Ok(false);
    };

    let raw = iface.string_descriptor(serial_index)?;
    let device_serial = decode_string_descriptor(&raw)?;
    if device_serial.is_empty() {
        // An advertised serial index must carry characters; an empty string
        // is a misbehaving device, not a mismatch.
        return Err(Error::MalformedDescriptor("serial number string is empty"));
    }

    let wanted_utf16: Vec<u16> = wanted.encode_utf16().collect();
    Ok(eq_ordinal_ignore_case(&wanted_utf16, &device_serial))
}

/// Decode a raw string descriptor into its UTF-16 code units.
///
/// Layout per the USB string-descriptor convention: a length byte covering
/// the whole descriptor, a type byte, then `length - 2` bytes of UTF-16LE
/// character data.
pub fn decode_string_descriptor(raw: &[u8]) -> Result<Vec<u16>> {
    if raw.len() < 2 {
        return Err(Error::MalformedDescriptor("descriptor shorter than its header"));
    }

    let length = raw[0] as usize;
    if length < 2 || length > raw.len() {
        return Err(Error::MalformedDescriptor("descriptor length byte out of range"));
    }
    if raw[1] != STRING_DESCRIPTOR_TYPE {
        return Err(Error::MalformedDescriptor("not a string descriptor"));
    }
    if (length - 2) % 2 != 0 {
        return Err(Error::MalformedDescriptor("odd UTF-16 payload length"));
    }

    Ok(raw[2..length]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Ordinal, case-insensitive equality over UTF-16 code units.
///
/// Each unit is folded through simple (one-to-one) uppercasing and compared
/// byte-for-byte, with no locale or normalization involved. Units with no
/// simple uppercase mapping, and unpaired surrogates, compare raw.
pub fn eq_ordinal_ignore_case(a: &[u16], b: &[u16]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(&x, &y)| fold_unit(x) == fold_unit(y))
}

fn fold_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(unit as u32) else {
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if (u as u32) <= 0xFFFF => u as u16,
        _ => unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::string_descriptor_bytes;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_decode_round_trip() {
        let raw = string_descriptor_bytes("0123456789");
        let units = decode_string_descriptor(&raw).unwrap();
        assert_eq!(units, utf16("0123456789"));
    }

    #[test]
    fn test_decode_ignores_trailing_buffer() {
        // Devices fill whatever buffer they are handed; only the length byte
        // counts.
        let mut raw = string_descriptor_bytes("AB");
        raw.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_string_descriptor(&raw).unwrap(), utf16("AB"));
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        assert!(decode_string_descriptor(&[]).is_err());
        assert!(decode_string_descriptor(&[0x01]).is_err());
        // Length byte larger than the data actually returned
        assert!(decode_string_descriptor(&[0x08, 0x03, b'A', 0x00]).is_err());
        // Wrong descriptor type
        assert!(decode_string_descriptor(&[0x04, 0x01, b'A', 0x00]).is_err());
        // Odd payload length
        assert!(decode_string_descriptor(&[0x05, 0x03, b'A', 0x00, b'B']).is_err());
    }

    #[test]
    fn test_decode_empty_string_is_valid_at_this_layer() {
        // The matcher, not the decoder, decides that an empty serial is a
        // device error.
        assert_eq!(decode_string_descriptor(&[0x02, 0x03]).unwrap(), vec![]);
    }

    #[test]
    fn test_ordinal_compare_case_insensitive() {
        assert!(eq_ordinal_ignore_case(&utf16("ABC123"), &utf16("abc123")));
        assert!(eq_ordinal_ignore_case(&utf16("abc123"), &utf16("ABC123")));
        assert!(!eq_ordinal_ignore_case(&utf16("abc123"), &utf16("abc124")));
        assert!(!eq_ordinal_ignore_case(&utf16("abc"), &utf16("abc1")));
    }

    #[test]
    fn test_ordinal_compare_non_ascii() {
        assert!(eq_ordinal_ignore_case(&utf16("série"), &utf16("SÉRIE")));
        // Ordinal means no normalization: precomposed é vs e + combining
        // acute are different strings.
        assert!(!eq_ordinal_ignore_case(&utf16("s\u{00e9}rie"), &utf16("se\u{0301}rie")));
    }
}
