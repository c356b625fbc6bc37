//! PIN matrix helper.
//!
//! The device shows a scrambled 3x3 keypad and expects the host to send the
//! keypad *positions* (1-9, row-major from top-left) rather than the digits.
//! The scrambling is known only to the device, so this mapping is only useful
//! when a caller has been told the layout out of band.

use crate::error::{Error, Result};

/// Maps each digit of `pin` to its 1-based position in `matrix`; returns
/// the PIN unchanged when no matrix is given.
pub fn encode_pin(pin: &str, matrix: Option<&[u8; 9]>) -> Result<String> {
    if pin.is_empty() || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Codec("PIN must be a non-empty string of digits".into()));
    }
    let Some(matrix) = matrix else {
        return Ok(pin.to_string());
    };

    pin.bytes()
        .map(|digit| {
            let digit = digit - b'0';
            matrix
                .iter()
                .position(|&m| m == digit)
                .map(|pos| char::from(b'1' + pos as u8))
                .ok_or_else(|| Error::Codec(format!("digit {digit} not present in PIN matrix")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_without_matrix() {
        assert_eq!(encode_pin("1234", None).unwrap(), "1234");
    }

    #[test]
    fn maps_digits_to_positions() {
        let matrix = [7, 8, 9, 4, 5, 6, 1, 2, 3];
        assert_eq!(encode_pin("1590", Some(&[7, 8, 9, 4, 5, 6, 1, 2, 0])).unwrap(), "7539");
        assert_eq!(encode_pin("123", Some(&matrix)).unwrap(), "789");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(encode_pin("", None).is_err());
        assert!(encode_pin("12a4", None).is_err());
        assert!(encode_pin("0", Some(&[1, 2, 3, 4, 5, 6, 7, 8, 9])).is_err());
    }
}
