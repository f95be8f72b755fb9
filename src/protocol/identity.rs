use std::fmt;

use super::checksum::luhn;
use super::codec::RawId;

/// Nibble value marking the end of a packed identifier.
const FILLER: u8 = 0xf;

/// Full length of an identifier that has no check digit yet.
const UNCHECKED_LEN: usize = 14;


/// Device identifier recovered from the packed id field of a frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    digits: String,
}

impl DeviceIdentity {
    /// Unpack two decimal digits per byte, high nibble first, stopping at the
    /// first filler nibble. Nibbles `0xa..=0xe` are written out in decimal.
    pub fn decode(raw: &RawId) -> Self {
        let digits = raw
            .iter()
            .flat_map(|byte| [byte >> 4, byte & 0x0f])
            .take_while(|nibble| *nibble != FILLER)
            .map(|nibble| nibble.to_string())
            .collect();

        Self { digits }
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    /// The identifier with its Luhn check digit appended, for 14 digit ids.
    pub fn alt_id(&self) -> Option<String> {
        if self.digits.len() != UNCHECKED_LEN {
            return None;
        }

        let value: u64 = self.digits.parse().ok()?;

        Some(format!("{}{}", self.digits, luhn(value)))
    }

    /// Identifiers to look the device up with, in order of preference.
    pub fn candidates(&self) -> Vec<String> {
        if self.is_empty() {
            return vec![];
        }

        let mut candidates = vec![self.digits.clone()];
        candidates.extend(self.alt_id());
        candidates
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.digits)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_length_identity() {
        let identity = DeviceIdentity::decode(&[0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34]);

        assert_eq!(identity.digits(), "12345678901234");
        assert_eq!(identity.alt_id().as_deref(), Some("123456789012347"));
        assert_eq!(identity.candidates(), vec!["12345678901234", "123456789012347"]);
    }

    #[test]
    fn test_imei_check_digit() {
        let identity = DeviceIdentity::decode(&[0x49, 0x01, 0x54, 0x20, 0x32, 0x37, 0x51]);

        assert_eq!(identity.alt_id().as_deref(), Some("490154203237518"));
    }

    #[test]
    fn test_filler_truncates_at_every_position() {
        let full = [0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34];
        let expected = "12345678901234";

        for k in 0..UNCHECKED_LEN {
            let mut raw = full;
            let byte = &mut raw[k / 2];
            if k % 2 == 0 {
                *byte |= 0xf0;
            } else {
                *byte |= 0x0f;
            }

            let identity = DeviceIdentity::decode(&raw);
            assert_eq!(identity.digits(), &expected[..k], "filler at nibble {k}");
            assert_eq!(identity.alt_id(), None);
        }
    }

    #[test]
    fn test_odd_length_identity() {
        let identity = DeviceIdentity::decode(&[0x13, 0x61, 0x23, 0x45, 0x67, 0x8f, 0xff]);

        assert_eq!(identity.to_string(), "13612345678");
        assert_eq!(identity.candidates(), vec!["13612345678"]);
    }

    #[test]
    fn test_empty_identity_has_no_candidates() {
        let identity = DeviceIdentity::decode(&[0xff; 7]);

        assert!(identity.is_empty());
        assert!(identity.candidates().is_empty());
    }
}
