use crc::{Crc, CRC_16_IBM_3740};

/// CRC16/CCITT-FALSE: poly `0x1021`, init `0xffff`, no reflection, no xor-out.
const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    CCITT_FALSE.checksum(bytes)
}

/// Luhn check digit for the decimal representation of `value`.
///
/// Doubling starts at the least significant digit, since the result is
/// appended to the right of `value`.
pub fn luhn(value: u64) -> u8 {
    let mut sum = 0;
    let mut remain = value;
    let mut double = true;

    while remain != 0 {
        let mut digit = remain % 10;
        if double {
            digit *= 2;
            if digit >= 10 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
        remain /= 10;
    }

    ((10 - sum % 10) % 10) as u8
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_of_empty_input_is_init_value() {
        assert_eq!(crc16_ccitt_false(&[]), 0xffff);
    }

    #[test]
    fn crc_check_value() {
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29b1);
    }

    #[test]
    fn luhn_reference_values() {
        // IMEI 49015420323751-8
        assert_eq!(luhn(49015420323751), 8);
        // 7992739871-3
        assert_eq!(luhn(7992739871), 3);
        assert_eq!(luhn(0), 0);
        assert_eq!(luhn(12345678901234), 7);
    }
}
