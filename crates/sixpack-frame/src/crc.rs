//! CRC-16/CCITT as used by 6PACK.
//!
//! Polynomial 0x1021, initial value 0xFFFF, MSB-first, no final XOR.

/// Generator polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Register value before the first byte.
pub const CRC16_INIT: u16 = 0xFFFF;

/// Streaming CRC-16/CCITT register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self { value: CRC16_INIT }
    }

    /// Shift one byte through the register.
    #[inline]
    pub fn update_byte(&mut self, byte: u8) {
        let mut crc = self.value ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
        self.value = crc;
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.update_byte(byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot checksum over `bytes`.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(bytes);
    crc.value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_is_initial_value() {
        assert_eq!(crc16_ccitt(&[]), CRC16_INIT);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data = b"Hello, 6PACK World!";
        let mut crc = Crc16::new();
        crc.update(&data[..7]);
        crc.update(&data[7..]);
        assert_eq!(crc.value(), crc16_ccitt(data));
    }

    #[test]
    fn zero_input_never_clears_register() {
        // The register map is invertible, so a non-zero register fed zeros
        // never reaches zero. The resynchronizer relies on this for runs of
        // sync bytes.
        let mut crc = Crc16::new();
        for _ in 0..4096 {
            crc.update_byte(0);
            assert_ne!(crc.value(), 0);
        }
    }
}
