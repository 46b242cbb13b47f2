//! Byte-order conversions shared by every structural parser.
//!
//! These are unconditional bit shifts: the caller guarantees the slice holds
//! at least the required number of bytes. Bounds checking lives in
//! [`crate::reader::SliceReader`].

#[inline]
pub fn u16_be(data: &[u8]) -> u16 {
    ((data[0] as u16) << 8) | data[1] as u16
}

#[inline]
pub fn u24_be(data: &[u8]) -> u32 {
    ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32
}

#[inline]
pub fn u32_be(data: &[u8]) -> u32 {
    ((data[0] as u32) << 24) | ((data[1] as u32) << 16) | ((data[2] as u32) << 8) | data[3] as u32
}

#[inline]
pub fn u64_be(data: &[u8]) -> u64 {
    ((u32_be(&data[..4]) as u64) << 32) | u32_be(&data[4..8]) as u64
}

#[inline]
pub fn u16_le(data: &[u8]) -> u16 {
    ((data[1] as u16) << 8) | data[0] as u16
}

#[inline]
pub fn u24_le(data: &[u8]) -> u32 {
    ((data[2] as u32) << 16) | ((data[1] as u32) << 8) | data[0] as u32
}

#[inline]
pub fn u32_le(data: &[u8]) -> u32 {
    ((data[3] as u32) << 24) | ((data[2] as u32) << 16) | ((data[1] as u32) << 8) | data[0] as u32
}

/// IEEE-754 double from 8 big-endian bytes (AMF Number encoding).
#[inline]
pub fn f64_be(data: &[u8]) -> f64 {
    f64::from_bits(u64_be(data))
}

/// Signed 16.16 fixed-point, big-endian (QuickTime rate/dimension fields).
#[inline]
pub fn fixed_16_16_be(data: &[u8]) -> f32 {
    let int_part = u16_be(&data[..2]) as i16;
    let frac_part = u16_be(&data[2..4]);
    int_part as f32 + frac_part as f32 / 65536.0
}

/// Signed 8.8 fixed-point, big-endian (QuickTime volume fields).
#[inline]
pub fn fixed_8_8_be(data: &[u8]) -> f32 {
    u16_be(data) as i16 as f32 / 256.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_reads() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        assert_eq!(u16_be(&data), 0x1234);
        assert_eq!(u24_be(&data), 0x123456);
        assert_eq!(u32_be(&data), 0x12345678);
        assert_eq!(u64_be(&data), 0x123456789ABCDEF0);
    }

    #[test]
    fn little_endian_reads() {
        let data = [0x78, 0x56, 0x34, 0x12];
        assert_eq!(u16_le(&data), 0x5678);
        assert_eq!(u24_le(&data), 0x345678);
        assert_eq!(u32_le(&data), 0x12345678);
    }

    #[test]
    fn double_roundtrip() {
        let value = 12.5f64;
        assert_eq!(f64_be(&value.to_be_bytes()), 12.5);
    }

    #[test]
    fn fixed_point_reads() {
        // 1.5 in 16.16: 0x0001_8000
        assert_eq!(fixed_16_16_be(&[0x00, 0x01, 0x80, 0x00]), 1.5);
        // -2.0 in 16.16
        assert_eq!(fixed_16_16_be(&[0xFF, 0xFE, 0x00, 0x00]), -2.0);
        // 1.0 in 8.8: 0x0100
        assert_eq!(fixed_8_8_be(&[0x01, 0x00]), 1.0);
        assert_eq!(fixed_8_8_be(&[0x00, 0x80]), 0.5);
    }
}
