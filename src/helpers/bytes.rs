//! Little-endian integer decoding for the binary workbook format.
//! Callers pass slices of at least the decoded width.

#[inline]
pub(crate) fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[inline]
pub(crate) fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
pub(crate) fn le_u64(bytes: &[u8]) -> u64 {
    u64::from(le_u32(bytes)) | (u64::from(le_u32(&bytes[4..])) << 32)
}

/// Splits a sector into its 32-bit entries.
pub(crate) fn le_u32_iter(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes.chunks_exact(4).map(le_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian() {
        assert_eq!(le_u16(&[0x34, 0x12, 0xFF]), 0x1234);
        assert_eq!(le_u32(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(le_u64(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]), 0xE11A_B1A1_E011_CFD0);
        assert_eq!(le_u32_iter(&[1, 0, 0, 0, 2, 0, 0, 0, 9]).collect::<Vec<_>>(), [1, 2]);
    }
}
