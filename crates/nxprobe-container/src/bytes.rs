//! Little-endian field readers shared by the on-disk decoders.
//!
//! Callers bounds-check whole structures up front (`ensure_min_len`), so the
//! per-field readers can slice without re-checking.

use nxprobe_error::{NxError, Result};

pub(crate) fn ensure_min_len(bytes: &[u8], minimum: usize, label: &str) -> Result<()> {
    if bytes.len() < minimum {
        return Err(NxError::corrupt(format!(
            "{label} too small: expected >= {minimum} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

pub(crate) fn read_le_u16_at(bytes: &[u8], offset: usize) -> u16 {
    let mut raw = [0_u8; 2];
    raw.copy_from_slice(&bytes[offset..offset + 2]);
    u16::from_le_bytes(raw)
}

pub(crate) fn read_le_u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0_u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn read_le_u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
