//! The block-device seam.

use nxprobe_error::Result;
use nxprobe_types::Paddr;

/// Provisional block size used for the first read of block zero, before the
/// container superblock has stated the real size.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Random-access, read-only view of a container at fixed block granularity.
///
/// Reads are all-or-nothing: a request that cannot be satisfied in full
/// fails with `NxError::ShortRead` carrying the shortfall. The backing image
/// is assumed quiescent for the lifetime of the device.
pub trait BlockDevice {
    /// Block size in bytes. Constant for the lifetime of the device.
    fn block_size(&self) -> u32;

    /// Number of whole blocks the backing image holds.
    fn block_count(&self) -> u64;

    /// Read `dst.len() / block_size` contiguous blocks starting at `paddr`.
    ///
    /// `dst` must be a multiple of the block size; a partial read is an
    /// error, never a truncated success.
    fn read_blocks(&self, paddr: Paddr, dst: &mut [u8]) -> Result<()>;

    /// Rebuild this device over the same backing bytes with a different
    /// block size.
    ///
    /// Used once per bootstrap: block zero is read at a provisional size,
    /// and the size the superblock states takes over for every later read.
    fn with_block_size(&self, block_size: u32) -> Result<Self>
    where
        Self: Sized;

    /// Read a single block into a fresh buffer.
    fn read_block(&self, paddr: Paddr) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; self.block_size() as usize];
        self.read_blocks(paddr, &mut buf)?;
        Ok(buf)
    }
}
