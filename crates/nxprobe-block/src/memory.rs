//! In-memory block device for tests and synthetic container images.

use std::sync::Arc;

use nxprobe_error::{NxError, Result};
use nxprobe_types::Paddr;

use crate::traits::BlockDevice;

/// A block device over an in-memory byte buffer.
///
/// Cheap to clone and to re-slice at a different block size; the backing
/// bytes are shared, never copied.
#[derive(Debug, Clone)]
pub struct MemoryBlockDevice {
    data: Arc<[u8]>,
    block_size: u32,
}

impl MemoryBlockDevice {
    /// Wrap `data` as a device with the given block size.
    pub fn new(data: impl Into<Arc<[u8]>>, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(NxError::corrupt(format!(
                "block size {block_size} is not a power of two"
            )));
        }
        Ok(Self {
            data: data.into(),
            block_size,
        })
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.data.len() as u64 / u64::from(self.block_size)
    }

    fn read_blocks(&self, paddr: Paddr, dst: &mut [u8]) -> Result<()> {
        let block_size = self.block_size as usize;
        debug_assert_eq!(dst.len() % block_size, 0);
        let expected_blocks = (dst.len() / block_size) as u64;

        let start = paddr.byte_offset(self.block_size) as usize;
        let end = start.saturating_add(dst.len());
        if end > self.data.len() || start > self.data.len() {
            let available = self.data.len().saturating_sub(start) / block_size;
            return Err(NxError::ShortRead {
                paddr: paddr.get(),
                expected_blocks,
                actual_blocks: available as u64,
            });
        }
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn with_block_size(&self, block_size: u32) -> Result<Self> {
        Self::new(Arc::clone(&self.data), block_size)
    }
}
