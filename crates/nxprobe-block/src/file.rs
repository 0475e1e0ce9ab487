//! File-backed block device using positional reads.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use nxprobe_error::{NxError, Result};
use nxprobe_types::Paddr;
use tracing::debug;

use crate::traits::BlockDevice;

/// Read-only block device over an image file or device special file.
///
/// Uses positional reads, so no seek state is shared and the handle never
/// needs mutable access. No locks are taken: the tool is a passive observer
/// and the image is assumed quiescent.
#[derive(Debug)]
pub struct FileBlockDevice {
    file: File,
    path: PathBuf,
    block_size: u32,
    block_count: u64,
}

impl FileBlockDevice {
    /// Open `path` read-only with the given block size.
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_block_size(block_size)?;
        let file = File::open(&path)?;
        let byte_len = file.metadata()?.len();
        let block_count = byte_len / u64::from(block_size);
        debug!(
            path = %path.display(),
            block_size,
            block_count,
            "opened container image"
        );
        Ok(Self {
            file,
            path,
            block_size,
            block_count,
        })
    }

    /// Path this device was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, paddr: Paddr, dst: &mut [u8]) -> Result<()> {
        let block_size = self.block_size as usize;
        debug_assert_eq!(dst.len() % block_size, 0);
        let expected_blocks = (dst.len() / block_size) as u64;

        let mut offset = paddr.byte_offset(self.block_size);
        let mut filled = 0_usize;
        while filled < dst.len() {
            let n = read_at(&self.file, &mut dst[filled..], offset)?;
            if n == 0 {
                // EOF inside the request.
                return Err(NxError::ShortRead {
                    paddr: paddr.get(),
                    expected_blocks,
                    actual_blocks: (filled / block_size) as u64,
                });
            }
            filled += n;
            offset += n as u64;
        }
        Ok(())
    }

    fn with_block_size(&self, block_size: u32) -> Result<Self> {
        Self::open(&self.path, block_size)
    }
}

fn validate_block_size(block_size: u32) -> Result<()> {
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(NxError::corrupt(format!(
            "block size {block_size} is not a power of two"
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
