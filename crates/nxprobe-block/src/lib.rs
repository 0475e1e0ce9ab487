#![forbid(unsafe_code)]
//! Read-only block-device abstraction over APFS container images.
//!
//! The inspection pipeline only ever needs random-access reads at a fixed
//! block granularity. The [`BlockDevice`] trait captures that contract; the
//! file-backed implementation serves real images and device special files,
//! and the in-memory implementation serves tests and synthetic containers.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileBlockDevice;
pub use memory::MemoryBlockDevice;
pub use traits::{BlockDevice, DEFAULT_BLOCK_SIZE};
