#![forbid(unsafe_code)]
//! APFS checkpoint resolution and metadata bootstrap.
//!
//! Starting from raw block zero, this crate walks the checkpoint descriptor
//! ring, selects the newest well-formed container superblock, assembles its
//! checkpoint (wrap-aware), loads and validates the referenced ephemeral
//! objects, and follows the container object map to its B-tree root — the
//! state a mount would start from. Strictly read-only; damaged checkpoints
//! trigger fallback to older ones, never repair.

pub mod bootstrap;
mod bytes;
pub mod checkpoint;
pub mod checksum;
pub mod omap;
pub mod report;
pub mod superblock;

pub use bootstrap::bootstrap;
pub use checkpoint::{
    first_invalid_ephemeral, load_ephemeral_objects, Checkpoint, CheckpointMapBlock,
    CheckpointMapping, DescriptorArea, EphemeralObject, Selection, SelectionScan, SlotDiagnostic,
    SlotIssue, CHECKPOINT_MAP_LAST,
};
pub use checksum::{fletcher64, is_checksum_valid, seal, OBJECT_CHECKSUM_SIZE};
pub use omap::{
    load_omap, BtreeNodeHeader, NodeLocation, OmapLoad, OmapPhys, BTNODE_FIXED_KV_SIZE,
    BTNODE_HASHED, BTNODE_LEAF, BTNODE_NOHEADER, BTNODE_ROOT,
};
pub use report::{
    AttemptOutcome, AttemptReport, BlockZeroReport, BootstrapReport, BtreeRootReport,
    CheckpointBlockSummary, CheckpointSlotKind, DescriptorReport, EphemeralSummary, ObjectSummary,
    OmapReport, SuperblockSummary, Termination,
};
pub use superblock::{
    NxSuperblock, NX_MAGIC, NX_MAX_FILE_SYSTEMS, XP_DESC_NONCONTIGUOUS,
};
