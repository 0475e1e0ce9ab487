//! Structured outcome of a bootstrap run.
//!
//! The orchestrator owns every block buffer; the report carries only decoded
//! summaries, so it outlives the bootstrap and serializes cleanly. Text
//! rendering is an adapter concern (the CLI's), not the pipeline's.

use nxprobe_types::{ObjectHeader, Oid, Paddr, Xid};
use serde::Serialize;

use crate::checkpoint::{CheckpointMapping, SlotDiagnostic};
use crate::omap::{BtreeNodeHeader, OmapPhys};
use crate::superblock::NxSuperblock;

/// Compact view of an object header.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ObjectSummary {
    pub oid: Oid,
    pub xid: Xid,
    pub type_word: u32,
    pub subtype: u32,
}

impl From<ObjectHeader> for ObjectSummary {
    fn from(header: ObjectHeader) -> Self {
        Self {
            oid: header.oid,
            xid: header.xid,
            type_word: header.type_word,
            subtype: header.subtype,
        }
    }
}

/// The superblock fields the inspection narrative reports.
#[derive(Debug, Clone, Serialize)]
pub struct SuperblockSummary {
    pub oid: Oid,
    pub xid: Xid,
    pub magic_valid: bool,
    pub block_size: u32,
    pub block_count: u64,
    pub desc_base: Paddr,
    pub desc_blocks: u32,
    pub desc_contiguous: bool,
    pub desc_index: u32,
    pub desc_len: u32,
    pub next_oid: Oid,
    pub next_xid: Xid,
    pub spaceman_oid: Oid,
    pub omap_oid: Oid,
    pub reaper_oid: Oid,
}

impl From<&NxSuperblock> for SuperblockSummary {
    fn from(sb: &NxSuperblock) -> Self {
        Self {
            oid: sb.header.oid,
            xid: sb.xid(),
            magic_valid: sb.has_valid_magic(),
            block_size: sb.block_size,
            block_count: sb.block_count,
            desc_base: sb.xp_desc_base,
            desc_blocks: sb.desc_block_count(),
            desc_contiguous: sb.desc_area_is_contiguous(),
            desc_index: sb.xp_desc_index,
            desc_len: sb.xp_desc_len,
            next_oid: sb.next_oid,
            next_xid: sb.next_xid,
            spaceman_oid: sb.spaceman_oid,
            omap_oid: sb.omap_oid,
            reaper_oid: sb.reaper_oid,
        }
    }
}

/// What block zero looked like, with the leniency verdicts.
#[derive(Debug, Clone, Serialize)]
pub struct BlockZeroReport {
    pub checksum_valid: bool,
    pub is_superblock_type: bool,
    pub magic_valid: bool,
    pub provisional_block_size: u32,
    pub stated_block_size: u32,
    pub superblock: SuperblockSummary,
}

/// Geometry and scan findings for the checkpoint descriptor area.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptorReport {
    pub base: Paddr,
    pub block_count: u32,
    pub contiguous: bool,
    pub slot_diagnostics: Vec<SlotDiagnostic>,
}

/// Classification of one checkpoint block.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum CheckpointSlotKind {
    Superblock,
    CheckpointMap { mapping_count: u32 },
}

/// One block of the assembled checkpoint, in logical order.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CheckpointBlockSummary {
    /// Position within the checkpoint.
    pub position: u32,
    /// Ring slot the block came from.
    pub ring_index: u32,
    pub object: ObjectSummary,
    pub kind: CheckpointSlotKind,
}

/// One ephemeral object as loaded through its checkpoint mapping.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EphemeralSummary {
    pub mapping: CheckpointMapping,
    /// Header of the loaded block, when one could be decoded.
    pub object: Option<ObjectSummary>,
    pub checksum_valid: bool,
}

/// The omap root node as presented by the bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct BtreeRootReport {
    pub object: ObjectSummary,
    /// Advisory only; a damaged root is still presented.
    pub checksum_valid: bool,
    pub flags: u16,
    pub level: u16,
    pub nkeys: u32,
}

impl BtreeRootReport {
    pub(crate) fn new(node: &BtreeNodeHeader, checksum_valid: bool) -> Self {
        Self {
            object: ObjectSummary::from(node.header),
            checksum_valid,
            flags: node.flags,
            level: node.level,
            nkeys: node.nkeys,
        }
    }
}

/// The container object map as presented by the bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct OmapReport {
    pub object: ObjectSummary,
    pub flags: u32,
    pub snap_count: u32,
    pub tree_type: u32,
    pub tree_oid: Oid,
    pub most_recent_snap: Xid,
    pub tree_is_physical: bool,
    pub root: Option<BtreeRootReport>,
}

impl OmapReport {
    pub(crate) fn new(omap: &OmapPhys, root: Option<BtreeRootReport>) -> Self {
        Self {
            object: ObjectSummary::from(omap.header),
            flags: omap.flags,
            snap_count: omap.snap_count,
            tree_type: omap.tree_type,
            tree_oid: omap.tree_oid,
            most_recent_snap: omap.most_recent_snap,
            tree_is_physical: omap.tree_is_physical(),
            root,
        }
    }
}

/// How one checkpoint candidate ended.
#[derive(Debug, Clone, Serialize)]
pub enum AttemptOutcome {
    /// The candidate survived every validation stage.
    Mounted,
    /// An ephemeral object failed checksum validation; fell back.
    EphemeralChecksumMismatch {
        mapping_index: usize,
        oid: Oid,
        paddr: Paddr,
    },
    /// The container object map failed checksum validation; fell back.
    OmapChecksumMismatch,
    /// The omap loaded but its tree root is not directly addressable.
    OmapTreeNotPhysical,
    /// The named checkpoint range was not a well-formed checkpoint; fell back.
    MalformedCheckpoint { detail: String },
}

/// One candidate superblock the orchestrator tried, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    /// Slot the candidate occupied in the descriptor area.
    pub slot_index: u32,
    pub xid: Xid,
    pub superblock: SuperblockSummary,
    /// Empty when assembly itself failed.
    pub checkpoint_blocks: Vec<CheckpointBlockSummary>,
    pub mappings: Vec<CheckpointMapping>,
    pub ephemerals: Vec<EphemeralSummary>,
    pub omap: Option<OmapReport>,
    pub outcome: AttemptOutcome,
}

/// Terminal state of a bootstrap run that did not fail outright.
#[derive(Debug, Clone, Serialize)]
pub enum Termination {
    /// Latest consistent mount point identified.
    Mounted,
    /// The descriptor area is B-tree-backed; resolving it is unimplemented.
    NonContiguousDescriptorArea { tree_oid: Oid },
    /// The omap tree root is of a non-physical storage class.
    OmapTreeNotPhysical,
    /// Fallback ran out of older well-formed superblocks.
    CandidatesExhausted,
}

/// Full structured outcome of a bootstrap run.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    /// Block size every second-stage read used.
    pub block_size: u32,
    pub block_zero: BlockZeroReport,
    pub descriptor: DescriptorReport,
    pub attempts: Vec<AttemptReport>,
    /// Registered volume oids; populated only on a successful mount.
    pub volumes: Vec<Oid>,
    pub termination: Termination,
}

impl BootstrapReport {
    /// Whether the run identified a consistent mount point.
    #[must_use]
    pub fn mounted(&self) -> bool {
        matches!(self.termination, Termination::Mounted)
    }

    /// The attempt that produced the terminal state, if any ran.
    #[must_use]
    pub fn final_attempt(&self) -> Option<&AttemptReport> {
        self.attempts.last()
    }
}
