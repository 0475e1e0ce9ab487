//! Checkpoint descriptor ring: loading, selection, assembly, and the
//! ephemeral objects a checkpoint carries.
//!
//! The descriptor area is a ring buffer of `D` blocks, each holding either a
//! container superblock or a checkpoint-map object. The newest well-formed
//! superblock names the current checkpoint as a sub-range of the ring,
//! possibly wrapping; its checkpoint-map blocks in turn name the ephemeral
//! objects and the physical blocks that hold them for this transaction.

use nxprobe_block::BlockDevice;
use nxprobe_error::{NxError, Result};
use nxprobe_types::{ObjectHeader, ObjectKind, Oid, Paddr, Xid};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bytes::{ensure_min_len, read_le_u32_at, read_le_u64_at};
use crate::checksum::is_checksum_valid;
use crate::superblock::NxSuperblock;

const CPM_FLAGS_OFFSET: usize = 32;
const CPM_COUNT_OFFSET: usize = 36;
const CPM_MAP_OFFSET: usize = 40;
const CPM_ENTRY_SIZE: usize = 40;

/// Flag on a checkpoint-map block: last map block of its checkpoint.
pub const CHECKPOINT_MAP_LAST: u32 = 0x1;

/// Why a descriptor slot was passed over during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotIssue {
    /// The block failed checksum validation.
    BadChecksum,
    /// The block is too small to carry an object header.
    TruncatedHeader,
    /// A superblock-typed block whose magic is not `NXSB`.
    BadMagic,
    /// Neither a container superblock nor a checkpoint map.
    UnexpectedObjectType { type_word: u32 },
}

/// A per-slot finding from the selection scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotDiagnostic {
    /// Index of the slot within the descriptor area.
    pub index: u32,
    pub issue: SlotIssue,
}

/// The winning slot of a selection scan.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Index within the descriptor area.
    pub index: u32,
    /// The decoded superblock stored there.
    pub superblock: NxSuperblock,
}

/// Everything one selection scan produced.
#[derive(Debug)]
pub struct SelectionScan {
    /// The newest well-formed superblock, if any slot qualified.
    pub best: Option<Selection>,
    /// Slots that were skipped, in scan order.
    pub diagnostics: Vec<SlotDiagnostic>,
}

/// The checkpoint descriptor area, loaded into memory in ring order.
///
/// Retained for the whole bootstrap: when a checkpoint turns out to reference
/// damaged ephemeral state, the next-older candidate is selected from this
/// copy without touching the device again.
#[derive(Debug)]
pub struct DescriptorArea {
    buf: Vec<u8>,
    block_size: usize,
    block_count: u32,
}

impl DescriptorArea {
    /// Read the descriptor area named by `sb` from the device.
    ///
    /// The B-tree-backed layout (high bit of `nx_xp_desc_blocks`) is
    /// recognized but not resolved; it surfaces as `NxError::Unimplemented`.
    pub fn load<D: BlockDevice>(dev: &D, sb: &NxSuperblock) -> Result<Self> {
        let block_count = sb.desc_block_count();
        if block_count == 0 {
            return Err(NxError::corrupt("checkpoint descriptor area is empty"));
        }
        if !sb.desc_area_is_contiguous() {
            return Err(NxError::unimplemented(format!(
                "non-contiguous checkpoint descriptor area (B-tree with physical oid {:#x})",
                sb.xp_desc_base
            )));
        }

        // Refuse impossible geometry before allocating the ring copy.
        let device_blocks = dev.block_count();
        let base = sb.xp_desc_base.get();
        if base.saturating_add(u64::from(block_count)) > device_blocks {
            return Err(NxError::ShortRead {
                paddr: base,
                expected_blocks: u64::from(block_count),
                actual_blocks: device_blocks.saturating_sub(base.min(device_blocks)),
            });
        }

        let block_size = dev.block_size() as usize;
        let mut buf = vec![0_u8; block_count as usize * block_size];
        dev.read_blocks(sb.xp_desc_base, &mut buf)?;
        debug!(
            base = %sb.xp_desc_base,
            blocks = block_count,
            "loaded checkpoint descriptor area"
        );
        Ok(Self {
            buf,
            block_size,
            block_count,
        })
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Raw bytes of one slot.
    #[must_use]
    pub fn slot(&self, index: u32) -> &[u8] {
        let start = index as usize * self.block_size;
        &self.buf[start..start + self.block_size]
    }

    /// Scan the ring for the newest well-formed container superblock.
    ///
    /// Slots are visited left to right and only a strictly greater xid
    /// displaces the current best, so the earliest slot carrying the maximal
    /// xid wins. A damaged slot never shadows a later candidate. When
    /// `exclude_at_or_above` is set, superblocks at or beyond that xid are
    /// ignored; this is how fallback walks backward through history after a
    /// checkpoint proves unusable.
    #[must_use]
    pub fn select_latest(&self, exclude_at_or_above: Option<Xid>) -> SelectionScan {
        let mut best: Option<Selection> = None;
        let mut diagnostics = Vec::new();

        for index in 0..self.block_count {
            let block = self.slot(index);
            if !is_checksum_valid(block) {
                warn!(index, "descriptor slot failed checksum validation, skipping");
                diagnostics.push(SlotDiagnostic {
                    index,
                    issue: SlotIssue::BadChecksum,
                });
                continue;
            }

            let Some(header) = ObjectHeader::parse(block) else {
                warn!(index, "descriptor slot too small for an object header, skipping");
                diagnostics.push(SlotDiagnostic {
                    index,
                    issue: SlotIssue::TruncatedHeader,
                });
                continue;
            };

            if header.is_nx_superblock() {
                let Ok(candidate) = NxSuperblock::parse(block) else {
                    warn!(index, "superblock slot truncated, skipping");
                    diagnostics.push(SlotDiagnostic {
                        index,
                        issue: SlotIssue::TruncatedHeader,
                    });
                    continue;
                };
                if !candidate.has_valid_magic() {
                    warn!(index, "superblock slot has incorrect magic, skipping");
                    diagnostics.push(SlotDiagnostic {
                        index,
                        issue: SlotIssue::BadMagic,
                    });
                    continue;
                }
                if let Some(bound) = exclude_at_or_above {
                    if candidate.xid() >= bound {
                        continue;
                    }
                }
                let improves = match &best {
                    Some(current) => candidate.xid() > current.superblock.xid(),
                    None => true,
                };
                if improves {
                    best = Some(Selection {
                        index,
                        superblock: candidate,
                    });
                }
            } else if !header.is_checkpoint_map() {
                warn!(
                    index,
                    type_word = header.type_word,
                    "descriptor slot is neither a superblock nor a checkpoint map, skipping"
                );
                diagnostics.push(SlotDiagnostic {
                    index,
                    issue: SlotIssue::UnexpectedObjectType {
                        type_word: header.type_word,
                    },
                });
            }
        }

        if let Some(selection) = &best {
            debug!(
                index = selection.index,
                xid = %selection.superblock.xid(),
                "selected container superblock"
            );
        }
        SelectionScan { best, diagnostics }
    }

    /// Extract the checkpoint named by `sb` from the ring.
    ///
    /// The range may wrap past the end of the area; the result is in logical
    /// checkpoint order. The assembled range must consist of checkpoint maps
    /// plus exactly one superblock carrying `sb`'s xid; anything else is a
    /// malformed checkpoint, which callers treat as grounds for fallback.
    pub fn assemble(&self, sb: &NxSuperblock) -> Result<Checkpoint> {
        let ring_size = self.block_count;
        let start = sb.xp_desc_index;
        let len = sb.xp_desc_len;

        if len == 0 {
            return Err(NxError::malformed_checkpoint("checkpoint length is zero"));
        }
        if len > ring_size {
            return Err(NxError::malformed_checkpoint(format!(
                "checkpoint spans {len} blocks but the descriptor area only holds {ring_size}"
            )));
        }
        if start >= ring_size {
            return Err(NxError::malformed_checkpoint(format!(
                "checkpoint start index {start} is outside the descriptor area of {ring_size} blocks"
            )));
        }

        let buf = copy_ring_range(&self.buf, self.block_size, ring_size, start, len);
        let checkpoint = Checkpoint {
            buf,
            block_size: self.block_size,
            len,
            ring_start: start,
            ring_size,
        };
        checkpoint.verify_composition(sb.xid())?;
        Ok(checkpoint)
    }
}

/// Copy `len` ring slots starting at `start`, wrapping at `ring_size`.
fn copy_ring_range(
    ring: &[u8],
    block_size: usize,
    ring_size: u32,
    start: u32,
    len: u32,
) -> Vec<u8> {
    let start_usize = start as usize;
    let len_usize = len as usize;
    let ring_usize = ring_size as usize;
    let mut out = vec![0_u8; len_usize * block_size];

    if start_usize + len_usize <= ring_usize {
        out.copy_from_slice(
            &ring[start_usize * block_size..(start_usize + len_usize) * block_size],
        );
    } else {
        let seg1 = ring_usize - start_usize;
        out[..seg1 * block_size]
            .copy_from_slice(&ring[start_usize * block_size..ring_usize * block_size]);
        let seg2 = len_usize - seg1;
        out[seg1 * block_size..].copy_from_slice(&ring[..seg2 * block_size]);
    }
    out
}

/// One checkpoint in logical order: its naming superblock plus the
/// checkpoint-map blocks written with it.
#[derive(Debug)]
pub struct Checkpoint {
    buf: Vec<u8>,
    block_size: usize,
    len: u32,
    ring_start: u32,
    ring_size: u32,
}

impl Checkpoint {
    /// Number of blocks in the checkpoint.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw bytes of the checkpoint block at logical position `index`.
    #[must_use]
    pub fn slot(&self, index: u32) -> &[u8] {
        let start = index as usize * self.block_size;
        &self.buf[start..start + self.block_size]
    }

    /// Ring index a logical position was copied from.
    #[must_use]
    pub fn ring_index(&self, index: u32) -> u32 {
        (self.ring_start + index) % self.ring_size
    }

    /// Every slot must be a checkpoint map except exactly one superblock
    /// whose xid matches the selection.
    fn verify_composition(&self, expected_xid: Xid) -> Result<()> {
        let mut superblocks = 0_u32;
        for index in 0..self.len {
            let block = self.slot(index);
            let header = ObjectHeader::parse(block).ok_or_else(|| {
                NxError::malformed_checkpoint(format!(
                    "checkpoint block {index} is too small for an object header"
                ))
            })?;
            match header.kind() {
                ObjectKind::NxSuperblock => {
                    if header.xid != expected_xid {
                        return Err(NxError::malformed_checkpoint(format!(
                            "checkpoint block {index} is a superblock with xid {} instead of {}",
                            header.xid, expected_xid
                        )));
                    }
                    superblocks += 1;
                }
                ObjectKind::CheckpointMap => {}
                _ => {
                    return Err(NxError::malformed_checkpoint(format!(
                        "checkpoint block {index} has unexpected type word {:#x}",
                        header.type_word
                    )));
                }
            }
        }
        if superblocks != 1 {
            return Err(NxError::malformed_checkpoint(format!(
                "checkpoint holds {superblocks} superblocks, expected exactly 1"
            )));
        }
        Ok(())
    }

    /// Decode every checkpoint-map block, in logical order.
    pub fn map_blocks(&self) -> Result<Vec<CheckpointMapBlock>> {
        let mut blocks = Vec::new();
        for index in 0..self.len {
            let block = self.slot(index);
            let header = ObjectHeader::parse(block).ok_or_else(|| {
                NxError::malformed_checkpoint(format!(
                    "checkpoint block {index} is too small for an object header"
                ))
            })?;
            if header.is_checkpoint_map() {
                let parsed = CheckpointMapBlock::parse(block).map_err(|err| {
                    NxError::malformed_checkpoint(format!("checkpoint block {index}: {err}"))
                })?;
                blocks.push(parsed);
            }
        }
        Ok(blocks)
    }

    /// All checkpoint mappings, concatenated in document order.
    pub fn mappings(&self) -> Result<Vec<CheckpointMapping>> {
        Ok(self
            .map_blocks()?
            .into_iter()
            .flat_map(|block| block.mappings)
            .collect())
    }
}

/// One entry of a checkpoint map: where an ephemeral object lives for this
/// checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointMapping {
    /// Type word of the ephemeral object.
    pub object_type: u32,
    pub subtype: u32,
    /// Size of the object in bytes.
    pub size: u32,
    /// Owning volume, or zero for container-level objects.
    pub fs_oid: Oid,
    /// The ephemeral oid being mapped.
    pub oid: Oid,
    /// Physical block that stores the object for this checkpoint.
    pub paddr: Paddr,
}

/// A decoded checkpoint-map block.
#[derive(Debug, Clone)]
pub struct CheckpointMapBlock {
    pub header: ObjectHeader,
    pub flags: u32,
    pub mappings: Vec<CheckpointMapping>,
}

impl CheckpointMapBlock {
    /// Decode a checkpoint-map block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_min_len(block, CPM_MAP_OFFSET, "checkpoint-map block")?;
        let header = ObjectHeader::parse(block)
            .expect("checkpoint-map minimum covers the object header");
        let flags = read_le_u32_at(block, CPM_FLAGS_OFFSET);
        let count = read_le_u32_at(block, CPM_COUNT_OFFSET) as usize;

        let needed = CPM_MAP_OFFSET + count * CPM_ENTRY_SIZE;
        if needed > block.len() {
            return Err(NxError::corrupt(format!(
                "checkpoint map declares {count} mappings, needing {needed} bytes in a {}-byte block",
                block.len()
            )));
        }

        let mut mappings = Vec::with_capacity(count);
        for entry in 0..count {
            let base = CPM_MAP_OFFSET + entry * CPM_ENTRY_SIZE;
            mappings.push(CheckpointMapping {
                object_type: read_le_u32_at(block, base),
                subtype: read_le_u32_at(block, base + 4),
                size: read_le_u32_at(block, base + 8),
                fs_oid: Oid(read_le_u64_at(block, base + 16)),
                oid: Oid(read_le_u64_at(block, base + 24)),
                paddr: Paddr(read_le_u64_at(block, base + 32)),
            });
        }
        Ok(Self {
            header,
            flags,
            mappings,
        })
    }

    /// Whether this is the last map block of its checkpoint.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.flags & CHECKPOINT_MAP_LAST != 0
    }
}

/// An ephemeral object read back through a checkpoint mapping.
#[derive(Debug)]
pub struct EphemeralObject {
    pub mapping: CheckpointMapping,
    pub block: Vec<u8>,
}

impl EphemeralObject {
    /// Header of the loaded block, if it is large enough to carry one.
    #[must_use]
    pub fn header(&self) -> Option<ObjectHeader> {
        ObjectHeader::parse(&self.block)
    }
}

/// Read every ephemeral object a checkpoint references, in document order.
///
/// One block per mapping: the mapping's `size` may describe a multi-block
/// object, but the canonical storage location starts at `paddr` and the
/// header block is what checkpoint validation needs.
pub fn load_ephemeral_objects<D: BlockDevice>(
    dev: &D,
    mappings: &[CheckpointMapping],
) -> Result<Vec<EphemeralObject>> {
    let mut objects = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let block = dev.read_block(mapping.paddr)?;
        objects.push(EphemeralObject {
            mapping: *mapping,
            block,
        });
    }
    debug!(count = objects.len(), "loaded ephemeral objects");
    Ok(objects)
}

/// Index of the first ephemeral object whose checksum does not validate.
#[must_use]
pub fn first_invalid_ephemeral(objects: &[EphemeralObject]) -> Option<usize> {
    objects
        .iter()
        .position(|object| !is_checksum_valid(&object.block))
}
