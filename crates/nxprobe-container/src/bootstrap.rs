//! The bootstrap orchestrator.
//!
//! Drives the pipeline from raw block zero to the container object map's
//! B-tree root:
//!
//! 1. read block zero leniently (its copy of the superblock is stale by
//!    design, so checksum/type/magic mismatches are warnings, not errors);
//! 2. load the checkpoint descriptor area and keep it for the whole run;
//! 3. select the newest well-formed superblock, assemble its checkpoint,
//!    load and validate the ephemeral objects, follow the omap;
//! 4. on an ephemeral or omap checksum failure, fall back: exclude the
//!    failed candidate's xid and re-select from the retained descriptor
//!    copy, walking backward through history until a checkpoint holds up or
//!    no candidate remains.
//!
//! Every block buffer is owned here and dropped with the attempt that read
//! it; the report carries decoded summaries only.

use nxprobe_block::BlockDevice;
use nxprobe_error::{NxError, Result};
use nxprobe_types::{ObjectHeader, Paddr, Xid};
use tracing::{debug, info, warn};

use crate::checkpoint::{
    first_invalid_ephemeral, load_ephemeral_objects, Checkpoint, CheckpointMapBlock,
    CheckpointMapping, DescriptorArea, Selection,
};
use crate::checksum::is_checksum_valid;
use crate::omap::{load_omap, OmapLoad};
use crate::report::{
    AttemptOutcome, AttemptReport, BlockZeroReport, BootstrapReport, BtreeRootReport,
    CheckpointBlockSummary, CheckpointSlotKind, DescriptorReport, EphemeralSummary, ObjectSummary,
    OmapReport, SuperblockSummary, Termination,
};
use crate::superblock::NxSuperblock;

/// Smallest block size the format permits.
const MIN_BLOCK_SIZE: u32 = 4096;
/// Largest block size the format permits.
const MAX_BLOCK_SIZE: u32 = 65_536;

/// Run the full checkpoint-resolution pipeline against a device.
///
/// Returns `Ok` for every graceful terminal state, including the
/// known-unimplemented layouts; the report's [`Termination`] says which one
/// was reached. `Err` is reserved for fatal conditions: I/O failures,
/// metadata too damaged to proceed under the documented leniency, or a
/// descriptor area with no well-formed superblock at all.
pub fn bootstrap<D: BlockDevice>(dev: D) -> Result<BootstrapReport> {
    let (dev, block_zero, sb0) = read_block_zero(dev)?;
    let block_size = dev.block_size();

    // S1: load the descriptor area. The non-contiguous layout is recognized
    // and reported, not resolved.
    let descriptor = match DescriptorArea::load(&dev, &sb0) {
        Ok(area) => area,
        Err(NxError::Unimplemented { .. }) => {
            info!("descriptor area is B-tree backed; stopping");
            return Ok(BootstrapReport {
                block_size,
                descriptor: DescriptorReport {
                    base: sb0.xp_desc_base,
                    block_count: sb0.desc_block_count(),
                    contiguous: false,
                    slot_diagnostics: Vec::new(),
                },
                block_zero,
                attempts: Vec::new(),
                volumes: Vec::new(),
                termination: Termination::NonContiguousDescriptorArea {
                    tree_oid: nxprobe_types::Oid(sb0.xp_desc_base.get()),
                },
            });
        }
        Err(err) => return Err(err),
    };

    let mut attempts: Vec<AttemptReport> = Vec::new();
    let mut slot_diagnostics = None;
    let mut exclude_at_or_above: Option<Xid> = None;

    // S2..S7 with the fallback loop.
    let (termination, volumes) = loop {
        let scan = descriptor.select_latest(exclude_at_or_above);
        if slot_diagnostics.is_none() {
            slot_diagnostics = Some(scan.diagnostics);
        }
        let Some(Selection {
            index,
            superblock: candidate,
        }) = scan.best
        else {
            if exclude_at_or_above.is_none() {
                return Err(NxError::NoValidSuperblock);
            }
            warn!("no older well-formed superblock remains; giving up");
            break (Termination::CandidatesExhausted, Vec::new());
        };
        let xid = candidate.xid();
        info!(index, %xid, "trying checkpoint candidate");

        // S3: assemble. A malformed checkpoint disqualifies the candidate,
        // not the container.
        let checkpoint = match descriptor.assemble(&candidate) {
            Ok(checkpoint) => checkpoint,
            Err(NxError::MalformedCheckpoint { detail }) => {
                warn!(index, %xid, %detail, "checkpoint is malformed, falling back");
                attempts.push(failed_attempt(
                    index,
                    &candidate,
                    AttemptOutcome::MalformedCheckpoint { detail },
                ));
                exclude_at_or_above = Some(xid);
                continue;
            }
            Err(err) => return Err(err),
        };

        let map_blocks = match checkpoint.map_blocks() {
            Ok(blocks) => blocks,
            Err(NxError::MalformedCheckpoint { detail }) => {
                warn!(index, %xid, %detail, "checkpoint maps are malformed, falling back");
                attempts.push(failed_attempt(
                    index,
                    &candidate,
                    AttemptOutcome::MalformedCheckpoint { detail },
                ));
                exclude_at_or_above = Some(xid);
                continue;
            }
            Err(err) => return Err(err),
        };
        let mappings: Vec<CheckpointMapping> = map_blocks
            .iter()
            .flat_map(|block| block.mappings.iter().copied())
            .collect();
        let checkpoint_blocks = summarize_checkpoint(&checkpoint, &map_blocks);

        // S4: read the ephemeral objects. I/O trouble here is fatal; the
        // descriptor copy cannot substitute for unreadable blocks.
        let ephemerals = load_ephemeral_objects(&dev, &mappings)?;
        let ephemeral_summaries: Vec<EphemeralSummary> = ephemerals
            .iter()
            .map(|object| EphemeralSummary {
                mapping: object.mapping,
                object: object.header().map(ObjectSummary::from),
                checksum_valid: is_checksum_valid(&object.block),
            })
            .collect();

        // S5: validate them.
        if let Some(bad) = first_invalid_ephemeral(&ephemerals) {
            let mapping = ephemerals[bad].mapping;
            warn!(
                index,
                %xid,
                mapping_index = bad,
                paddr = %mapping.paddr,
                "ephemeral object failed checksum validation, falling back"
            );
            attempts.push(AttemptReport {
                slot_index: index,
                xid,
                superblock: SuperblockSummary::from(&candidate),
                checkpoint_blocks,
                mappings,
                ephemerals: ephemeral_summaries,
                omap: None,
                outcome: AttemptOutcome::EphemeralChecksumMismatch {
                    mapping_index: bad,
                    oid: mapping.oid,
                    paddr: mapping.paddr,
                },
            });
            exclude_at_or_above = Some(xid);
            continue;
        }

        // S6: follow the object map.
        match load_omap(&dev, &candidate)? {
            OmapLoad::ChecksumMismatch => {
                warn!(index, %xid, "object map failed checksum validation, falling back");
                attempts.push(AttemptReport {
                    slot_index: index,
                    xid,
                    superblock: SuperblockSummary::from(&candidate),
                    checkpoint_blocks,
                    mappings,
                    ephemerals: ephemeral_summaries,
                    omap: None,
                    outcome: AttemptOutcome::OmapChecksumMismatch,
                });
                exclude_at_or_above = Some(xid);
                continue;
            }
            OmapLoad::NonPhysicalTree { omap } => {
                info!(tree_type = omap.tree_type, "omap tree is not physical; stopping");
                attempts.push(AttemptReport {
                    slot_index: index,
                    xid,
                    superblock: SuperblockSummary::from(&candidate),
                    checkpoint_blocks,
                    mappings,
                    ephemerals: ephemeral_summaries,
                    omap: Some(OmapReport::new(&omap, None)),
                    outcome: AttemptOutcome::OmapTreeNotPhysical,
                });
                break (Termination::OmapTreeNotPhysical, Vec::new());
            }
            OmapLoad::Loaded {
                omap,
                root,
                root_checksum_ok,
            } => {
                // S7: enumerate the registered volumes.
                let volumes = candidate.volume_oids().to_vec();
                info!(
                    index,
                    %xid,
                    volumes = volumes.len(),
                    "container bootstrap complete"
                );
                attempts.push(AttemptReport {
                    slot_index: index,
                    xid,
                    superblock: SuperblockSummary::from(&candidate),
                    checkpoint_blocks,
                    mappings,
                    ephemerals: ephemeral_summaries,
                    omap: Some(OmapReport::new(
                        &omap,
                        Some(BtreeRootReport::new(&root, root_checksum_ok)),
                    )),
                    outcome: AttemptOutcome::Mounted,
                });
                break (Termination::Mounted, volumes);
            }
        }
    };

    Ok(BootstrapReport {
        block_size,
        block_zero,
        descriptor: DescriptorReport {
            base: sb0.xp_desc_base,
            block_count: sb0.desc_block_count(),
            contiguous: true,
            slot_diagnostics: slot_diagnostics.unwrap_or_default(),
        },
        attempts,
        volumes,
        termination,
    })
}

/// S0: read block zero at the provisional size, decode leniently, and switch
/// the device to the stated block size if it differs.
fn read_block_zero<D: BlockDevice>(dev: D) -> Result<(D, BlockZeroReport, NxSuperblock)> {
    let provisional = dev.block_size();
    let block = dev.read_block(Paddr::ZERO)?;
    let mut checksum_valid = is_checksum_valid(&block);
    let mut sb = NxSuperblock::parse(&block)?;

    let stated = sb.block_size;
    if stated < MIN_BLOCK_SIZE || stated > MAX_BLOCK_SIZE || !stated.is_power_of_two() {
        return Err(NxError::corrupt(format!(
            "container superblock states an impossible block size of {stated} bytes"
        )));
    }

    let dev = if stated == provisional {
        dev
    } else {
        warn!(
            provisional,
            stated, "block size differs from the provisional size, re-reading block zero"
        );
        let dev = dev.with_block_size(stated)?;
        let block = dev.read_block(Paddr::ZERO)?;
        checksum_valid = is_checksum_valid(&block);
        sb = NxSuperblock::parse(&block)?;
        dev
    };

    if !checksum_valid {
        warn!("block zero failed checksum validation, proceeding as if it passed");
    }
    if !sb.header.is_nx_superblock() {
        warn!("block zero is not typed as a container superblock, proceeding as if it were");
    }
    if !sb.has_valid_magic() {
        warn!("block zero has incorrect magic, proceeding as if it were correct");
    }
    debug!(block_size = sb.block_size, "decoded block zero");

    let report = BlockZeroReport {
        checksum_valid,
        is_superblock_type: sb.header.is_nx_superblock(),
        magic_valid: sb.has_valid_magic(),
        provisional_block_size: provisional,
        stated_block_size: stated,
        superblock: SuperblockSummary::from(&sb),
    };
    Ok((dev, report, sb))
}

/// Attempt record for a candidate that never produced a checkpoint.
fn failed_attempt(
    index: u32,
    candidate: &NxSuperblock,
    outcome: AttemptOutcome,
) -> AttemptReport {
    AttemptReport {
        slot_index: index,
        xid: candidate.xid(),
        superblock: SuperblockSummary::from(candidate),
        checkpoint_blocks: Vec::new(),
        mappings: Vec::new(),
        ephemerals: Vec::new(),
        omap: None,
        outcome,
    }
}

/// Per-block summaries of an assembled checkpoint, in logical order.
fn summarize_checkpoint(
    checkpoint: &Checkpoint,
    map_blocks: &[CheckpointMapBlock],
) -> Vec<CheckpointBlockSummary> {
    let mut maps = map_blocks.iter();
    let mut out = Vec::with_capacity(checkpoint.len() as usize);
    for position in 0..checkpoint.len() {
        let header = ObjectHeader::parse(checkpoint.slot(position))
            .expect("checkpoint composition was verified during assembly");
        let kind = if header.is_checkpoint_map() {
            let block = maps
                .next()
                .expect("map blocks were decoded from this checkpoint");
            CheckpointSlotKind::CheckpointMap {
                mapping_count: block.mappings.len() as u32,
            }
        } else {
            CheckpointSlotKind::Superblock
        };
        out.push(CheckpointBlockSummary {
            position,
            ring_index: checkpoint.ring_index(position),
            object: ObjectSummary::from(header),
            kind,
        });
    }
    out
}
