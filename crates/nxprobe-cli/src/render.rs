//! Human-readable rendering of a bootstrap report.
//!
//! Reproduces the inspection narrative line by line from the structured
//! report: severity tokens (`ABORT`, `!! APFS ERROR !!`, `!! APFS WARNING
//! !!`, `END`) prefix every diagnostic so downstream tooling can grep the
//! output without a parser.

use std::io::{self, Write};
use std::path::Path;

use nxprobe_container::checkpoint::{CheckpointMapping, SlotDiagnostic, SlotIssue};
use nxprobe_container::report::{
    AttemptOutcome, AttemptReport, BootstrapReport, BtreeRootReport, CheckpointBlockSummary,
    CheckpointSlotKind, EphemeralSummary, ObjectSummary, OmapReport, SuperblockSummary,
    Termination,
};
use nxprobe_types::{type_name, StorageClass};

const RULE: &str =
    "--------------------------------------------------------------------------------";

/// Render the whole narrative for one bootstrap run.
pub fn render_human<W: Write>(
    out: &mut W,
    path: &Path,
    report: &BootstrapReport,
) -> io::Result<()> {
    writeln!(out)?;
    writeln!(
        out,
        "Opening file at `{}` in read-only mode ... OK.",
        path.display()
    )?;
    writeln!(out, "Simulating a mount of the APFS container.")?;
    writeln!(out)?;

    render_block_zero(out, report)?;
    if !render_descriptor_area(out, report)? {
        return Ok(());
    }

    for attempt in &report.attempts {
        render_attempt(out, attempt)?;
    }

    match &report.termination {
        Termination::Mounted => {
            writeln!(
                out,
                "The container superblock lists {} APFS volumes, with the following Virtual OIDs:",
                report.volumes.len()
            )?;
            for oid in &report.volumes {
                writeln!(out, "- {oid:#x}")?;
            }
            writeln!(out)?;
            writeln!(out, "END: All done.")?;
        }
        Termination::CandidatesExhausted => {
            writeln!(
                out,
                "END: Every candidate container superblock has been exhausted; no usable checkpoint remains."
            )?;
        }
        // Printed where they occur in the narrative.
        Termination::NonContiguousDescriptorArea { .. } | Termination::OmapTreeNotPhysical => {}
    }
    writeln!(out)
}

fn render_block_zero<W: Write>(out: &mut W, report: &BootstrapReport) -> io::Result<()> {
    let zero = &report.block_zero;
    if zero.checksum_valid {
        writeln!(out, "Validating checksum of block 0x0 ... OK.")?;
    } else {
        writeln!(out, "Validating checksum of block 0x0 ... FAILED.")?;
        writeln!(
            out,
            "!! APFS ERROR !! Checksum of block 0x0 should validate, but it doesn't. Proceeding as if it does."
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Details of block 0x0:")?;
    writeln!(out, "{RULE}")?;
    render_superblock(out, &zero.superblock)?;
    writeln!(out, "{RULE}")?;
    writeln!(out)?;

    if !zero.is_superblock_type {
        writeln!(
            out,
            "!! APFS ERROR !! Block 0x0 should be a container superblock, but it isn't. Proceeding as if it is."
        )?;
    }
    if !zero.magic_valid {
        writeln!(
            out,
            "!! APFS ERROR !! Container superblock at 0x0 doesn't have the correct magic number. Proceeding as if it does."
        )?;
    }
    if zero.provisional_block_size != zero.stated_block_size {
        writeln!(
            out,
            "!! APFS WARNING !! The container states a block size of {} bytes; re-read block 0x0 at that size instead of the provisional {}.",
            zero.stated_block_size, zero.provisional_block_size
        )?;
    }
    Ok(())
}

/// Returns false when the narrative ends inside the descriptor section.
fn render_descriptor_area<W: Write>(out: &mut W, report: &BootstrapReport) -> io::Result<bool> {
    let desc = &report.descriptor;
    writeln!(out, "Locating the checkpoint descriptor area:")?;
    writeln!(out, "- Its length is {} blocks.", desc.block_count)?;

    if !desc.contiguous {
        writeln!(out, "- It is not contiguous.")?;
        writeln!(
            out,
            "- The Physical OID of the B-tree representing it is {:#x}.",
            desc.base
        )?;
        writeln!(
            out,
            "END: The ability to handle this case has not yet been implemented."
        )?;
        writeln!(out)?;
        return Ok(false);
    }

    writeln!(out, "- It is contiguous.")?;
    writeln!(out, "- The address of its first block is {:#x}.", desc.base)?;
    writeln!(out, "Loading the checkpoint descriptor area into memory ... OK.")?;
    writeln!(
        out,
        "Locating the most recent well-formed container superblock in the checkpoint descriptor area:"
    )?;
    for diagnostic in &desc.slot_diagnostics {
        render_slot_diagnostic(out, diagnostic)?;
    }
    Ok(true)
}

fn render_slot_diagnostic<W: Write>(out: &mut W, diagnostic: &SlotDiagnostic) -> io::Result<()> {
    let index = diagnostic.index;
    match diagnostic.issue {
        SlotIssue::BadChecksum => writeln!(
            out,
            "- !! APFS WARNING !! Block at index {index} within this area failed checksum validation. Skipping it."
        ),
        SlotIssue::BadMagic => writeln!(
            out,
            "- !! APFS WARNING !! Container superblock at index {index} within this area is malformed; incorrect magic number. Skipping it."
        ),
        SlotIssue::TruncatedHeader | SlotIssue::UnexpectedObjectType { .. } => writeln!(
            out,
            "- !! APFS ERROR !! Block at index {index} within this area is not a container superblock or checkpoint map. Skipping it."
        ),
    }
}

fn render_attempt<W: Write>(out: &mut W, attempt: &AttemptReport) -> io::Result<()> {
    writeln!(
        out,
        "- It lies at index {} within the checkpoint descriptor area.",
        attempt.slot_index
    )?;
    writeln!(out)?;
    writeln!(out, "Details of this container superblock:")?;
    writeln!(out, "{RULE}")?;
    render_superblock(out, &attempt.superblock)?;
    writeln!(out, "{RULE}")?;
    writeln!(
        out,
        "- The corresponding checkpoint starts at index {} within the checkpoint descriptor area, and spans {} blocks.",
        attempt.superblock.desc_index, attempt.superblock.desc_len
    )?;
    writeln!(out)?;

    if let AttemptOutcome::MalformedCheckpoint { detail } = &attempt.outcome {
        writeln!(out, "Loading the corresponding checkpoint ... FAILED.")?;
        writeln!(out, "!! APFS ERROR !! This checkpoint is malformed: {detail}.")?;
        writeln!(
            out,
            "Going back to look at the previous checkpoint instead."
        )?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "Loading the corresponding checkpoint ... OK.")?;
    writeln!(out)?;

    writeln!(out, "Details of each block in this checkpoint:")?;
    writeln!(out, "{RULE}")?;
    for block in &attempt.checkpoint_blocks {
        render_checkpoint_block(out, block)?;
        writeln!(out, "{RULE}")?;
    }
    writeln!(out)?;

    writeln!(out, "Details of each checkpoint-mapping in this checkpoint:")?;
    writeln!(out, "{RULE}")?;
    for mapping in &attempt.mappings {
        render_mapping(out, mapping)?;
    }
    writeln!(out, "{RULE}")?;
    writeln!(
        out,
        "- There are {} checkpoint-mappings in this checkpoint.",
        attempt.mappings.len()
    )?;
    writeln!(out)?;

    writeln!(out, "Reading the Ephemeral objects used by this checkpoint ... OK.")?;
    write!(out, "Validating the Ephemeral objects ... ")?;
    if let AttemptOutcome::EphemeralChecksumMismatch { paddr, .. } = &attempt.outcome {
        writeln!(out, "FAILED.")?;
        writeln!(
            out,
            "An Ephemeral object used by this checkpoint is malformed (block {paddr:#x}). Going back to look at the previous checkpoint instead."
        )?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "OK.")?;
    writeln!(out)?;

    writeln!(out, "Details of the Ephemeral objects:")?;
    writeln!(out, "{RULE}")?;
    for ephemeral in &attempt.ephemerals {
        render_ephemeral(out, ephemeral)?;
        writeln!(out, "{RULE}")?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "The container superblock states that the container object map has Physical OID {:#x}.",
        attempt.superblock.omap_oid
    )?;
    writeln!(out, "Loading the container object map ... OK.")?;
    write!(out, "Validating the container object map ... ")?;
    if matches!(attempt.outcome, AttemptOutcome::OmapChecksumMismatch) {
        writeln!(out, "FAILED.")?;
        writeln!(
            out,
            "This container object map is malformed. Going back to look at the previous checkpoint instead."
        )?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "OK.")?;
    writeln!(out)?;

    let Some(omap) = &attempt.omap else {
        return Ok(());
    };
    writeln!(out, "Details of the container object map:")?;
    writeln!(out, "{RULE}")?;
    render_omap(out, omap)?;
    writeln!(out, "{RULE}")?;
    writeln!(out)?;

    if matches!(attempt.outcome, AttemptOutcome::OmapTreeNotPhysical) {
        writeln!(
            out,
            "END: The container object map B-tree is not of the Physical storage type, and therefore it cannot be located."
        )?;
        writeln!(out)?;
        return Ok(());
    }

    let Some(root) = &omap.root else {
        return Ok(());
    };
    writeln!(out, "Reading the root node of the container object map B-tree ... OK.")?;
    if root.checksum_valid {
        writeln!(out, "Validating the root node of the container object map B-tree ... OK.")?;
    } else {
        writeln!(out, "Validating the root node of the container object map B-tree ... FAILED.")?;
    }
    writeln!(out)?;

    writeln!(out, "Details of the container object map B-tree:")?;
    writeln!(out, "{RULE}")?;
    render_btree_root(out, root)?;
    writeln!(out, "{RULE}")?;
    writeln!(out)
}

fn render_superblock<W: Write>(out: &mut W, sb: &SuperblockSummary) -> io::Result<()> {
    writeln!(out, "OID:                        {:#x}", sb.oid)?;
    writeln!(out, "XID:                        {:#x}", sb.xid)?;
    writeln!(
        out,
        "Magic:                      {}",
        if sb.magic_valid { "NXSB (ok)" } else { "(incorrect)" }
    )?;
    writeln!(out, "Block size:                 {} bytes", sb.block_size)?;
    writeln!(out, "Block count:                {}", sb.block_count)?;
    writeln!(out, "Checkpoint descriptor base: {:#x}", sb.desc_base)?;
    writeln!(out, "Checkpoint descriptor size: {} blocks", sb.desc_blocks)?;
    writeln!(out, "Current checkpoint:         index {}, {} blocks", sb.desc_index, sb.desc_len)?;
    writeln!(out, "Space manager OID:          {:#x}", sb.spaceman_oid)?;
    writeln!(out, "Object map OID:             {:#x}", sb.omap_oid)?;
    writeln!(out, "Reaper OID:                 {:#x}", sb.reaper_oid)?;
    writeln!(out, "Next OID:                   {:#x}", sb.next_oid)?;
    writeln!(out, "Next XID:                   {:#x}", sb.next_xid)
}

fn render_object<W: Write>(out: &mut W, object: &ObjectSummary) -> io::Result<()> {
    writeln!(out, "OID:                        {:#x}", object.oid)?;
    writeln!(out, "XID:                        {:#x}", object.xid)?;
    writeln!(
        out,
        "Storage type:               {}",
        StorageClass::from_type_word(object.type_word)
            .map_or("(invalid type)", StorageClass::name)
    )?;
    writeln!(out, "Type:                       {}", type_label(object.type_word))?;
    writeln!(out, "Subtype:                    {}", type_label(object.subtype))
}

/// Display name for a type word, with the raw value appended when the type
/// is not one this tool knows.
fn type_label(type_word: u32) -> String {
    let name = type_name(type_word);
    if name == "unknown type" {
        format!("unknown type ({type_word:#010x})")
    } else {
        name.to_owned()
    }
}

fn render_checkpoint_block<W: Write>(
    out: &mut W,
    block: &CheckpointBlockSummary,
) -> io::Result<()> {
    writeln!(
        out,
        "Checkpoint block {} (descriptor area slot {}):",
        block.position, block.ring_index
    )?;
    render_object(out, &block.object)?;
    if let CheckpointSlotKind::CheckpointMap { mapping_count } = block.kind {
        writeln!(out, "Checkpoint-mappings:        {mapping_count}")?;
    }
    Ok(())
}

fn render_mapping<W: Write>(out: &mut W, mapping: &CheckpointMapping) -> io::Result<()> {
    writeln!(
        out,
        "- Ephemeral OID {:#x} is stored at block {:#x} ({}, {} bytes).",
        mapping.oid,
        mapping.paddr,
        type_label(mapping.object_type),
        mapping.size
    )
}

fn render_ephemeral<W: Write>(out: &mut W, ephemeral: &EphemeralSummary) -> io::Result<()> {
    match &ephemeral.object {
        Some(object) => render_object(out, object),
        None => writeln!(
            out,
            "(block {:#x} is too small to carry an object header)",
            ephemeral.mapping.paddr
        ),
    }
}

fn render_omap<W: Write>(out: &mut W, omap: &OmapReport) -> io::Result<()> {
    render_object(out, &omap.object)?;
    writeln!(out, "Flags:                      {:#x}", omap.flags)?;
    writeln!(out, "Snapshot count:             {}", omap.snap_count)?;
    writeln!(
        out,
        "Tree storage type:          {}",
        StorageClass::from_type_word(omap.tree_type).map_or("(invalid type)", StorageClass::name)
    )?;
    writeln!(out, "Tree OID:                   {:#x}", omap.tree_oid)?;
    writeln!(out, "Most recent snapshot XID:   {:#x}", omap.most_recent_snap)
}

fn render_btree_root<W: Write>(out: &mut W, root: &BtreeRootReport) -> io::Result<()> {
    render_object(out, &root.object)?;
    writeln!(out, "Node flags:                 {:#x}", root.flags)?;
    writeln!(out, "Node level:                 {}", root.level)?;
    writeln!(out, "Key count:                  {}", root.nkeys)
}
