//! End-to-end bootstrap scenarios over synthetic container images.

use nxprobe_block::MemoryBlockDevice;
use nxprobe_container::bootstrap::bootstrap;
use nxprobe_container::checksum::seal;
use nxprobe_container::report::{AttemptOutcome, CheckpointSlotKind, Termination};
use nxprobe_container::superblock::{NX_MAGIC, NX_MAX_FILE_SYSTEMS, XP_DESC_NONCONTIGUOUS};
use nxprobe_error::NxError;
use nxprobe_types::{
    Oid, Xid, OBJECT_TYPE_BTREE, OBJECT_TYPE_CHECKPOINT_MAP, OBJECT_TYPE_NX_REAPER,
    OBJECT_TYPE_NX_SUPERBLOCK, OBJECT_TYPE_OMAP, OBJ_EPHEMERAL, OBJ_PHYSICAL, OBJ_VIRTUAL,
};

const BLOCK_SIZE: usize = 4096;

/// Assembles a container image block by block.
struct ImageBuilder {
    blocks: Vec<Vec<u8>>,
}

impl ImageBuilder {
    fn new(total_blocks: usize) -> Self {
        Self {
            blocks: vec![vec![0_u8; BLOCK_SIZE]; total_blocks],
        }
    }

    fn put(&mut self, paddr: u64, block: Vec<u8>) -> &mut Self {
        assert_eq!(block.len(), BLOCK_SIZE, "builder blocks are one block long");
        self.blocks[paddr as usize] = block;
        self
    }

    fn corrupt(&mut self, paddr: u64, offset: usize) -> &mut Self {
        self.blocks[paddr as usize][offset] ^= 0x01;
        self
    }

    fn device(&self) -> MemoryBlockDevice {
        let mut image = Vec::with_capacity(self.blocks.len() * BLOCK_SIZE);
        for block in &self.blocks {
            image.extend_from_slice(block);
        }
        MemoryBlockDevice::new(image, BLOCK_SIZE as u32).expect("device should build")
    }
}

fn header(block: &mut [u8], oid: u64, xid: u64, type_word: u32) {
    block[8..16].copy_from_slice(&oid.to_le_bytes());
    block[16..24].copy_from_slice(&xid.to_le_bytes());
    block[24..28].copy_from_slice(&type_word.to_le_bytes());
}

struct SuperblockSpec {
    xid: u64,
    desc_base: u64,
    desc_blocks: u32,
    desc_index: u32,
    desc_len: u32,
    omap_oid: u64,
    fs_oids: Vec<u64>,
}

impl SuperblockSpec {
    fn build(&self) -> Vec<u8> {
        self.build_sized(BLOCK_SIZE)
    }

    fn build_sized(&self, block_size: usize) -> Vec<u8> {
        let mut block = vec![0_u8; block_size];
        header(&mut block, 1, self.xid, OBJECT_TYPE_NX_SUPERBLOCK);
        block[32..36].copy_from_slice(&NX_MAGIC.to_le_bytes());
        block[36..40].copy_from_slice(&(block_size as u32).to_le_bytes());
        block[40..48].copy_from_slice(&64_u64.to_le_bytes()); // nx_block_count
        block[104..108].copy_from_slice(&self.desc_blocks.to_le_bytes());
        block[112..120].copy_from_slice(&self.desc_base.to_le_bytes());
        block[136..140].copy_from_slice(&self.desc_index.to_le_bytes());
        block[140..144].copy_from_slice(&self.desc_len.to_le_bytes());
        block[160..168].copy_from_slice(&self.omap_oid.to_le_bytes());
        block[180..184].copy_from_slice(&(NX_MAX_FILE_SYSTEMS as u32).to_le_bytes());
        for (slot, fs_oid) in self.fs_oids.iter().enumerate() {
            let base = 184 + slot * 8;
            block[base..base + 8].copy_from_slice(&fs_oid.to_le_bytes());
        }
        seal(&mut block).expect("superblock should seal");
        block
    }
}

fn checkpoint_map(xid: u64, entries: &[(u64, u64)]) -> Vec<u8> {
    checkpoint_map_sized(xid, entries, BLOCK_SIZE)
}

fn checkpoint_map_sized(xid: u64, entries: &[(u64, u64)], block_size: usize) -> Vec<u8> {
    let mut block = vec![0_u8; block_size];
    header(&mut block, 2, xid, OBJ_PHYSICAL | OBJECT_TYPE_CHECKPOINT_MAP);
    block[32..36].copy_from_slice(&1_u32.to_le_bytes()); // CHECKPOINT_MAP_LAST
    block[36..40].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    for (slot, (oid, paddr)) in entries.iter().enumerate() {
        let base = 40 + slot * 40;
        let type_word = OBJ_EPHEMERAL | OBJECT_TYPE_NX_REAPER;
        block[base..base + 4].copy_from_slice(&type_word.to_le_bytes());
        block[base + 8..base + 12].copy_from_slice(&(block_size as u32).to_le_bytes());
        block[base + 24..base + 32].copy_from_slice(&oid.to_le_bytes());
        block[base + 32..base + 40].copy_from_slice(&paddr.to_le_bytes());
    }
    seal(&mut block).expect("checkpoint map should seal");
    block
}

fn ephemeral_object(oid: u64, xid: u64) -> Vec<u8> {
    ephemeral_object_sized(oid, xid, BLOCK_SIZE)
}

fn ephemeral_object_sized(oid: u64, xid: u64, block_size: usize) -> Vec<u8> {
    let mut block = vec![0_u8; block_size];
    header(&mut block, oid, xid, OBJ_EPHEMERAL | OBJECT_TYPE_NX_REAPER);
    seal(&mut block).expect("ephemeral object should seal");
    block
}

fn omap_object(tree_type: u32, tree_oid: u64) -> Vec<u8> {
    omap_object_sized(tree_type, tree_oid, BLOCK_SIZE)
}

fn omap_object_sized(tree_type: u32, tree_oid: u64, block_size: usize) -> Vec<u8> {
    let mut block = vec![0_u8; block_size];
    header(&mut block, 30, 100, OBJ_PHYSICAL | OBJECT_TYPE_OMAP);
    block[40..44].copy_from_slice(&tree_type.to_le_bytes());
    block[48..56].copy_from_slice(&tree_oid.to_le_bytes());
    seal(&mut block).expect("omap should seal");
    block
}

fn btree_root(nkeys: u32) -> Vec<u8> {
    btree_root_sized(nkeys, BLOCK_SIZE)
}

fn btree_root_sized(nkeys: u32, block_size: usize) -> Vec<u8> {
    let mut block = vec![0_u8; block_size];
    header(&mut block, 31, 100, OBJ_PHYSICAL | OBJECT_TYPE_BTREE);
    block[32..34].copy_from_slice(&0x0003_u16.to_le_bytes()); // root | leaf
    block[36..40].copy_from_slice(&nkeys.to_le_bytes());
    seal(&mut block).expect("btree root should seal");
    block
}

/// A healthy container: descriptor ring of 8 at blocks 8..16, latest
/// superblock at ring index 5 (xid 100) naming checkpoint slots 5..8,
/// three ephemeral objects, physical omap tree, two volumes.
fn healthy_image() -> ImageBuilder {
    let mut image = ImageBuilder::new(40);
    let base_sb = SuperblockSpec {
        xid: 1,
        desc_base: 8,
        desc_blocks: 8,
        desc_index: 0,
        desc_len: 2,
        omap_oid: 30,
        fs_oids: vec![0x402, 0x403],
    };
    image.put(0, base_sb.build());

    // Stale history in ring slots 0..5.
    image.put(8, checkpoint_map(98, &[(0x401, 20)]));
    image.put(
        9,
        SuperblockSpec {
            xid: 98,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(10, checkpoint_map(99, &[(0x401, 20)]));
    image.put(
        11,
        SuperblockSpec {
            xid: 99,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 2,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(12, checkpoint_map(97, &[(0x401, 20)]));

    // The current checkpoint: superblock at ring index 5, maps at 6 and 7.
    image.put(
        13,
        SuperblockSpec {
            xid: 100,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 5,
            desc_len: 3,
            omap_oid: 30,
            fs_oids: vec![0x402, 0x403],
        }
        .build(),
    );
    image.put(14, checkpoint_map(100, &[(0x401, 20), (0x404, 21)]));
    image.put(15, checkpoint_map(100, &[(0x405, 22)]));

    image.put(20, ephemeral_object(0x401, 100));
    image.put(21, ephemeral_object(0x404, 100));
    image.put(22, ephemeral_object(0x405, 100));

    image.put(30, omap_object(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31));
    image.put(31, btree_root(7));
    image
}

#[test]
fn happy_path_mounts_latest_checkpoint() {
    let report = bootstrap(healthy_image().device()).expect("bootstrap should succeed");

    assert!(report.mounted());
    assert!(matches!(report.termination, Termination::Mounted));
    assert!(report.block_zero.checksum_valid);
    assert!(report.block_zero.magic_valid);
    assert_eq!(report.descriptor.block_count, 8);
    assert!(report.descriptor.slot_diagnostics.is_empty());

    assert_eq!(report.attempts.len(), 1);
    let attempt = report.final_attempt().expect("one attempt ran");
    assert_eq!(attempt.slot_index, 5);
    assert_eq!(attempt.xid, Xid(100));
    assert!(matches!(attempt.outcome, AttemptOutcome::Mounted));

    // Checkpoint slots 5, 6, 7 in logical order: superblock then two maps.
    let rings: Vec<u32> = attempt
        .checkpoint_blocks
        .iter()
        .map(|block| block.ring_index)
        .collect();
    assert_eq!(rings, vec![5, 6, 7]);
    assert!(matches!(
        attempt.checkpoint_blocks[0].kind,
        CheckpointSlotKind::Superblock
    ));
    assert!(matches!(
        attempt.checkpoint_blocks[1].kind,
        CheckpointSlotKind::CheckpointMap { mapping_count: 2 }
    ));

    assert_eq!(attempt.mappings.len(), 3);
    assert_eq!(attempt.ephemerals.len(), 3);
    assert!(attempt.ephemerals.iter().all(|e| e.checksum_valid));

    let omap = attempt.omap.as_ref().expect("omap loaded");
    assert!(omap.tree_is_physical);
    let root = omap.root.as_ref().expect("root loaded");
    assert!(root.checksum_valid);
    assert_eq!(root.nkeys, 7);

    assert_eq!(report.volumes, vec![Oid(0x402), Oid(0x403)]);
}

#[test]
fn wrapped_checkpoint_assembles_in_ring_order() {
    // Latest superblock at ring index 6, checkpoint length 4: the range
    // wraps and must come out as ring slots 6, 7, 0, 1.
    let mut image = ImageBuilder::new(40);
    image.put(
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(8, checkpoint_map(110, &[(0x404, 21)]));
    image.put(9, checkpoint_map(110, &[(0x405, 22)]));
    image.put(10, checkpoint_map(50, &[(0x401, 20)]));
    image.put(
        11,
        SuperblockSpec {
            xid: 50,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 2,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(12, checkpoint_map(51, &[(0x401, 20)]));
    image.put(13, checkpoint_map(52, &[(0x401, 20)]));
    image.put(
        14,
        SuperblockSpec {
            xid: 110,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 6,
            desc_len: 4,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(15, checkpoint_map(110, &[(0x401, 20)]));
    image.put(20, ephemeral_object(0x401, 110));
    image.put(21, ephemeral_object(0x404, 110));
    image.put(22, ephemeral_object(0x405, 110));
    image.put(30, omap_object(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31));
    image.put(31, btree_root(4));

    let report = bootstrap(image.device()).expect("bootstrap should succeed");
    assert!(report.mounted());

    let attempt = report.final_attempt().expect("one attempt ran");
    assert_eq!(attempt.slot_index, 6);
    let rings: Vec<u32> = attempt
        .checkpoint_blocks
        .iter()
        .map(|block| block.ring_index)
        .collect();
    assert_eq!(rings, vec![6, 7, 0, 1]);
    // Document order of the mappings follows the logical checkpoint order.
    let oids: Vec<u64> = attempt.mappings.iter().map(|m| m.oid.get()).collect();
    assert_eq!(oids, vec![0x401, 0x404, 0x405]);
}

#[test]
fn stale_block_zero_is_warned_but_harmless() {
    let mut image = healthy_image();
    image.corrupt(0, 300); // breaks the block-zero checksum only
    let report = bootstrap(image.device()).expect("bootstrap should still succeed");

    assert!(!report.block_zero.checksum_valid);
    assert!(report.mounted());
    assert_eq!(report.final_attempt().expect("attempt ran").xid, Xid(100));
}

#[test]
fn corrupt_descriptor_slot_is_skipped() {
    let mut image = healthy_image();
    // Ring index 3 is block 11: a valid superblock between two others.
    image.corrupt(11, 600);
    let report = bootstrap(image.device()).expect("bootstrap should succeed");

    assert!(report.mounted());
    assert_eq!(report.descriptor.slot_diagnostics.len(), 1);
    assert_eq!(report.descriptor.slot_diagnostics[0].index, 3);
    assert_eq!(report.final_attempt().expect("attempt ran").slot_index, 5);
}

#[test]
fn noncontiguous_descriptor_area_stops_gracefully() {
    let mut image = ImageBuilder::new(16);
    image.put(
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 8,
            desc_blocks: 8 | XP_DESC_NONCONTIGUOUS,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![],
        }
        .build(),
    );

    let report = bootstrap(image.device()).expect("graceful unimplemented is not an error");
    assert!(!report.mounted());
    assert!(matches!(
        report.termination,
        Termination::NonContiguousDescriptorArea {
            tree_oid: Oid(8)
        }
    ));
    assert!(report.attempts.is_empty());
    assert!(!report.descriptor.contiguous);
}

#[test]
fn bad_ephemeral_object_exhausts_single_candidate() {
    let mut image = ImageBuilder::new(40);
    image.put(
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 8,
            desc_blocks: 4,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(
        8,
        SuperblockSpec {
            xid: 100,
            desc_base: 8,
            desc_blocks: 4,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(9, checkpoint_map(100, &[(0x401, 20), (0x404, 21)]));
    image.put(10, checkpoint_map(99, &[(0x401, 20)]));
    image.put(11, checkpoint_map(99, &[(0x401, 20)]));
    image.put(20, ephemeral_object(0x401, 100));
    image.put(21, ephemeral_object(0x404, 100));
    image.corrupt(21, 512); // second ephemeral object goes bad
    image.put(30, omap_object(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31));
    image.put(31, btree_root(4));

    let report = bootstrap(image.device()).expect("exhaustion is a graceful stop");
    assert!(!report.mounted());
    assert!(matches!(
        report.termination,
        Termination::CandidatesExhausted
    ));
    assert_eq!(report.attempts.len(), 1);
    let attempt = &report.attempts[0];
    assert!(matches!(
        attempt.outcome,
        AttemptOutcome::EphemeralChecksumMismatch {
            mapping_index: 1,
            ..
        }
    ));
    assert!(!attempt.ephemerals[1].checksum_valid);
    assert!(report.volumes.is_empty());
}

#[test]
fn bad_ephemeral_object_falls_back_to_previous_checkpoint() {
    // Two complete checkpoints in a ring of 4: xid 200 at slots 2..4 and
    // xid 150 at slots 0..2. The newer one references a corrupt ephemeral
    // object, so the bootstrap must land on xid 150.
    let mut image = ImageBuilder::new(40);
    image.put(
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 8,
            desc_blocks: 4,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402],
        }
        .build(),
    );
    image.put(
        8,
        SuperblockSpec {
            xid: 150,
            desc_base: 8,
            desc_blocks: 4,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402, 0x403],
        }
        .build(),
    );
    image.put(9, checkpoint_map(150, &[(0x401, 25)]));
    image.put(
        10,
        SuperblockSpec {
            xid: 200,
            desc_base: 8,
            desc_blocks: 4,
            desc_index: 2,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![0x402, 0x403],
        }
        .build(),
    );
    image.put(11, checkpoint_map(200, &[(0x401, 24)]));
    image.put(24, ephemeral_object(0x401, 200));
    image.corrupt(24, 1000);
    image.put(25, ephemeral_object(0x401, 150));
    image.put(30, omap_object(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31));
    image.put(31, btree_root(4));

    let report = bootstrap(image.device()).expect("fallback should succeed");
    assert!(report.mounted());
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(report.attempts[0].xid, Xid(200));
    assert!(matches!(
        report.attempts[0].outcome,
        AttemptOutcome::EphemeralChecksumMismatch { .. }
    ));
    assert_eq!(report.attempts[1].xid, Xid(150));
    assert!(matches!(report.attempts[1].outcome, AttemptOutcome::Mounted));
    assert_eq!(report.volumes, vec![Oid(0x402), Oid(0x403)]);
}

#[test]
fn bad_omap_checksum_falls_back() {
    let mut image = healthy_image();
    image.corrupt(30, 700);
    let report = bootstrap(image.device()).expect("exhaustion is a graceful stop");

    // Every candidate shares the same damaged omap, so fallback drains the
    // whole history: 100, 99, 98.
    assert!(!report.mounted());
    assert!(matches!(
        report.termination,
        Termination::CandidatesExhausted
    ));
    assert!(report
        .attempts
        .iter()
        .all(|attempt| matches!(attempt.outcome, AttemptOutcome::OmapChecksumMismatch)));
    let tried: Vec<u64> = report.attempts.iter().map(|a| a.xid.get()).collect();
    assert_eq!(tried, vec![100, 99, 98]);
}

#[test]
fn non_physical_omap_tree_stops_gracefully() {
    let mut image = healthy_image();
    image.put(30, omap_object(OBJ_VIRTUAL | OBJECT_TYPE_BTREE, 31));
    let report = bootstrap(image.device()).expect("graceful unimplemented is not an error");

    assert!(!report.mounted());
    assert!(matches!(report.termination, Termination::OmapTreeNotPhysical));
    let attempt = report.final_attempt().expect("attempt ran");
    assert!(matches!(
        attempt.outcome,
        AttemptOutcome::OmapTreeNotPhysical
    ));
    let omap = attempt.omap.as_ref().expect("omap decoded");
    assert!(!omap.tree_is_physical);
    assert!(omap.root.is_none());
}

#[test]
fn damaged_btree_root_is_presented_with_a_warning_flag() {
    let mut image = healthy_image();
    image.corrupt(31, 900);
    let report = bootstrap(image.device()).expect("bootstrap should succeed");

    assert!(report.mounted());
    let root = report
        .final_attempt()
        .and_then(|attempt| attempt.omap.as_ref())
        .and_then(|omap| omap.root.as_ref())
        .expect("root still presented");
    assert!(!root.checksum_valid);
}

#[test]
fn stated_block_size_replaces_provisional_size() {
    // The image is laid out at 8192-byte blocks; the device starts at the
    // provisional 4096 and the pipeline must switch before second-stage
    // reads.
    const BS: usize = 8192;
    fn put(image: &mut [u8], paddr: usize, block: Vec<u8>) {
        image[paddr * BS..(paddr + 1) * BS].copy_from_slice(&block);
    }

    let mut image = vec![0_u8; BS * 8];
    put(
        &mut image,
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 2,
            desc_blocks: 2,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 6,
            fs_oids: vec![0x402],
        }
        .build_sized(BS),
    );
    put(
        &mut image,
        2,
        SuperblockSpec {
            xid: 9,
            desc_base: 2,
            desc_blocks: 2,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 6,
            fs_oids: vec![0x402],
        }
        .build_sized(BS),
    );
    put(&mut image, 3, checkpoint_map_sized(9, &[(0x401, 5)], BS));
    put(&mut image, 5, ephemeral_object_sized(0x401, 9, BS));
    put(
        &mut image,
        6,
        omap_object_sized(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 7, BS),
    );
    put(&mut image, 7, btree_root_sized(3, BS));

    let dev = MemoryBlockDevice::new(image, 4096).expect("device should build");
    let report = bootstrap(dev).expect("bootstrap should succeed");
    assert!(report.mounted());
    assert_eq!(report.block_size, 8192);
    assert_eq!(report.block_zero.provisional_block_size, 4096);
    assert_eq!(report.block_zero.stated_block_size, 8192);
    assert!(report.block_zero.checksum_valid);
}

#[test]
fn descriptor_ring_without_superblocks_is_fatal() {
    let mut image = ImageBuilder::new(16);
    image.put(
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 8,
            desc_blocks: 2,
            desc_index: 0,
            desc_len: 1,
            omap_oid: 30,
            fs_oids: vec![],
        }
        .build(),
    );
    image.put(8, checkpoint_map(5, &[]));
    image.put(9, checkpoint_map(6, &[]));

    let err = bootstrap(image.device()).expect_err("no superblock anywhere is fatal");
    assert!(matches!(err, NxError::NoValidSuperblock));
}

#[test]
fn truncated_descriptor_area_is_fatal() {
    // The superblock claims a descriptor ring reaching past the image end.
    let mut image = ImageBuilder::new(10);
    image.put(
        0,
        SuperblockSpec {
            xid: 1,
            desc_base: 8,
            desc_blocks: 8,
            desc_index: 0,
            desc_len: 2,
            omap_oid: 30,
            fs_oids: vec![],
        }
        .build(),
    );

    let err = bootstrap(image.device()).expect_err("short read must be fatal");
    assert!(matches!(err, NxError::ShortRead { .. }));
}
