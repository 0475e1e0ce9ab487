//! Container object map and its B-tree root.
//!
//! The omap itself is a physical object, so `nx_omap_oid` is read directly
//! as a block address. Its B-tree root is only reachable here when the tree
//! type carries the physical storage class; a virtual or ephemeral tree root
//! would need the very map being loaded, and the pipeline stops gracefully
//! instead.

use nxprobe_block::BlockDevice;
use nxprobe_error::Result;
use nxprobe_types::{ObjectHeader, Oid, Xid, OBJ_PHYSICAL, OBJ_STORAGETYPE_MASK};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bytes::{ensure_min_len, read_le_u16_at, read_le_u32_at, read_le_u64_at};
use crate::checksum::is_checksum_valid;
use crate::superblock::NxSuperblock;

const OM_FLAGS_OFFSET: usize = 32;
const OM_SNAP_COUNT_OFFSET: usize = 36;
const OM_TREE_TYPE_OFFSET: usize = 40;
const OM_SNAPSHOT_TREE_TYPE_OFFSET: usize = 44;
const OM_TREE_OID_OFFSET: usize = 48;
const OM_SNAPSHOT_TREE_OID_OFFSET: usize = 56;
const OM_MOST_RECENT_SNAP_OFFSET: usize = 64;
const OM_PENDING_REVERT_MIN_OFFSET: usize = 72;
const OM_PENDING_REVERT_MAX_OFFSET: usize = 80;
const OMAP_PHYS_MIN_SIZE: usize = 88;

/// Decoded object-map object.
#[derive(Debug, Clone, Serialize)]
pub struct OmapPhys {
    pub header: ObjectHeader,
    pub flags: u32,
    pub snap_count: u32,
    pub tree_type: u32,
    pub snapshot_tree_type: u32,
    pub tree_oid: Oid,
    pub snapshot_tree_oid: Oid,
    pub most_recent_snap: Xid,
    pub pending_revert_min: Xid,
    pub pending_revert_max: Xid,
}

impl OmapPhys {
    /// Decode an object-map block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_min_len(block, OMAP_PHYS_MIN_SIZE, "object map")?;
        let header =
            ObjectHeader::parse(block).expect("object-map minimum covers the object header");
        Ok(Self {
            header,
            flags: read_le_u32_at(block, OM_FLAGS_OFFSET),
            snap_count: read_le_u32_at(block, OM_SNAP_COUNT_OFFSET),
            tree_type: read_le_u32_at(block, OM_TREE_TYPE_OFFSET),
            snapshot_tree_type: read_le_u32_at(block, OM_SNAPSHOT_TREE_TYPE_OFFSET),
            tree_oid: Oid(read_le_u64_at(block, OM_TREE_OID_OFFSET)),
            snapshot_tree_oid: Oid(read_le_u64_at(block, OM_SNAPSHOT_TREE_OID_OFFSET)),
            most_recent_snap: Xid(read_le_u64_at(block, OM_MOST_RECENT_SNAP_OFFSET)),
            pending_revert_min: Xid(read_le_u64_at(block, OM_PENDING_REVERT_MIN_OFFSET)),
            pending_revert_max: Xid(read_le_u64_at(block, OM_PENDING_REVERT_MAX_OFFSET)),
        })
    }

    /// Whether the B-tree root is directly addressable.
    #[must_use]
    pub const fn tree_is_physical(&self) -> bool {
        self.tree_type & OBJ_STORAGETYPE_MASK == OBJ_PHYSICAL
    }
}

/// B-tree node flag: root node.
pub const BTNODE_ROOT: u16 = 0x0001;
/// B-tree node flag: leaf node.
pub const BTNODE_LEAF: u16 = 0x0002;
/// B-tree node flag: keys and values have fixed sizes.
pub const BTNODE_FIXED_KV_SIZE: u16 = 0x0004;
/// B-tree node flag: node is hashed.
pub const BTNODE_HASHED: u16 = 0x0008;
/// B-tree node flag: stored without an object header.
pub const BTNODE_NOHEADER: u16 = 0x0010;

const BTN_FLAGS_OFFSET: usize = 32;
const BTN_LEVEL_OFFSET: usize = 34;
const BTN_NKEYS_OFFSET: usize = 36;
const BTN_TABLE_SPACE_OFFSET: usize = 40;
const BTN_FREE_SPACE_OFFSET: usize = 44;
const BTN_KEY_FREE_LIST_OFFSET: usize = 48;
const BTN_VAL_FREE_LIST_OFFSET: usize = 52;
const BTREE_NODE_MIN_SIZE: usize = 56;

/// An offset/length pair within a B-tree node's storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeLocation {
    pub off: u16,
    pub len: u16,
}

/// Header of a B-tree node, enough to present the omap root.
///
/// Full tree traversal is a different tool's job; the bootstrap only proves
/// the root is reachable and shows its shape.
#[derive(Debug, Clone, Serialize)]
pub struct BtreeNodeHeader {
    pub header: ObjectHeader,
    pub flags: u16,
    pub level: u16,
    pub nkeys: u32,
    pub table_space: NodeLocation,
    pub free_space: NodeLocation,
    pub key_free_list: NodeLocation,
    pub val_free_list: NodeLocation,
}

impl BtreeNodeHeader {
    /// Decode the fixed header of a B-tree node block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_min_len(block, BTREE_NODE_MIN_SIZE, "B-tree node")?;
        let header =
            ObjectHeader::parse(block).expect("B-tree node minimum covers the object header");
        Ok(Self {
            header,
            flags: read_le_u16_at(block, BTN_FLAGS_OFFSET),
            level: read_le_u16_at(block, BTN_LEVEL_OFFSET),
            nkeys: read_le_u32_at(block, BTN_NKEYS_OFFSET),
            table_space: read_node_location(block, BTN_TABLE_SPACE_OFFSET),
            free_space: read_node_location(block, BTN_FREE_SPACE_OFFSET),
            key_free_list: read_node_location(block, BTN_KEY_FREE_LIST_OFFSET),
            val_free_list: read_node_location(block, BTN_VAL_FREE_LIST_OFFSET),
        })
    }

    /// Names of the flags set on this node.
    #[must_use]
    pub fn flag_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.flags & BTNODE_ROOT != 0 {
            names.push("root");
        }
        if self.flags & BTNODE_LEAF != 0 {
            names.push("leaf");
        }
        if self.flags & BTNODE_FIXED_KV_SIZE != 0 {
            names.push("fixed-kv-size");
        }
        if self.flags & BTNODE_HASHED != 0 {
            names.push("hashed");
        }
        if self.flags & BTNODE_NOHEADER != 0 {
            names.push("no-header");
        }
        names
    }
}

fn read_node_location(block: &[u8], offset: usize) -> NodeLocation {
    NodeLocation {
        off: read_le_u16_at(block, offset),
        len: read_le_u16_at(block, offset + 2),
    }
}

/// Result of following `nx_omap_oid`.
#[derive(Debug)]
pub enum OmapLoad {
    /// Omap and root node loaded; `root_checksum_ok` is advisory only.
    Loaded {
        omap: OmapPhys,
        root: BtreeNodeHeader,
        root_checksum_ok: bool,
    },
    /// The omap block failed checksum validation. Grounds for fallback to an
    /// older checkpoint.
    ChecksumMismatch,
    /// The tree root is not of the physical storage class and cannot be
    /// located by this pipeline.
    NonPhysicalTree { omap: OmapPhys },
}

/// Read and validate the container object map, then its B-tree root.
pub fn load_omap<D: BlockDevice>(dev: &D, sb: &NxSuperblock) -> Result<OmapLoad> {
    let omap_block = dev.read_block(sb.omap_oid.as_paddr())?;
    if !is_checksum_valid(&omap_block) {
        warn!(oid = %sb.omap_oid, "container object map failed checksum validation");
        return Ok(OmapLoad::ChecksumMismatch);
    }
    let omap = OmapPhys::parse(&omap_block)?;

    if !omap.tree_is_physical() {
        debug!(
            tree_type = omap.tree_type,
            "object-map tree root is not physical"
        );
        return Ok(OmapLoad::NonPhysicalTree { omap });
    }

    let root_block = dev.read_block(omap.tree_oid.as_paddr())?;
    let root_checksum_ok = is_checksum_valid(&root_block);
    if !root_checksum_ok {
        warn!(oid = %omap.tree_oid, "object-map B-tree root failed checksum validation");
    }
    let root = BtreeNodeHeader::parse(&root_block)?;
    Ok(OmapLoad::Loaded {
        omap,
        root,
        root_checksum_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::seal;
    use nxprobe_block::MemoryBlockDevice;
    use nxprobe_types::{
        OBJECT_TYPE_BTREE, OBJECT_TYPE_NX_SUPERBLOCK, OBJECT_TYPE_OMAP, OBJ_VIRTUAL,
    };

    const BLOCK_SIZE: usize = 1024;

    fn omap_block(tree_type: u32, tree_oid: u64) -> Vec<u8> {
        let mut block = vec![0_u8; BLOCK_SIZE];
        block[8..16].copy_from_slice(&30_u64.to_le_bytes());
        block[16..24].copy_from_slice(&100_u64.to_le_bytes());
        block[24..28].copy_from_slice(&(OBJ_PHYSICAL | OBJECT_TYPE_OMAP).to_le_bytes());
        block[OM_SNAP_COUNT_OFFSET..OM_SNAP_COUNT_OFFSET + 4]
            .copy_from_slice(&2_u32.to_le_bytes());
        block[OM_TREE_TYPE_OFFSET..OM_TREE_TYPE_OFFSET + 4]
            .copy_from_slice(&tree_type.to_le_bytes());
        block[OM_TREE_OID_OFFSET..OM_TREE_OID_OFFSET + 8]
            .copy_from_slice(&tree_oid.to_le_bytes());
        block[OM_MOST_RECENT_SNAP_OFFSET..OM_MOST_RECENT_SNAP_OFFSET + 8]
            .copy_from_slice(&99_u64.to_le_bytes());
        seal(&mut block).expect("omap block should seal");
        block
    }

    fn btree_root_block(nkeys: u32) -> Vec<u8> {
        let mut block = vec![0_u8; BLOCK_SIZE];
        block[8..16].copy_from_slice(&31_u64.to_le_bytes());
        block[16..24].copy_from_slice(&100_u64.to_le_bytes());
        block[24..28].copy_from_slice(&(OBJ_PHYSICAL | OBJECT_TYPE_BTREE).to_le_bytes());
        block[BTN_FLAGS_OFFSET..BTN_FLAGS_OFFSET + 2]
            .copy_from_slice(&(BTNODE_ROOT | BTNODE_LEAF | BTNODE_FIXED_KV_SIZE).to_le_bytes());
        block[BTN_NKEYS_OFFSET..BTN_NKEYS_OFFSET + 4].copy_from_slice(&nkeys.to_le_bytes());
        block[BTN_TABLE_SPACE_OFFSET..BTN_TABLE_SPACE_OFFSET + 2]
            .copy_from_slice(&24_u16.to_le_bytes());
        block[BTN_TABLE_SPACE_OFFSET + 2..BTN_TABLE_SPACE_OFFSET + 4]
            .copy_from_slice(&192_u16.to_le_bytes());
        seal(&mut block).expect("root block should seal");
        block
    }

    fn superblock_pointing_at_omap(omap_oid: u64) -> NxSuperblock {
        let mut block = vec![0_u8; BLOCK_SIZE];
        block[16..24].copy_from_slice(&100_u64.to_le_bytes());
        block[24..28].copy_from_slice(&OBJECT_TYPE_NX_SUPERBLOCK.to_le_bytes());
        block[160..168].copy_from_slice(&omap_oid.to_le_bytes());
        NxSuperblock::parse(&block).expect("superblock should parse")
    }

    fn image_with(blocks: &[(u64, Vec<u8>)], total: usize) -> MemoryBlockDevice {
        let mut image = vec![0_u8; total * BLOCK_SIZE];
        for (paddr, block) in blocks {
            let start = *paddr as usize * BLOCK_SIZE;
            image[start..start + BLOCK_SIZE].copy_from_slice(block);
        }
        MemoryBlockDevice::new(image, BLOCK_SIZE as u32).expect("device should build")
    }

    #[test]
    fn test_omap_parse() {
        let block = omap_block(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31);
        let omap = OmapPhys::parse(&block).expect("omap should parse");
        assert_eq!(omap.snap_count, 2);
        assert_eq!(omap.tree_oid, Oid(31));
        assert_eq!(omap.most_recent_snap, Xid(99));
        assert!(omap.tree_is_physical());
    }

    #[test]
    fn test_omap_virtual_tree_detected() {
        let block = omap_block(OBJ_VIRTUAL | OBJECT_TYPE_BTREE, 31);
        let omap = OmapPhys::parse(&block).expect("omap should parse");
        assert!(!omap.tree_is_physical());
    }

    #[test]
    fn test_btree_header_parse() {
        let block = btree_root_block(12);
        let node = BtreeNodeHeader::parse(&block).expect("node header should parse");
        assert_eq!(node.nkeys, 12);
        assert_eq!(node.level, 0);
        assert_eq!(node.table_space, NodeLocation { off: 24, len: 192 });
        assert_eq!(node.flag_names(), vec!["root", "leaf", "fixed-kv-size"]);
    }

    #[test]
    fn test_load_omap_happy_path() {
        let dev = image_with(
            &[
                (30, omap_block(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31)),
                (31, btree_root_block(4)),
            ],
            40,
        );
        let sb = superblock_pointing_at_omap(30);
        let loaded = load_omap(&dev, &sb).expect("omap should load");
        match loaded {
            OmapLoad::Loaded {
                omap,
                root,
                root_checksum_ok,
            } => {
                assert!(root_checksum_ok);
                assert_eq!(omap.tree_oid, Oid(31));
                assert_eq!(root.nkeys, 4);
            }
            other => panic!("expected Loaded, got {other:?}"),
        }
    }

    #[test]
    fn test_load_omap_checksum_mismatch_signals_fallback() {
        let mut bad = omap_block(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31);
        bad[100] ^= 0x01;
        let dev = image_with(&[(30, bad)], 40);
        let sb = superblock_pointing_at_omap(30);
        let loaded = load_omap(&dev, &sb).expect("load itself should not fail");
        assert!(matches!(loaded, OmapLoad::ChecksumMismatch));
    }

    #[test]
    fn test_load_omap_non_physical_tree_stops() {
        let dev = image_with(
            &[(30, omap_block(OBJ_VIRTUAL | OBJECT_TYPE_BTREE, 31))],
            40,
        );
        let sb = superblock_pointing_at_omap(30);
        let loaded = load_omap(&dev, &sb).expect("load itself should not fail");
        assert!(matches!(loaded, OmapLoad::NonPhysicalTree { .. }));
    }

    #[test]
    fn test_load_omap_bad_root_checksum_is_advisory() {
        let mut root = btree_root_block(4);
        seal(&mut root).expect("root block should seal");
        root[300] ^= 0x04;
        let dev = image_with(
            &[
                (30, omap_block(OBJ_PHYSICAL | OBJECT_TYPE_BTREE, 31)),
                (31, root),
            ],
            40,
        );
        let sb = superblock_pointing_at_omap(30);
        let loaded = load_omap(&dev, &sb).expect("omap should load");
        match loaded {
            OmapLoad::Loaded {
                root_checksum_ok, ..
            } => assert!(!root_checksum_ok),
            other => panic!("expected Loaded, got {other:?}"),
        }
    }
}
