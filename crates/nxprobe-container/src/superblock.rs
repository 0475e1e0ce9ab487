//! Container superblock (NXSB) decoding.
//!
//! Layout after the 32-byte object header (all little-endian):
//!
//! ```text
//! Offset  Size  Field
//!   32      4   nx_magic ("NXSB")
//!   36      4   nx_block_size
//!   40      8   nx_block_count
//!   48      8   nx_features
//!   56      8   nx_readonly_compatible_features
//!   64      8   nx_incompatible_features
//!   72     16   nx_uuid
//!   88      8   nx_next_oid
//!   96      8   nx_next_xid
//!  104      4   nx_xp_desc_blocks (high bit: non-contiguous)
//!  108      4   nx_xp_data_blocks
//!  112      8   nx_xp_desc_base
//!  120      8   nx_xp_data_base
//!  128      4   nx_xp_desc_next
//!  132      4   nx_xp_data_next
//!  136      4   nx_xp_desc_index
//!  140      4   nx_xp_desc_len
//!  144      4   nx_xp_data_index
//!  148      4   nx_xp_data_len
//!  152      8   nx_spaceman_oid
//!  160      8   nx_omap_oid
//!  168      8   nx_reaper_oid
//!  176      4   nx_test_type
//!  180      4   nx_max_file_systems
//!  184    800   nx_fs_oid[100]
//! ```

use nxprobe_error::Result;
use nxprobe_types::{ObjectHeader, Oid, Paddr, Xid};

use crate::bytes::{ensure_min_len, read_le_u32_at, read_le_u64_at};

/// `NXSB` interpreted as a little-endian u32.
pub const NX_MAGIC: u32 = 0x4253_584e;

/// Maximum number of volumes a container can hold.
pub const NX_MAX_FILE_SYSTEMS: usize = 100;

/// High bit of `nx_xp_desc_blocks`: the descriptor area is B-tree-backed
/// rather than one contiguous run of blocks.
pub const XP_DESC_NONCONTIGUOUS: u32 = 1 << 31;

const NXSB_MAGIC_OFFSET: usize = 32;
const NXSB_BLOCK_SIZE_OFFSET: usize = 36;
const NXSB_BLOCK_COUNT_OFFSET: usize = 40;
const NXSB_FEATURES_OFFSET: usize = 48;
const NXSB_RO_COMPAT_FEATURES_OFFSET: usize = 56;
const NXSB_INCOMPAT_FEATURES_OFFSET: usize = 64;
const NXSB_UUID_OFFSET: usize = 72;
const NXSB_NEXT_OID_OFFSET: usize = 88;
const NXSB_NEXT_XID_OFFSET: usize = 96;
const NXSB_XP_DESC_BLOCKS_OFFSET: usize = 104;
const NXSB_XP_DATA_BLOCKS_OFFSET: usize = 108;
const NXSB_XP_DESC_BASE_OFFSET: usize = 112;
const NXSB_XP_DATA_BASE_OFFSET: usize = 120;
const NXSB_XP_DESC_NEXT_OFFSET: usize = 128;
const NXSB_XP_DATA_NEXT_OFFSET: usize = 132;
const NXSB_XP_DESC_INDEX_OFFSET: usize = 136;
const NXSB_XP_DESC_LEN_OFFSET: usize = 140;
const NXSB_XP_DATA_INDEX_OFFSET: usize = 144;
const NXSB_XP_DATA_LEN_OFFSET: usize = 148;
const NXSB_SPACEMAN_OID_OFFSET: usize = 152;
const NXSB_OMAP_OID_OFFSET: usize = 160;
const NXSB_REAPER_OID_OFFSET: usize = 168;
const NXSB_MAX_FILE_SYSTEMS_OFFSET: usize = 180;
const NXSB_FS_OID_OFFSET: usize = 184;

/// Minimum buffer length a superblock decode needs.
pub const NXSB_MIN_SIZE: usize = NXSB_FS_OID_OFFSET + NX_MAX_FILE_SYSTEMS * 8;

/// Decoded container superblock.
///
/// Decoding is layout-strict but magic-lenient: a block whose magic is wrong
/// still parses, and the caller decides whether that is a warning (block
/// zero) or a reason to skip the slot (descriptor scan).
#[derive(Debug, Clone)]
pub struct NxSuperblock {
    pub header: ObjectHeader,
    pub magic: u32,
    pub block_size: u32,
    pub block_count: u64,
    pub features: u64,
    pub readonly_compatible_features: u64,
    pub incompatible_features: u64,
    pub uuid: [u8; 16],
    pub next_oid: Oid,
    pub next_xid: Xid,
    pub xp_desc_blocks: u32,
    pub xp_data_blocks: u32,
    pub xp_desc_base: Paddr,
    pub xp_data_base: Paddr,
    pub xp_desc_next: u32,
    pub xp_data_next: u32,
    pub xp_desc_index: u32,
    pub xp_desc_len: u32,
    pub xp_data_index: u32,
    pub xp_data_len: u32,
    pub spaceman_oid: Oid,
    pub omap_oid: Oid,
    pub reaper_oid: Oid,
    pub max_file_systems: u32,
    pub fs_oids: [Oid; NX_MAX_FILE_SYSTEMS],
}

impl NxSuperblock {
    /// Decode a container superblock from a raw block.
    pub fn parse(block: &[u8]) -> Result<Self> {
        ensure_min_len(block, NXSB_MIN_SIZE, "container superblock")?;
        let header = ObjectHeader::parse(block)
            .expect("NXSB_MIN_SIZE covers the object header");

        let mut uuid = [0_u8; 16];
        uuid.copy_from_slice(&block[NXSB_UUID_OFFSET..NXSB_UUID_OFFSET + 16]);

        let mut fs_oids = [Oid(0); NX_MAX_FILE_SYSTEMS];
        for (slot, oid) in fs_oids.iter_mut().enumerate() {
            *oid = Oid(read_le_u64_at(block, NXSB_FS_OID_OFFSET + slot * 8));
        }

        Ok(Self {
            header,
            magic: read_le_u32_at(block, NXSB_MAGIC_OFFSET),
            block_size: read_le_u32_at(block, NXSB_BLOCK_SIZE_OFFSET),
            block_count: read_le_u64_at(block, NXSB_BLOCK_COUNT_OFFSET),
            features: read_le_u64_at(block, NXSB_FEATURES_OFFSET),
            readonly_compatible_features: read_le_u64_at(block, NXSB_RO_COMPAT_FEATURES_OFFSET),
            incompatible_features: read_le_u64_at(block, NXSB_INCOMPAT_FEATURES_OFFSET),
            uuid,
            next_oid: Oid(read_le_u64_at(block, NXSB_NEXT_OID_OFFSET)),
            next_xid: Xid(read_le_u64_at(block, NXSB_NEXT_XID_OFFSET)),
            xp_desc_blocks: read_le_u32_at(block, NXSB_XP_DESC_BLOCKS_OFFSET),
            xp_data_blocks: read_le_u32_at(block, NXSB_XP_DATA_BLOCKS_OFFSET),
            xp_desc_base: Paddr(read_le_u64_at(block, NXSB_XP_DESC_BASE_OFFSET)),
            xp_data_base: Paddr(read_le_u64_at(block, NXSB_XP_DATA_BASE_OFFSET)),
            xp_desc_next: read_le_u32_at(block, NXSB_XP_DESC_NEXT_OFFSET),
            xp_data_next: read_le_u32_at(block, NXSB_XP_DATA_NEXT_OFFSET),
            xp_desc_index: read_le_u32_at(block, NXSB_XP_DESC_INDEX_OFFSET),
            xp_desc_len: read_le_u32_at(block, NXSB_XP_DESC_LEN_OFFSET),
            xp_data_index: read_le_u32_at(block, NXSB_XP_DATA_INDEX_OFFSET),
            xp_data_len: read_le_u32_at(block, NXSB_XP_DATA_LEN_OFFSET),
            spaceman_oid: Oid(read_le_u64_at(block, NXSB_SPACEMAN_OID_OFFSET)),
            omap_oid: Oid(read_le_u64_at(block, NXSB_OMAP_OID_OFFSET)),
            reaper_oid: Oid(read_le_u64_at(block, NXSB_REAPER_OID_OFFSET)),
            max_file_systems: read_le_u32_at(block, NXSB_MAX_FILE_SYSTEMS_OFFSET),
            fs_oids,
        })
    }

    /// Whether the stored magic matches `NXSB`.
    #[must_use]
    pub const fn has_valid_magic(&self) -> bool {
        self.magic == NX_MAGIC
    }

    /// Transaction id of the checkpoint that wrote this superblock.
    #[must_use]
    pub const fn xid(&self) -> Xid {
        self.header.xid
    }

    /// Length of the checkpoint descriptor area in blocks (low 31 bits).
    #[must_use]
    pub const fn desc_block_count(&self) -> u32 {
        self.xp_desc_blocks & !XP_DESC_NONCONTIGUOUS
    }

    /// Whether the descriptor area is one contiguous run of blocks.
    #[must_use]
    pub const fn desc_area_is_contiguous(&self) -> bool {
        self.xp_desc_blocks & XP_DESC_NONCONTIGUOUS == 0
    }

    /// The registered volume oids: the prefix of `fs_oids` up to the first
    /// zero entry.
    #[must_use]
    pub fn volume_oids(&self) -> &[Oid] {
        let end = self
            .fs_oids
            .iter()
            .position(|oid| oid.is_zero())
            .unwrap_or(NX_MAX_FILE_SYSTEMS);
        &self.fs_oids[..end]
    }
}
