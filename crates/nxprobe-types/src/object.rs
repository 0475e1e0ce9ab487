//! Object headers, type words, and storage classes.
//!
//! Every APFS metadata block begins with the same 32-byte header:
//!
//! ```text
//! Offset  Size  Description
//!   0       8   Fletcher-64 checksum of bytes 8..block_size
//!   8       8   Object id
//!  16       8   Transaction id
//!  24       4   Type word (low 16 bits: type; high 16 bits: flags)
//!  28       4   Subtype
//! ```
//!
//! All fields are little-endian.

use std::fmt;

use crate::{Oid, Xid};

/// Mask selecting the object type from a type word.
pub const OBJECT_TYPE_MASK: u32 = 0x0000_ffff;
/// Mask selecting the flag bits from a type word.
pub const OBJECT_TYPE_FLAGS_MASK: u32 = 0xffff_0000;

/// Mask selecting the storage class bits from a type word.
pub const OBJ_STORAGETYPE_MASK: u32 = 0xc000_0000;
/// Storage-class value: resolved through an object map.
pub const OBJ_VIRTUAL: u32 = 0x0000_0000;
/// Storage-class value: resolved through a checkpoint map.
pub const OBJ_EPHEMERAL: u32 = 0x8000_0000;
/// Storage-class value: the oid is a physical block address.
pub const OBJ_PHYSICAL: u32 = 0x4000_0000;

/// Flag: object data is stored without the common header.
pub const OBJ_NOHEADER: u32 = 0x2000_0000;
/// Flag: object payload is encrypted.
pub const OBJ_ENCRYPTED: u32 = 0x1000_0000;
/// Flag: object is never persisted (must not appear on disk).
pub const OBJ_NONPERSISTENT: u32 = 0x0800_0000;

pub const OBJECT_TYPE_INVALID: u32 = 0x0000;
pub const OBJECT_TYPE_NX_SUPERBLOCK: u32 = 0x0001;
pub const OBJECT_TYPE_BTREE: u32 = 0x0002;
pub const OBJECT_TYPE_BTREE_NODE: u32 = 0x0003;
pub const OBJECT_TYPE_SPACEMAN: u32 = 0x0005;
pub const OBJECT_TYPE_SPACEMAN_CAB: u32 = 0x0006;
pub const OBJECT_TYPE_SPACEMAN_CIB: u32 = 0x0007;
pub const OBJECT_TYPE_SPACEMAN_BITMAP: u32 = 0x0008;
pub const OBJECT_TYPE_SPACEMAN_FREE_QUEUE: u32 = 0x0009;
pub const OBJECT_TYPE_EXTENT_LIST_TREE: u32 = 0x000a;
pub const OBJECT_TYPE_OMAP: u32 = 0x000b;
pub const OBJECT_TYPE_CHECKPOINT_MAP: u32 = 0x000c;
pub const OBJECT_TYPE_FS: u32 = 0x000d;
pub const OBJECT_TYPE_FSTREE: u32 = 0x000e;
pub const OBJECT_TYPE_BLOCKREFTREE: u32 = 0x000f;
pub const OBJECT_TYPE_SNAPMETATREE: u32 = 0x0010;
pub const OBJECT_TYPE_NX_REAPER: u32 = 0x0011;
pub const OBJECT_TYPE_NX_REAP_LIST: u32 = 0x0012;
pub const OBJECT_TYPE_OMAP_SNAPSHOT: u32 = 0x0013;
pub const OBJECT_TYPE_EFI_JUMPSTART: u32 = 0x0014;
pub const OBJECT_TYPE_FUSION_MIDDLE_TREE: u32 = 0x0015;
pub const OBJECT_TYPE_NX_FUSION_WBC: u32 = 0x0016;
pub const OBJECT_TYPE_NX_FUSION_WBC_LIST: u32 = 0x0017;
pub const OBJECT_TYPE_ER_STATE: u32 = 0x0018;
pub const OBJECT_TYPE_GBITMAP: u32 = 0x0019;
pub const OBJECT_TYPE_GBITMAP_TREE: u32 = 0x001a;
pub const OBJECT_TYPE_GBITMAP_BLOCK: u32 = 0x001b;

/// Storage class of an object, encoded in the top two bits of the type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StorageClass {
    /// Oid resolved through an object map.
    Virtual,
    /// Oid resolved through the current checkpoint's map.
    Ephemeral,
    /// Oid is a physical block address.
    Physical,
}

impl StorageClass {
    /// Extract the storage class from a type word.
    ///
    /// Returns `None` when both class bits are set, which no valid object
    /// carries.
    #[must_use]
    pub const fn from_type_word(type_word: u32) -> Option<Self> {
        match type_word & OBJ_STORAGETYPE_MASK {
            OBJ_VIRTUAL => Some(Self::Virtual),
            OBJ_EPHEMERAL => Some(Self::Ephemeral),
            OBJ_PHYSICAL => Some(Self::Physical),
            _ => None,
        }
    }

    /// Display name matching the on-disk documentation.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Virtual => "Virtual",
            Self::Ephemeral => "Ephemeral",
            Self::Physical => "Physical",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse classification of a metadata block by its type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ObjectKind {
    NxSuperblock,
    CheckpointMap,
    Omap,
    BtreeRoot,
    BtreeNode,
    Other,
}

impl ObjectKind {
    /// Classify a type word.
    #[must_use]
    pub const fn classify(type_word: u32) -> Self {
        match type_word & OBJECT_TYPE_MASK {
            OBJECT_TYPE_NX_SUPERBLOCK => Self::NxSuperblock,
            OBJECT_TYPE_CHECKPOINT_MAP => Self::CheckpointMap,
            OBJECT_TYPE_OMAP => Self::Omap,
            OBJECT_TYPE_BTREE => Self::BtreeRoot,
            OBJECT_TYPE_BTREE_NODE => Self::BtreeNode,
            _ => Self::Other,
        }
    }
}

/// Display name for the type portion of a type word.
///
/// Unknown values render as a stable "unknown type" string so that output
/// stays parseable when a newer format revision introduces types this tool
/// has never heard of.
#[must_use]
pub fn type_name(type_word: u32) -> &'static str {
    match type_word & OBJECT_TYPE_MASK {
        OBJECT_TYPE_INVALID => "(none/invalid)",
        OBJECT_TYPE_NX_SUPERBLOCK => "container superblock",
        OBJECT_TYPE_BTREE => "B-tree (root node)",
        OBJECT_TYPE_BTREE_NODE => "B-tree (non-root) node",
        OBJECT_TYPE_SPACEMAN => "space manager",
        OBJECT_TYPE_SPACEMAN_CAB => "space manager chunk-info address block",
        OBJECT_TYPE_SPACEMAN_CIB => "space manager chunk-info block",
        OBJECT_TYPE_SPACEMAN_BITMAP => "space manager free-space bitmap",
        OBJECT_TYPE_SPACEMAN_FREE_QUEUE => "space manager free-space queue",
        OBJECT_TYPE_EXTENT_LIST_TREE => "extents-list tree",
        OBJECT_TYPE_OMAP => "object map",
        OBJECT_TYPE_CHECKPOINT_MAP => "checkpoint map",
        OBJECT_TYPE_FS => "APFS volume",
        OBJECT_TYPE_FSTREE => "file-system records tree",
        OBJECT_TYPE_BLOCKREFTREE => "extent references tree",
        OBJECT_TYPE_SNAPMETATREE => "volume snapshot metadata tree",
        OBJECT_TYPE_NX_REAPER => "container reaper",
        OBJECT_TYPE_NX_REAP_LIST => "container reaper list",
        OBJECT_TYPE_OMAP_SNAPSHOT => "object map snapshots tree",
        OBJECT_TYPE_EFI_JUMPSTART => "EFI jumpstart boot info",
        OBJECT_TYPE_FUSION_MIDDLE_TREE => "Fusion inter-drive block-mapping tree",
        OBJECT_TYPE_NX_FUSION_WBC => "Fusion write-back cache state",
        OBJECT_TYPE_NX_FUSION_WBC_LIST => "Fusion write-back cache list",
        OBJECT_TYPE_ER_STATE => "encryption-rolling state",
        OBJECT_TYPE_GBITMAP => "general-purpose bitmap",
        OBJECT_TYPE_GBITMAP_TREE => "general-purpose bitmap tree",
        OBJECT_TYPE_GBITMAP_BLOCK => "general-purpose bitmap block",
        _ => "unknown type",
    }
}

/// The 32-byte header prefixed to every metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectHeader {
    /// Stored Fletcher-64 checksum over bytes 8..block_size.
    pub checksum: u64,
    /// Object id.
    pub oid: Oid,
    /// Transaction id of the checkpoint that wrote this object.
    pub xid: Xid,
    /// Type word: low 16 bits type, high 16 bits flags.
    pub type_word: u32,
    /// Subtype (for trees, the kind of records stored).
    pub subtype: u32,
}

impl ObjectHeader {
    /// Serialized header size in bytes.
    pub const SIZE: usize = 32;

    /// Parse the header from the front of a block buffer.
    ///
    /// Returns `None` when the buffer is shorter than the header.
    #[must_use]
    pub fn parse(block: &[u8]) -> Option<Self> {
        if block.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            checksum: read_le_u64_at(block, 0),
            oid: Oid(read_le_u64_at(block, 8)),
            xid: Xid(read_le_u64_at(block, 16)),
            type_word: read_le_u32_at(block, 24),
            subtype: read_le_u32_at(block, 28),
        })
    }

    /// The type portion of the type word.
    #[inline]
    #[must_use]
    pub const fn object_type(&self) -> u32 {
        self.type_word & OBJECT_TYPE_MASK
    }

    /// The storage class, if the class bits are a valid combination.
    #[inline]
    #[must_use]
    pub const fn storage_class(&self) -> Option<StorageClass> {
        StorageClass::from_type_word(self.type_word)
    }

    /// Coarse kind classification.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        ObjectKind::classify(self.type_word)
    }

    /// Whether this block claims to be a container superblock.
    #[inline]
    #[must_use]
    pub const fn is_nx_superblock(&self) -> bool {
        self.object_type() == OBJECT_TYPE_NX_SUPERBLOCK
    }

    /// Whether this block claims to be a checkpoint map.
    #[inline]
    #[must_use]
    pub const fn is_checkpoint_map(&self) -> bool {
        self.object_type() == OBJECT_TYPE_CHECKPOINT_MAP
    }
}

fn read_le_u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0_u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_le_u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
