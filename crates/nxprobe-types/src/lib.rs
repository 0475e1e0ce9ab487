#![forbid(unsafe_code)]
//! On-disk vocabulary for APFS containers.
//!
//! Newtypes for the three 64-bit identifier spaces (physical addresses,
//! object ids, transaction ids), the 32-byte object header that prefixes
//! every metadata block, and the type-word constants and classifier
//! predicates the checkpoint pipeline keys on.

pub mod object;

pub use object::{
    type_name, ObjectHeader, ObjectKind, StorageClass, OBJECT_TYPE_BTREE, OBJECT_TYPE_BTREE_NODE,
    OBJECT_TYPE_CHECKPOINT_MAP, OBJECT_TYPE_FS, OBJECT_TYPE_INVALID, OBJECT_TYPE_MASK,
    OBJECT_TYPE_NX_REAPER, OBJECT_TYPE_NX_SUPERBLOCK, OBJECT_TYPE_OMAP, OBJECT_TYPE_SPACEMAN,
    OBJ_ENCRYPTED, OBJ_EPHEMERAL, OBJ_NOHEADER, OBJ_NONPERSISTENT, OBJ_PHYSICAL,
    OBJ_STORAGETYPE_MASK, OBJ_VIRTUAL,
};

use std::fmt;

/// Physical block address within the container.
///
/// Block 0 always holds the copy of the container superblock written at
/// container-creation time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Paddr(pub u64);

impl Paddr {
    /// The block-zero address.
    pub const ZERO: Self = Self(0);

    /// Raw block index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Byte offset of this block for a given block size.
    #[inline]
    #[must_use]
    pub const fn byte_offset(self, block_size: u32) -> u64 {
        self.0 * block_size as u64
    }
}

impl fmt::Display for Paddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for Paddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for Paddr {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Object identifier.
///
/// Depending on the object's storage class this is a physical block address,
/// a virtual id resolved through an object map, or an ephemeral id resolved
/// through a checkpoint map. Oid 0 is invalid and terminates on-disk arrays.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Oid(pub u64);

impl Oid {
    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the invalid/terminator id.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Reinterpret this oid as a physical address.
    ///
    /// Only meaningful for objects of the physical storage class, where the
    /// oid space and the paddr space coincide.
    #[inline]
    #[must_use]
    pub const fn as_paddr(self) -> Paddr {
        Paddr(self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for Oid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Transaction identifier.
///
/// Monotonically increasing; a higher xid names a newer checkpoint. Equal
/// xids never occur in a valid container.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Xid(pub u64);

impl Xid {
    /// Raw transaction number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u64> for Xid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
