#![forbid(unsafe_code)]
//! Error taxonomy for nxprobe.
//!
//! One structured error type covers the whole pipeline: usage errors at the
//! CLI edge, I/O failures from the block device, structural damage found in
//! container metadata, and the on-disk layouts the tool deliberately does not
//! resolve. Text rendering and stream selection are the caller's concern;
//! variants carry the facts.

use thiserror::Error;

/// Primary error type for container inspection.
#[derive(Error, Debug)]
pub enum NxError {
    /// Invalid command-line invocation.
    #[error("{0}")]
    Usage(String),

    /// File I/O error (open, seek, read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer blocks were available than the request demanded.
    ///
    /// The block-device contract is all-or-nothing: a read that returns fewer
    /// blocks than asked for is a failure, and the shortfall is reported here
    /// rather than as a count return.
    #[error("short read at block {paddr:#x}: wanted {expected_blocks} blocks, got {actual_blocks}")]
    ShortRead {
        paddr: u64,
        expected_blocks: u64,
        actual_blocks: u64,
    },

    /// On-disk metadata violates the container format.
    #[error("container metadata is malformed: {detail}")]
    Corrupt { detail: String },

    /// The checkpoint descriptor area holds no well-formed superblock.
    #[error("no well-formed container superblock in the checkpoint descriptor area")]
    NoValidSuperblock,

    /// A checkpoint named by a superblock is internally inconsistent.
    #[error("checkpoint is malformed: {detail}")]
    MalformedCheckpoint { detail: String },

    /// An on-disk layout this tool recognizes but does not resolve.
    #[error("not implemented: {feature}")]
    Unimplemented { feature: String },
}

/// Coarse result classes with their process exit codes.
///
/// The reference behavior returned `-errno` for I/O failures; negative exit
/// statuses are not portable, so I/O and structural failures map to small
/// positive codes instead. Graceful "unimplemented" terminations share the
/// success code: the tool did everything it claims to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful inspection, or a graceful stop at a known-unsupported layout.
    Ok = 0,
    /// Bad command-line invocation.
    Usage = 1,
    /// The image could not be opened or read.
    Io = 2,
    /// The container metadata is damaged beyond what leniency allows.
    Structural = 3,
}

impl NxError {
    /// Map this error to its result class.
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Usage(_) => ErrorCode::Usage,
            Self::Io(_) | Self::ShortRead { .. } => ErrorCode::Io,
            Self::Corrupt { .. } | Self::NoValidSuperblock | Self::MalformedCheckpoint { .. } => {
                ErrorCode::Structural
            }
            Self::Unimplemented { .. } => ErrorCode::Ok,
        }
    }

    /// Process exit code for this error (CLI use).
    pub const fn exit_code(&self) -> i32 {
        self.error_code() as i32
    }

    /// Whether this error reports damaged metadata rather than an
    /// environmental failure.
    pub const fn is_structural(&self) -> bool {
        matches!(self.error_code(), ErrorCode::Structural)
    }

    /// Create a usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a structural-corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }

    /// Create a malformed-checkpoint error.
    pub fn malformed_checkpoint(detail: impl Into<String>) -> Self {
        Self::MalformedCheckpoint {
            detail: detail.into(),
        }
    }

    /// Create a not-implemented error.
    pub fn unimplemented(feature: impl Into<String>) -> Self {
        Self::Unimplemented {
            feature: feature.into(),
        }
    }
}

/// Result type alias using `NxError`.
pub type Result<T> = std::result::Result<T, NxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NxError::corrupt("object header truncated");
        assert_eq!(
            err.to_string(),
            "container metadata is malformed: object header truncated"
        );

        let err = NxError::ShortRead {
            paddr: 0x20,
            expected_blocks: 8,
            actual_blocks: 3,
        };
        assert_eq!(
            err.to_string(),
            "short read at block 0x20: wanted 8 blocks, got 3"
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(NxError::usage("x").error_code(), ErrorCode::Usage);
        assert_eq!(
            NxError::ShortRead {
                paddr: 0,
                expected_blocks: 1,
                actual_blocks: 0
            }
            .error_code(),
            ErrorCode::Io
        );
        assert_eq!(NxError::corrupt("x").error_code(), ErrorCode::Structural);
        assert_eq!(
            NxError::NoValidSuperblock.error_code(),
            ErrorCode::Structural
        );
        assert_eq!(
            NxError::malformed_checkpoint("x").error_code(),
            ErrorCode::Structural
        );
        assert_eq!(NxError::unimplemented("x").error_code(), ErrorCode::Ok);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(NxError::usage("x").exit_code(), 1);
        assert_eq!(
            NxError::Io(std::io::Error::other("boom")).exit_code(),
            2
        );
        assert_eq!(NxError::NoValidSuperblock.exit_code(), 3);
        assert_eq!(NxError::unimplemented("x").exit_code(), 0);
    }

    #[test]
    fn structural_predicate() {
        assert!(NxError::corrupt("x").is_structural());
        assert!(NxError::malformed_checkpoint("x").is_structural());
        assert!(!NxError::usage("x").is_structural());
        assert!(!NxError::unimplemented("x").is_structural());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: NxError = io_err.into();
        assert!(matches!(err, NxError::Io(_)));
        assert_eq!(err.error_code(), ErrorCode::Io);
    }

    #[test]
    fn error_code_values() {
        assert_eq!(ErrorCode::Ok as i32, 0);
        assert_eq!(ErrorCode::Usage as i32, 1);
        assert_eq!(ErrorCode::Io as i32, 2);
        assert_eq!(ErrorCode::Structural as i32, 3);
    }
}
