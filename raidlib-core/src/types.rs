// vim: tw=80
//! Common type definitions used throughout the RAID library

use enum_primitive_derive::Primitive;
use num_traits::{FromPrimitive, ToPrimitive};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Indexes a block.  Blocks are always 520 bytes on the exported edge.
pub type LbaT = u64;

/// A count of blocks
pub type BlockCount = u64;

/// Indexes a chunk of the paged metadata
pub type ChunkIndex = u64;

/// A count of chunks
pub type ChunkCount = u32;

/// Size of a chunk, in blocks per drive
pub type ChunkSize = u32;

/// Blocks per element, per drive
pub type ElementSize = u32;

/// Number of elements in one parity stripe
pub type ElementsPerParity = u32;

/// Identifies the raid group object that owns a geometry.  Only used for
/// tracing.
pub type ObjectId = u32;

/// Sentinel for an lba that has not been set
pub const LBA_INVALID: LbaT = u64::MAX;

/// The RAID library's error type.
///
/// Every error is a plain value so that it can be stored in a request and
/// reported long after the fact.
#[derive(Clone, Copy, Debug, Deserialize, Error, Eq, PartialEq, Primitive,
         Serialize)]
pub enum Error {
    #[error("RAID geometry has not been initialized")]
    NotInitialized          = 1,
    #[error("Generic failure")]
    GenericFailure          = 2,
    #[error("Width is not valid for this raid type")]
    InvalidWidth            = 3,
    #[error("Invalid block size configuration")]
    InvalidBlockSize        = 4,
    #[error("Request exceeds its extent")]
    ExceedsExtent           = 5,
    #[error("Internal consistency check failed")]
    Invariant               = 6,
    #[error("SIOTS allocation failed")]
    AllocationFailed        = 7,
    #[error("Chunk metadata is inconsistent")]
    InconsistentChunkInfo   = 8,
    #[error("Opcode not supported here")]
    UnsupportedOpcode       = 9,
    #[error("Request is not chunk aligned")]
    Misaligned              = 10,
    #[error("No chunk is marked")]
    NothingMarked           = 11,
    #[error("Object is not a valid IOTS")]
    NotIots                 = 12,
}

impl Error {
    /// The closest errno, for reporting to a process's caller.
    pub fn errno(self) -> i32 {
        match self {
            Error::NotInitialized => libc::ENXIO,
            Error::GenericFailure => libc::EIO,
            Error::InvalidWidth | Error::InvalidBlockSize => libc::EINVAL,
            Error::ExceedsExtent => libc::ERANGE,
            Error::Invariant => libc::EFAULT,
            Error::AllocationFailed => libc::ENOMEM,
            Error::InconsistentChunkInfo => libc::EIO,
            Error::UnsupportedOpcode => libc::EOPNOTSUPP,
            Error::Misaligned => libc::EINVAL,
            Error::NothingMarked => libc::ENOENT,
            Error::NotIots => libc::EBADF,
        }
    }

    /// Recover an `Error` from its stable numeric code
    pub fn from_code(code: i32) -> Option<Self> {
        Error::from_i32(code)
    }

    /// This error's stable numeric code
    pub fn code(self) -> i32 {
        // Every variant has an explicit small discriminant.
        self.to_i32().unwrap_or(0)
    }
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        e.errno()
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

// LCOV_EXCL_STOP
