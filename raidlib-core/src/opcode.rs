// vim: tw=80
//! Block operations, as handed to the library by the block transport

use crate::types::*;
use enum_primitive_derive::Primitive;
use serde_derive::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr
};

/// Block operation opcodes understood by the library
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Primitive,
         Serialize)]
pub enum Opcode {
    Read                            = 1,
    Write                           = 2,
    WriteNonCached                  = 3,
    VerifyWrite                     = 4,
    CorruptData                     = 5,
    Zero                            = 6,
    WriteZeros                      = 7,
    UnmarkZero                      = 8,
    EncryptionRekeyWrite            = 9,
    EncryptionRekeyWriteZeros       = 10,
    EncryptionRekeyZero             = 11,
    EncryptionReadPaged             = 12,
    Verify                          = 13,
    ReadOnlyVerify                  = 14,
    ErrorVerify                     = 15,
    IncompleteWriteVerify           = 16,
    SystemVerify                    = 17,
    VerifySpecificArea              = 18,
    ReadOnlyVerifySpecificArea      = 19,
    Rebuild                         = 20,
    MarkForRebuild                  = 21,
    WriteLogHdrRd                   = 22,
    WriteLogFlush                   = 23,
    NegotiateBlockSize              = 24,
    InitiateRoVerify                = 25,
    InitiateErrorVerify             = 26,
    InitiateIncompleteWriteVerify   = 27,
    InitiateSystemVerify            = 28,
    InitiateUserVerify              = 29,
}

impl Opcode {
    pub const ALL: [Opcode; 29] = [
        Opcode::Read, Opcode::Write, Opcode::WriteNonCached,
        Opcode::VerifyWrite, Opcode::CorruptData, Opcode::Zero,
        Opcode::WriteZeros, Opcode::UnmarkZero, Opcode::EncryptionRekeyWrite,
        Opcode::EncryptionRekeyWriteZeros, Opcode::EncryptionRekeyZero,
        Opcode::EncryptionReadPaged, Opcode::Verify, Opcode::ReadOnlyVerify,
        Opcode::ErrorVerify, Opcode::IncompleteWriteVerify,
        Opcode::SystemVerify, Opcode::VerifySpecificArea,
        Opcode::ReadOnlyVerifySpecificArea, Opcode::Rebuild,
        Opcode::MarkForRebuild, Opcode::WriteLogHdrRd, Opcode::WriteLogFlush,
        Opcode::NegotiateBlockSize, Opcode::InitiateRoVerify,
        Opcode::InitiateErrorVerify, Opcode::InitiateIncompleteWriteVerify,
        Opcode::InitiateSystemVerify, Opcode::InitiateUserVerify,
    ];

    /// Is this opcode's lba relative to a single drive, rather than to the
    /// host's address space?
    ///
    /// Disk-based opcodes are issued by background operations.
    pub fn is_lba_disk_based(self) -> bool {
        matches!(self,
            Opcode::Rebuild |
            Opcode::Verify |
            Opcode::EncryptionReadPaged |
            Opcode::MarkForRebuild |
            Opcode::ReadOnlyVerify |
            Opcode::ErrorVerify |
            Opcode::IncompleteWriteVerify |
            Opcode::SystemVerify |
            Opcode::VerifySpecificArea |
            Opcode::ReadOnlyVerifySpecificArea |
            Opcode::WriteLogHdrRd)
    }

    /// Buffered opcodes carry no host data, so they are not limited by the
    /// per-drive transfer size.
    pub fn is_buffered(self) -> bool {
        matches!(self,
            Opcode::Zero |
            Opcode::WriteZeros |
            Opcode::EncryptionRekeyWriteZeros |
            Opcode::WriteLogHdrRd |
            Opcode::WriteLogFlush)
    }

    /// Background zero requests that may span many chunks when aligned
    pub fn is_chunk_zero(self) -> bool {
        matches!(self,
            Opcode::Zero | Opcode::EncryptionRekeyZero | Opcode::UnmarkZero)
    }

    /// Journal opcodes address an exact, fixed region
    pub fn is_write_log(self) -> bool {
        matches!(self, Opcode::WriteLogHdrRd | Opcode::WriteLogFlush)
    }

    /// Opcodes that acquire the non-paged lock and so must never wait for
    /// I/O credits.
    pub fn is_initiate(self) -> bool {
        matches!(self,
            Opcode::NegotiateBlockSize |
            Opcode::InitiateRoVerify |
            Opcode::InitiateErrorVerify |
            Opcode::InitiateIncompleteWriteVerify |
            Opcode::InitiateSystemVerify |
            Opcode::InitiateUserVerify)
    }

    /// Opcodes that visit every parity stripe of their range
    pub fn is_verify_or_rebuild(self) -> bool {
        matches!(self,
            Opcode::Verify |
            Opcode::ReadOnlyVerify |
            Opcode::ErrorVerify |
            Opcode::IncompleteWriteVerify |
            Opcode::SystemVerify |
            Opcode::VerifySpecificArea |
            Opcode::ReadOnlyVerifySpecificArea |
            Opcode::Rebuild)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Read => "read",
            Opcode::Write => "write",
            Opcode::WriteNonCached => "write-noncached",
            Opcode::VerifyWrite => "verify-write",
            Opcode::CorruptData => "corrupt-data",
            Opcode::Zero => "zero",
            Opcode::WriteZeros => "write-zeros",
            Opcode::UnmarkZero => "unmark-zero",
            Opcode::EncryptionRekeyWrite => "rekey-write",
            Opcode::EncryptionRekeyWriteZeros => "rekey-write-zeros",
            Opcode::EncryptionRekeyZero => "rekey-zero",
            Opcode::EncryptionReadPaged => "read-paged",
            Opcode::Verify => "verify",
            Opcode::ReadOnlyVerify => "ro-verify",
            Opcode::ErrorVerify => "error-verify",
            Opcode::IncompleteWriteVerify => "incomplete-write-verify",
            Opcode::SystemVerify => "system-verify",
            Opcode::VerifySpecificArea => "verify-specific-area",
            Opcode::ReadOnlyVerifySpecificArea => "ro-verify-specific-area",
            Opcode::Rebuild => "rebuild",
            Opcode::MarkForRebuild => "mark-for-rebuild",
            Opcode::WriteLogHdrRd => "write-log-hdr-rd",
            Opcode::WriteLogFlush => "write-log-flush",
            Opcode::NegotiateBlockSize => "negotiate-block-size",
            Opcode::InitiateRoVerify => "initiate-ro-verify",
            Opcode::InitiateErrorVerify => "initiate-error-verify",
            Opcode::InitiateIncompleteWriteVerify =>
                "initiate-incomplete-write-verify",
            Opcode::InitiateSystemVerify => "initiate-system-verify",
            Opcode::InitiateUserVerify => "initiate-user-verify",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Opcode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Opcode::ALL.iter()
            .find(|op| op.name() == s)
            .copied()
            .ok_or(Error::UnsupportedOpcode)
    }
}

/// Completion status of a block operation
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Primitive,
         Serialize)]
pub enum BlockStatus {
    Invalid         = 0,
    Success         = 1,
    IoFailed        = 2,
    MediaError      = 3,
    RequestAborted  = 4,
    InvalidRequest  = 5,
    Timeout         = 6,
    NotReady        = 7,
}

/// Further detail accompanying a `BlockStatus`
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Primitive,
         Serialize)]
pub enum BlockQualifier {
    Invalid             = 0,
    None                = 1,
    /// Aborted by the library so that the request can be regenerated, for
    /// example after the raid group went degraded mid-flight.
    RaidlibAborted      = 2,
    ContinueRekey       = 3,
    NothingToRekey      = 4,
    UnexpectedError     = 5,
    ClientAborted       = 6,
    Retryable           = 7,
    NotRetryable        = 8,
}

/// Scheduling priority of a packet
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Primitive,
         Serialize)]
pub enum Priority {
    Low     = 1,
    Normal  = 2,
    Urgent  = 3,
}

/// A block operation descriptor.
///
/// Opaque to the library except for the opcode and the range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockOperation {
    pub opcode: Opcode,
    pub lba: LbaT,
    pub block_count: BlockCount,
    pub check_checksum: bool,
    pub corrupt_crc: bool,
    pub status: BlockStatus,
    pub qualifier: BlockQualifier,
    pub media_error_lba: LbaT,
}

impl BlockOperation {
    pub fn new(opcode: Opcode, lba: LbaT, block_count: BlockCount) -> Self {
        BlockOperation {
            opcode,
            lba,
            block_count,
            check_checksum: true,
            corrupt_crc: false,
            status: BlockStatus::Invalid,
            qualifier: BlockQualifier::Invalid,
            media_error_lba: LBA_INVALID,
        }
    }

    /// One past the last block of the operation
    pub fn end_lba(&self) -> LbaT {
        self.lba + self.block_count
    }

    pub fn set_status(&mut self, status: BlockStatus,
                      qualifier: BlockQualifier)
    {
        self.status = status;
        self.qualifier = qualifier;
    }
}

// LCOV_EXCL_STOP
