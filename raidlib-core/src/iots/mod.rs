// vim: tw=80
//! I/O tracking structures
//!
//! An IOTS follows one logical request from arrival until every SIOTS that
//! it generated has completed.  Host requests too large for a single pass are
//! processed in pieces: the same IOTS is reinitialized for each piece rather
//! than reallocated.

use std::{
    ops::AddAssign,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc
    }
};

use bitfield::bitfield;
#[cfg(test)] use mockall::automock;
use tracing::{error, warn};

use crate::{
    opcode::{BlockOperation, BlockQualifier, BlockStatus, Opcode},
    position::PositionBitmask,
    raid::RaidGeometry,
    siots::{MemoryService, Siots, SiotsExecutor, SiotsHandle},
    types::*,
};

mod chunk;
mod state;

pub use self::chunk::{ChunkInfo, MAX_CHUNKS};
pub use self::state::{IotsControl, IotsState, StateStatus};
use self::state::IotsShared;

/// Identifies an IOTS in traces
pub type IotsId = u64;

static NEXT_IOTS_ID: AtomicU64 = AtomicU64::new(1);

bitfield! {
    #[derive(Clone, Copy, Default, Eq, PartialEq)]
    pub struct IotsFlags(u32);
    impl Debug;
    pub generating, set_generating: 0;
    pub generating_siots, set_generating_siots: 1;
    pub allocating_siots, set_allocating_siots: 2;
    /// Do not start new SIOTS
    pub quiesce, set_quiesce: 3;
    pub abort, set_abort: 4;
    pub abort_for_shutdown, set_abort_for_shutdown: 5;
    pub error, set_error: 6;
    /// This piece reaches the end of the host request
    pub last_iots_of_request, set_last_iots_of_request: 7;
    pub embedded_siots_in_use, set_embedded_siots_in_use: 8;
    pub status_sent, set_status_sent: 9;
    /// The initial allocation for this piece has been made
    pub siots_consumed, set_siots_consumed: 10;
    /// Generation stopped at least once because of a quiesce
    pub was_quiesced, set_was_quiesced: 11;
    pub waiting_for_memory, set_waiting_for_memory: 12;
}

impl IotsFlags {
    /// Flags of a freshly initialized piece
    fn generating_only() -> Self {
        let mut flags = IotsFlags::default();
        flags.set_generating(true);
        flags
    }

    pub fn is_aborted(&self) -> bool {
        self.abort() || self.abort_for_shutdown()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IotsStatus {
    Invalid,
    NotUsed,
    AtLibrary,
    NotStartedToLibrary,
    /// Waiting for the caller to upgrade its stripe lock
    UpgradeLock,
    Complete,
}

/// The transport packet that carries a request.
///
/// The library owns no timers; the packet knows its own deadline.
#[cfg_attr(test, automock)]
pub trait Packet: Send + Sync {
    fn is_expired(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

/// What the completion callback learns about a finished piece
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IotsCompletion {
    pub id: IotsId,
    pub lba: LbaT,
    pub blocks: BlockCount,
    pub status: BlockStatus,
    pub qualifier: BlockQualifier,
    /// If false, the caller must start the next piece
    pub request_complete: bool,
}

pub type IotsCallback = Box<dyn FnOnce(IotsCompletion) + Send>;

/// SIOTS counts by kind, for display
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IotsStatistics {
    pub total_iots: u32,
    pub total_siots: u32,
    pub nest_siots: u32,
    pub read: u32,
    pub write: u32,
    pub verify_write: u32,
    pub zero: u32,
    pub unknown: u32,
}

impl IotsStatistics {
    fn count(&mut self, siots: &Siots) {
        match siots.opcode() {
            Some(Opcode::Read) => self.read += 1,
            Some(Opcode::Write) |
            Some(Opcode::WriteNonCached) |
            Some(Opcode::EncryptionRekeyWrite) => self.write += 1,
            Some(Opcode::VerifyWrite) => self.verify_write += 1,
            Some(op) if op.is_chunk_zero() ||
                matches!(op, Opcode::WriteZeros |
                             Opcode::EncryptionRekeyWriteZeros) =>
                self.zero += 1,
            _ => self.unknown += 1,
        }
    }
}

impl AddAssign for IotsStatistics {
    fn add_assign(&mut self, other: Self) {
        self.total_iots += other.total_iots;
        self.total_siots += other.total_siots;
        self.nest_siots += other.nest_siots;
        self.read += other.read;
        self.write += other.write;
        self.verify_write += other.verify_write;
        self.zero += other.zero;
        self.unknown += other.unknown;
    }
}

/// The collaborators of an IOTS
#[derive(Clone)]
pub struct IotsContext {
    pub geometry: Arc<RaidGeometry>,
    pub packet: Arc<dyn Packet>,
    pub memory: Arc<dyn MemoryService>,
    pub executor: Arc<dyn SiotsExecutor>,
}

/// Tracks one logical request
pub struct Iots {
    id: IotsId,
    ctx: IotsContext,
    shared: Arc<IotsShared>,
    op: BlockOperation,
    /// Opcode of the current piece.  May differ from the packet's.
    current_opcode: Opcode,
    packet_lba: LbaT,
    packet_blocks: BlockCount,
    /// Range of the current piece
    lba: LbaT,
    blocks: BlockCount,
    blocks_remaining: BlockCount,
    blocks_transferred: BlockCount,
    /// Next lba to hand to a SIOTS
    current_lba: LbaT,
    current_op_lba: LbaT,
    current_op_blocks: BlockCount,
    /// Offset of this piece from the start of the host request
    host_start_offset: BlockCount,
    np_lock: bool,
    chunk_info: [ChunkInfo; MAX_CHUNKS],
    status: IotsStatus,
    state: IotsState,
    embedded: Option<Siots>,
    callback: Option<IotsCallback>,
}

impl Iots {
    pub fn new(ctx: IotsContext, op: BlockOperation) -> Self {
        let id = NEXT_IOTS_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(IotsShared::new(id, ctx.memory.clone(),
                                              ctx.executor.clone()));
        let mut iots = Iots {
            id,
            ctx,
            shared,
            op,
            current_opcode: op.opcode,
            packet_lba: op.lba,
            packet_blocks: op.block_count,
            lba: op.lba,
            blocks: op.block_count,
            blocks_remaining: op.block_count,
            blocks_transferred: 0,
            current_lba: op.lba,
            current_op_lba: op.lba,
            current_op_blocks: op.block_count,
            host_start_offset: 0,
            np_lock: false,
            chunk_info: [ChunkInfo::default(); MAX_CHUNKS],
            status: IotsStatus::Invalid,
            state: IotsState::GenerateSiots,
            embedded: Some(Siots::embedded()),
            callback: None,
        };
        iots.init_request(op);
        iots
    }

    /// Initialize for a newly arrived block operation.
    ///
    /// Fails, leaving the IOTS untouched, while any SIOTS is outstanding.
    pub fn init(&mut self, op: BlockOperation) -> Result<()> {
        if let Err(e) = self.free_memory() {
            error!(iots = self.id, error = ?e, "cannot free siots on init");
            return Err(e);
        }
        self.shared.reset();
        self.init_request(op);
        Ok(())
    }

    fn init_request(&mut self, op: BlockOperation) {
        self.callback = None;
        self.op = op;
        self.packet_lba = op.lba;
        self.packet_blocks = op.block_count;
        self.current_opcode = op.opcode;
        self.host_start_offset = 0;
        self.np_lock = false;
        self.chunk_info = [ChunkInfo::default(); MAX_CHUNKS];
        self.init_common(op.lba, op.block_count);
        self.shared.lock().flags.set_last_iots_of_request(true);
    }

    /// Initialize the range fields only.
    ///
    /// The flags and SIOTS queues are left alone, so this is only for an IOTS
    /// that has never run.
    pub fn fast_init(&mut self, op: BlockOperation) {
        self.op = op;
        self.current_opcode = op.opcode;
        self.packet_lba = op.lba;
        self.packet_blocks = op.block_count;
        self.lba = op.lba;
        self.blocks = op.block_count;
        self.blocks_remaining = op.block_count;
        self.blocks_transferred = 0;
        self.current_lba = op.lba;
        self.current_op_lba = op.lba;
        self.current_op_blocks = op.block_count;
        self.host_start_offset = 0;
        self.status = IotsStatus::Invalid;
        self.state = IotsState::GenerateSiots;
    }

    fn basic_init_common(&mut self) {
        self.state = IotsState::GenerateSiots;
        self.op.set_status(BlockStatus::Invalid, BlockQualifier::Invalid);
        self.status = IotsStatus::Invalid;
        self.shared.lock().flags = IotsFlags::generating_only();
    }

    fn init_common(&mut self, lba: LbaT, blocks: BlockCount) {
        self.basic_init_common();
        self.blocks_transferred = 0;
        self.blocks = blocks;
        self.lba = lba;
        self.current_lba = lba;
        self.current_op_lba = lba;
        self.blocks_remaining = blocks;
        self.current_op_blocks = blocks;
    }

    /// Prepare for another piece of the same host request
    pub fn reinit(&mut self, lba: LbaT, blocks: BlockCount) {
        if self.flags().was_quiesced() {
            error!(iots = self.id, lba, blocks, "reinit of a quiesced iots");
        }
        match self.free_memory() {
            Ok(()) => self.shared.reset(),
            Err(e) => error!(iots = self.id, error = ?e,
                "cannot free siots on reinit"),
        }
        self.init_common(lba, blocks);
        self.mark_updated_request();
    }

    /// Recompute whether the current piece is the last one
    pub fn mark_updated_request(&mut self) {
        let last = self.lba + self.blocks >=
            self.packet_lba + self.packet_blocks;
        self.shared.lock().flags.set_last_iots_of_request(last);
    }

    /// Where the next piece begins and how much of the request remains
    pub fn get_next_lba(&self) -> (LbaT, BlockCount) {
        let next = self.lba + self.blocks;
        let remaining = (self.packet_lba + self.packet_blocks)
            .saturating_sub(next);
        (next, remaining)
    }

    /// Advance to the piece following the current one
    pub fn init_for_next_lba(&mut self) -> Result<()> {
        let (next_lba, remaining) = self.get_next_lba();
        let new_offset = self.host_start_offset + self.blocks;
        if next_lba >= self.op.end_lba() {
            error!(iots = self.id, next_lba, op_lba = self.op.lba,
                op_blocks = self.op.block_count,
                "next piece is beyond the end of the request");
            return Err(Error::ExceedsExtent);
        }
        self.reinit(next_lba, remaining);
        self.host_start_offset = new_offset;
        Ok(())
    }

    /// Return every SIOTS to where it came from.  Nothing may be outstanding.
    pub fn free_memory(&mut self) -> Result<()> {
        let shared = self.shared.clone();
        let pooled = {
            let mut guard = shared.lock();
            let s = &mut *guard;
            invariant!(s.outstanding == 0, iots = self.id,
                outstanding = s.outstanding,
                "freeing siots while some are outstanding");
            let mut pooled = Vec::new();
            let all = s.siots_queue.drain(..).chain(s.available.drain(..))
                .collect::<Vec<_>>();
            for mut siots in all {
                pooled.extend(siots.take_nested());
                if siots.handle() == SiotsHandle::Embedded {
                    siots.reset();
                    self.embedded = Some(siots);
                    s.flags.set_embedded_siots_in_use(false);
                } else {
                    pooled.push(siots);
                }
            }
            pooled
        };
        if !pooled.is_empty() {
            self.ctx.memory.free_siots(pooled);
        }
        Ok(())
    }

    /// Tear down after the packet completes
    pub fn destroy(&mut self) -> Result<()> {
        let r = self.free_memory();
        self.state = IotsState::Freed;
        r
    }

    /// Tear down an IOTS that never needed more than its embedded SIOTS
    pub fn fast_destroy(&mut self) -> Result<()> {
        {
            let mut guard = self.shared.lock();
            let s = &mut *guard;
            invariant!(s.outstanding == 0 && s.available.is_empty() &&
                       s.siots_queue.iter()
                       .all(|x| x.handle() == SiotsHandle::Embedded),
                iots = self.id, "fast destroy of an iots that allocated");
            if let Some(mut siots) = s.siots_queue.pop_front() {
                siots.reset();
                self.embedded = Some(siots);
            }
            s.flags.set_embedded_siots_in_use(false);
        }
        self.state = IotsState::Freed;
        Ok(())
    }

    /// A handle for reporting asynchronous events to this IOTS
    pub fn control(&self) -> IotsControl {
        IotsControl::new(self.shared.clone())
    }

    /// Record the final status of the block operation.  A media error, once
    /// recorded, is never overwritten.
    pub fn set_block_operation_status(&mut self, status: BlockStatus,
                                      qualifier: BlockQualifier)
    {
        if status == BlockStatus::Invalid {
            error!(iots = self.id, ?qualifier,
                "setting an invalid block operation status");
        }
        if self.op.status != BlockStatus::MediaError {
            self.op.set_status(status, qualifier);
            if !matches!(qualifier, BlockQualifier::ContinueRekey |
                                    BlockQualifier::NothingToRekey)
            {
                self.op.media_error_lba = LBA_INVALID;
            }
        }
    }

    /// Is the whole host request finished, or must another piece be
    /// generated?
    pub fn is_request_complete(&mut self) -> bool {
        let mut complete = self.status == IotsStatus::Complete &&
            self.flags().last_iots_of_request();
        match (self.op.status, self.op.qualifier) {
            (BlockStatus::RequestAborted, BlockQualifier::RaidlibAborted) => {
                // Regenerate the whole piece, for example with write logging
                // after the raid group went degraded mid-flight.
                self.blocks = 0;
                complete = false;
            }
            (BlockStatus::Invalid, _) |
            (BlockStatus::Success, _) |
            (BlockStatus::MediaError, _) => (),
            _ => complete = true,
        }
        if !complete &&
            self.lba + self.blocks >= self.packet_lba + self.packet_blocks
        {
            error!(iots = self.id, lba = self.lba, blocks = self.blocks,
                packet_lba = self.packet_lba,
                packet_blocks = self.packet_blocks,
                "incomplete iots reaches the end of its request");
        }
        complete
    }

    pub fn needs_upgrade(&self) -> bool {
        self.status == IotsStatus::UpgradeLock
    }

    /// Positions that failed in any SIOTS of this IOTS
    pub fn get_failed_io_pos_bitmap(&self) -> PositionBitmask {
        self.control().get_failed_io_pos_bitmap()
    }

    /// Background requests address a single drive
    pub fn is_background_request(&self) -> bool {
        self.op.opcode.is_lba_disk_based()
    }

    pub fn is_metadata_request(&self) -> bool {
        match self.op.opcode {
            Opcode::Rebuild | Opcode::EncryptionReadPaged | Opcode::Verify =>
                false,
            _ => self.ctx.geometry.is_metadata_io(self.current_op_lba)
        }
    }

    /// Does the current piece reach into the metadata region?
    pub fn is_metadata_operation(&self) -> Result<bool> {
        let md_start = self.ctx.geometry.metadata_start_lba();
        if md_start == LBA_INVALID {
            return Ok(false);
        }
        let (lba, blocks) = if self.is_background_request() {
            let dd = LbaT::from(self.ctx.geometry.data_disks()?);
            (self.lba * dd, self.blocks * dd)
        } else {
            (self.lba, self.blocks)
        };
        Ok(lba + blocks > md_start)
    }

    pub fn is_expired(&self) -> bool {
        self.ctx.packet.is_expired()
    }

    /// Has this IOTS been aborted?  Notices cancellation of the packet too.
    pub fn is_marked_aborted(&self) -> bool {
        if self.flags().is_aborted() {
            true
        } else if self.ctx.packet.is_cancelled() {
            warn!(iots = self.id, "packet cancelled");
            self.abort();
            true
        } else {
            false
        }
    }

    pub fn mark_piece_complete(&mut self) {
        self.blocks_remaining = 0;
    }

    pub fn is_piece_complete(&self) -> bool {
        self.blocks_remaining == 0
    }

    pub fn inc_errors(&self) {
        let mut s = self.shared.lock();
        s.error_count += 1;
        s.flags.set_error(true);
    }

    pub fn dec_errors(&self) {
        let mut s = self.shared.lock();
        s.error_count = s.error_count.saturating_sub(1);
        if s.error_count == 0 {
            s.flags.set_error(false);
        }
    }

    pub fn statistics(&self) -> IotsStatistics {
        let s = self.shared.lock();
        let mut stats = IotsStatistics {
            total_iots: 1,
            ..Default::default()
        };
        for siots in s.siots_queue.iter() {
            stats.total_siots += 1;
            stats.count(siots);
            for nested in siots.nested() {
                stats.nest_siots += 1;
                stats.count(nested);
            }
        }
        stats
    }

    pub fn should_check_checksums(&self) -> bool {
        self.op.check_checksum
    }

    pub fn is_corrupt_crc(&self) -> bool {
        self.op.corrupt_crc
    }

    /// Install a snapshot of the paged metadata for the chunks that the
    /// current piece touches.
    pub fn set_chunk_info(&mut self, chunks: &[ChunkInfo]) {
        self.chunk_info = [ChunkInfo::default(); MAX_CHUNKS];
        let n = chunks.len().min(MAX_CHUNKS);
        self.chunk_info[..n].copy_from_slice(&chunks[..n]);
    }

    pub fn set_current_opcode(&mut self, opcode: Opcode) {
        self.current_opcode = opcode;
    }

    pub fn set_np_lock(&mut self, np_lock: bool) {
        self.np_lock = np_lock;
    }

    pub fn set_status(&mut self, status: IotsStatus) {
        self.status = status;
    }

    pub fn block_operation(&self) -> &BlockOperation {
        &self.op
    }

    pub fn blocks(&self) -> BlockCount {
        self.blocks
    }

    pub fn blocks_remaining(&self) -> BlockCount {
        self.blocks_remaining
    }

    pub fn blocks_transferred(&self) -> BlockCount {
        self.blocks_transferred
    }

    pub fn chunk_info(&self) -> &[ChunkInfo; MAX_CHUNKS] {
        &self.chunk_info
    }

    pub fn current_lba(&self) -> LbaT {
        self.current_lba
    }

    pub fn current_op_blocks(&self) -> BlockCount {
        self.current_op_blocks
    }

    pub fn current_op_lba(&self) -> LbaT {
        self.current_op_lba
    }

    pub fn current_opcode(&self) -> Opcode {
        self.current_opcode
    }

    pub fn flags(&self) -> IotsFlags {
        self.shared.lock().flags
    }

    pub fn geometry(&self) -> &RaidGeometry {
        &self.ctx.geometry
    }

    pub fn host_start_offset(&self) -> BlockCount {
        self.host_start_offset
    }

    pub fn id(&self) -> IotsId {
        self.id
    }

    pub fn lba(&self) -> LbaT {
        self.lba
    }

    pub fn np_lock(&self) -> bool {
        self.np_lock
    }

    pub fn outstanding_requests(&self) -> u32 {
        self.shared.lock().outstanding
    }

    pub fn packet_blocks(&self) -> BlockCount {
        self.packet_blocks
    }

    pub fn packet_lba(&self) -> LbaT {
        self.packet_lba
    }

    pub fn state(&self) -> IotsState {
        self.state
    }

    pub fn status(&self) -> IotsStatus {
        self.status
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use super::*;
    use crate::{
        raid::{RaidClass, RaidType},
        siots::{MockMemoryService, MockSiotsExecutor},
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    pub(super) fn raid5_geometry() -> RaidGeometry {
        let mut g = RaidGeometry::new(0x20, RaidClass::Parity);
        g.set_configuration(5, RaidType::Raid5, 128, 8, 0x40_0000, 0x800)
            .unwrap();
        g.set_block_sizes(520, 520, 1).unwrap();
        g.set_metadata_configuration(0x3f_0000, 0x1_0000, 0x8000, 0x10_0000)
            .unwrap();
        g
    }

    pub(super) fn context(geometry: RaidGeometry,
                          memory: MockMemoryService,
                          executor: MockSiotsExecutor) -> IotsContext
    {
        let mut packet = MockPacket::new();
        packet.expect_is_expired().return_const(false);
        packet.expect_is_cancelled().return_const(false);
        IotsContext {
            geometry: Arc::new(geometry),
            packet: Arc::new(packet),
            memory: Arc::new(memory),
            executor: Arc::new(executor),
        }
    }

    pub(super) fn iots(opcode: Opcode, lba: LbaT, blocks: BlockCount) -> Iots
    {
        let ctx = context(raid5_geometry(), MockMemoryService::new(),
                          MockSiotsExecutor::new());
        Iots::new(ctx, BlockOperation::new(opcode, lba, blocks))
    }

    #[test]
    fn init() {
        let iots = iots(Opcode::Write, 1000, 300);
        assert_eq!(iots.lba(), 1000);
        assert_eq!(iots.blocks(), 300);
        assert_eq!(iots.blocks_remaining(), 300);
        assert_eq!(iots.current_op_lba(), 1000);
        assert_eq!(iots.current_op_blocks(), 300);
        assert_eq!(iots.status(), IotsStatus::Invalid);
        assert_eq!(iots.state(), IotsState::GenerateSiots);
        let flags = iots.flags();
        assert!(flags.generating());
        assert!(flags.last_iots_of_request());
        assert!(!flags.abort());
        assert_eq!(iots.block_operation().status, BlockStatus::Invalid);
    }

    #[test]
    fn fast_init_keeps_flags() {
        let mut iots = iots(Opcode::Write, 1000, 300);
        iots.inc_errors();
        iots.fast_init(BlockOperation::new(Opcode::Read, 0, 10));
        assert!(iots.flags().error());
        assert_eq!(iots.current_opcode(), Opcode::Read);
        assert_eq!(iots.blocks_remaining(), 10);
    }

    #[rstest]
    #[case(1000, 300, true)]
    #[case(1000, 100, false)]
    fn mark_updated_request(#[case] lba: LbaT, #[case] blocks: BlockCount,
                            #[case] last: bool)
    {
        let mut iots = iots(Opcode::Write, 1000, 300);
        iots.reinit(lba, blocks);
        assert_eq!(iots.flags().last_iots_of_request(), last);
    }

    #[test]
    fn next_lba() {
        let mut iots = iots(Opcode::Write, 1000, 300);
        iots.reinit(1000, 100);
        assert_eq!(iots.get_next_lba(), (1100, 200));
        iots.init_for_next_lba().unwrap();
        assert_eq!(iots.lba(), 1100);
        assert_eq!(iots.blocks(), 200);
        assert_eq!(iots.host_start_offset(), 100);
        assert!(iots.flags().last_iots_of_request());
    }

    #[test_log::test]
    fn next_lba_past_end() {
        let mut iots = iots(Opcode::Write, 1000, 300);
        assert_eq!(iots.init_for_next_lba(), Err(Error::ExceedsExtent));
        assert_eq!(iots.lba(), 1000);
    }

    #[test]
    fn request_complete() {
        let mut iots = iots(Opcode::Write, 1000, 300);
        assert!(!iots.is_request_complete());
        iots.set_status(IotsStatus::Complete);
        assert!(iots.is_request_complete());
        iots.reinit(1000, 100);
        iots.set_status(IotsStatus::Complete);
        assert!(!iots.is_request_complete());
    }

    #[test]
    fn request_complete_on_error() {
        let mut iots = iots(Opcode::Write, 1000, 300);
        iots.reinit(1000, 100);
        iots.set_block_operation_status(BlockStatus::IoFailed,
                                        BlockQualifier::NotRetryable);
        assert!(iots.is_request_complete());
    }

    #[test_log::test]
    fn raidlib_aborted_regenerates() {
        let mut iots = iots(Opcode::Write, 1000, 300);
        iots.set_status(IotsStatus::Complete);
        iots.set_block_operation_status(BlockStatus::RequestAborted,
                                        BlockQualifier::RaidlibAborted);
        assert!(!iots.is_request_complete());
        assert_eq!(iots.blocks(), 0);
    }

    /// Regenerating an aborted metadata write doesn't change how it's
    /// classified
    #[test]
    fn raidlib_aborted_metadata_write() {
        let mut iots = iots(Opcode::Write, 0x3f_0000, 300);
        assert!(iots.is_metadata_request());
        iots.set_status(IotsStatus::Complete);
        iots.set_block_operation_status(BlockStatus::RequestAborted,
                                        BlockQualifier::RaidlibAborted);
        assert!(!iots.is_request_complete());
        assert_eq!(iots.blocks(), 0);
        assert!(iots.is_metadata_request());
    }

    #[test]
    fn media_error_is_sticky() {
        let mut iots = iots(Opcode::Read, 0, 8);
        iots.set_block_operation_status(BlockStatus::MediaError,
                                        BlockQualifier::None);
        iots.set_block_operation_status(BlockStatus::Success,
                                        BlockQualifier::None);
        assert_eq!(iots.block_operation().status, BlockStatus::MediaError);
    }

    #[test]
    fn rekey_keeps_media_error_lba() {
        let mut iots = iots(Opcode::EncryptionRekeyWrite, 0, 8);
        iots.op.media_error_lba = 5;
        iots.set_block_operation_status(BlockStatus::Success,
                                        BlockQualifier::ContinueRekey);
        assert_eq!(iots.block_operation().media_error_lba, 5);
        iots.set_block_operation_status(BlockStatus::Success,
                                        BlockQualifier::None);
        assert_eq!(iots.block_operation().media_error_lba, LBA_INVALID);
    }

    #[rstest]
    #[case(Opcode::Write, 0x3f_0000, true)]
    #[case(Opcode::Write, 0x3e_ffff, false)]
    #[case(Opcode::Verify, 0x3f_0000, false)]
    #[case(Opcode::Rebuild, 0x3f_0000, false)]
    fn metadata_request(#[case] opcode: Opcode, #[case] lba: LbaT,
                        #[case] expected: bool)
    {
        assert_eq!(iots(opcode, lba, 1).is_metadata_request(), expected);
    }

    #[rstest]
    // Host requests compare directly
    #[case(Opcode::Write, 0x3e_fff0, 0x10, false)]
    #[case(Opcode::Write, 0x3e_fff0, 0x11, true)]
    // Background requests are scaled by the data disks
    #[case(Opcode::Verify, 0xfb_800, 0x800, false)]
    #[case(Opcode::Verify, 0xfb_800, 0x801, true)]
    fn metadata_operation(#[case] opcode: Opcode, #[case] lba: LbaT,
                          #[case] blocks: BlockCount, #[case] expected: bool)
    {
        let iots = iots(opcode, lba, blocks);
        assert_eq!(iots.is_metadata_operation(), Ok(expected));
    }

    #[test]
    fn background() {
        assert!(iots(Opcode::Rebuild, 0, 1).is_background_request());
        assert!(!iots(Opcode::Zero, 0, 1).is_background_request());
    }

    #[test]
    fn errors() {
        let iots = iots(Opcode::Read, 0, 8);
        iots.inc_errors();
        iots.inc_errors();
        iots.dec_errors();
        assert!(iots.flags().error());
        iots.dec_errors();
        assert!(!iots.flags().error());
    }

    #[test]
    fn piece_complete() {
        let mut iots = iots(Opcode::Read, 0, 8);
        assert!(!iots.is_piece_complete());
        iots.mark_piece_complete();
        assert!(iots.is_piece_complete());
    }

    #[test]
    fn cancelled_packet_aborts() {
        let mut packet = MockPacket::new();
        packet.expect_is_cancelled().return_const(true);
        let mut executor = MockSiotsExecutor::new();
        executor.expect_abort().never();
        let ctx = IotsContext {
            geometry: Arc::new(raid5_geometry()),
            packet: Arc::new(packet),
            memory: Arc::new(MockMemoryService::new()),
            executor: Arc::new(executor),
        };
        let iots = Iots::new(ctx, BlockOperation::new(Opcode::Read, 0, 8));
        assert!(iots.is_marked_aborted());
        assert!(iots.flags().abort());
        assert!(iots.is_marked_aborted());
    }

    #[test]
    fn chunk_info_truncates() {
        let mut iots = iots(Opcode::Read, 0, 8);
        let nr = ChunkInfo {
            needs_rebuild_bits: PositionBitmask::new(1),
            ..Default::default()
        };
        iots.set_chunk_info(&[nr; MAX_CHUNKS + 2]);
        assert!(iots.chunk_info().iter().all(|c| *c == nr));
        iots.set_chunk_info(&[nr]);
        assert_eq!(iots.chunk_info()[1], ChunkInfo::default());
    }

    #[test]
    fn statistics_sum() {
        let mut a = IotsStatistics { total_iots: 1, read: 2,
                                     ..Default::default() };
        a += IotsStatistics { total_iots: 1, zero: 1, ..Default::default() };
        assert_eq!(a.total_iots, 2);
        assert_eq!(a.read, 2);
        assert_eq!(a.zero, 1);
    }
}
// LCOV_EXCL_STOP
