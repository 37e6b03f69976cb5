// vim: tw=80
//! The IOTS state machine
//!
//! Execution is cooperative.  Each state runs to completion without blocking
//! and reports whether the machine should keep going, wait for an external
//! event, or stop.  External events (SIOTS completion, memory arrival, abort)
//! arrive through an `IotsControl` and wake the owner, who calls
//! `Iots::run` again.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError}
};

use tracing::{debug, error, instrument, trace};

use crate::{
    opcode::{BlockQualifier, BlockStatus, Opcode},
    position::PositionBitmask,
    raid::{RaidClass, SECTORS_PER_ELEMENT},
    siots::{
        AllocationStatus,
        MemoryRequestId,
        MemoryService,
        Siots,
        SiotsExecutor,
        SiotsId,
        SiotsRequest
    },
    types::*,
    util::panic_on_unexpected_error,
};
use super::{Iots, IotsCallback, IotsCompletion, IotsFlags, IotsId, IotsStatus};

/// Transfer limit for geometries that don't set their own
const DEFAULT_MAX_BLOCKS_PER_DRIVE: BlockCount = 0x800;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IotsState {
    GenerateSiots,
    CompleteIots,
    UnexpectedError,
    /// Not executable.  Dispatching here is a fatal logic error.
    Freed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateStatus {
    /// Run the next state right away
    Executing,
    /// Suspended until an external event
    Waiting,
    Done,
}

/// Called whenever an external event gives an IOTS more work to do
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// State shared between an IOTS and the events that arrive for it.
/// Protected by the IOTS lock.
pub(super) struct SharedState {
    pub(super) flags: IotsFlags,
    /// Live SIOTS.  The IOTS may not complete while this is non-zero.
    pub(super) outstanding: u32,
    pub(super) error_count: u32,
    pub(super) siots_queue: VecDeque<Siots>,
    pub(super) available: VecDeque<Siots>,
    memory_request: Option<MemoryRequestId>,
    memory_failed: bool,
    first_error: Option<(BlockStatus, BlockQualifier)>,
    waker: Option<Waker>,
}

pub(super) struct IotsShared {
    id: IotsId,
    inner: Mutex<SharedState>,
    memory: Arc<dyn MemoryService>,
    executor: Arc<dyn SiotsExecutor>,
}

impl IotsShared {
    pub(super) fn new(id: IotsId, memory: Arc<dyn MemoryService>,
                      executor: Arc<dyn SiotsExecutor>) -> Self
    {
        let inner = SharedState {
            flags: IotsFlags::default(),
            outstanding: 0,
            error_count: 0,
            siots_queue: VecDeque::new(),
            available: VecDeque::new(),
            memory_request: None,
            memory_failed: false,
            first_error: None,
            waker: None,
        };
        IotsShared{id, inner: Mutex::new(inner), memory, executor}
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget everything but the waker
    pub(super) fn reset(&self) {
        let mut s = self.lock();
        s.flags = IotsFlags::default();
        s.outstanding = 0;
        s.error_count = 0;
        s.siots_queue.clear();
        s.available.clear();
        s.memory_request = None;
        s.memory_failed = false;
        s.first_error = None;
    }

    fn wake(&self) {
        let waker = self.lock().waker.clone();
        if let Some(w) = waker {
            w();
        }
    }
}

/// A cloneable handle through which asynchronous events reach an IOTS
#[derive(Clone)]
pub struct IotsControl {
    shared: Arc<IotsShared>,
}

impl IotsControl {
    pub(super) fn new(shared: Arc<IotsShared>) -> Self {
        IotsControl{shared}
    }

    pub fn id(&self) -> IotsId {
        self.shared.id
    }

    /// Abort the IOTS, every SIOTS it has started, and any allocation that
    /// it is waiting for.  Safe to call at any time.
    #[instrument(skip(self), fields(iots = self.shared.id))]
    pub fn abort(&self) {
        self.abort_priv(false)
    }

    /// Like `abort`, but because the raid group is going away
    #[instrument(skip(self), fields(iots = self.shared.id))]
    pub fn abort_for_shutdown(&self) {
        self.abort_priv(true)
    }

    fn abort_priv(&self, shutdown: bool) {
        let (request, active) = {
            let mut s = self.shared.lock();
            if shutdown {
                s.flags.set_abort_for_shutdown(true);
            } else {
                s.flags.set_abort(true);
            }
            let request = if s.flags.waiting_for_memory() {
                s.memory_request.take()
            } else {
                None
            };
            let active = s.siots_queue.iter_mut()
                .filter(|siots| siots.is_outstanding())
                .map(|siots| {
                    siots.mark_aborted();
                    siots.id()
                }).collect::<Vec<_>>();
            (request, active)
        };
        debug!(siots = active.len(), ?request, "aborting");
        if let Some(r) = request {
            if let Err(e) = self.shared.memory.abort_request(r) {
                error!(iots = self.shared.id, request = r, error = ?e,
                    "cannot abort memory request");
            }
        }
        for id in active {
            self.shared.executor.abort(id);
        }
        self.shared.wake();
    }

    /// Report that a SIOTS has finished.
    ///
    /// Returns the number of SIOTS still outstanding.
    pub fn siots_complete(&self, siots: SiotsId, status: BlockStatus,
                          qualifier: BlockQualifier,
                          failed_positions: PositionBitmask) -> Result<u32>
    {
        let outstanding = {
            let mut guard = self.shared.lock();
            let s = &mut *guard;
            let Some(entry) = s.siots_queue.iter_mut()
                .find(|x| x.id() == siots)
            else {
                error!(iots = self.shared.id, siots,
                    "completion for an unknown siots");
                return Err(Error::GenericFailure);
            };
            invariant!(entry.is_outstanding() && s.outstanding > 0,
                iots = self.shared.id, siots, outstanding = s.outstanding,
                "completion for a siots that is not outstanding");
            entry.complete(status, qualifier, failed_positions);
            if status != BlockStatus::Success && s.first_error.is_none() {
                s.first_error = Some((status, qualifier));
            }
            s.outstanding -= 1;
            s.outstanding
        };
        trace!(iots = self.shared.id, siots, ?status, outstanding,
            "siots complete");
        self.shared.wake();
        Ok(outstanding)
    }

    /// Attach a SIOTS started on behalf of an outstanding one
    pub fn nest_siots(&self, parent: SiotsId, mut child: Siots,
                      opcode: Opcode) -> Result<()>
    {
        let mut s = self.shared.lock();
        match s.siots_queue.iter_mut().find(|x| x.id() == parent) {
            Some(p) if p.is_outstanding() => {
                child.activate(opcode, p.lba(), p.blocks());
                p.push_nested(child);
                Ok(())
            }
            _ => {
                error!(iots = self.shared.id, parent,
                    "nesting under a siots that is not outstanding");
                Err(Error::GenericFailure)
            }
        }
    }

    /// Stop generating new SIOTS
    pub fn mark_quiesced(&self) {
        self.shared.lock().flags.set_quiesce(true);
    }

    /// Resume generating SIOTS.  Wakes the IOTS if the quiesce stopped it.
    pub fn mark_unquiesced(&self) {
        let was_quiesced = {
            let mut s = self.shared.lock();
            s.flags.set_quiesce(false);
            let was = s.flags.was_quiesced();
            s.flags.set_was_quiesced(false);
            was
        };
        if was_quiesced {
            self.shared.wake();
        }
    }

    pub fn flags(&self) -> IotsFlags {
        self.shared.lock().flags
    }

    pub fn outstanding_requests(&self) -> u32 {
        self.shared.lock().outstanding
    }

    pub fn get_failed_io_pos_bitmap(&self) -> PositionBitmask {
        self.shared.lock().siots_queue.iter()
            .fold(PositionBitmask::EMPTY, |acc, s| acc | s.failed_positions())
    }

    /// Completion of a deferred allocation
    fn memory_allocated(&self, result: Result<Vec<Siots>>) {
        let (to_free, wake) = {
            let mut s = self.shared.lock();
            s.flags.set_waiting_for_memory(false);
            s.memory_request = None;
            let aborted = s.flags.is_aborted();
            let to_free = match result {
                Ok(v) if aborted => v,
                Ok(v) if v.is_empty() => {
                    error!(iots = self.shared.id,
                        "deferred siots allocation delivered nothing");
                    s.memory_failed = true;
                    v
                }
                Ok(v) => {
                    s.available.extend(v);
                    Vec::new()
                }
                Err(e) => {
                    if !aborted {
                        error!(iots = self.shared.id, error = ?e,
                            "deferred siots allocation failed");
                        s.memory_failed = true;
                    }
                    Vec::new()
                }
            };
            s.flags.set_allocating_siots(false);
            // A quiesced IOTS is woken when it is unquiesced
            let wake = if s.flags.quiesce() {
                s.flags.set_was_quiesced(true);
                false
            } else {
                true
            };
            (to_free, wake)
        };
        if !to_free.is_empty() {
            self.shared.memory.free_siots(to_free);
        }
        if wake {
            self.shared.wake();
        }
    }
}

impl Iots {
    /// Register the function that is called whenever this IOTS should run
    pub fn set_waker(&self, waker: Waker) {
        self.shared.lock().waker = Some(waker);
    }

    /// Start processing the current piece.  `callback` is invoked exactly
    /// once, when the piece completes.
    #[instrument(skip(self, callback), fields(iots = self.id))]
    pub fn start(&mut self, callback: IotsCallback) -> StateStatus {
        self.callback = Some(callback);
        self.shared.lock().flags.set_generating_siots(true);
        self.status = IotsStatus::AtLibrary;
        self.state = IotsState::GenerateSiots;
        self.run()
    }

    /// Resume an IOTS that was handed back to its owner, for example after a
    /// quiesce.
    pub fn restart(&mut self) -> StateStatus {
        self.status = IotsStatus::AtLibrary;
        self.run()
    }

    /// Run states until one of them waits or finishes
    #[instrument(skip(self), fields(iots = self.id))]
    pub fn run(&mut self) -> StateStatus {
        loop {
            let status = self.dispatch();
            if status != StateStatus::Executing {
                return status;
            }
        }
    }

    fn dispatch(&mut self) -> StateStatus {
        trace!(state = ?self.state);
        match self.state {
            IotsState::GenerateSiots => self.state_generate_siots(),
            IotsState::CompleteIots => self.state_complete(),
            IotsState::UnexpectedError => self.state_unexpected_error(),
            IotsState::Freed => {
                panic!("iots {} dispatched after it was freed", self.id)
            }
        }
    }

    fn state_generate_siots(&mut self) -> StateStatus {
        let shared = self.shared.clone();
        let mut s = shared.lock();
        if s.flags.is_aborted() {
            if s.outstanding > 0 {
                return StateStatus::Waiting;
            }
            s.flags.set_generating_siots(false);
            drop(s);
            debug!(iots = self.id, "aborted");
            self.set_block_operation_status(BlockStatus::RequestAborted,
                                            BlockQualifier::ClientAborted);
            self.mark_complete();
            return StateStatus::Executing;
        }
        if s.memory_failed {
            s.memory_failed = false;
            s.flags.set_generating_siots(false);
            drop(s);
            self.set_unexpected_error("siots allocation failed");
            return StateStatus::Executing;
        }
        if s.flags.quiesce() {
            s.flags.set_was_quiesced(true);
            return StateStatus::Waiting;
        }
        if s.flags.allocating_siots() {
            return StateStatus::Waiting;
        }
        if self.blocks_remaining == 0 {
            if s.outstanding > 0 {
                return StateStatus::Waiting;
            }
            s.flags.set_generating_siots(false);
            let result = s.first_error
                .unwrap_or((BlockStatus::Success, BlockQualifier::None));
            drop(s);
            self.blocks_transferred = self.blocks;
            self.set_block_operation_status(result.0, result.1);
            self.mark_complete();
            return StateStatus::Executing;
        }

        let siots = if !s.flags.embedded_siots_in_use() &&
            self.embedded.is_some()
        {
            s.flags.set_embedded_siots_in_use(true);
            self.embedded.take()
        } else {
            self.activate_available_siots(&mut s)
        };
        let Some(siots) = siots else {
            drop(s);
            return self.allocate_siots();
        };
        let request = self.start_siots(&mut s, siots);
        drop(s);
        trace!(iots = self.id, siots = request.id, lba = request.lba,
            blocks = request.blocks, "starting siots");
        self.ctx.executor.start(request);
        StateStatus::Waiting
    }

    /// Take the next SIOTS from the available queue
    fn activate_available_siots(&self, s: &mut SharedState) -> Option<Siots> {
        s.available.pop_front()
    }

    /// Give a SIOTS the next slice of the current piece and queue it
    fn start_siots(&mut self, s: &mut SharedState, mut siots: Siots)
        -> SiotsRequest
    {
        let per_siots = self.siots_sizing()
            .map(|(per_siots, _)| per_siots)
            .unwrap_or(self.blocks_remaining);
        let blocks = self.blocks_remaining.min(per_siots);
        siots.activate(self.current_opcode, self.current_lba, blocks);
        let request = SiotsRequest {
            id: siots.id(),
            opcode: self.current_opcode,
            lba: self.current_lba,
            blocks,
            iots: self.control(),
        };
        self.current_lba += blocks;
        self.blocks_remaining -= blocks;
        s.outstanding += 1;
        s.siots_queue.push_back(siots);
        request
    }

    /// Ask the memory service for more SIOTS
    fn allocate_siots(&mut self) -> StateStatus {
        let consumed = self.flags().siots_consumed();
        let count = if consumed {
            1
        } else {
            self.determine_num_siots_to_allocate()
        };
        if count == 0 {
            self.set_unexpected_error("cannot size siots allocation");
            return StateStatus::Executing;
        }
        {
            let mut s = self.shared.lock();
            s.flags.set_allocating_siots(true);
            s.flags.set_waiting_for_memory(true);
            s.flags.set_siots_consumed(true);
        }
        let control = self.control();
        let on_ready = Box::new(move |r: Result<Vec<Siots>>| {
            control.memory_allocated(r)
        });
        match self.ctx.memory.allocate_siots(count as usize, on_ready) {
            AllocationStatus::Immediate(v) if v.is_empty() => {
                self.process_allocated_siots(v);
                self.set_unexpected_error("siots allocation returned nothing");
                StateStatus::Executing
            }
            AllocationStatus::Immediate(v) => {
                self.process_allocated_siots(v);
                StateStatus::Executing
            }
            AllocationStatus::Pending(request) => {
                let abort_now = {
                    let mut s = self.shared.lock();
                    if !s.flags.waiting_for_memory() {
                        // Already delivered
                        false
                    } else if s.flags.is_aborted() {
                        true
                    } else {
                        s.memory_request = Some(request);
                        false
                    }
                };
                if abort_now {
                    if let Err(e) = self.ctx.memory.abort_request(request) {
                        error!(iots = self.id, request, error = ?e,
                            "cannot abort memory request");
                    }
                }
                StateStatus::Waiting
            }
            AllocationStatus::Failed => {
                {
                    let mut s = self.shared.lock();
                    s.flags.set_allocating_siots(false);
                    s.flags.set_waiting_for_memory(false);
                }
                self.set_unexpected_error("siots allocation failed");
                StateStatus::Executing
            }
        }
    }

    /// Make freshly allocated SIOTS available for generation
    pub fn process_allocated_siots(&mut self, siots: Vec<Siots>) {
        let mut s = self.shared.lock();
        s.flags.set_waiting_for_memory(false);
        s.available.extend(siots);
        s.flags.set_allocating_siots(false);
    }

    /// Most blocks one SIOTS may carry, and how many spare SIOTS to allow
    /// for splits.  None if the request is too large to size.
    fn siots_sizing(&self) -> Option<(BlockCount, u64)> {
        let g = &self.ctx.geometry;
        let limit = match g.max_blocks_per_drive() {
            0 => DEFAULT_MAX_BLOCKS_PER_DRIVE,
            n => n
        };
        let es = match g.element_size() {
            0 => BlockCount::from(SECTORS_PER_ELEMENT),
            n => BlockCount::from(n)
        };
        let epp = match g.elements_per_parity() {
            0 => 1,
            n => BlockCount::from(n)
        };
        let mut extra = 1;
        let per_drive = match g.class() {
            RaidClass::Parity | RaidClass::Striper => {
                if !self.chunk_info[0].needs_rebuild_bits.is_empty() {
                    extra += 2;
                }
                if es > BlockCount::from(SECTORS_PER_ELEMENT) {
                    extra += 1;
                }
                if self.current_opcode.is_buffered() {
                    es
                } else {
                    limit.min(es)
                }
            }
            _ => limit
        };
        if g.needs_alignment() {
            extra += 1;
        }
        let dd = BlockCount::from(g.data_disks().ok()?);
        if dd == 0 {
            return None;
        }
        let most = u64::from(u32::MAX);
        if self.blocks_remaining / per_drive + extra > most ||
            self.blocks_remaining / dd / per_drive + extra > most
        {
            error!(iots = self.id, blocks_remaining = self.blocks_remaining,
                "request is too large to split");
            return None;
        }
        let per_siots = if self.is_background_request() {
            if g.is_parity_type() {
                (es * epp).min(limit)
            } else {
                // Each physical block is a strip across the whole group
                limit
            }
        } else {
            per_drive.checked_mul(dd)?
        };
        Some((per_siots, extra))
    }

    /// Estimate how many SIOTS the current piece needs.  Zero means that it
    /// cannot be split.
    pub fn determine_num_siots_to_allocate(&self) -> u32 {
        match self.siots_sizing() {
            Some((per_siots, extra)) => {
                let n = self.blocks_remaining / per_siots + extra;
                u32::try_from(n).unwrap_or(0)
            }
            None => 0
        }
    }

    fn state_complete(&mut self) -> StateStatus {
        if self.shared.lock().outstanding > 0 {
            return StateStatus::Waiting;
        }
        let request_complete = self.is_request_complete();
        let completion = IotsCompletion {
            id: self.id,
            lba: self.lba,
            blocks: self.blocks,
            status: self.op.status,
            qualifier: self.op.qualifier,
            request_complete,
        };
        if let Some(callback) = self.callback.take() {
            debug!(iots = self.id, status = ?completion.status,
                request_complete, "iots complete");
            callback(completion);
        }
        StateStatus::Done
    }

    fn state_unexpected_error(&mut self) -> StateStatus {
        self.set_block_operation_status(BlockStatus::InvalidRequest,
                                        BlockQualifier::UnexpectedError);
        if self.shared.lock().outstanding > 0 {
            return StateStatus::Waiting;
        }
        self.mark_complete();
        StateStatus::Executing
    }

    pub fn mark_complete(&mut self) {
        self.status = IotsStatus::Complete;
        self.state = IotsState::CompleteIots;
        self.shared.lock().flags.set_status_sent(true);
    }

    /// Fail the current piece.  Fatal if so configured.
    pub fn set_unexpected_error(&mut self, reason: &str) {
        error!(iots = self.id, lba = self.lba, blocks = self.blocks,
            blocks_remaining = self.blocks_remaining, flags = ?self.flags(),
            status = ?self.status, reason, "unexpected error");
        if panic_on_unexpected_error() {
            panic!("unexpected error in iots {}: {}", self.id, reason);
        }
        self.state = IotsState::UnexpectedError;
    }

    /// Park the IOTS in `state` until it is restarted
    pub fn transition_quiesced(&mut self, state: IotsState) {
        self.state = state;
        self.status = IotsStatus::NotStartedToLibrary;
        self.control().mark_quiesced();
    }

    /// Abort this IOTS and everything it has started
    pub fn abort(&self) {
        self.control().abort()
    }

    /// The caller has upgraded its stripe lock.  Restart the SIOTS that
    /// asked for it.
    pub fn lock_upgrade_complete(&mut self) -> Result<()> {
        let request = {
            let s = self.shared.lock();
            let Some(head) = s.siots_queue.front() else {
                error!(iots = self.id, "lock upgrade with no siots");
                return Err(Error::GenericFailure);
            };
            let target = head.nested().first().unwrap_or(head);
            SiotsRequest {
                id: target.id(),
                opcode: target.opcode().unwrap_or(self.current_opcode),
                lba: target.lba(),
                blocks: target.blocks(),
                iots: self.control(),
            }
        };
        self.status = IotsStatus::AtLibrary;
        self.ctx.executor.start(request);
        Ok(())
    }

    /// Range to lock physically when upgrading to a full-chunk lock
    pub fn get_upgraded_lock_range(&self, chunk_size: ChunkSize)
        -> Result<(u64, u64)>
    {
        let (lba, blocks) = self.get_chunk_lba_blocks(self.packet_lba,
                                                      self.packet_blocks,
                                                      chunk_size)?;
        self.ctx.geometry.calculate_lock_range_physical(lba, blocks)
    }
}

// LCOV_EXCL_STOP
