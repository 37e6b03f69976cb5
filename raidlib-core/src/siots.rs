// vim: tw=80
//! Sub-I/O tracking structures
//!
//! A SIOTS is one physically executable piece of an IOTS.  The library only
//! manages its lifecycle: where it comes from, which range it covers, and
//! when it goes back.  Executing it is somebody else's job.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
        MutexGuard,
        PoisonError
    }
};

use fixedbitset::FixedBitSet;
#[cfg(test)] use mockall::automock;
use tracing::{debug, error, warn};

use crate::{
    iots::IotsControl,
    opcode::{BlockQualifier, BlockStatus, Opcode},
    position::PositionBitmask,
    types::*,
};

/// Uniquely identifies a SIOTS for the life of the process
pub type SiotsId = u64;

/// Identifies a deferred allocation
pub type MemoryRequestId = u64;

static NEXT_SIOTS_ID: AtomicU64 = AtomicU64::new(1);

/// Where a SIOTS's storage came from
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SiotsHandle {
    /// Carried by the IOTS itself.  Each IOTS has exactly one.
    Embedded,
    /// A slot of a `SiotsPool`
    Pooled(usize),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SiotsState {
    /// Allocated, but not yet given a range
    Available,
    /// Handed to the executor
    Active,
    /// Aborted while active.  Still outstanding until it completes.
    Aborted,
    Complete,
}

/// One sub-request of an IOTS
#[derive(Clone, Debug)]
pub struct Siots {
    id: SiotsId,
    handle: SiotsHandle,
    state: SiotsState,
    opcode: Option<Opcode>,
    lba: LbaT,
    blocks: BlockCount,
    status: BlockStatus,
    qualifier: BlockQualifier,
    failed_positions: PositionBitmask,
    /// SIOTS started on behalf of this one, for example for error recovery
    nested: Vec<Siots>,
}

impl Siots {
    pub fn new(handle: SiotsHandle) -> Self {
        Siots {
            id: NEXT_SIOTS_ID.fetch_add(1, Ordering::Relaxed),
            handle,
            state: SiotsState::Available,
            opcode: None,
            lba: 0,
            blocks: 0,
            status: BlockStatus::Invalid,
            qualifier: BlockQualifier::Invalid,
            failed_positions: PositionBitmask::EMPTY,
            nested: Vec::new(),
        }
    }

    pub fn embedded() -> Self {
        Siots::new(SiotsHandle::Embedded)
    }

    /// Give an available SIOTS its range
    pub(crate) fn activate(&mut self, opcode: Opcode, lba: LbaT,
                           blocks: BlockCount)
    {
        self.state = SiotsState::Active;
        self.opcode = Some(opcode);
        self.lba = lba;
        self.blocks = blocks;
        self.status = BlockStatus::Invalid;
        self.qualifier = BlockQualifier::Invalid;
        self.failed_positions = PositionBitmask::EMPTY;
        self.nested.clear();
    }

    pub(crate) fn complete(&mut self, status: BlockStatus,
                           qualifier: BlockQualifier,
                           failed_positions: PositionBitmask)
    {
        self.state = SiotsState::Complete;
        self.status = status;
        self.qualifier = qualifier;
        self.failed_positions |= failed_positions;
    }

    pub(crate) fn mark_aborted(&mut self) {
        if self.state == SiotsState::Active {
            self.state = SiotsState::Aborted;
        }
    }

    /// Return the SIOTS to its just-allocated condition
    pub(crate) fn reset(&mut self) {
        self.state = SiotsState::Available;
        self.opcode = None;
        self.lba = 0;
        self.blocks = 0;
        self.failed_positions = PositionBitmask::EMPTY;
        self.nested.clear();
    }

    pub(crate) fn push_nested(&mut self, siots: Siots) {
        self.nested.push(siots);
    }

    pub(crate) fn take_nested(&mut self) -> Vec<Siots> {
        std::mem::take(&mut self.nested)
    }

    pub fn blocks(&self) -> BlockCount {
        self.blocks
    }

    /// Positions that failed in this SIOTS or any SIOTS nested beneath it
    pub fn failed_positions(&self) -> PositionBitmask {
        self.nested.iter()
            .fold(self.failed_positions, |acc, n| acc | n.failed_positions())
    }

    pub fn handle(&self) -> SiotsHandle {
        self.handle
    }

    pub fn id(&self) -> SiotsId {
        self.id
    }

    /// Is this SIOTS still owed a completion?
    pub fn is_outstanding(&self) -> bool {
        matches!(self.state, SiotsState::Active | SiotsState::Aborted)
    }

    pub fn lba(&self) -> LbaT {
        self.lba
    }

    pub fn nested(&self) -> &[Siots] {
        &self.nested
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }

    pub fn state(&self) -> SiotsState {
        self.state
    }

    pub fn status(&self) -> (BlockStatus, BlockQualifier) {
        (self.status, self.qualifier)
    }
}

/// Everything an executor needs to run one SIOTS
#[derive(Clone)]
pub struct SiotsRequest {
    pub id: SiotsId,
    pub opcode: Opcode,
    pub lba: LbaT,
    pub blocks: BlockCount,
    /// Report completion here
    pub iots: IotsControl,
}

impl fmt::Debug for SiotsRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SiotsRequest")
            .field("id", &self.id)
            .field("opcode", &self.opcode)
            .field("lba", &self.lba)
            .field("blocks", &self.blocks)
            .finish()
    }
}

/// Invoked when a deferred allocation is satisfied or aborted
pub type MemoryCallback = Box<dyn FnOnce(Result<Vec<Siots>>) + Send>;

/// Result of asking for SIOTS
pub enum AllocationStatus {
    /// The SIOTS are available right away.  The callback was dropped.
    Immediate(Vec<Siots>),
    /// The callback will be invoked later, exactly once
    Pending(MemoryRequestId),
    /// The request can never be satisfied
    Failed,
}

impl fmt::Debug for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocationStatus::Immediate(v) =>
                write!(f, "Immediate({} siots)", v.len()),
            AllocationStatus::Pending(id) => write!(f, "Pending({id})"),
            AllocationStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// Source of SIOTS storage
#[cfg_attr(test, automock)]
pub trait MemoryService: Send + Sync {
    fn allocate_siots(&self, count: usize, on_ready: MemoryCallback)
        -> AllocationStatus;

    /// Cancel a pending allocation.  Its callback is invoked with an error.
    fn abort_request(&self, request: MemoryRequestId) -> Result<()>;

    fn free_siots(&self, siots: Vec<Siots>);
}

/// Runs SIOTS on behalf of an IOTS.
///
/// Implementations must eventually report every started SIOTS back through
/// `SiotsRequest::iots`, even when it is aborted.
#[cfg_attr(test, automock)]
pub trait SiotsExecutor: Send + Sync {
    fn start(&self, request: SiotsRequest);

    fn abort(&self, siots: SiotsId);
}

struct Waiter {
    id: MemoryRequestId,
    count: usize,
    on_ready: MemoryCallback,
}

struct PoolInner {
    /// Set bits are in use
    in_use: FixedBitSet,
    waiters: VecDeque<Waiter>,
    next_request: MemoryRequestId,
}

impl PoolInner {
    fn free_slots(&self) -> usize {
        self.in_use.len() - self.in_use.count_ones(..)
    }

    fn take(&mut self, count: usize) -> Vec<Siots> {
        let slots = (0..self.in_use.len())
            .filter(|i| !self.in_use.contains(*i))
            .take(count)
            .collect::<Vec<_>>();
        slots.into_iter()
            .map(|slot| {
                self.in_use.insert(slot);
                Siots::new(SiotsHandle::Pooled(slot))
            }).collect()
    }
}

/// A fixed-size pool of SIOTS.
///
/// Requests that cannot be satisfied right away wait in FIFO order.
pub struct SiotsPool {
    inner: Mutex<PoolInner>,
}

impl SiotsPool {
    pub fn new(capacity: usize) -> Self {
        let inner = PoolInner {
            in_use: FixedBitSet::with_capacity(capacity),
            waiters: VecDeque::new(),
            next_request: 1,
        };
        SiotsPool { inner: Mutex::new(inner) }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of SIOTS not currently allocated
    pub fn available(&self) -> usize {
        self.lock().free_slots()
    }

    pub fn capacity(&self) -> usize {
        self.lock().in_use.len()
    }

    /// Number of allocations waiting for memory
    pub fn waiters(&self) -> usize {
        self.lock().waiters.len()
    }
}

impl MemoryService for SiotsPool {
    fn allocate_siots(&self, count: usize, on_ready: MemoryCallback)
        -> AllocationStatus
    {
        let mut inner = self.lock();
        if count == 0 || count > inner.in_use.len() {
            error!(count, capacity = inner.in_use.len(),
                "siots allocation can never be satisfied");
            return AllocationStatus::Failed;
        }
        if inner.waiters.is_empty() && inner.free_slots() >= count {
            return AllocationStatus::Immediate(inner.take(count));
        }
        let id = inner.next_request;
        inner.next_request += 1;
        debug!(request = id, count, "siots allocation deferred");
        inner.waiters.push_back(Waiter{id, count, on_ready});
        AllocationStatus::Pending(id)
    }

    fn abort_request(&self, request: MemoryRequestId) -> Result<()> {
        let waiter = {
            let mut inner = self.lock();
            let pos = inner.waiters.iter().position(|w| w.id == request);
            pos.and_then(|i| inner.waiters.remove(i))
        };
        match waiter {
            Some(w) => {
                (w.on_ready)(Err(Error::AllocationFailed));
                Ok(())
            }
            None => {
                warn!(request, "abort of an unknown memory request");
                Err(Error::GenericFailure)
            }
        }
    }

    fn free_siots(&self, siots: Vec<Siots>) {
        let ready = {
            let mut inner = self.lock();
            for s in siots.iter() {
                match s.handle() {
                    SiotsHandle::Pooled(slot) if slot < inner.in_use.len() => {
                        inner.in_use.set(slot, false);
                    }
                    handle => {
                        error!(siots = s.id(), ?handle,
                            "freeing a siots that the pool does not own");
                    }
                }
            }
            let mut ready = Vec::new();
            while inner.waiters.front()
                .map(|w| w.count <= inner.free_slots())
                .unwrap_or(false)
            {
                if let Some(w) = inner.waiters.pop_front() {
                    let v = inner.take(w.count);
                    ready.push((w, v));
                }
            }
            ready
        };
        for (w, v) in ready {
            (w.on_ready)(Ok(v));
        }
    }
}

// LCOV_EXCL_STOP
