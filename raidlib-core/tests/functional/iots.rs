// vim: tw=80
//! IOTS driven end to end, with a real SIOTS pool and a queueing executor
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
        Arc,
        Mutex
    },
    thread,
    time::Duration
};

use pretty_assertions::assert_eq;

use raidlib_core::{
    iots::{Iots, IotsCompletion, IotsContext, Packet, StateStatus},
    opcode::{BlockOperation, BlockQualifier, BlockStatus, Opcode},
    position::PositionBitmask,
    raid::{RaidClass, RaidGeometry, RaidType, DEFAULT_CHUNK_SIZE},
    siots::{SiotsExecutor, SiotsId, SiotsPool, SiotsRequest},
    Error,
    LbaT,
};

struct IdlePacket;

impl Packet for IdlePacket {
    fn is_expired(&self) -> bool {
        false
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Holds started SIOTS until the test completes them.  Aborted SIOTS are
/// completed right away.
#[derive(Default)]
struct QueueExecutor {
    queue: Mutex<VecDeque<SiotsRequest>>,
    started: AtomicUsize,
}

impl QueueExecutor {
    fn pop(&self) -> Option<SiotsRequest> {
        self.queue.lock().unwrap().pop_front()
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }
}

impl SiotsExecutor for QueueExecutor {
    fn start(&self, request: SiotsRequest) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().unwrap().push_back(request);
    }

    fn abort(&self, siots: SiotsId) {
        let request = {
            let mut q = self.queue.lock().unwrap();
            let i = q.iter().position(|r| r.id == siots);
            i.and_then(|i| q.remove(i))
        };
        if let Some(r) = request {
            r.iots.siots_complete(r.id, BlockStatus::RequestAborted,
                                  BlockQualifier::ClientAborted,
                                  PositionBitmask::EMPTY).unwrap();
        }
    }
}

type Completions = Arc<Mutex<Vec<IotsCompletion>>>;

fn raid5() -> Arc<RaidGeometry> {
    let mut g = RaidGeometry::new(0x30, RaidClass::Parity);
    g.set_configuration(5, RaidType::Raid5, 128, 8, 0x40_0000, 0x800)
        .unwrap();
    g.set_block_sizes(520, 520, 1).unwrap();
    g.set_metadata_configuration(0x3f_0000, 0x1_0000, 0x8000, 0x10_0000)
        .unwrap();
    Arc::new(g)
}

struct Harness {
    iots: Iots,
    executor: Arc<QueueExecutor>,
    completions: Completions,
    wakes: Arc<AtomicUsize>,
}

impl Harness {
    fn new(pool: &Arc<SiotsPool>, opcode: Opcode, lba: LbaT, blocks: u64)
        -> Self
    {
        let executor = Arc::new(QueueExecutor::default());
        let ctx = IotsContext {
            geometry: raid5(),
            packet: Arc::new(IdlePacket),
            memory: pool.clone(),
            executor: executor.clone(),
        };
        let iots = Iots::new(ctx, BlockOperation::new(opcode, lba, blocks));
        let wakes = Arc::new(AtomicUsize::new(0));
        let wakes2 = wakes.clone();
        iots.set_waker(Arc::new(move || {
            wakes2.fetch_add(1, Ordering::Relaxed);
        }));
        Harness {
            iots,
            executor,
            completions: Completions::default(),
            wakes,
        }
    }

    fn start(&mut self) -> StateStatus {
        let completions = self.completions.clone();
        self.iots.start(Box::new(move |c: IotsCompletion| {
            completions.lock().unwrap().push(c);
        }))
    }

    /// Complete one started SIOTS and let the IOTS react
    fn step(&mut self, status: BlockStatus) -> Option<StateStatus> {
        let r = self.executor.pop()?;
        let qualifier = if status == BlockStatus::Success {
            BlockQualifier::None
        } else {
            BlockQualifier::Retryable
        };
        r.iots.siots_complete(r.id, status, qualifier, PositionBitmask::EMPTY)
            .unwrap();
        Some(self.iots.run())
    }

    /// Complete started SIOTS until none are left
    fn drain(&mut self) -> StateStatus {
        let mut last = StateStatus::Waiting;
        while let Some(s) = self.step(BlockStatus::Success) {
            last = s;
        }
        last
    }

    fn last_completion(&self) -> IotsCompletion {
        *self.completions.lock().unwrap().last().unwrap()
    }
}

/// A host write too large for one pass is processed in chunk-limited pieces,
/// reusing the same IOTS.
#[test_log::test]
fn multi_piece_write() {
    let pool = Arc::new(SiotsPool::new(64));
    let mut h = Harness::new(&pool, Opcode::Write, 0, 0x2_0000);
    let mut pieces = Vec::new();
    h.iots.determine_next_blocks(DEFAULT_CHUNK_SIZE).unwrap();
    loop {
        assert_eq!(h.start(), StateStatus::Waiting);
        assert_eq!(h.drain(), StateStatus::Done);
        let c = h.last_completion();
        assert_eq!(c.status, BlockStatus::Success);
        pieces.push((c.lba, c.blocks));
        if c.request_complete {
            break;
        }
        h.iots.init_for_next_lba().unwrap();
        h.iots.determine_next_blocks(DEFAULT_CHUNK_SIZE).unwrap();
    }
    assert_eq!(pieces, vec![(0, 0x8000), (0x8000, 0x8000), (0x1_0000, 0x8000),
                            (0x1_8000, 0x8000)]);
    // 512 blocks apiece
    assert_eq!(h.executor.started(), 4 * 64);
    assert_eq!(h.iots.host_start_offset(), 0x1_8000);
    assert_eq!(h.iots.init_for_next_lba(), Err(Error::ExceedsExtent));
    h.iots.destroy().unwrap();
    assert_eq!(pool.available(), 64);
}

/// IOTS that share an exhausted pool receive their SIOTS in arrival order
#[test_log::test]
fn pool_fifo() {
    let pool = Arc::new(SiotsPool::new(3));
    let mut h = (0..3)
        .map(|i| Harness::new(&pool, Opcode::Write, i * 0x1000, 2000))
        .collect::<Vec<_>>();

    // Each IOTS starts its embedded SIOTS first
    for x in h.iter_mut() {
        assert_eq!(x.start(), StateStatus::Waiting);
    }
    // The first needs three more, which exhausts the pool
    assert_eq!(h[0].step(BlockStatus::Success), Some(StateStatus::Waiting));
    assert_eq!(pool.available(), 0);
    assert_eq!(h[1].step(BlockStatus::Success), Some(StateStatus::Waiting));
    assert_eq!(h[2].step(BlockStatus::Success), Some(StateStatus::Waiting));
    assert_eq!(pool.waiters(), 2);
    assert!(h[1].iots.flags().waiting_for_memory());

    assert_eq!(h[0].drain(), StateStatus::Done);
    assert_eq!(h[0].executor.started(), 4);
    let wakes = h[1].wakes.load(Ordering::Relaxed);
    h[0].iots.destroy().unwrap();
    // Only the oldest waiter is satisfied
    assert_eq!(h[1].wakes.load(Ordering::Relaxed), wakes + 1);
    assert_eq!(pool.waiters(), 1);
    assert!(h[2].iots.flags().waiting_for_memory());

    assert_eq!(h[1].iots.run(), StateStatus::Waiting);
    assert_eq!(h[1].drain(), StateStatus::Done);
    h[1].iots.destroy().unwrap();
    assert_eq!(pool.waiters(), 0);

    assert_eq!(h[2].iots.run(), StateStatus::Waiting);
    assert_eq!(h[2].drain(), StateStatus::Done);
    h[2].iots.destroy().unwrap();
    assert_eq!(pool.available(), 3);
    for x in h.iter() {
        let c = x.last_completion();
        assert_eq!(c.status, BlockStatus::Success);
        assert_eq!(c.blocks, 2000);
        assert!(c.request_complete);
    }
}

/// The first failed SIOTS determines the IOTS's status, but every SIOTS still
/// runs.
#[test]
fn media_error() {
    let pool = Arc::new(SiotsPool::new(8));
    let mut h = Harness::new(&pool, Opcode::Read, 0, 1200);
    h.start();
    assert_eq!(h.step(BlockStatus::Success), Some(StateStatus::Waiting));
    assert_eq!(h.step(BlockStatus::MediaError), Some(StateStatus::Waiting));
    assert_eq!(h.drain(), StateStatus::Done);
    assert_eq!(h.executor.started(), 3);
    let c = h.last_completion();
    assert_eq!(c.status, BlockStatus::MediaError);
    assert_eq!(c.qualifier, BlockQualifier::Retryable);
    assert!(c.request_complete);
}

/// An abort from another thread completes the IOTS once its outstanding
/// SIOTS has been reaped.
#[test_log::test]
fn abort_from_another_thread() {
    let pool = Arc::new(SiotsPool::new(8));
    let mut h = Harness::new(&pool, Opcode::Write, 0x1000, 0x1000);
    let (tx, rx) = mpsc::channel();
    h.iots.set_waker(Arc::new(move || {
        let _ = tx.send(());
    }));
    assert_eq!(h.start(), StateStatus::Waiting);
    assert_eq!(h.iots.outstanding_requests(), 1);

    let control = h.iots.control();
    thread::spawn(move || control.abort()).join().unwrap();

    loop {
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        if h.iots.run() == StateStatus::Done {
            break;
        }
    }
    let c = h.last_completion();
    assert_eq!(c.status, BlockStatus::RequestAborted);
    assert_eq!(c.qualifier, BlockQualifier::ClientAborted);
    assert!(c.request_complete);
    assert_eq!(h.executor.started(), 1);
    h.iots.destroy().unwrap();
}

/// SIOTS completions may arrive on any thread
#[test]
fn threaded_executor() {
    let pool = Arc::new(SiotsPool::new(16));
    let mut h = Harness::new(&pool, Opcode::Write, 0, 0x1800);
    let (tx, rx) = mpsc::channel();
    h.iots.set_waker(Arc::new(move || {
        let _ = tx.send(());
    }));
    assert_eq!(h.start(), StateStatus::Waiting);
    loop {
        let r = h.executor.pop().unwrap();
        thread::spawn(move || {
            r.iots.siots_complete(r.id, BlockStatus::Success,
                                  BlockQualifier::None,
                                  PositionBitmask::EMPTY).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        if h.iots.run() == StateStatus::Done {
            break;
        }
    }
    assert_eq!(h.executor.started(), 12);
    assert_eq!(h.last_completion().status, BlockStatus::Success);
    h.iots.destroy().unwrap();
    assert_eq!(pool.available(), 16);
}
