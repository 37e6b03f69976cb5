// vim: tw=80
//! I/O credit weights
//!
//! Every logical request is charged a number of credits roughly equal to the
//! number of drive I/Os it will generate.  An external admission-control pool
//! hands out the credits.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::trace;

use crate::{
    invariant,
    opcode::{BlockOperation, Opcode, Priority},
    types::*,
    util::div_roundup,
};
use super::{RaidClass, RaidGeometry};

/// Degraded parity read multiplier
pub const DEGRADED_PARITY_READ_MULTIPLIER: u32 = 2;
/// Degraded parity write multiplier
pub const DEGRADED_PARITY_WRITE_MULTIPLIER: u32 = 2;
/// Degraded mirror read multiplier
pub const DEGRADED_MIRROR_READ_MULTIPLIER: u32 = 2;
/// Degraded mirror write multiplier
pub const DEGRADED_MIRROR_WRITE_MULTIPLIER: u32 = 2;
/// No degraded request may cost more than `max_credits` divided by this.
pub const DEGRADED_CREDIT_CEILING_DIVISOR: u32 = 4;

static GLOBAL_COSTS: DegradedCostConfig = DegradedCostConfig::new();

/// Tunable multipliers applied to the weight of degraded and zeroing
/// requests.
///
/// The values are process-wide tunables.  Readers use relaxed loads and may
/// observe a stale value while a setter runs concurrently.
#[derive(Debug)]
pub struct DegradedCostConfig {
    zeroing: AtomicU32,
    degraded: AtomicU32,
    parity_read: AtomicU32,
    parity_write: AtomicU32,
    mirror_read: AtomicU32,
    mirror_write: AtomicU32,
    ceiling_divisor: AtomicU32,
}

impl DegradedCostConfig {
    pub const fn new() -> Self {
        DegradedCostConfig {
            zeroing: AtomicU32::new(0),
            degraded: AtomicU32::new(0),
            parity_read: AtomicU32::new(DEGRADED_PARITY_READ_MULTIPLIER),
            parity_write: AtomicU32::new(DEGRADED_PARITY_WRITE_MULTIPLIER),
            mirror_read: AtomicU32::new(DEGRADED_MIRROR_READ_MULTIPLIER),
            mirror_write: AtomicU32::new(DEGRADED_MIRROR_WRITE_MULTIPLIER),
            ceiling_divisor: AtomicU32::new(DEGRADED_CREDIT_CEILING_DIVISOR),
        }
    }

    /// The process-wide instance, used when a request doesn't supply its own
    pub fn global() -> &'static DegradedCostConfig {
        &GLOBAL_COSTS
    }

    /// Copy every value from `other`
    pub fn assign(&self, other: &DegradedCostConfig) {
        self.set_zeroing_multiplier(other.zeroing_multiplier());
        self.set_degraded_multiplier(other.degraded_multiplier());
        self.set_parity_read_multiplier(other.parity_read_multiplier());
        self.set_parity_write_multiplier(other.parity_write_multiplier());
        self.set_mirror_read_multiplier(other.mirror_read_multiplier());
        self.set_mirror_write_multiplier(other.mirror_write_multiplier());
        self.set_ceiling_divisor(other.ceiling_divisor());
    }

    /// Most credits a degraded request may cost.  A zero divisor is treated
    /// as one.
    pub fn ceiling(&self, max_credits: u32) -> u32 {
        max_credits / self.ceiling_divisor().max(1)
    }

    pub fn ceiling_divisor(&self) -> u32 {
        self.ceiling_divisor.load(Ordering::Relaxed)
    }

    pub fn degraded_multiplier(&self) -> u32 {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn mirror_read_multiplier(&self) -> u32 {
        self.mirror_read.load(Ordering::Relaxed)
    }

    pub fn mirror_write_multiplier(&self) -> u32 {
        self.mirror_write.load(Ordering::Relaxed)
    }

    pub fn parity_read_multiplier(&self) -> u32 {
        self.parity_read.load(Ordering::Relaxed)
    }

    pub fn parity_write_multiplier(&self) -> u32 {
        self.parity_write.load(Ordering::Relaxed)
    }

    pub fn zeroing_multiplier(&self) -> u32 {
        self.zeroing.load(Ordering::Relaxed)
    }

    pub fn set_ceiling_divisor(&self, divisor: u32) {
        self.ceiling_divisor.store(divisor, Ordering::Relaxed);
    }

    pub fn set_degraded_multiplier(&self, m: u32) {
        self.degraded.store(m, Ordering::Relaxed);
    }

    pub fn set_mirror_read_multiplier(&self, m: u32) {
        self.mirror_read.store(m, Ordering::Relaxed);
    }

    pub fn set_mirror_write_multiplier(&self, m: u32) {
        self.mirror_write.store(m, Ordering::Relaxed);
    }

    pub fn set_parity_read_multiplier(&self, m: u32) {
        self.parity_read.store(m, Ordering::Relaxed);
    }

    pub fn set_parity_write_multiplier(&self, m: u32) {
        self.parity_write.store(m, Ordering::Relaxed);
    }

    pub fn set_zeroing_multiplier(&self, m: u32) {
        self.zeroing.store(m, Ordering::Relaxed);
    }
}

impl Default for DegradedCostConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to price one logical request
#[derive(Clone, Copy, Debug)]
pub struct IoCostRequest<'a> {
    pub op: &'a BlockOperation,
    /// The range is being zeroed in the background
    pub is_zeroing: bool,
    pub is_degraded: bool,
    pub priority: Priority,
    /// Size of the credit pool
    pub max_credits: u32,
    pub costs: &'a DegradedCostConfig,
}

impl<'a> IoCostRequest<'a> {
    /// A healthy, non-zeroing request priced with the global multipliers
    pub fn new(op: &'a BlockOperation, priority: Priority, max_credits: u32)
        -> Self
    {
        IoCostRequest {
            op,
            is_zeroing: false,
            is_degraded: false,
            priority,
            max_credits,
            costs: DegradedCostConfig::global(),
        }
    }

    pub fn costs(mut self, costs: &'a DegradedCostConfig) -> Self {
        self.costs = costs;
        self
    }

    pub fn degraded(mut self, is_degraded: bool) -> Self {
        self.is_degraded = is_degraded;
        self
    }

    pub fn zeroing(mut self, is_zeroing: bool) -> Self {
        self.is_zeroing = is_zeroing;
        self
    }
}

fn to_weight(x: u64) -> u32 {
    u32::try_from(x).unwrap_or(u32::MAX)
}

/// Number of elements spanned by `[lba, lba + blocks)`
fn elements_spanned(lba: LbaT, blocks: BlockCount, es: u64) -> u64 {
    (lba + blocks - 1) / es - lba / es + 1
}

impl RaidGeometry {
    /// Do degraded multipliers apply to this request?
    fn degraded_penalty_applies(&self, req: &IoCostRequest) -> bool {
        req.is_degraded &&
            req.priority == Priority::Normal &&
            !self.flags().mirror_sequential_disabled()
    }

    /// Credits for a request to a parity raid group
    pub fn calc_parity_disk_ios(&self, req: &IoCostRequest) -> Result<u32> {
        let costs = req.costs;
        let op = req.op;
        let lba = op.lba;
        let block_count = op.block_count;
        let width = u64::from(self.width());
        let dd = u64::from(self.data_disks()?);
        let es = u64::from(self.element_size());
        let epp = u64::from(self.elements_per_parity());
        let stripe_size = dd * es;
        let penalize = self.degraded_penalty_applies(req);
        let mut multiplier = 1u32;

        if matches!(op.opcode, Opcode::Read | Opcode::Write |
                    Opcode::EncryptionRekeyWrite |
                    Opcode::EncryptionRekeyWriteZeros |
                    Opcode::EncryptionRekeyZero | Opcode::VerifyWrite |
                    Opcode::WriteNonCached | Opcode::CorruptData |
                    Opcode::Zero | Opcode::WriteZeros)
        {
            invariant!(es > 0 && block_count > 0,
                object_id = self.object_id(), es, block_count,
                "cannot price an empty request");
        }

        let weight = match op.opcode {
            Opcode::Read => {
                if req.is_zeroing {
                    multiplier += costs.zeroing_multiplier();
                }
                if penalize {
                    multiplier += costs.parity_read_multiplier();
                }
                if block_count <= es {
                    // Small read
                    multiplier
                } else {
                    let drives_touched = if block_count / es < dd {
                        elements_spanned(lba, block_count, es)
                    } else {
                        dd
                    };
                    let mut w = to_weight(drives_touched *
                                          u64::from(multiplier));
                    if multiplier > 1 && penalize {
                        w = w.min(costs.ceiling(req.max_credits));
                    }
                    w
                }
            }
            Opcode::Write | Opcode::EncryptionRekeyWrite |
                Opcode::EncryptionRekeyWriteZeros |
                Opcode::EncryptionRekeyZero if self.is_vault() => 0,
            Opcode::Write | Opcode::EncryptionRekeyWrite |
                Opcode::EncryptionRekeyWriteZeros |
                Opcode::EncryptionRekeyZero | Opcode::VerifyWrite |
                Opcode::WriteNonCached | Opcode::CorruptData |
                Opcode::Zero | Opcode::WriteZeros =>
            {
                let pd = u64::from(self.parity_disks()?);
                let mut drives_touched = if block_count < stripe_size {
                    elements_spanned(lba, block_count, es) + pd
                } else {
                    width
                };
                if req.is_degraded {
                    if self.is_write_logging_enabled() {
                        // Journaled writes are split at stripe boundaries.
                        multiplier += costs.degraded_multiplier();
                        if penalize {
                            multiplier += costs.parity_write_multiplier();
                        }
                        let offset = lba % stripe_size;
                        let mut front = 0;
                        let mut end = 0;
                        if offset != 0 || block_count < stripe_size {
                            front = block_count.min(stripe_size - offset);
                        }
                        if (lba + block_count) % stripe_size != 0 &&
                            lba / stripe_size !=
                                (lba + block_count) / stripe_size
                        {
                            end = (lba + block_count) % stripe_size;
                        }
                        let mid = block_count - (front + end);
                        drives_touched = 0;
                        if front > 0 {
                            drives_touched +=
                                elements_spanned(lba, front, es) + pd;
                        }
                        if end > 0 {
                            drives_touched += (end - 1) / es + 1 + pd;
                        }
                        if mid > 0 {
                            drives_touched += width;
                        }
                    }
                } else if req.is_zeroing {
                    multiplier += costs.zeroing_multiplier();
                }
                let mut w = to_weight(drives_touched * u64::from(multiplier));
                if multiplier > 1 && penalize {
                    w = w.min(costs.ceiling(req.max_credits));
                }
                w
            }
            op if op.is_verify_or_rebuild() => {
                // One set of drive I/Os per parity stripe
                invariant!(es * epp > 0, object_id = self.object_id(), es, epp,
                    "verify of a geometry without parity stripes");
                to_weight((block_count / (es * epp)) * width)
            }
            // One read and one write
            Opcode::EncryptionReadPaged => 2,
            // Initiate requests take the non-paged lock.  Background
            // operations holding that lock may be waiting for credits, so
            // these must never wait for credits themselves.
            op if op.is_initiate() => 0,
            _ => 0
        };
        trace!(object_id = self.object_id(), opcode = %op.opcode, lba,
            block_count, weight, "parity disk ios");
        Ok(weight)
    }

    /// Credits for a request to a mirror
    pub fn calc_mirror_disk_ios(&self, req: &IoCostRequest) -> Result<u32> {
        let costs = req.costs;
        let width = self.width();
        let penalize = self.degraded_penalty_applies(req);
        let penalized = |weight: u32, multiplier: u32| {
            if multiplier != 0 && penalize {
                weight.saturating_mul(multiplier)
                    .min(costs.ceiling(req.max_credits))
            } else {
                weight
            }
        };
        let weight = match req.op.opcode {
            // One side of the mirror
            Opcode::Read => penalized(1, costs.mirror_read_multiplier()),
            // Every side of the mirror
            Opcode::Write | Opcode::VerifyWrite | Opcode::WriteNonCached |
                Opcode::CorruptData | Opcode::Zero |
                Opcode::EncryptionRekeyWrite |
                Opcode::EncryptionRekeyWriteZeros | Opcode::WriteZeros |
                Opcode::EncryptionRekeyZero =>
            {
                penalized(width, costs.mirror_write_multiplier())
            }
            op if op.is_verify_or_rebuild() => width,
            Opcode::EncryptionReadPaged => 2,
            op if op.is_initiate() => 0,
            _ => 0
        };
        Ok(weight)
    }

    /// Credits for a request to a striper.  RAID10 writes count both sides
    /// of each mirror.
    pub fn calc_striper_disk_ios(&self, req: &IoCostRequest) -> Result<u32> {
        let width = u64::from(self.width());
        let es = u64::from(self.element_size());
        let block_count = req.op.block_count;
        let stripe_size = width * es;
        if es == 0 {
            return Err(Error::NotInitialized);
        }
        let weight = match req.op.opcode {
            Opcode::Read => {
                let drives_touched = if block_count <= es {
                    1
                } else if block_count / es < width {
                    div_roundup(block_count, es)
                } else {
                    width
                };
                to_weight(drives_touched)
            }
            Opcode::Write | Opcode::VerifyWrite | Opcode::WriteNonCached |
                Opcode::CorruptData | Opcode::Zero |
                Opcode::EncryptionRekeyWrite |
                Opcode::EncryptionRekeyWriteZeros | Opcode::WriteZeros |
                Opcode::EncryptionRekeyZero =>
            {
                let drives_touched = if block_count < stripe_size {
                    div_roundup(block_count, es)
                } else {
                    width
                };
                let w = to_weight(drives_touched);
                if self.is_raid10() { w.saturating_mul(2) } else { w }
            }
            op if op.is_verify_or_rebuild() => to_weight(width),
            _ => 0
        };
        Ok(weight)
    }

    /// Credits for a request, using the formula of this geometry's class
    pub fn disk_io_weight(&self, req: &IoCostRequest) -> Result<u32> {
        match self.class() {
            RaidClass::Parity => self.calc_parity_disk_ios(req),
            RaidClass::Striper => self.calc_striper_disk_ios(req),
            RaidClass::Mirror | RaidClass::VirtualDrive |
                RaidClass::ProvisionDrive => self.calc_mirror_disk_ios(req),
        }
    }
}

// LCOV_EXCL_STOP
