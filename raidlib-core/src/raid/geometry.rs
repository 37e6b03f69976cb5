// vim: tw=80
//! The per-raid-group geometry calculator

use bitfield::bitfield;
use tracing::{error, info, warn};

use crate::{
    position::PositionBitmask,
    types::*,
    util::{div_roundup, round_down, round_up},
};
use super::{
    stripe_range::{MAX_PARITY_EXTENTS, stripe_range},
    RaidClass,
    RaidType
};

/// Size of every exported block, in bytes
pub const BE_BYTES_PER_BLOCK: u32 = 520;

/// Size of a 4K-native drive's block, in bytes
pub const BYTES_PER_4K_BLOCK: u32 = 4160;

/// Number of 520-byte blocks in a 4K block
pub const BLOCKS_PER_4K: BlockCount = 8;

/// Largest optimal block size that a raid group must be able to transfer in
/// a single drive request
pub const MAX_OPTIMAL_BLOCK_SIZE: BlockCount = 64;

/// Blocks per element on normal raid groups
pub const SECTORS_PER_ELEMENT: ElementSize = 128;

/// Blocks per element on bandwidth-optimized raid groups
pub const SECTORS_PER_ELEMENT_BANDWIDTH: ElementSize = 1024;

/// Elements per parity stripe on normal raid groups
pub const ELEMENTS_PER_PARITY: ElementsPerParity = 8;

/// Elements per parity stripe on bandwidth-optimized raid groups
pub const ELEMENTS_PER_PARITY_BANDWIDTH: ElementsPerParity = 1;

/// Default size of a paged-metadata chunk, in blocks per drive
pub const DEFAULT_CHUNK_SIZE: ChunkSize = 2048;

/// Default size of the parity write log, in physical blocks
pub const WRITE_LOG_SIZE: BlockCount = 32 * 2048;

/// Write log slot sizing, as (slot size, slot count), for normal and
/// bandwidth element sizes
const WRITE_LOG_SLOTS_NORMAL: (u32, u32) = (1024, 64);
const WRITE_LOG_SLOTS_BANDWIDTH: (u32, u32) = (8192, 8);

const RAID0_MIN_WIDTH: u32 = 3;
const RAID0_MAX_WIDTH: u32 = 16;
const INDIVIDUAL_DISK_WIDTH: u32 = 1;
const RAID1_MIN_WIDTH: u32 = 2;
const RAID1_MAX_WIDTH: u32 = 3;
const RAID3_WIDTHS: [u32; 3] = [5, 9, 4];
const RAID5_MIN_WIDTH: u32 = 3;
const RAID5_MAX_WIDTH: u32 = 16;
const RAID6_MIN_WIDTH: u32 = 4;
const RAID6_MAX_WIDTH: u32 = 16;
const RAID10_MIN_WIDTH: u32 = 2;
const RAID10_MAX_WIDTH: u32 = 16;
const MIRROR_UNDER_STRIPER_WIDTH: u32 = 2;
const VIRTUAL_DRIVE_WIDTH: u32 = 1;

bitfield! {
    /// Lifecycle flags of a `RaidGeometry`
    #[derive(Clone, Copy, Default, Eq, PartialEq)]
    pub struct GeometryFlags(u16);
    impl Debug;
    pub initialized, set_initialized: 0;
    pub configured, set_configured: 1;
    pub block_size_valid, set_block_size_valid: 2;
    pub block_size_invalid, set_block_size_invalid: 3;
    pub metadata_configured, set_metadata_configured: 4;
    /// Degraded multipliers are disabled for sequential mirror access
    pub mirror_sequential_disabled, set_mirror_sequential_disabled: 5;
}

bitfield! {
    /// Static attributes of a raid group
    #[derive(Clone, Copy, Default, Eq, PartialEq)]
    pub struct GeometryAttributes(u16);
    impl Debug;
    /// The system vault raid group
    pub vault, set_vault: 0;
    /// Extent-pool raid groups have no fixed layout to check against
    pub extent_pool, set_extent_pool: 1;
    /// Degraded parity writes go through the journal
    pub write_logging, set_write_logging: 2;
}

/// Check that `width` is a valid member count for `raid_type`.
///
/// Widths are validated once, at configuration time.  They are never
/// clamped.
pub fn validate_width(raid_type: RaidType, width: u32) -> Result<()> {
    let ok = match raid_type {
        RaidType::Raid5 => (RAID5_MIN_WIDTH..=RAID5_MAX_WIDTH).contains(&width),
        RaidType::Raid6 => (RAID6_MIN_WIDTH..=RAID6_MAX_WIDTH).contains(&width)
            && width % 2 == 0,
        RaidType::Raid3 => RAID3_WIDTHS.contains(&width),
        RaidType::Raid0 => (RAID0_MIN_WIDTH..=RAID0_MAX_WIDTH).contains(&width)
            || width == INDIVIDUAL_DISK_WIDTH,
        RaidType::IndividualDisk => width == INDIVIDUAL_DISK_WIDTH,
        RaidType::Raid10 =>
            (RAID10_MIN_WIDTH..=RAID10_MAX_WIDTH).contains(&width) &&
            width % 2 == 0,
        RaidType::Raid1 | RaidType::RawMirror | RaidType::InternalMetadataMirror
            => (RAID1_MIN_WIDTH..=RAID1_MAX_WIDTH).contains(&width),
        RaidType::InternalMirrorUnderStriper =>
            width == MIRROR_UNDER_STRIPER_WIDTH,
        RaidType::Spare => width == VIRTUAL_DRIVE_WIDTH,
        RaidType::Unknown => {
            warn!(?raid_type, width, "raid type isn't supported");
            false
        }
    };
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidWidth)
    }
}

/// Number of data disks of a raid type at a given width.
///
/// For RAID10 `width` is the striper's own width, i.e. the number of
/// mirrored pairs.
pub fn data_disks_for(raid_type: RaidType, width: u32) -> Result<u16> {
    let w = u16::try_from(width).map_err(|_| Error::InvalidWidth)?;
    match raid_type {
        RaidType::Unknown => Err(Error::NotInitialized),
        t if t.is_mirror() => Ok(1),
        RaidType::Raid10 | RaidType::Raid0 | RaidType::IndividualDisk => Ok(w),
        RaidType::Raid3 | RaidType::Raid5 => w.checked_sub(1)
            .ok_or(Error::InvalidWidth),
        RaidType::Raid6 => w.checked_sub(2).ok_or(Error::InvalidWidth),
        _ => Err(Error::GenericFailure)
    }
}

/// Number of redundant disks of a raid type at a given width.
///
/// For RAID10 this is `width / 2`, so data plus parity does not sum to the
/// width.
pub fn parity_disks_for(raid_type: RaidType, width: u32) -> Result<u16> {
    let w = u16::try_from(width).map_err(|_| Error::InvalidWidth)?;
    match raid_type {
        RaidType::Unknown => Err(Error::NotInitialized),
        t if t.is_mirror() => w.checked_sub(1).ok_or(Error::InvalidWidth),
        RaidType::Raid10 => Ok(w / 2),
        RaidType::Raid3 | RaidType::Raid5 => Ok(1),
        RaidType::Raid0 | RaidType::IndividualDisk => Ok(0),
        RaidType::Raid6 => Ok(2),
        _ => Err(Error::GenericFailure)
    }
}

/// Choose the element size and elements per parity stripe for a new raid
/// group.
pub fn determine_element_size(raid_type: RaidType, bandwidth: bool)
    -> Result<(ElementSize, ElementsPerParity)>
{
    let element_size = if bandwidth {
        SECTORS_PER_ELEMENT_BANDWIDTH
    } else {
        SECTORS_PER_ELEMENT
    };
    match raid_type {
        RaidType::Raid5 | RaidType::Raid6 | RaidType::Raid3 => {
            let epp = if bandwidth {
                ELEMENTS_PER_PARITY_BANDWIDTH
            } else {
                ELEMENTS_PER_PARITY
            };
            Ok((element_size, epp))
        }
        RaidType::Raid0 | RaidType::Raid10 | RaidType::Raid1 |
            RaidType::InternalMirrorUnderStriper | RaidType::RawMirror =>
        {
            Ok((element_size, 0))
        }
        _ => Err(Error::GenericFailure)
    }
}

/// Round a range outward to 4K boundaries
fn align_to_4k(lba: LbaT, blocks: BlockCount) -> (LbaT, BlockCount) {
    let start = round_down(lba, BLOCKS_PER_4K);
    let end = round_up(lba + blocks, BLOCKS_PER_4K);
    (start, end - start)
}

/// Everything the library knows about the layout of one raid group.
///
/// Owned by the raid group object.  Configured once, then read-mostly.
#[derive(Clone, Debug)]
pub struct RaidGeometry {
    object_id: ObjectId,
    class: RaidClass,
    raid_type: RaidType,
    /// Member count.  For RAID10, the striper's own width.
    width: u32,
    element_size: ElementSize,
    elements_per_parity: ElementsPerParity,
    configured_capacity: LbaT,
    max_blocks_per_drive: BlockCount,
    exported_block_size: u32,
    imported_block_size: u32,
    optimal_block_size: u32,
    /// Logical (host-relative) start of the metadata region
    metadata_start_lba: LbaT,
    metadata_capacity: LbaT,
    metadata_copy_offset: LbaT,
    /// Physical (per-drive) start of the write log
    journal_log_start_lba: LbaT,
    journal_log_size: BlockCount,
    write_log_slot_size: u32,
    write_log_slot_count: u32,
    raw_mirror_offset: LbaT,
    bitmask_4k: PositionBitmask,
    flags: GeometryFlags,
    attributes: GeometryAttributes,
}

impl RaidGeometry {
    pub fn new(object_id: ObjectId, class: RaidClass) -> Self {
        let mut flags = GeometryFlags::default();
        flags.set_initialized(true);
        RaidGeometry {
            object_id,
            class,
            raid_type: RaidType::Unknown,
            width: 0,
            element_size: 0,
            elements_per_parity: 0,
            configured_capacity: 0,
            max_blocks_per_drive: 0,
            exported_block_size: BE_BYTES_PER_BLOCK,
            imported_block_size: 0,
            optimal_block_size: 0,
            metadata_start_lba: LBA_INVALID,
            metadata_capacity: 0,
            metadata_copy_offset: LBA_INVALID,
            journal_log_start_lba: LBA_INVALID,
            journal_log_size: WRITE_LOG_SIZE,
            write_log_slot_size: 0,
            write_log_slot_count: 0,
            raw_mirror_offset: 0,
            bitmask_4k: PositionBitmask::EMPTY,
            flags,
            attributes: GeometryAttributes::default(),
        }
    }

    fn validate_and_set_raid_type(&mut self, raid_type: RaidType)
        -> Result<()>
    {
        if !self.flags.initialized() || raid_type == RaidType::Unknown {
            error!(object_id = self.object_id, ?raid_type,
                "raid geometry not initialized");
            return Err(Error::NotInitialized);
        }
        if !self.class.supports(raid_type) {
            error!(object_id = self.object_id, ?raid_type, class = ?self.class,
                "raid type not supported by class");
            return Err(Error::GenericFailure);
        }
        self.raid_type = raid_type;
        Ok(())
    }

    /// Configure the raid group's layout.
    ///
    /// The CONFIGURED flag is set even on failure, so callers must check the
    /// result rather than the flags.
    pub fn set_configuration(&mut self,
                             width: u32,
                             raid_type: RaidType,
                             element_size: ElementSize,
                             elements_per_parity: ElementsPerParity,
                             configured_capacity: LbaT,
                             max_blocks_per_drive: BlockCount) -> Result<()>
    {
        self.flags.set_configured(true);
        self.validate_and_set_raid_type(raid_type)?;
        if element_size == 0 {
            error!(object_id = self.object_id, "element size is zero");
            return Err(Error::GenericFailure);
        }
        if max_blocks_per_drive < BlockCount::from(element_size) {
            error!(object_id = self.object_id, max_blocks_per_drive,
                element_size,
                "max blocks per drive is less than element size");
            return Err(Error::GenericFailure);
        }
        // The width table counts member disks, and a RAID10 striper's
        // members are mirrored pairs.
        let disks = if raid_type == RaidType::Raid10 {
            width * 2
        } else {
            width
        };
        if let Err(e) = validate_width(raid_type, disks) {
            error!(object_id = self.object_id, width, ?raid_type,
                class = ?self.class, "width isn't valid for raid type");
            return Err(e);
        }
        self.width = width;
        self.configured_capacity = configured_capacity;
        self.element_size = element_size;
        self.elements_per_parity = elements_per_parity;
        self.max_blocks_per_drive = max_blocks_per_drive;
        Ok(())
    }

    /// Set the exported, imported and optimal block sizes.
    ///
    /// The sizes are retained even when they are rejected.
    pub fn set_block_sizes(&mut self, exported: u32, imported: u32,
                           optimal: u32) -> Result<()>
    {
        self.exported_block_size = exported;
        self.imported_block_size = imported;
        self.optimal_block_size = optimal;
        if !self.flags.configured() ||
            exported != BE_BYTES_PER_BLOCK ||
            imported < 512 ||
            optimal < 1 ||
            self.max_blocks_per_drive < MAX_OPTIMAL_BLOCK_SIZE
        {
            error!(object_id = self.object_id,
                configured = self.flags.configured(), exported, imported,
                optimal, max_blocks_per_drive = self.max_blocks_per_drive,
                "invalid block size configuration");
            self.flags.set_block_size_valid(false);
            self.flags.set_block_size_invalid(true);
            return Err(Error::InvalidBlockSize);
        }
        self.flags.set_block_size_invalid(false);
        self.flags.set_block_size_valid(true);
        Ok(())
    }

    /// Configure the metadata region and, for parity types, the write log.
    pub fn set_metadata_configuration(&mut self,
                                      metadata_start_lba: LbaT,
                                      metadata_capacity: LbaT,
                                      metadata_copy_offset: LbaT,
                                      write_log_start_lba: LbaT) -> Result<()>
    {
        self.metadata_start_lba = metadata_start_lba;
        self.metadata_capacity = metadata_capacity;
        self.metadata_copy_offset = metadata_copy_offset;
        if self.is_parity_type() {
            self.journal_log_start_lba = write_log_start_lba;
            self.init_journal_write_log();
        }
        self.flags.set_metadata_configured(true);
        Ok(())
    }

    fn init_journal_write_log(&mut self) {
        let (size, count) = if self.element_size == SECTORS_PER_ELEMENT {
            WRITE_LOG_SLOTS_NORMAL
        } else {
            WRITE_LOG_SLOTS_BANDWIDTH
        };
        info!(object_id = self.object_id, slot_size = size, slot_count = count,
            "journal write log configured");
        self.write_log_slot_size = size;
        self.write_log_slot_count = count;
    }

    /// Compare a fresh set of 4K-native positions against the current one.
    ///
    /// Returns whether the block sizes must be refreshed, and which positions
    /// changed.
    pub fn should_refresh_block_sizes(&self, positions_4k: PositionBitmask)
        -> (bool, PositionBitmask)
    {
        let current = positions_4k & PositionBitmask::all(self.width);
        let update = PositionBitmask::new(current.bits() ^
                                          self.bitmask_4k.bits());
        if !update.is_empty() {
            info!(object_id = self.object_id, old = %self.bitmask_4k,
                new = %current, %update, "block size refresh needed");
        }
        (!update.is_empty(), update)
    }

    /// Record which positions are 4K-native and adjust the block sizes to
    /// match.
    pub fn refresh_block_sizes(&mut self, positions_4k: PositionBitmask)
        -> Result<()>
    {
        let current = positions_4k & PositionBitmask::all(self.width);
        let orig = self.bitmask_4k;
        self.bitmask_4k = current;
        if orig == current {
            return Ok(());
        }
        info!(object_id = self.object_id, old = %orig, new = %current,
            "4k bitmask changed");
        if current.is_empty() {
            self.set_block_sizes(BE_BYTES_PER_BLOCK, BE_BYTES_PER_BLOCK, 1)
        } else {
            self.set_block_sizes(BE_BYTES_PER_BLOCK, BYTES_PER_4K_BLOCK,
                                 BLOCKS_PER_4K as u32)
        }
    }

    pub fn data_disks(&self) -> Result<u16> {
        if !self.flags.configured() {
            return Err(Error::NotInitialized);
        }
        data_disks_for(self.raid_type, self.width)
    }

    pub fn parity_disks(&self) -> Result<u16> {
        if !self.flags.configured() {
            return Err(Error::NotInitialized);
        }
        parity_disks_for(self.raid_type, self.width)
    }

    /// Element size and data disk count, both nonzero, for stripe math
    pub fn stripe_dimensions(&self) -> Result<(ElementSize, u16)> {
        let dd = self.data_disks()?;
        if self.element_size == 0 || dd == 0 {
            error!(object_id = self.object_id,
                element_size = self.element_size, data_disks = dd,
                "stripe math on an unconfigured geometry");
            return Err(Error::NotInitialized);
        }
        Ok((self.element_size, dd))
    }

    /// May I/O be issued to this raid group?
    pub fn is_ready_for_io(&self) -> bool {
        self.flags.block_size_valid() && self.flags.metadata_configured()
    }

    /// Does this geometry lock by parity stripe rather than by lba?
    fn locks_by_stripe(&self) -> bool {
        self.is_parity_type() || self.raid_type == RaidType::Raid0
    }

    /// Compute the stripe lock needed for a host range.
    ///
    /// Parity and RAID0 groups lock by parity-relative stripe; other types
    /// lock on the host range itself.
    pub fn calculate_lock_range(&self, lba: LbaT, blocks: BlockCount)
        -> Result<(u64, u64)>
    {
        if self.locks_by_stripe() {
            let (es, dd) = self.stripe_dimensions()?;
            let range = stripe_range(lba, blocks, es, dd, 1);
            Ok((range[0].start_lba, range[0].size))
        } else {
            Ok((lba, blocks))
        }
    }

    /// Compute the lock for a background zero, first rounding the range
    /// outward to whole chunk stripes so that no chunk is ever partially
    /// locked.
    pub fn calculate_zero_lock_range(&self, lba: LbaT, blocks: BlockCount,
                                     chunk_size: ChunkSize)
        -> Result<(u64, u64)>
    {
        let dd = u64::from(self.data_disks()?);
        let es = u64::from(self.element_size);
        if es == 0 || chunk_size == 0 || blocks == 0 {
            error!(object_id = self.object_id, lba, blocks, chunk_size,
                "zero lock range of an unconfigured geometry");
            return Err(Error::GenericFailure);
        }
        let chunk_stripe = u64::from(chunk_size) * dd;
        let start = round_down(lba, chunk_stripe);
        let end = round_up(lba + blocks, chunk_stripe);
        let unit = if self.locks_by_stripe() { es * dd } else { es };
        let stripe_number = start / unit;
        let end_stripe_number = (end - 1) / unit;
        Ok((stripe_number, end_stripe_number - stripe_number + 1))
    }

    /// Compute the lock for a per-drive range.  The result is in blocks.
    pub fn calculate_lock_range_physical(&self, lba: LbaT, blocks: BlockCount)
        -> Result<(u64, u64)>
    {
        let dd = u64::from(self.data_disks()?);
        let es = u64::from(self.element_size);
        if es == 0 || blocks == 0 {
            return Err(Error::GenericFailure);
        }
        let (stripe_number, end_stripe_number) = if self.locks_by_stripe() {
            (lba / es, (lba + blocks - 1) / es)
        } else {
            ((lba / es) * dd, ((lba + blocks - 1) / es) * dd)
        };
        let stripe_count = end_stripe_number - stripe_number + 1;
        Ok((stripe_number * es, stripe_count * es))
    }

    /// Which chunks of the paged metadata does a host range touch?
    pub fn calculate_chunk_range(&self, lba: LbaT, blocks: BlockCount,
                                 chunk_size: ChunkSize)
        -> Result<(ChunkIndex, ChunkCount)>
    {
        let (es, dd) = self.stripe_dimensions()?;
        if chunk_size == 0 || blocks == 0 {
            return Err(Error::GenericFailure);
        }
        let extent = stripe_range(lba, blocks, es, dd, MAX_PARITY_EXTENTS);
        let stripe_lba = extent[0].start_lba;
        let stripe_blocks = if extent[1].is_empty() {
            extent[0].size
        } else {
            // Discontiguous; merge for the purpose of finding chunks.
            extent[1].end() - extent[0].start_lba
        };
        let cs = u64::from(chunk_size);
        let chunk_number = stripe_lba / cs;
        let end_chunk_number = (stripe_lba + stripe_blocks - 1) / cs;
        let count = ChunkCount::try_from(end_chunk_number - chunk_number + 1)
            .map_err(|_| Error::GenericFailure)?;
        Ok((chunk_number, count))
    }

    /// Does a per-drive request cross from one region into another?
    ///
    /// Regions are checked in the order user space, metadata, journal.
    pub fn does_request_exceed_extent(&self, start_lba: LbaT,
                                      blocks: BlockCount,
                                      allow_full_journal_access: bool) -> bool
    {
        let end_lba = match blocks.checked_sub(1)
            .and_then(|b| start_lba.checked_add(b))
        {
            Some(end_lba) => end_lba,
            None => {
                error!(object_id = self.object_id, start_lba, blocks,
                    "extent check of an empty or overflowing request");
                return true;
            }
        };
        if self.attributes.extent_pool() {
            return false;
        }
        let dd = match data_disks_for(self.raid_type, self.width) {
            Ok(dd) if dd > 0 => LbaT::from(dd),
            _ => {
                error!(object_id = self.object_id, start_lba, blocks,
                    "extent check on an unconfigured geometry");
                return true;
            }
        };
        let journal_start = self.journal_log_start_lba;

        if self.metadata_start_lba == LBA_INVALID {
            // Assume the extent starts at 0.
            let user_end = self.configured_capacity / dd;
            if end_lba >= user_end {
                error!(object_id = self.object_id, end_lba, user_end,
                    "request exceeds user space");
                return true;
            }
            return false;
        }
        // The metadata start is logical; convert it to physical.
        let md_start = self.metadata_start_lba / dd;
        let md_end = (md_start + self.metadata_capacity / dd).saturating_sub(1);

        if end_lba < md_start {
            false
        } else if journal_start == LBA_INVALID || end_lba < journal_start {
            if start_lba < md_start {
                error!(object_id = self.object_id, end_lba, md_start,
                    "request spans into metadata");
                true
            } else if end_lba > md_end {
                error!(object_id = self.object_id, end_lba, md_end,
                    "request exceeds metadata end");
                true
            } else {
                false
            }
        } else {
            let journal_end = journal_start + self.journal_log_size - 1;
            if allow_full_journal_access {
                if end_lba > journal_end {
                    error!(object_id = self.object_id, end_lba, journal_end,
                        "request exceeds journal end");
                    return true;
                }
                false
            } else if start_lba < journal_start {
                error!(object_id = self.object_id, start_lba, journal_start,
                    "request spans journal start");
                true
            } else if end_lba > journal_end {
                error!(object_id = self.object_id, end_lba, journal_end,
                    "request exceeds journal end");
                true
            } else {
                false
            }
        }
    }

    /// Does a host request begin within the journal?
    pub fn is_journal_io(&self, io_start_lba: LbaT) -> bool {
        if self.journal_log_start_lba == LBA_INVALID {
            return false;
        }
        let dd = LbaT::from(self.data_disks().unwrap_or(0));
        dd != 0 && io_start_lba >= self.journal_log_start_lba * dd
    }

    /// Does a host address fall within the metadata region?
    pub fn is_metadata_io(&self, lba: LbaT) -> bool {
        self.metadata_start_lba != LBA_INVALID &&
            lba >= self.metadata_start_lba
    }

    /// Offset that lba stamps are relative to.  Non-zero only for raw
    /// mirrors.
    pub fn raid_group_offset(&self) -> LbaT {
        if self.raid_type == RaidType::RawMirror {
            self.raw_mirror_offset
        } else {
            0
        }
    }

    /// Are both ends of a host range on a stripe boundary?
    pub fn is_stripe_aligned(&self, lba: LbaT, blocks: BlockCount)
        -> Result<bool>
    {
        let stripe = u64::from(self.element_size) *
            u64::from(self.data_disks()?);
        if stripe == 0 {
            return Err(Error::NotInitialized);
        }
        Ok(lba % stripe == 0 && (lba + blocks) % stripe == 0)
    }

    /// Does a range stay within one element?
    pub fn is_single_position(&self, lba: LbaT, blocks: BlockCount) -> bool {
        let bpe = u64::from(self.element_size);
        if bpe == 0 || blocks == 0 {
            return false;
        }
        lba / bpe == (lba + blocks - 1) / bpe && blocks <= bpe
    }

    /// Does this raid group have 4K-native members?
    pub fn needs_alignment(&self) -> bool {
        !self.bitmask_4k.is_empty()
    }

    /// Round a physical range outward to 4K boundaries, if required
    pub fn align_io(&self, lba: LbaT, blocks: BlockCount)
        -> (LbaT, BlockCount)
    {
        if self.needs_alignment() {
            align_to_4k(lba, blocks)
        } else {
            (lba, blocks)
        }
    }

    pub fn io_needs_alignment(&self, lba: LbaT, blocks: BlockCount) -> bool {
        self.needs_alignment() &&
            (lba % BLOCKS_PER_4K != 0 || (lba + blocks) % BLOCKS_PER_4K != 0)
    }

    /// Round an inclusive lock range outward to 4K boundaries, if required
    pub fn align_lock_request(&self, start_lba: LbaT, end_lba: LbaT)
        -> (LbaT, LbaT)
    {
        if self.needs_alignment() {
            let (lba, blocks) = align_to_4k(start_lba, end_lba - start_lba + 1);
            (lba, lba + blocks - 1)
        } else {
            (start_lba, end_lba)
        }
    }

    /// Number of whole chunks that fit in a drive's share of the capacity
    pub fn total_map_chunks(&self, chunk_size: ChunkSize) -> Result<u64> {
        let dd = u64::from(self.data_disks()?);
        if dd == 0 || chunk_size == 0 {
            return Err(Error::NotInitialized);
        }
        Ok(div_roundup(self.configured_capacity / dd, u64::from(chunk_size)))
    }

    pub fn attributes(&self) -> GeometryAttributes {
        self.attributes
    }

    pub fn bitmask_4k(&self) -> PositionBitmask {
        self.bitmask_4k
    }

    pub fn block_sizes(&self) -> (u32, u32, u32) {
        (self.exported_block_size, self.imported_block_size,
         self.optimal_block_size)
    }

    pub fn class(&self) -> RaidClass {
        self.class
    }

    pub fn configured_capacity(&self) -> LbaT {
        self.configured_capacity
    }

    pub fn element_size(&self) -> ElementSize {
        self.element_size
    }

    pub fn elements_per_parity(&self) -> ElementsPerParity {
        self.elements_per_parity
    }

    pub fn flags(&self) -> GeometryFlags {
        self.flags
    }

    pub fn is_parity_type(&self) -> bool {
        self.raid_type.is_parity()
    }

    pub fn is_raid10(&self) -> bool {
        self.raid_type == RaidType::Raid10
    }

    pub fn is_vault(&self) -> bool {
        self.attributes.vault()
    }

    pub fn is_write_logging_enabled(&self) -> bool {
        self.attributes.write_logging()
    }

    pub fn journal_log_size(&self) -> BlockCount {
        self.journal_log_size
    }

    pub fn journal_log_start_lba(&self) -> LbaT {
        self.journal_log_start_lba
    }

    pub fn max_blocks_per_drive(&self) -> BlockCount {
        self.max_blocks_per_drive
    }

    pub fn metadata_capacity(&self) -> LbaT {
        self.metadata_capacity
    }

    pub fn metadata_copy_offset(&self) -> LbaT {
        self.metadata_copy_offset
    }

    pub fn metadata_start_lba(&self) -> LbaT {
        self.metadata_start_lba
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn raid_type(&self) -> RaidType {
        self.raid_type
    }

    pub fn set_extent_pool(&mut self, extent_pool: bool) {
        self.attributes.set_extent_pool(extent_pool);
    }

    /// Override the size of the write log.  Mostly useful for testing.
    pub fn set_journal_log_size(&mut self, blocks: BlockCount) {
        self.journal_log_size = blocks;
    }

    pub fn set_mirror_sequential_disabled(&mut self, disabled: bool) {
        self.flags.set_mirror_sequential_disabled(disabled);
    }

    pub fn set_raw_mirror_offset(&mut self, offset: LbaT) {
        self.raw_mirror_offset = offset;
    }

    pub fn set_vault(&mut self, vault: bool) {
        self.attributes.set_vault(vault);
    }

    pub fn set_write_logging(&mut self, enabled: bool) {
        self.attributes.set_write_logging(enabled);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn write_log_slots(&self) -> (u32, u32) {
        (self.write_log_slot_size, self.write_log_slot_count)
    }
}

// LCOV_EXCL_STOP
