// vim: tw=80

//! RAID geometry
//!
//! Pure stripe arithmetic: how a logical I/O maps onto the members of a raid
//! group, which stripes it must lock, which chunks of the paged metadata it
//! touches, and how much it costs.

use crate::types::*;
use enum_primitive_derive::Primitive;
use serde_derive::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr
};

mod credits;
mod geometry;
mod stripe_range;

pub use self::credits::*;
pub use self::geometry::*;
pub use self::stripe_range::{Extent, MAX_PARITY_EXTENTS, stripe_range};

/// Layout of a raid group
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Primitive,
         Serialize)]
pub enum RaidType {
    Unknown                     = 0,
    Raid0                       = 1,
    Raid1                       = 2,
    Raid3                       = 3,
    Raid5                       = 5,
    Raid6                       = 6,
    Raid10                      = 10,
    IndividualDisk              = 11,
    RawMirror                   = 12,
    InternalMirrorUnderStriper  = 13,
    InternalMetadataMirror      = 14,
    Spare                       = 15,
}

impl RaidType {
    /// The object class that normally implements this raid type
    pub fn natural_class(self) -> Option<RaidClass> {
        match self {
            RaidType::Unknown => None,
            RaidType::Raid1 |
            RaidType::RawMirror |
            RaidType::InternalMirrorUnderStriper => Some(RaidClass::Mirror),
            RaidType::Raid0 |
            RaidType::Raid10 |
            RaidType::IndividualDisk => Some(RaidClass::Striper),
            RaidType::Raid3 |
            RaidType::Raid5 |
            RaidType::Raid6 => Some(RaidClass::Parity),
            RaidType::Spare => Some(RaidClass::VirtualDrive),
            RaidType::InternalMetadataMirror =>
                Some(RaidClass::ProvisionDrive),
        }
    }

    pub fn is_parity(self) -> bool {
        matches!(self, RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid6)
    }

    /// Every type with exactly one data disk
    pub fn is_mirror(self) -> bool {
        matches!(self,
            RaidType::Raid1 |
            RaidType::Spare |
            RaidType::InternalMirrorUnderStriper |
            RaidType::InternalMetadataMirror |
            RaidType::RawMirror)
    }

    pub fn name(self) -> &'static str {
        match self {
            RaidType::Unknown => "unknown",
            RaidType::Raid0 => "raid0",
            RaidType::Raid1 => "raid1",
            RaidType::Raid3 => "raid3",
            RaidType::Raid5 => "raid5",
            RaidType::Raid6 => "raid6",
            RaidType::Raid10 => "raid10",
            RaidType::IndividualDisk => "individual-disk",
            RaidType::RawMirror => "raw-mirror",
            RaidType::InternalMirrorUnderStriper => "mirror-under-striper",
            RaidType::InternalMetadataMirror => "metadata-mirror",
            RaidType::Spare => "spare",
        }
    }
}

impl Display for RaidType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RaidType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [RaidType::Raid0, RaidType::Raid1, RaidType::Raid3, RaidType::Raid5,
         RaidType::Raid6, RaidType::Raid10, RaidType::IndividualDisk,
         RaidType::RawMirror, RaidType::InternalMirrorUnderStriper,
         RaidType::InternalMetadataMirror, RaidType::Spare]
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or(Error::GenericFailure)
    }
}

/// The kind of object that owns a geometry.  Each class implements a subset
/// of the raid types.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum RaidClass {
    Parity,
    Striper,
    Mirror,
    VirtualDrive,
    ProvisionDrive,
}

impl RaidClass {
    /// Can an object of this class implement `raid_type`?
    pub fn supports(self, raid_type: RaidType) -> bool {
        match self {
            RaidClass::Mirror => matches!(raid_type,
                RaidType::Raid1 |
                RaidType::InternalMirrorUnderStriper |
                RaidType::RawMirror),
            RaidClass::Striper => matches!(raid_type,
                RaidType::Raid0 | RaidType::Raid10 | RaidType::IndividualDisk),
            RaidClass::Parity => raid_type.is_parity(),
            RaidClass::VirtualDrive => raid_type == RaidType::Spare,
            RaidClass::ProvisionDrive =>
                raid_type == RaidType::InternalMetadataMirror,
        }
    }
}

// LCOV_EXCL_STOP
