// vim: tw=80
//! Sets of raid group member positions

use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not}
};

/// The widest raid group the library supports
pub const MAX_WIDTH: u32 = 16;

/// A set of member positions within a raid group, one bit per position.
///
/// Position 0 is the least significant bit.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub struct PositionBitmask(u16);

impl PositionBitmask {
    pub const EMPTY: PositionBitmask = PositionBitmask(0);

    pub const fn new(bits: u16) -> Self {
        PositionBitmask(bits)
    }

    /// Every position of a raid group of the given width
    pub fn all(width: u32) -> Self {
        debug_assert!(width <= MAX_WIDTH);
        if width >= MAX_WIDTH {
            PositionBitmask(u16::MAX)
        } else {
            PositionBitmask((1u16 << width) - 1)
        }
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn clear(&mut self, position: u32) {
        if position < MAX_WIDTH {
            self.0 &= !(1 << position);
        }
    }

    /// Number of positions in the set
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// The lowest-numbered position in the set, if any
    pub fn first_set_position(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_set(self, position: u32) -> bool {
        position < MAX_WIDTH && self.0 & (1 << position) != 0
    }

    /// Is every member of `self` also a member of `other`?
    pub fn is_subset_of(self, other: PositionBitmask) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterate through the set positions in increasing order
    pub fn iter(self) -> impl Iterator<Item=u32> {
        (0..MAX_WIDTH).filter(move |p| self.is_set(*p))
    }

    pub fn set(&mut self, position: u32) {
        if position < MAX_WIDTH {
            self.0 |= 1 << position;
        }
    }
}

impl BitAnd for PositionBitmask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        PositionBitmask(self.0 & rhs.0)
    }
}

impl BitAndAssign for PositionBitmask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOr for PositionBitmask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        PositionBitmask(self.0 | rhs.0)
    }
}

impl BitOrAssign for PositionBitmask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Not for PositionBitmask {
    type Output = Self;

    fn not(self) -> Self {
        PositionBitmask(!self.0)
    }
}

impl Display for PositionBitmask {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "0x{:04x} [{}]", self.0, self.iter().join(","))
    }
}

impl FromIterator<u32> for PositionBitmask {
    fn from_iter<I: IntoIterator<Item=u32>>(iter: I) -> Self {
        let mut mask = PositionBitmask::EMPTY;
        for p in iter {
            mask.set(p);
        }
        mask
    }
}

// LCOV_EXCL_STOP
