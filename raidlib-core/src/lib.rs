// vim: tw=80
//! RAID geometry and request decomposition
//!
//! Maps logical I/O onto the members of a raid group, tracks each logical
//! request (IOTS) while it is split into per-stripe sub-requests (SIOTS), and
//! prices requests in I/O credits for admission control.

// I don't find this lint very helpful
#![allow(clippy::type_complexity)]

// Many of the geometry functions take one argument per configuration field.
#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod util;

pub mod config;
pub mod iots;
pub mod opcode;
pub mod position;
pub mod raid;
pub mod siots;
pub mod types;

pub use crate::types::*;
pub use crate::util::*;
