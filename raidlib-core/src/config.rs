// vim: tw=80
//! Library-wide tunables

use std::{fs, io, path::Path};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    raid::{
        DegradedCostConfig,
        DEFAULT_CHUNK_SIZE,
        DEGRADED_CREDIT_CEILING_DIVISOR,
        DEGRADED_MIRROR_READ_MULTIPLIER,
        DEGRADED_MIRROR_WRITE_MULTIPLIER,
        DEGRADED_PARITY_READ_MULTIPLIER,
        DEGRADED_PARITY_WRITE_MULTIPLIER,
    },
    types::ChunkSize,
    util::set_panic_on_unexpected_error,
};

/// A four-chunk piece of a host request at the normal element size needs 64
/// SIOTS, plus a few spares.
const DEFAULT_MAX_SIOTS_PER_IOTS: usize = 128;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
}

/// Degraded-mode credit multipliers, as written in a configuration file
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DegradedCosts {
    pub zeroing: u32,
    pub degraded: u32,
    pub parity_read: u32,
    pub parity_write: u32,
    pub mirror_read: u32,
    pub mirror_write: u32,
    pub ceiling_divisor: u32,
}

impl Default for DegradedCosts {
    fn default() -> Self {
        DegradedCosts {
            zeroing: 0,
            degraded: 0,
            parity_read: DEGRADED_PARITY_READ_MULTIPLIER,
            parity_write: DEGRADED_PARITY_WRITE_MULTIPLIER,
            mirror_read: DEGRADED_MIRROR_READ_MULTIPLIER,
            mirror_write: DEGRADED_MIRROR_WRITE_MULTIPLIER,
            ceiling_divisor: DEGRADED_CREDIT_CEILING_DIVISOR,
        }
    }
}

impl From<DegradedCosts> for DegradedCostConfig {
    fn from(c: DegradedCosts) -> Self {
        let config = DegradedCostConfig::new();
        config.set_zeroing_multiplier(c.zeroing);
        config.set_degraded_multiplier(c.degraded);
        config.set_parity_read_multiplier(c.parity_read);
        config.set_parity_write_multiplier(c.parity_write);
        config.set_mirror_read_multiplier(c.mirror_read);
        config.set_mirror_write_multiplier(c.mirror_write);
        config.set_ceiling_divisor(c.ceiling_divisor);
        config
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnexpectedErrorAction {
    /// Fail the affected request only
    #[default]
    Recover,
    Panic,
}

/// Configuration of the RAID library as a whole
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Paged metadata chunk size, in blocks per drive
    pub chunk_size: ChunkSize,
    pub degraded_costs: DegradedCosts,
    pub unexpected_error_policy: UnexpectedErrorAction,
    /// Size of a SIOTS pool.  A piece of a request cannot use more SIOTS than
    /// this.
    pub max_siots_per_iots: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        LibraryConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            degraded_costs: DegradedCosts::default(),
            unexpected_error_policy: UnexpectedErrorAction::default(),
            max_siots_per_iots: DEFAULT_MAX_SIOTS_PER_IOTS,
        }
    }
}

impl LibraryConfig {
    pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path)?;
        Self::from_yaml(&s)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn degraded_cost_config(&self) -> DegradedCostConfig {
        self.degraded_costs.into()
    }

    /// Install this configuration's process-wide settings: the global
    /// credit multipliers and the unexpected error policy.
    pub fn apply_global(&self) {
        DegradedCostConfig::global().assign(&self.degraded_cost_config());
        set_panic_on_unexpected_error(
            self.unexpected_error_policy == UnexpectedErrorAction::Panic);
    }
}

// LCOV_EXCL_STOP
