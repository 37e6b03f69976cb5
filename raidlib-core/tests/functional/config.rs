// vim: tw=80
//! Configuration files drive request pricing
use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use raidlib_core::{
    config::{LibraryConfig, UnexpectedErrorAction},
    opcode::{BlockOperation, Opcode, Priority},
    raid::*,
};

const CONFIG: &str = r#"
chunk_size: 4096
max_siots_per_iots: 2
unexpected_error_policy: recover
degraded_costs:
  mirror_read: 9
  ceiling_divisor: 20
"#;

fn mirror() -> RaidGeometry {
    let mut g = RaidGeometry::new(0x200, RaidClass::Mirror);
    g.set_configuration(2, RaidType::Raid1, 128, 0, 0x10_0000, 0x800)
        .unwrap();
    g
}

#[test]
fn load_and_price() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(CONFIG.as_bytes()).unwrap();
    let config = LibraryConfig::load(f.path()).unwrap();
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.max_siots_per_iots, 2);
    assert_eq!(config.unexpected_error_policy, UnexpectedErrorAction::Recover);

    let costs = config.degraded_cost_config();
    let g = mirror();
    let op = BlockOperation::new(Opcode::Read, 0, 8);
    // 9 credits, capped at 100 / 20
    let req = IoCostRequest::new(&op, Priority::Normal, 100)
        .degraded(true)
        .costs(&costs);
    assert_eq!(g.disk_io_weight(&req), Ok(5));
    // Without the cap, the multiplier applies directly
    let req = IoCostRequest::new(&op, Priority::Normal, 1000)
        .degraded(true)
        .costs(&costs);
    assert_eq!(g.disk_io_weight(&req), Ok(9));
    // Writes use the default multiplier
    let op = BlockOperation::new(Opcode::Write, 0, 8);
    let req = IoCostRequest::new(&op, Priority::Normal, 1000)
        .degraded(true)
        .costs(&costs);
    assert_eq!(g.disk_io_weight(&req),
               Ok(2 * DEGRADED_MIRROR_WRITE_MULTIPLIER));
}
