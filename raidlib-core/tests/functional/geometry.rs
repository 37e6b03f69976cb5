// vim: tw=80
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rstest::{fixture, rstest};
use rstest_reuse::{apply, template};

use raidlib_core::{
    opcode::{BlockOperation, Opcode, Priority},
    raid::*,
    Error,
    LbaT,
};

/// A 4+1 RAID5 with standard elements
#[fixture]
fn raid5() -> RaidGeometry {
    let mut g = RaidGeometry::new(0x101, RaidClass::Parity);
    g.set_configuration(5, RaidType::Raid5, 128, 8, 0x100_0000, 0x800)
        .unwrap();
    g.set_block_sizes(520, 520, 1).unwrap();
    g
}

#[template]
#[rstest]
fn all_types(
    #[values(RaidType::Raid0, RaidType::Raid1, RaidType::Raid3,
             RaidType::Raid5, RaidType::Raid6, RaidType::Raid10,
             RaidType::IndividualDisk, RaidType::RawMirror,
             RaidType::InternalMirrorUnderStriper,
             RaidType::InternalMetadataMirror, RaidType::Spare)]
    raid_type: RaidType)
{}

/// A 4+1 RAID5 write that stays within one element touches one data drive
/// and the parity drive.
#[rstest]
fn raid5_small_write(raid5: RaidGeometry) {
    let op = BlockOperation::new(Opcode::Write, 10, 50);
    let req = IoCostRequest::new(&op, Priority::Normal, 100);
    assert_eq!(raid5.calc_parity_disk_ios(&req), Ok(2));
    assert_eq!(raid5.disk_io_weight(&req), Ok(2));
}

/// Blocks 100 through 149 cross from the first element into the second
#[rstest]
fn raid5_small_write_across_elements(raid5: RaidGeometry) {
    let op = BlockOperation::new(Opcode::Write, 100, 50);
    let req = IoCostRequest::new(&op, Priority::Normal, 100);
    assert_eq!(raid5.calc_parity_disk_ios(&req), Ok(3));
}

#[test]
fn raid6_width() {
    assert_eq!(validate_width(RaidType::Raid6, 5), Err(Error::InvalidWidth));
    assert_eq!(validate_width(RaidType::Raid6, 6), Ok(()));
}

/// A request that begins in the metadata region and ends in the journal is
/// rejected.
#[rstest]
#[case(1090, 20, true)]
#[case(1100, 50, false)]
#[case(1100, 51, true)]
#[case(1000, 100, false)]
fn journal_boundary(mut raid5: RaidGeometry, #[case] lba: LbaT,
                    #[case] blocks: u64, #[case] exceeds: bool)
{
    // The metadata start is logical.  1000 blocks per drive on 4 data disks.
    raid5.set_metadata_configuration(4000, 400, 0, 1100).unwrap();
    raid5.set_journal_log_size(50);
    assert_eq!(raid5.does_request_exceed_extent(lba, blocks, false), exceeds);
}

#[test]
fn degraded_read_credit_cap() {
    let mut g = RaidGeometry::new(0x102, RaidClass::Parity);
    g.set_configuration(4, RaidType::Raid5, 128, 8, 0x100_0000, 0x800)
        .unwrap();
    let costs = DegradedCostConfig::new();
    costs.set_parity_read_multiplier(19);
    assert_eq!(costs.ceiling_divisor(), 4);
    // Three drives at a multiplier of 20 is 60 credits
    let op = BlockOperation::new(Opcode::Read, 0, 384);
    let req = IoCostRequest::new(&op, Priority::Normal, 100)
        .degraded(true)
        .costs(&costs);
    assert_eq!(g.disk_io_weight(&req), Ok(25));
    // Low priority requests are never penalized
    let req = IoCostRequest::new(&op, Priority::Low, 100)
        .degraded(true)
        .costs(&costs);
    assert_eq!(g.disk_io_weight(&req), Ok(3));
}

#[test]
fn initiate_costs_nothing() {
    let mut g = RaidGeometry::new(0x103, RaidClass::Parity);
    g.set_configuration(6, RaidType::Raid6, 128, 8, 0x100_0000, 0x800)
        .unwrap();
    let op = BlockOperation::new(Opcode::InitiateUserVerify, 0, 0x1_0000);
    let req = IoCostRequest::new(&op, Priority::Urgent, 100).degraded(true);
    assert_eq!(g.disk_io_weight(&req), Ok(0));
}

/// Data plus parity disks is the width for every accepted width, except for
/// RAID10 whose width counts mirrored pairs rather than disks.
#[apply(all_types)]
fn disk_counts(raid_type: RaidType) {
    for width in 1..=16 {
        let disks = if raid_type == RaidType::Raid10 {
            width * 2
        } else {
            width
        };
        if validate_width(raid_type, disks).is_err() {
            continue;
        }
        let dd = u32::from(data_disks_for(raid_type, width).unwrap());
        let pd = u32::from(parity_disks_for(raid_type, width).unwrap());
        if raid_type == RaidType::Raid10 {
            assert_eq!(dd, width);
            assert_eq!(pd, width / 2);
        } else {
            assert_eq!(dd + pd, width, "{raid_type} width {width}");
        }
    }
}

#[apply(all_types)]
fn natural_class_configures(raid_type: RaidType) {
    let class = raid_type.natural_class().unwrap();
    let width = (1..=16).find(|&w| {
        let disks = if raid_type == RaidType::Raid10 { w * 2 } else { w };
        validate_width(raid_type, disks).is_ok()
    }).unwrap();
    let mut g = RaidGeometry::new(1, class);
    g.set_configuration(width, raid_type, 128, 0, 0x10_0000, 0x800).unwrap();
    assert!(g.data_disks().unwrap() > 0);
}

/// Shrinking a request never grows its lock
#[rstest]
fn lock_range_monotonic(raid5: RaidGeometry) {
    let mut rng = XorShiftRng::seed_from_u64(0x10c5);
    for _ in 0..1000 {
        let lba = rng.gen_range(0..0x10_0000);
        let blocks = rng.gen_range(1..0x4000);
        let sub_lba = rng.gen_range(lba..lba + blocks);
        let sub_blocks = rng.gen_range(1..=lba + blocks - sub_lba);
        let (s, n) = raid5.calculate_lock_range(lba, blocks).unwrap();
        let (ss, sn) = raid5.calculate_lock_range(sub_lba, sub_blocks)
            .unwrap();
        assert!(ss >= s && ss + sn <= s + n,
            "({sub_lba}, {sub_blocks}) locks ({ss}, {sn}) outside of \
             ({lba}, {blocks})'s ({s}, {n})");
    }
}

#[rstest]
fn zero_lock_covers_whole_chunks(raid5: RaidGeometry) {
    // One chunk stripe is 2048 blocks on each of 4 drives, 16 stripes
    assert_eq!(raid5.calculate_zero_lock_range(100, 10, 2048), Ok((0, 16)));
    assert_eq!(raid5.calculate_zero_lock_range(8191, 2, 2048),
               Ok((0, 32)));
}

#[rstest]
fn chunk_range(raid5: RaidGeometry) {
    assert_eq!(raid5.calculate_chunk_range(0, 8192, 2048), Ok((0, 1)));
    assert_eq!(raid5.calculate_chunk_range(8000, 400, 2048), Ok((0, 2)));
}
