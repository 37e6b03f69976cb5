// vim: tw=80
use assert_cmd::prelude::*;
use predicates::prelude::*;

use super::raidlib;

#[test]
fn raid5() {
    raidlib()
        .args(["geometry", "-t", "raid5", "-w", "5"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?m)^data disks\s+4$").unwrap())
        .stdout(predicate::str::is_match(r"(?m)^parity disks\s+1$").unwrap())
        .stdout(predicate::str::is_match(r"(?m)^stripe size\s+512$").unwrap())
        .stdout(predicate::str::is_match(r"(?m)^map chunks\s+2048$").unwrap())
        .stdout(predicate::str::contains("3,4,5,6,7,8,9,10,11,12,13,14,15,16"));
}

#[test]
fn raid6_bandwidth() {
    raidlib()
        .args(["geometry", "-t", "raid6", "-w", "8", "--bandwidth"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?m)^element size\s+1024$")
                .unwrap())
        .stdout(predicate::str::is_match(r"(?m)^elements per parity\s+1$")
                .unwrap())
        .stdout(predicate::str::contains("4,6,8,10,12,14,16"));
}

/// A RAID10's width counts mirrored pairs
#[test]
fn raid10() {
    raidlib()
        .args(["geometry", "-t", "raid10", "-w", "4"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?m)^data disks\s+4$").unwrap())
        .stdout(predicate::str::is_match(r"(?m)^parity disks\s+2$").unwrap())
        .stdout(predicate::str::contains("1,2,3,4,5,6,7,8"));
}

#[test]
fn invalid_width() {
    raidlib()
        .args(["geometry", "-t", "raid6", "-w", "5"])
        .assert()
        .failure()
        .code(libc::EINVAL)
        .stderr(predicate::str::contains("Width is not valid"));
}

#[test]
fn unknown_raid_type() {
    raidlib()
        .args(["geometry", "-t", "raid4", "-w", "5"])
        .assert()
        .failure()
        .code(2);
}
