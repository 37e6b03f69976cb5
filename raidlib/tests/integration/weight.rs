// vim: tw=80
use std::{fs, path::PathBuf};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use tempfile::{Builder, TempDir};

use super::raidlib;

type Harness = (PathBuf, TempDir);

/// A configuration file with a steep degraded read penalty
#[fixture]
fn harness() -> Harness {
    let tempdir = Builder::new()
        .prefix(concat!(module_path!(), "."))
        .tempdir()
        .unwrap();
    let path = tempdir.path().join("raidlib.yaml");
    fs::write(&path, "degraded_costs:\n  parity_read: 19\n").unwrap();
    (path, tempdir)
}

#[rstest]
#[case("10", "50", "2")]
#[case("100", "50", "3")]
#[case("0", "2048", "5")]
fn raid5_write(#[case] lba: &str, #[case] blocks: &str, #[case] w: &str) {
    raidlib()
        .args(["weight", "-t", "raid5", "-w", "5", "-o", "write", lba, blocks])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{w}\n")));
}

/// Degraded reads are capped at a quarter of the credit pool
#[rstest]
fn degraded_read_cap(harness: Harness) {
    let (path, _tempdir) = harness;
    raidlib()
        .arg("--config")
        .arg(&path)
        .args(["weight", "-t", "raid5", "-w", "4", "-o", "read", "--degraded",
               "0", "384"])
        .assert()
        .success()
        .stdout("25\n");
}

#[rstest]
fn degraded_read_low_priority(harness: Harness) {
    let (path, _tempdir) = harness;
    raidlib()
        .arg("--config")
        .arg(&path)
        .args(["weight", "-t", "raid5", "-w", "4", "-o", "read", "--degraded",
               "--priority", "low", "0", "384"])
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn initiate_is_free() {
    raidlib()
        .args(["weight", "-t", "raid6", "-w", "6", "-o", "initiate-user-verify",
               "--degraded", "0", "0x10000"])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn mirror_write() {
    raidlib()
        .args(["weight", "-t", "raid1", "-w", "3", "-o", "write", "0", "8"])
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn unknown_opcode() {
    raidlib()
        .args(["weight", "-t", "raid5", "-w", "5", "-o", "scribble", "0", "8"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn missing_config() {
    let tempdir = tempfile::tempdir().unwrap();
    raidlib()
        .arg("--config")
        .arg(tempdir.path().join("nonexistent.yaml"))
        .args(["weight", "-t", "raid5", "-w", "5", "-o", "write", "0", "8"])
        .assert()
        .failure()
        .code(libc::EINVAL)
        .stderr(predicate::str::contains("cannot read configuration"));
}
