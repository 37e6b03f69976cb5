// vim: tw=80
use assert_cmd::prelude::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

use super::{raidlib, table};

/// A range that crosses into the next element without reaching its own
/// starting offset maps onto two disjoint extents.
#[test]
fn stripe_range_split() {
    let t = table(raidlib().args(["stripe-range", "100", "50", "-d", "4"]));
    assert_eq!(t, vec![
        vec!["EXTENT", "START", "BLOCKS"],
        vec!["0", "0", "22"],
        vec!["1", "100", "28"],
    ]);
}

#[test]
fn stripe_range_single_extent() {
    let t = table(raidlib()
        .args(["stripe-range", "100", "50", "-d", "4", "--max-extents", "1"]));
    assert_eq!(&t[1..], &[vec!["0", "0", "128"]]);
}

#[test]
fn stripe_range_hex() {
    let t = table(raidlib()
        .args(["stripe-range", "0x200", "0x600", "-d", "4"]));
    assert_eq!(&t[1..], &[vec!["0", "128", "384"]]);
}

#[test]
fn stripe_range_empty() {
    raidlib()
        .args(["stripe-range", "100", "0", "-d", "4"])
        .assert()
        .failure()
        .code(libc::EIO);
}

#[rstest]
#[case(&[], "100", "50", ["0", "128"])]
#[case(&["--zero"], "100", "10", ["0", "16"])]
#[case(&["--zero"], "8191", "2", ["0", "32"])]
#[case(&["--physical"], "130", "10", ["128", "128"])]
fn lock_range(#[case] flags: &[&str], #[case] lba: &str,
              #[case] blocks: &str, #[case] expected: [&str; 2])
{
    let t = table(raidlib()
        .args(["lock-range", "-t", "raid5", "-w", "5"])
        .args(flags)
        .args([lba, blocks]));
    assert_eq!(t, vec![vec!["START", "COUNT"], expected.to_vec()]);
}

#[test]
fn chunk_range() {
    let t = table(raidlib()
        .args(["chunk-range", "-t", "raid5", "-w", "5", "8000", "400"]));
    assert_eq!(t, vec![vec!["CHUNK", "COUNT"], vec!["0", "2"]]);
}

#[test]
fn chunk_range_with_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raidlib.yaml");
    std::fs::write(&path, "chunk_size: 128\n").unwrap();
    let t = table(raidlib()
        .arg("--config")
        .arg(&path)
        .args(["chunk-range", "-t", "raid5", "-w", "5", "8000", "400"]));
    // Parity-relative blocks 1920 through 2175
    assert_eq!(&t[1..], &[vec!["15", "2"]]);
}
