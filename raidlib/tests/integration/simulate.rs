// vim: tw=80
use std::fs;

use assert_cmd::prelude::*;
use pretty_assertions::assert_eq;

use super::{cells, raidlib, table};

/// A large write is processed in four pieces, each limited to four chunks
#[test]
fn large_write() {
    let t = table(raidlib()
        .args(["simulate", "-t", "raid5", "-w", "5", "0", "0x20000"]));
    assert_eq!(t, vec![
        vec!["PIECE", "LBA", "BLOCKS", "SIOTS", "STATUS"],
        vec!["0", "0", "32768", "64", "Success"],
        vec!["1", "32768", "32768", "64", "Success"],
        vec!["2", "65536", "32768", "64", "Success"],
        vec!["3", "98304", "32768", "64", "Success"],
    ]);
}

#[test]
fn mirror_read() {
    let t = table(raidlib()
        .args(["simulate", "-t", "raid1", "-w", "2", "-o", "read", "0",
               "100"]));
    assert_eq!(&t[1..], &[vec!["0", "0", "100", "1", "Success"]]);
}

/// A pool too small for a piece fails the request
#[test]
fn pool_too_small() {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("raidlib.yaml");
    fs::write(&path, "max_siots_per_iots: 8\n").unwrap();
    let output = raidlib()
        .arg("--config")
        .arg(&path)
        .args(["simulate", "-t", "raid5", "-w", "5", "0", "0x20000"])
        .assert()
        .failure()
        .code(libc::EIO)
        .get_output()
        .stdout
        .clone();
    let t = cells(&output);
    assert_eq!(&t[1..], &[vec!["0", "0", "32768", "1", "InvalidRequest"]]);
}
