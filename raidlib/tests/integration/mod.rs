// vim: tw=80
use std::process::Command;

use assert_cmd::prelude::*;

mod geometry;
mod ranges;
mod simulate;
mod weight;

pub fn raidlib() -> Command {
    Command::cargo_bin("raidlib").unwrap()
}

/// Split tabular output into whitespace-separated cells
pub fn cells(stdout: &[u8]) -> Vec<Vec<String>> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|l| l.split_whitespace().map(str::to_owned).collect())
        .collect()
}

/// Run a successful command and return its table
pub fn table(cmd: &mut Command) -> Vec<Vec<String>> {
    let output = cmd.assert().success().get_output().stdout.clone();
    cells(&output)
}
