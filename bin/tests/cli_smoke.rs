//! end-to-end smoke tests against the compiled `netkit` binary itself,
//! exercising argument parsing and subcommand wiring the way the bin
//! crate's unit tests (colocated in `src/cli.rs`) can't: through the
//! real process entry point.

use std::process::Command;

fn netkit() -> Command {
    Command::new(env!("CARGO_BIN_EXE_netkit"))
}

#[test]
fn top_level_help_lists_both_subcommands() {
    let output = netkit().arg("--help").output().expect("failed to run netkit");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ping"));
    assert!(stdout.contains("ndt7"));
}

#[test]
fn ping_without_a_host_fails_fast() {
    let output = netkit().arg("ping").output().expect("failed to run netkit");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required") || stderr.contains("HOSTS"));
}

#[test]
fn ndt7_requires_a_further_subcommand() {
    let output = netkit().arg("ndt7").output().expect("failed to run netkit");
    assert!(!output.status.success());
}

#[test]
fn unknown_subcommand_is_rejected() {
    let output = netkit().arg("frobnicate").output().expect("failed to run netkit");
    assert!(!output.status.success());
}
