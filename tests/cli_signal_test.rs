//! Process-level tests for the certcheck binary: signals, exit status, temp-file cleanup
//!
//! Run with: cargo test -p certcheck --test cli_signal_test
#![cfg(unix)]

use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

fn certcheck(temp_dir: &Path, nosan_addr: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_certcheck"));
    cmd.args(["--valid-addr", "127.0.0.1:0"])
        .args(["--nosan-addr", nosan_addr])
        .args(["--cert-delivery", "temp-files"])
        .args(["--grace-period", "1"])
        .arg("--temp-dir")
        .arg(temp_dir)
        .env_remove("CERTCHECK_VALID_ADDR")
        .env_remove("CERTCHECK_NOSAN_ADDR")
        .env_remove("CERTCHECK_DNS_NAMES")
        .env_remove("CERTCHECK_CERT_DELIVERY")
        .env_remove("CERTCHECK_GRACE_PERIOD");
    cmd
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn wait_for_files(child: &mut Child, dir: &Path, expected: usize) {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    while file_count(dir) < expected {
        if let Some(status) = child.try_wait().unwrap() {
            panic!("certcheck exited before serving: {}", status);
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("certcheck did not write its PEM files in time");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn send_signal(child: &Child, signal: &str) {
    let status = Command::new("kill")
        .args(["-s", signal])
        .arg(child.id().to_string())
        .status()
        .expect("kill should be available");
    assert!(status.success(), "kill -s {} failed", signal);
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + EXIT_TIMEOUT;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("certcheck did not exit after the signal");
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn assert_clean_exit_on(signal: &str) {
    let dir = tempfile::tempdir().unwrap();
    let mut child = certcheck(dir.path(), "127.0.0.1:0")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    wait_for_files(&mut child, dir.path(), 4);
    send_signal(&child, signal);

    let status = wait_for_exit(&mut child);
    assert_eq!(status.code(), Some(0), "exit after SIG{}: {}", signal, status);
    assert_eq!(file_count(dir.path()), 0, "PEM files left after SIG{}", signal);
}

#[test]
fn test_sigint_exits_zero_and_removes_temp_files() {
    assert_clean_exit_on("INT");
}

#[test]
fn test_sigterm_exits_zero_and_removes_temp_files() {
    assert_clean_exit_on("TERM");
}

#[test]
fn test_occupied_port_exits_nonzero_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let nosan_addr = occupied.local_addr().unwrap().to_string();

    let output = certcheck(dir.path(), &nosan_addr)
        .stdout(Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success(), "bind failure should be fatal");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed to start certificate test servers"),
        "stderr: {}",
        stderr
    );
    assert_eq!(file_count(dir.path()), 0);
}
