// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::io::Write;
use std::process::{Command, Stdio};

use nbkit::{CapturedOutput, ConsoleSink, ExecutionMode, MpRuntime};

/// Helper function to run nbkit with given arguments and input via stdin
pub fn run_nbkit_with_input(args: &[&str], input: &str) -> (String, String, i32) {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_nbkit"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start nbkit");

    // Write input to stdin
    if let Some(mut stdin) = cmd.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .expect("Failed to write to stdin");
    }

    let output = cmd.wait_with_output().expect("Failed to read output");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Helper function to run nbkit with arguments only
pub fn run_nbkit(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_nbkit"))
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute nbkit");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Runtime in the given mode whose console output is captured in memory
pub fn captured_runtime(mode: ExecutionMode, workers: usize) -> (MpRuntime, CapturedOutput) {
    let (sink, captured) = ConsoleSink::capture();
    let runtime = MpRuntime::builder()
        .mode(mode)
        .workers(workers)
        .sink(sink)
        .build();
    (runtime, captured)
}

pub const BOTH_MODES: [ExecutionMode; 2] = [ExecutionMode::ForkCapable, ExecutionMode::SpawnOnly];

/// Values from lines shaped like `result <value>`
pub fn result_values(stdout: &str) -> Vec<i64> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("result "))
        .map(|value| value.parse().expect("result value should be an integer"))
        .collect()
}
