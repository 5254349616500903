//! External command execution.
//!
//! Every disk and loop operation shells out to the host tools (dd, mkfs,
//! losetup, mount, blkid). This module is the single place those processes
//! are spawned: callers get a success/failure status or captured stdout and
//! decide themselves which failures are fatal. No retries and no timeouts
//! happen here; a hung tool blocks the caller.

use crate::error::{Error, Result};
use std::io::Write;
use std::process::{Command, Output, Stdio};

/// Run a command, discarding its output.
pub fn run(program: &str, args: &[&str]) -> Result<()> {
    tracing::debug!(command = %display_command(program, args), "running command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::command_failed(display_command(program, args), e.to_string()))?;

    check_status(program, args, &output)
}

/// Run a command and return its captured stdout.
pub fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    tracing::debug!(command = %display_command(program, args), "running command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::command_failed(display_command(program, args), e.to_string()))?;

    check_status(program, args, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a command, writing `input` to its stdin.
///
/// The input stream is closed after writing so tools that read until EOF
/// (passwd-style prompts) terminate.
pub fn run_with_input(program: &str, args: &[&str], input: &str) -> Result<()> {
    tracing::debug!(command = %display_command(program, args), "running command with input");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::command_failed(display_command(program, args), e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .map_err(|e| Error::command_failed(display_command(program, args), e.to_string()))?;
        // stdin is dropped here, closing the pipe.
    }

    let output = child
        .wait_with_output()
        .map_err(|e| Error::command_failed(display_command(program, args), e.to_string()))?;

    check_status(program, args, &output)
}

/// Map a non-zero exit to a command error carrying the captured stderr.
fn check_status(program: &str, args: &[&str], output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = if stderr.trim().is_empty() {
        format!("exit status {}", output.status)
    } else {
        format!("{} ({})", stderr.trim(), output.status)
    };

    Err(Error::command_failed(
        display_command(program, args),
        message,
    ))
}

/// Render a program and its arguments for error messages.
fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
