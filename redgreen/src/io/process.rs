//! Child-process execution with a hard wall-clock deadline and bounded
//! output capture.
//!
//! Every subprocess the engine spawns (test runner, package manager,
//! generation collaborator command) goes through [`run_with_deadline`].
//! On deadline expiry the child is killed and reaped, never abandoned, so
//! no orphaned work survives a timeout. Output is drained concurrently
//! while the child runs to avoid pipe deadlocks, and capped so a chatty
//! child cannot exhaust memory.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured outcome of a bounded child process run.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit code; `None` when the child was killed (timeout or signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, the order the test-runner output is
    /// inspected in.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// Run a command to completion or until `deadline` expires.
///
/// `stdin` is written to the child before waiting when provided. Stdout and
/// stderr are each capped at `output_cap` bytes; excess is discarded while
/// still draining the pipe. Returns `Err` only when the process cannot be
/// spawned or its pipes cannot be serviced.
#[instrument(skip_all, fields(deadline_secs = deadline.as_secs(), output_cap))]
pub fn run_with_deadline(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    deadline: Duration,
    output_cap: usize,
) -> Result<ProcessOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    // Run the child as its own process-group leader so a timeout can take
    // down the whole group, not just the direct child.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let started = Instant::now();
    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn child process")?;

    // Stdin is fed from its own thread so a child that fills its output
    // pipes before reading input cannot deadlock us.
    let stdin_writer = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("child stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // A child may legitimately exit without reading; ignore the
                // broken pipe. Dropping the handle closes the pipe (EOF).
                let _ = child_stdin.write_all(&input);
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("child stderr was not piped"))?;
    let stdout_reader = thread::spawn(move || drain_capped(stdout, output_cap));
    let stderr_reader = thread::spawn(move || drain_capped(stderr, output_cap));

    let mut timed_out = false;
    let status = match child.wait_timeout(deadline).context("wait for child")? {
        Some(status) => status,
        None => {
            warn!(deadline_secs = deadline.as_secs(), "deadline expired, killing child");
            timed_out = true;
            kill_group(&mut child)?;
            child.wait().context("reap killed child")?
        }
    };

    let stdout = join_reader(stdout_reader).context("collect stdout")?;
    let stderr = join_reader(stderr_reader).context("collect stderr")?;
    if let Some(writer) = stdin_writer {
        let _ = writer.join();
    }
    let duration = started.elapsed();

    debug!(exit_code = ?status.code(), timed_out, duration_ms = duration.as_millis() as u64, "child finished");
    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        timed_out,
        duration,
    })
}

/// Kill the child and, on unix, its whole process group (it was spawned
/// as the group leader). Grandchildren must not outlive the deadline.
#[cfg(unix)]
fn kill_group(child: &mut Child) -> Result<()> {
    let pgid = child.id();
    // Best effort; the direct kill below is the guaranteed path.
    let _ = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .status();
    child.kill().context("kill timed-out child")
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> Result<()> {
    child.kill().context("kill timed-out child")
}

fn join_reader(handle: thread::JoinHandle<Result<String>>) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

/// Drain a pipe to EOF, keeping at most `cap` bytes.
fn drain_capped<R: Read>(mut reader: R, cap: usize) -> Result<String> {
    let mut kept = Vec::new();
    let mut discarded = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        discarded += n - keep;
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if discarded > 0 {
        warn!(discarded, "child output exceeded cap");
        text.push_str(&format!("\n[output truncated, {discarded} bytes dropped]\n"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_exit_code() {
        let output = run_with_deadline(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.timed_out);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
    }

    /// A child that never terminates is killed at the deadline: the call
    /// returns promptly and the child's pid is gone afterwards.
    #[test]
    fn deadline_expiry_kills_the_child() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pid_file = temp.path().join("child.pid");

        let started = Instant::now();
        let output = run_with_deadline(
            sh(&format!("echo $$ > {}; exec sleep 30", pid_file.display())),
            None,
            Duration::from_millis(200),
            10_000,
        )
        .expect("run");

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "timed-out child must not block until completion"
        );
        assert!(!pid_alive(&pid_file), "timed-out child is still running");
    }

    /// Signal 0 probes existence without delivering anything.
    fn pid_alive(pid_file: &std::path::Path) -> bool {
        let pid = std::fs::read_to_string(pid_file)
            .expect("read pidfile")
            .trim()
            .to_string();
        Command::new("kill")
            .args(["-0", &pid])
            .status()
            .expect("probe pid")
            .success()
    }

    #[test]
    fn stdin_is_forwarded() {
        let output = run_with_deadline(
            sh("cat"),
            Some(b"piped input"),
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");

        assert!(output.success());
        assert_eq!(output.stdout, "piped input");
    }

    #[test]
    fn output_beyond_the_cap_is_dropped() {
        let output = run_with_deadline(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(5),
            4,
        )
        .expect("run");

        assert!(output.stdout.starts_with("abcd"));
        assert!(output.stdout.contains("truncated"));
    }
}
