//! Blocking `sh -c` execution with a deadline and capped output capture.

use std::io::{self, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream and the count dropped past the cap.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    /// Lossy UTF-8 text with a trailing notice when output was dropped.
    pub fn into_text(self, stream: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!("\n[{stream} truncated {} bytes]\n", self.dropped));
        }
        text
    }
}

#[derive(Debug)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

/// Run `command` through `sh -c` in `cwd`.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty command cannot block on a full pipe. At most `output_limit_bytes`
/// per stream are kept. The shell leads its own process group; if it is still
/// running at `timeout` the whole group is killed, the readers are abandoned
/// and the result has `timed_out` set with empty output. Stdin is closed.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_shell(
    command: &str,
    cwd: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ShellOutput> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .with_context(|| format!("spawn sh in {}", cwd.display()))?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    let stdout_reader = thread::spawn(move || capture(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || capture(stderr, output_limit_bytes));

    let status = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing process group");
            kill_group(&mut child)?;
            let status = child.wait().context("reap killed child")?;
            // A descendant that left the group may still hold the pipes open.
            drop((stdout_reader, stderr_reader));
            return Ok(ShellOutput {
                exit_code: exit_code(status),
                stdout: Captured::default(),
                stderr: Captured::default(),
                timed_out: true,
            });
        }
    };

    let stdout = join_reader(stdout_reader).context("collect stdout")?;
    let stderr = join_reader(stderr_reader).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "command output truncated"
        );
    }

    let exit_code = exit_code(status);
    debug!(exit_code, "command finished");
    Ok(ShellOutput {
        exit_code,
        stdout,
        stderr,
        timed_out: false,
    })
}

/// SIGKILL the child's process group, falling back to the child alone.
fn kill_group(child: &mut Child) -> Result<()> {
    let group = i32::try_from(child.id()).map(Pid::from_raw);
    match group.map(|pgid| killpg(pgid, Signal::SIGKILL)) {
        Ok(Ok(())) => Ok(()),
        other => {
            debug!(?other, "killpg failed, killing child only");
            child.kill().context("kill child")
        }
    }
}

/// Shell convention: `128 + signal` for a child ended by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

fn capture<R: Read>(mut reader: R, limit: usize) -> io::Result<Captured> {
    let mut bytes = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut bytes)?;
    let dropped = io::copy(&mut reader, &mut io::sink())?;
    Ok(Captured {
        bytes,
        dropped: usize::try_from(dropped).unwrap_or(usize::MAX),
    })
}

fn join_reader(handle: thread::JoinHandle<io::Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
        .context("read child output")
}
