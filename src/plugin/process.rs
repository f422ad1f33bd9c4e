//! Blocking host command execution with a hard deadline.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::plugin::error::ProcessError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_GRACE: Duration = Duration::from_millis(500);

/// A fully described command: what to run, where, and for how long at most.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Human-readable exit status (`exit status: 1`, `signal: 9`, ...).
    pub status: String,
    pub stderr: String,
}

impl CommandOutput {
    fn from_status(status: ExitStatus, stderr: String) -> Self {
        Self {
            success: status.success(),
            status: status.to_string(),
            stderr,
        }
    }
}

/// Seam between the pipeline and the host's process table.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError>;
}

/// Runs commands on the host. The child and everything in its process group
/// are killed when the deadline passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        let program = invocation.program.clone();
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = invocation.cwd.as_ref() {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        // Own process group, so a timeout also reaches helpers the child spawned.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        tracing::debug!(command = %invocation.display(), "spawning");
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Drain stderr off-thread so a noisy child never blocks on a full pipe.
        // The reader is never joined: a detached grandchild may hold the pipe open.
        let (stderr_tx, stderr_rx) = mpsc::channel();
        if let Some(mut stderr) = child.stderr.take() {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                let _ = stderr_tx.send(buf);
            });
        }

        let deadline = Instant::now() + invocation.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let grace = deadline
                        .saturating_duration_since(Instant::now())
                        .max(KILL_GRACE);
                    let stderr = stderr_rx.recv_timeout(grace).unwrap_or_default();
                    return Ok(CommandOutput::from_status(status, stderr.trim().to_string()));
                }
                Ok(None) if Instant::now() >= deadline => {
                    tracing::warn!(command = %invocation.display(), "deadline passed, killing");
                    terminate(&mut child);
                    return Err(ProcessError::TimedOut {
                        program,
                        timeout: invocation.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    terminate(&mut child);
                    return Err(ProcessError::Wait { program, source });
                }
            }
        }
    }
}

/// SIGTERM the child's process group, then SIGKILL whatever is left.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    let _ = killpg(pgid, Signal::SIGTERM);
    let grace = Instant::now() + KILL_GRACE;
    while Instant::now() < grace {
        if matches!(child.try_wait(), Ok(Some(_))) {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = killpg(pgid, Signal::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
