//! Child process abstraction.
//!
//! The supervisor only talks to [`ProcessLauncher`] and [`ChildProcess`], so
//! restart and readiness behaviour can be driven by fakes in tests while
//! [`TokioProcessLauncher`] spawns the real `ft-server`.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// How the child's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Share this process's terminal.
    Inherit,
    /// Null stdio and a dumb terminal so the child cannot touch ours.
    #[default]
    Discard,
    /// Capture output and relay each line to the log.
    Log,
}

/// Exit status of a child, decoupled from `std::process::ExitStatus` so
/// fakes can produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ChildExit {
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    #[must_use]
    pub fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Exit code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Everything needed to start the display server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub output: OutputMode,
    /// Run through `sudo` (GPIO access on a Pi).
    pub sudo: bool,
}

impl LaunchSpec {
    /// The program and arguments actually executed.
    #[must_use]
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        if self.sudo {
            let mut args = Vec::with_capacity(self.args.len() + 1);
            args.push(self.program.display().to_string());
            args.extend(self.args.iter().cloned());
            (PathBuf::from("sudo"), args)
        } else {
            (self.program.clone(), self.args.clone())
        }
    }
}

/// A running child process.
#[async_trait]
pub trait ChildProcess: Send {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Waits for the child to exit. Cancel-safe.
    async fn wait(&mut self) -> io::Result<ChildExit>;

    /// Asks the child to stop, escalating to a hard kill after `grace`.
    /// Always reaps the child.
    async fn terminate(&mut self, grace: Duration) -> io::Result<ChildExit>;
}

/// Starts child processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>>;
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessLauncher;

impl ProcessLauncher for TokioProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>> {
        let (program, args) = spec.command_line();
        let mut command = Command::new(&program);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        // Own process group: a terminal Ctrl+C reaches us, not the child,
        // and shutdown ordering stays under our control.
        #[cfg(unix)]
        command.process_group(0);

        match spec.output {
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputMode::Discard => {
                command
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .env("TERM", "dumb")
                    .env("DISPLAY", "");
            }
            OutputMode::Log => {
                command
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .env("TERM", "dumb");
            }
        }

        let mut child = command.spawn()?;
        log::info!(
            "[Supervisor] Launched {} {} (pid {:?})",
            program.display(),
            args.join(" "),
            child.id()
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_output(stderr, "stderr"));
        }

        Ok(Box::new(TokioChild { child }))
    }
}

async fn relay_output<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::info!("[ft-server {}] {}", name, line),
            Ok(None) => break,
            Err(e) => {
                log::debug!("[Supervisor] Stopped relaying {}: {}", name, e);
                break;
            }
        }
    }
}

struct TokioChild {
    child: Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<ChildExit> {
        self.child.wait().await.map(ChildExit::from)
    }

    async fn terminate(&mut self, grace: Duration) -> io::Result<ChildExit> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status.into());
        }

        request_stop(&mut self.child)?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status.map(ChildExit::from),
            Err(_) => {
                log::warn!(
                    "[Supervisor] Display server ignored SIGTERM for {}ms, killing",
                    grace.as_millis()
                );
                self.child.kill().await?;
                self.child.wait().await.map(ChildExit::from)
            }
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: plain syscall on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        let err = io::Error::last_os_error();
        // Already gone between try_wait and kill.
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
