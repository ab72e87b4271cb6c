//! # Process host: the OS-process collaborator seam.
//!
//! The supervisor manages workers through the narrow [`ProcessHost`]
//! contract — spawn a command and get back `{pid, stdio, exit-future}`, and
//! deliver a signal to a recorded pid. [`TokioProcessHost`] is the production
//! implementation on top of `tokio::process`; tests may substitute their own
//! host.
//!
//! ## Rules
//! - `send_signal` distinguishes "no such process" from every other OS
//!   failure: the former degrades to a no-op for idempotent termination.
//! - A recorded pid is only trustworthy within the supervisor process
//!   generation that spawned it; see crash recovery.

use std::process::Stdio;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::Command;

/// Signal the supervisor may deliver to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Graceful stop (`SIGTERM`); workers install a handler and exit cleanly.
    Terminate,
    /// Forced stop (`SIGKILL`).
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// # Failure to start a worker process.
#[derive(Error, Debug)]
#[error("failed to spawn '{command}': {source}")]
pub struct SpawnError {
    /// The command that failed to start.
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

/// # Failure to deliver a signal.
#[derive(Error, Debug)]
pub enum SignalError {
    /// The process no longer exists (it already exited).
    #[error("process not found")]
    ProcessNotFound,

    /// Any other OS-level delivery failure.
    #[error("signal delivery failed: {0}")]
    Os(std::io::Error),
}

/// How a worker process exited.
///
/// `code` is the exit code when the process exited normally; `signal` is set
/// when a signal caused the exit (Unix).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// A spawned worker process, as handed to the supervisor.
pub struct ProcessHandle {
    /// OS process id.
    pub pid: u32,
    /// Captured stdout, if the host pipes it.
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Captured stderr, if the host pipes it.
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Resolves exactly once, when the process exits.
    pub exit: BoxFuture<'static, ProcessExit>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Contract the supervisor requires from the process collaborator.
#[async_trait]
pub trait ProcessHost: Send + Sync + 'static {
    /// Starts `command args...` and returns its handle.
    async fn spawn(&self, command: &str, args: &[String]) -> Result<ProcessHandle, SpawnError>;

    /// Delivers `signal` to `pid`.
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError>;
}

/// Production host backed by `tokio::process`.
///
/// Workers are spawned with piped stdout/stderr and closed stdin; they are
/// *not* killed when the handle drops — the durable task row plus crash
/// recovery own the lifecycle, mirroring how an external process would
/// behave across supervisor restarts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessHost;

#[async_trait]
impl ProcessHost for TokioProcessHost {
    async fn spawn(&self, command: &str, args: &[String]) -> Result<ProcessHandle, SpawnError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| SpawnError {
                command: command.to_string(),
                source,
            })?;

        // id() is Some until the child has been reaped, which cannot have
        // happened yet.
        let pid = child.id().unwrap_or(0);
        let stdout = child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);
        let stderr = child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);

        let exit = async move {
            match child.wait().await {
                Ok(status) => ProcessExit {
                    code: status.code(),
                    signal: exit_signal(&status),
                },
                Err(_) => ProcessExit {
                    code: None,
                    signal: None,
                },
            }
        }
        .boxed();

        Ok(ProcessHandle {
            pid,
            stdout,
            stderr,
            exit,
        })
    }

    #[cfg(unix)]
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), SignalError> {
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(SignalError::ProcessNotFound),
            _ => Err(SignalError::Os(err)),
        }
    }

    #[cfg(not(unix))]
    fn send_signal(&self, _pid: u32, _signal: Signal) -> Result<(), SignalError> {
        Err(SignalError::Os(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "signal delivery is only supported on Unix",
        )))
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_reports_exit_code() {
        let host = TokioProcessHost;
        let handle = host
            .spawn("sh", &["-c".to_string(), "exit 7".to_string()])
            .await
            .expect("spawn");
        assert!(handle.pid > 0);

        let exit = handle.exit.await;
        assert_eq!(exit.code, Some(7));
        assert_eq!(exit.signal, None);
    }

    #[tokio::test]
    async fn signal_kill_is_reported_as_signal_exit() {
        let host = TokioProcessHost;
        let handle = host
            .spawn("sleep", &["30".to_string()])
            .await
            .expect("spawn");

        host.send_signal(handle.pid, Signal::Terminate)
            .expect("signal");
        let exit = handle.exit.await;
        assert_eq!(exit.code, None);
        assert_eq!(exit.signal, Some(libc::SIGTERM));
    }

    #[tokio::test]
    async fn signalling_an_exited_pid_is_process_not_found() {
        let host = TokioProcessHost;
        let handle = host
            .spawn("sh", &["-c".to_string(), "exit 0".to_string()])
            .await
            .expect("spawn");
        let pid = handle.pid;
        handle.exit.await;

        let err = host.send_signal(pid, Signal::Terminate).unwrap_err();
        assert!(matches!(err, SignalError::ProcessNotFound));
    }

    #[tokio::test]
    async fn spawn_failure_carries_the_command() {
        let host = TokioProcessHost;
        let err = host
            .spawn("definitely-not-a-real-binary-7f3a", &[])
            .await
            .unwrap_err();
        assert!(err.command.contains("definitely-not-a-real-binary"));
    }
}
