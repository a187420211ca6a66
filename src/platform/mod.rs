use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use thiserror::Error;
use wait_timeout::ChildExt;

use crate::core::{FailureKind, FailureSource, OsInfo, PartialFailure, ProcessEntry, Protocol, SocketEntry};
use crate::error::ScanError;

mod cancel;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod macos;
pub mod windows;

pub use cancel::{CancelToken, install_interrupt_handler, interrupted};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
    #[error("failed while waiting for {cmd}: {source}")]
    Wait {
        cmd: String,
        #[source]
        source: io::Error,
    },
    #[error("{cmd} timed out after {timeout:?}")]
    TimedOut { cmd: String, timeout: Duration },
    #[error("{cmd} was cancelled")]
    Cancelled { cmd: String },
}

impl CommandError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CommandError::Spawn { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => FailureKind::Unavailable,
                io::ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
                _ => FailureKind::CommandFailed,
            },
            CommandError::Wait { .. } => FailureKind::CommandFailed,
            CommandError::TimedOut { .. } => FailureKind::Timeout,
            CommandError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub(crate) fn into_failure(self, source: FailureSource) -> PartialFailure {
        PartialFailure::source(source, self.failure_kind(), self.to_string())
    }
}

/// Run an external command with stdin closed and both output streams
/// captured. The child is killed once `timeout` elapses or `cancel` fires.
pub fn run_command(
    cmd: &str,
    args: &[&str],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<CommandOutput, CommandError> {
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled {
            cmd: cmd.to_string(),
        });
    }

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            cmd: cmd.to_string(),
            source,
        })?;

    // Drain both pipes while waiting so a chatty child cannot block on a
    // full pipe buffer.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if cancel.is_cancelled() {
            kill(&mut child);
            return Err(CommandError::Cancelled {
                cmd: cmd.to_string(),
            });
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            kill(&mut child);
            return Err(CommandError::TimedOut {
                cmd: cmd.to_string(),
                timeout,
            });
        }
        match child.wait_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(Some(status)) => break status,
            Ok(None) => continue,
            Err(source) => {
                kill(&mut child);
                return Err(CommandError::Wait {
                    cmd: cmd.to_string(),
                    source,
                });
            }
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// A command that ran but exited non-zero.
pub(crate) fn exit_failure(source: FailureSource, cmd: &str, out: &CommandOutput) -> PartialFailure {
    let stderr = out.stderr.trim();
    let detail = if stderr.is_empty() {
        format!("{cmd} exited with {}", out.exit_code)
    } else {
        format!("{cmd} exited with {}: {stderr}", out.exit_code)
    };
    let kind = if stderr.to_ascii_lowercase().contains("permission denied")
        || stderr.to_ascii_lowercase().contains("access is denied")
    {
        FailureKind::PermissionDenied
    } else {
        FailureKind::CommandFailed
    };
    PartialFailure::source(source, kind, detail)
}

/// Deadline, protocol selection and cancellation shared by both readers.
#[derive(Debug, Clone)]
pub struct ReadContext {
    pub deadline: Instant,
    pub protocols: Vec<Protocol>,
    pub cancel: CancelToken,
}

impl ReadContext {
    pub fn new(timeout: Duration, protocols: Vec<Protocol>, cancel: CancelToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            protocols,
            cancel,
        }
    }

    pub fn wants(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Why the reader should stop now, if it should.
    pub fn interruption(&self) -> Option<FailureKind> {
        if self.cancel.is_cancelled() {
            Some(FailureKind::Cancelled)
        } else if self.remaining().is_zero() {
            Some(FailureKind::Timeout)
        } else {
            None
        }
    }

    pub fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        run_command(cmd, args, self.remaining(), &self.cancel)
    }
}

/// Result of reading one OS table. `failed` means nothing usable came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRead<T> {
    pub entries: Vec<T>,
    pub failures: Vec<PartialFailure>,
    pub failed: bool,
}

impl<T> Default for SourceRead<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            failures: Vec::new(),
            failed: false,
        }
    }
}

impl<T> SourceRead<T> {
    pub fn failure(source: FailureSource, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            failures: vec![PartialFailure::source(source, kind, detail)],
            failed: true,
        }
    }
}

pub type SocketRead = SourceRead<SocketEntry>;
pub type ProcessRead = SourceRead<ProcessEntry>;

/// Read-only access to the host's socket and process tables. One
/// implementation per supported OS; both reads must be safe to run
/// concurrently.
pub trait SystemTables: Sync {
    fn name(&self) -> &'static str;

    fn read_sockets(&self, ctx: &ReadContext) -> SocketRead;

    fn read_processes(&self, ctx: &ReadContext) -> ProcessRead;

    fn os_info(&self, _ctx: &ReadContext) -> OsInfo {
        OsInfo::unknown()
    }
}

/// Pick the table reader for an OS name as reported by
/// `std::env::consts::OS`.
pub fn detect(os: &str) -> Result<Box<dyn SystemTables>, ScanError> {
    match os {
        #[cfg(target_os = "linux")]
        "linux" => Ok(Box::new(linux::LinuxTables)),
        "macos" => Ok(Box::new(macos::MacosTables)),
        "windows" => Ok(Box::new(windows::WindowsTables)),
        other => Err(ScanError::Configuration(format!(
            "unsupported platform: {other}"
        ))),
    }
}

pub fn detect_current() -> Result<Box<dyn SystemTables>, ScanError> {
    detect(std::env::consts::OS)
}

#[derive(Debug, Clone)]
pub struct InvokingUser {
    pub uid: u32,
    pub home_dir: PathBuf,
}

/// The user behind `sudo`, so configuration is read from their home rather
/// than root's.
pub fn invoking_user() -> Option<InvokingUser> {
    let uid = std::env::var("SUDO_UID").ok()?.parse::<u32>().ok()?;
    let home_dir = home_dir_for_uid(uid)?;
    Some(InvokingUser { uid, home_dir })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    if let Some(user) = invoking_user() {
        return Ok(user.home_dir);
    }
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

#[cfg(unix)]
pub fn is_elevated() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

#[cfg(unix)]
fn passwd_field<T>(uid: u32, pick: impl FnOnce(&libc::passwd) -> Option<T>) -> Option<T> {
    unsafe {
        let bufsize = libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX);
        let bufsize = if bufsize <= 0 {
            16 * 1024
        } else {
            bufsize as usize
        };
        let mut buf = vec![0u8; bufsize];
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() {
            return None;
        }
        pick(&pwd)
    }
}

#[cfg(unix)]
fn cstr_field(ptr: *const libc::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let s = unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .to_string();
    if s.trim().is_empty() { None } else { Some(s) }
}

#[cfg(unix)]
fn home_dir_for_uid(uid: u32) -> Option<PathBuf> {
    passwd_field(uid, |pwd| cstr_field(pwd.pw_dir)).map(PathBuf::from)
}

#[cfg(not(unix))]
fn home_dir_for_uid(_uid: u32) -> Option<PathBuf> {
    None
}

#[cfg(unix)]
pub fn user_name_for_uid(uid: u32) -> Option<String> {
    passwd_field(uid, |pwd| cstr_field(pwd.pw_name))
}

#[cfg(not(unix))]
pub fn user_name_for_uid(_uid: u32) -> Option<String> {
    None
}
