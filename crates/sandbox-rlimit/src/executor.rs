use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{SigSet, Signal, kill};
use nix::unistd::{ForkResult, Pid, fork, pipe2};
use sandbox::{
    ExecConfig, LimitInstaller, Outcome, ResourceLimits, ResourceUsage, Result, SandboxError,
    SetupFailure, TerminationReport,
};
use tracing::{debug, info, warn};

use crate::limits::RlimitInstaller;
use crate::process::{self, ExecImage, RECORD_LEN, Redirects};

/// Runs one external program at a time under CPU, memory and stack ceilings.
///
/// Every call forks a fresh child; nothing is shared between runs, so one
/// executor can be used from several threads at once.
#[derive(Debug, Default)]
pub struct BoundedExecutor<I = RlimitInstaller> {
    installer: I,
}

impl BoundedExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<I: LimitInstaller> BoundedExecutor<I> {
    /// Use a custom installer, e.g. one that fails on purpose in tests.
    pub fn with_installer(installer: I) -> Self {
        Self { installer }
    }

    /// Run `program` with `argv` to completion and report how it ended.
    ///
    /// Limits are validated before anything is forked. A child that fails to
    /// install its ceilings or to exec is reaped and surfaces as
    /// [`SandboxError::Limit`] or [`SandboxError::Exec`].
    pub fn run<S: AsRef<OsStr>>(
        &self,
        program: impl AsRef<Path>,
        argv: &[S],
        cpu_seconds: u64,
        data_bytes: u64,
    ) -> Result<TerminationReport> {
        let limits = ResourceLimits::new(cpu_seconds, data_bytes)?;
        self.run_config(&ExecConfig::new(program, argv, limits))
    }

    pub fn run_config(&self, config: &ExecConfig) -> Result<TerminationReport> {
        let child = self.spawn(config)?;
        let report = child.wait()?;
        report.into_result(config.program().display().to_string())
    }

    /// Fork a child that installs the ceilings and execs the program.
    ///
    /// Returns as soon as the child exists. The caller owns the handle and
    /// must [`ChildHandle::wait`] on it to reap the child.
    pub fn spawn(&self, config: &ExecConfig) -> Result<ChildHandle> {
        let image = ExecImage::new(config)?;
        let redirects = Redirects::open(config)?;
        let limits = *config.limits();
        let unblocked = SigSet::empty();
        let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC).map_err(SandboxError::Spawn)?;

        // SAFETY: the child branch only calls async-signal-safe functions
        // (signal, sigprocmask, dup2, setrlimit, write, execvp, _exit) on data
        // prepared above.
        match unsafe { fork() }.map_err(SandboxError::Spawn)? {
            ForkResult::Child => {
                drop(status_read);
                process::exec_bounded(
                    &self.installer,
                    &limits,
                    &image,
                    &redirects,
                    &unblocked,
                    status_write,
                )
            }
            ForkResult::Parent { child } => {
                drop(status_write);
                info!(
                    pid = child.as_raw(),
                    program = %config.program().display(),
                    cpu_seconds = limits.cpu_seconds(),
                    data_bytes = limits.data_bytes(),
                    stack_bytes = limits.stack_bytes(),
                    "child started"
                );
                Ok(ChildHandle {
                    pid: child,
                    status_pipe: File::from(status_read),
                    started: Instant::now(),
                    reaped: false,
                })
            }
        }
    }
}

/// A live bounded child. Owned by the process that forked it.
///
/// Dropping a handle that was never waited on kills and reaps the child.
#[derive(Debug)]
#[must_use = "a bounded child must be waited on"]
pub struct ChildHandle {
    pid: Pid,
    status_pipe: File,
    started: Instant,
    reaped: bool,
}

impl ChildHandle {
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Block until the child exits or is killed, then classify the result.
    ///
    /// No timeout: the CPU ceiling bounds compute, but a child blocked on
    /// I/O keeps this call waiting.
    pub fn wait(mut self) -> Result<TerminationReport> {
        let pid = self.pid.as_raw();
        let waited = wait_for(self.pid);
        self.reaped = true;
        let (status, usage) = waited.map_err(|errno| SandboxError::Wait { pid, errno })?;
        let wall_time = self.started.elapsed();
        let setup_failure = self.read_setup_failure();

        let report = TerminationReport {
            pid,
            outcome: classify(status),
            usage,
            wall_time,
            setup_failure,
        };
        log_report(&report);
        Ok(report)
    }

    /// The child is already reaped, so every write end is closed and this
    /// read cannot block.
    fn read_setup_failure(&mut self) -> Option<SetupFailure> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        if let Err(e) = self.status_pipe.read_to_end(&mut buf) {
            warn!(pid = self.pid.as_raw(), error = %e, "failed to read child status pipe");
            return None;
        }
        if buf.is_empty() {
            return None;
        }
        let failure = process::decode(&buf);
        if failure.is_none() {
            warn!(pid = self.pid.as_raw(), len = buf.len(), "malformed child status record");
        }
        failure
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        let pid = self.pid.as_raw();
        warn!(pid, "child handle dropped before wait; killing child");
        if let Err(errno) = kill(self.pid, Signal::SIGKILL) {
            debug!(pid, %errno, "kill on drop failed");
        }
        if let Err(errno) = wait_for(self.pid) {
            warn!(pid, %errno, "failed to reap dropped child");
        }
    }
}

/// `wait4` for one specific child, retrying on `EINTR`.
fn wait_for(pid: Pid) -> std::result::Result<(libc::c_int, ResourceUsage), Errno> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; all-zero is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: status and usage are valid for writes for the whole call.
        let ret = unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut usage) };
        if ret != -1 {
            break;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            errno => return Err(errno),
        }
    }
    Ok((status, usage_from(&usage)))
}

fn usage_from(usage: &libc::rusage) -> ResourceUsage {
    ResourceUsage {
        user_time: duration_from(&usage.ru_utime),
        system_time: duration_from(&usage.ru_stime),
        max_rss_kib: u64::try_from(usage.ru_maxrss).unwrap_or(0),
    }
}

fn duration_from(tv: &libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u64::try_from(tv.tv_usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// Map a raw wait status onto an [`Outcome`].
fn classify(status: libc::c_int) -> Outcome {
    if libc::WIFEXITED(status) {
        Outcome::ExitedNormally {
            code: libc::WEXITSTATUS(status),
        }
    } else if libc::WIFSIGNALED(status) {
        Outcome::KilledBySignal {
            signal: libc::WTERMSIG(status),
        }
    } else {
        Outcome::Unknown
    }
}

fn log_report(report: &TerminationReport) {
    let cpu_ms = report.usage.cpu_time().as_millis() as u64;
    let wall_ms = report.wall_time.as_millis() as u64;
    if let Some(failure) = &report.setup_failure {
        warn!(pid = report.pid, error = %failure, "child failed before exec");
        return;
    }
    match report.outcome {
        Outcome::ExitedNormally { code } => {
            info!(pid = report.pid, code, cpu_ms, wall_ms, "child exited");
        }
        Outcome::KilledBySignal { signal } => {
            info!(pid = report.pid, signal, cpu_ms, wall_ms, "child killed by signal");
        }
        Outcome::Unknown => {
            debug!(pid = report.pid, "child ended in an unexpected wait state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Raw statuses as the kernel encodes them: exit code in bits 8..16,
    // terminating signal in the low 7 bits, 0x7f marks a stopped child.
    #[test]
    fn classify_normal_exit() {
        assert_eq!(classify(0), Outcome::ExitedNormally { code: 0 });
        assert_eq!(classify(3 << 8), Outcome::ExitedNormally { code: 3 });
        assert_eq!(classify(127 << 8), Outcome::ExitedNormally { code: 127 });
    }

    #[test]
    fn classify_signal() {
        assert_eq!(
            classify(libc::SIGKILL),
            Outcome::KilledBySignal {
                signal: libc::SIGKILL
            }
        );
        assert_eq!(
            classify(libc::SIGXCPU),
            Outcome::KilledBySignal {
                signal: libc::SIGXCPU
            }
        );
        // Core dump flag does not change the signal.
        assert_eq!(
            classify(libc::SIGSEGV | 0x80),
            Outcome::KilledBySignal {
                signal: libc::SIGSEGV
            }
        );
    }

    #[test]
    fn classify_stopped_is_unknown() {
        assert_eq!(classify((libc::SIGSTOP << 8) | 0x7f), Outcome::Unknown);
    }

    #[test]
    fn duration_from_timeval() {
        let tv = libc::timeval {
            tv_sec: 2,
            tv_usec: 500_000,
        };
        assert_eq!(duration_from(&tv), Duration::from_millis(2500));
    }

    #[test]
    fn wait_on_a_stranger_fails() {
        // PID 1 is never our child.
        let err = wait_for(Pid::from_raw(1)).unwrap_err();
        assert_eq!(err, Errno::ECHILD);
    }
}
