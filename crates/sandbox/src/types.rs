use std::time::Duration;

use nix::errno::Errno;

use crate::error::{LimitError, Result, SandboxError};

/// Exit code of a child that could not install its ceilings.
pub const EXIT_LIMIT_FAILED: i32 = 125;
/// Exit code of a child whose program exists but could not be executed.
pub const EXIT_EXEC_FAILED: i32 = 126;
/// Exit code of a child whose program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// How a bounded child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Returned from `main` or called `exit`.
    ExitedNormally { code: i32 },
    /// Terminated by a signal, e.g. `SIGXCPU`/`SIGKILL` from the CPU ceiling.
    KilledBySignal { signal: i32 },
    /// Stopped or continued; not expected from a blocking wait.
    Unknown,
}

/// Resources the child consumed, as reported by the kernel on reap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    /// Peak resident set size in KiB.
    pub max_rss_kib: u64,
}

impl ResourceUsage {
    /// Total CPU time (user + system), the quantity `RLIMIT_CPU` bounds.
    pub fn cpu_time(&self) -> Duration {
        self.user_time + self.system_time
    }
}

/// Which step failed inside the child before the target program ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFailure {
    Limit(LimitError),
    Exec(Errno),
}

impl SetupFailure {
    /// The exit code the child uses when this step fails.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Limit(_) => EXIT_LIMIT_FAILED,
            Self::Exec(Errno::ENOENT) => EXIT_NOT_FOUND,
            Self::Exec(_) => EXIT_EXEC_FAILED,
        }
    }
}

impl std::fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit(e) => write!(f, "{e}"),
            Self::Exec(errno) => write!(f, "exec failed: {errno}"),
        }
    }
}

/// Final report for one bounded run. Produced once, by the wait step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    pub pid: i32,
    pub outcome: Outcome,
    pub usage: ResourceUsage,
    pub wall_time: Duration,
    /// Set when the child failed before the target program replaced it.
    pub setup_failure: Option<SetupFailure>,
}

impl TerminationReport {
    pub fn success(&self) -> bool {
        self.setup_failure.is_none() && self.outcome == Outcome::ExitedNormally { code: 0 }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            Outcome::ExitedNormally { code } => Some(code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self.outcome {
            Outcome::KilledBySignal { signal } => Some(signal),
            _ => None,
        }
    }

    /// Shell-style status: the exit code, or `128 + signal` for a signaled child.
    pub fn shell_status(&self) -> i32 {
        match self.outcome {
            Outcome::ExitedNormally { code } => code,
            Outcome::KilledBySignal { signal } => 128 + signal,
            Outcome::Unknown => 1,
        }
    }

    /// Turn a recorded setup failure into the matching typed error.
    pub fn into_result(self, program: impl Into<String>) -> Result<Self> {
        match self.setup_failure {
            None => Ok(self),
            Some(SetupFailure::Limit(source)) => Err(SandboxError::Limit {
                pid: self.pid,
                source,
            }),
            Some(SetupFailure::Exec(errno)) => Err(SandboxError::Exec {
                pid: self.pid,
                program: program.into(),
                errno,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitKind;

    fn report(outcome: Outcome) -> TerminationReport {
        TerminationReport {
            pid: 42,
            outcome,
            usage: ResourceUsage::default(),
            wall_time: Duration::from_millis(5),
            setup_failure: None,
        }
    }

    #[test]
    fn shell_status_maps_signals() {
        assert_eq!(report(Outcome::ExitedNormally { code: 3 }).shell_status(), 3);
        assert_eq!(report(Outcome::KilledBySignal { signal: 9 }).shell_status(), 137);
        assert_eq!(report(Outcome::Unknown).shell_status(), 1);
    }

    #[test]
    fn accessors_follow_outcome() {
        let exited = report(Outcome::ExitedNormally { code: 0 });
        assert!(exited.success());
        assert_eq!(exited.exit_code(), Some(0));
        assert_eq!(exited.signal(), None);

        let killed = report(Outcome::KilledBySignal { signal: 24 });
        assert!(!killed.success());
        assert_eq!(killed.exit_code(), None);
        assert_eq!(killed.signal(), Some(24));
    }

    #[test]
    fn setup_failure_exit_codes_are_distinct() {
        let limit = SetupFailure::Limit(LimitError {
            kind: LimitKind::Cpu,
            errno: Errno::EPERM,
        });
        assert_eq!(limit.exit_code(), EXIT_LIMIT_FAILED);
        assert_eq!(SetupFailure::Exec(Errno::ENOENT).exit_code(), EXIT_NOT_FOUND);
        assert_eq!(SetupFailure::Exec(Errno::EACCES).exit_code(), EXIT_EXEC_FAILED);
    }

    #[test]
    fn into_result_passes_clean_reports_through() {
        let clean = report(Outcome::KilledBySignal { signal: 24 });
        assert_eq!(clean.clone().into_result("yes").unwrap(), clean);
    }

    #[test]
    fn into_result_surfaces_limit_failure() {
        let mut failed = report(Outcome::ExitedNormally {
            code: EXIT_LIMIT_FAILED,
        });
        failed.setup_failure = Some(SetupFailure::Limit(LimitError {
            kind: LimitKind::Stack,
            errno: Errno::EINVAL,
        }));
        let err = failed.into_result("prog").unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Limit {
                pid: 42,
                source: LimitError {
                    kind: LimitKind::Stack,
                    errno: Errno::EINVAL
                }
            }
        ));
    }

    #[test]
    fn into_result_surfaces_exec_failure() {
        let mut failed = report(Outcome::ExitedNormally {
            code: EXIT_NOT_FOUND,
        });
        failed.setup_failure = Some(SetupFailure::Exec(Errno::ENOENT));
        match failed.into_result("/no/such/bin") {
            Err(SandboxError::Exec { program, errno, .. }) => {
                assert_eq!(program, "/no/such/bin");
                assert_eq!(errno, Errno::ENOENT);
            }
            other => panic!("expected exec error, got {other:?}"),
        }
    }
}
