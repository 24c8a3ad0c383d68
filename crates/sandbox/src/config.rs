use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::{LimitKind, Result, SandboxError};

/// Stack ceiling applied unless the caller picks another one (8 MiB).
pub const DEFAULT_STACK_BYTES: u64 = 8 * 1024 * 1024;

/// Ceilings for a single bounded run.
///
/// Every value is positive; the constructors reject anything else so a zero
/// ceiling can never reach the child, where an immediate kill would look the
/// same as a setup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    cpu_seconds: u64,
    data_bytes: u64,
    stack_bytes: u64,
}

impl ResourceLimits {
    pub fn new(cpu_seconds: u64, data_bytes: u64) -> Result<Self> {
        let limits = Self {
            cpu_seconds: positive(LimitKind::Cpu, cpu_seconds)?,
            data_bytes: positive(LimitKind::Data, data_bytes)?,
            stack_bytes: DEFAULT_STACK_BYTES,
        };
        Ok(limits)
    }

    /// Build limits from signed input (CLI flags, config files), rejecting
    /// zero and negative values with [`SandboxError::InvalidLimit`].
    pub fn from_signed(cpu_seconds: i64, data_bytes: i64) -> Result<Self> {
        Self::new(
            non_negative(LimitKind::Cpu, cpu_seconds)?,
            non_negative(LimitKind::Data, data_bytes)?,
        )
    }

    /// Replace the default 8 MiB stack ceiling.
    pub fn with_stack_bytes(mut self, stack_bytes: u64) -> Result<Self> {
        self.stack_bytes = positive(LimitKind::Stack, stack_bytes)?;
        Ok(self)
    }

    pub fn cpu_seconds(&self) -> u64 {
        self.cpu_seconds
    }

    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn stack_bytes(&self) -> u64 {
        self.stack_bytes
    }

    /// Ceilings in installation order: CPU, then data, then stack.
    pub fn in_install_order(&self) -> [(LimitKind, u64); 3] {
        [
            (LimitKind::Cpu, self.cpu_seconds),
            (LimitKind::Data, self.data_bytes),
            (LimitKind::Stack, self.stack_bytes),
        ]
    }
}

fn positive(kind: LimitKind, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(SandboxError::InvalidLimit { kind, value: 0 });
    }
    Ok(value)
}

fn non_negative(kind: LimitKind, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| SandboxError::InvalidLimit { kind, value })
}

/// Where a child's standard stream goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stdio {
    /// Share the orchestrator's descriptor.
    #[default]
    Inherit,
    /// Redirect to `/dev/null`.
    Null,
}

/// Everything needed to start one bounded child.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    program: PathBuf,
    argv: Vec<OsString>,
    limits: ResourceLimits,
    stdout: Stdio,
    stderr: Stdio,
}

impl ExecConfig {
    /// `argv` is the full argument vector, `argv[0]` included. An empty
    /// vector falls back to `[program]`.
    pub fn new<I, S>(program: impl AsRef<Path>, argv: I, limits: ResourceLimits) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref().to_path_buf();
        let mut argv: Vec<OsString> = argv.into_iter().map(|a| a.as_ref().to_owned()).collect();
        if argv.is_empty() {
            argv.push(program.clone().into_os_string());
        }
        Self {
            program,
            argv,
            limits,
            stdout: Stdio::Inherit,
            stderr: Stdio::Inherit,
        }
    }

    pub fn stdout(mut self, stdio: Stdio) -> Self {
        self.stdout = stdio;
        self
    }

    pub fn stderr(mut self, stdio: Stdio) -> Self {
        self.stderr = stdio;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn stdout_mode(&self) -> Stdio {
        self.stdout
    }

    pub fn stderr_mode(&self) -> Stdio {
        self.stderr
    }
}
