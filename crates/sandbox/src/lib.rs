//! Backend-neutral vocabulary for running one program under resource ceilings.
//!
//! Backends (see `sandbox-rlimit`) implement the process mechanics; callers
//! only deal with [`ExecConfig`] in and [`TerminationReport`] out.

mod config;
mod error;
mod installer;
mod types;

pub use config::{DEFAULT_STACK_BYTES, ExecConfig, ResourceLimits, Stdio};
pub use error::{LimitError, LimitKind, Result, SandboxError};
pub use installer::{LimitInstaller, install_in_order};
pub use types::{
    EXIT_EXEC_FAILED, EXIT_LIMIT_FAILED, EXIT_NOT_FOUND, Outcome, ResourceUsage, SetupFailure,
    TerminationReport,
};
