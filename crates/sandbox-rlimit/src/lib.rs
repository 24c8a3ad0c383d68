//! POSIX backend for bounded runs.
//!
//! [`BoundedExecutor::spawn`] forks; the child installs its ceilings with
//! `setrlimit` and execs the target, the parent gets a [`ChildHandle`] whose
//! [`wait`](ChildHandle::wait) reaps the child and produces a
//! [`sandbox::TerminationReport`].

#[cfg(not(unix))]
compile_error!("sandbox-rlimit requires a Unix target (fork, setrlimit, wait4)");

mod executor;
mod limits;
mod process;

pub use executor::{BoundedExecutor, ChildHandle};
pub use limits::RlimitInstaller;
