//! `setrlimit`-backed [`LimitInstaller`].

use nix::sys::resource::{Resource, setrlimit};
use sandbox::{LimitError, LimitInstaller, LimitKind, ResourceLimits, install_in_order};

/// Installs the ceilings on the current process with `setrlimit(2)`,
/// soft and hard limits set to the same value.
///
/// Only meant to run inside a bounded child: the limits can't be raised
/// again once lowered.
#[derive(Debug, Clone, Copy, Default)]
pub struct RlimitInstaller;

impl LimitInstaller for RlimitInstaller {
    fn apply(&self, limits: &ResourceLimits) -> Result<(), LimitError> {
        install_in_order(limits, |kind, value| {
            let value = value as libc::rlim_t;
            setrlimit(resource_for(kind), value, value)
        })
    }
}

fn resource_for(kind: LimitKind) -> Resource {
    match kind {
        LimitKind::Cpu => Resource::RLIMIT_CPU,
        LimitKind::Data => Resource::RLIMIT_DATA,
        LimitKind::Stack => Resource::RLIMIT_STACK,
    }
}
