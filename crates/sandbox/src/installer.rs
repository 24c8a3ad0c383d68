use nix::errno::Errno;

use crate::config::ResourceLimits;
use crate::error::{LimitError, LimitKind};

/// Installs resource ceilings on the calling process.
///
/// Called in a freshly forked child between `fork` and `exec`, so
/// implementations must stay async-signal-safe: no allocation, no locks,
/// no logging.
pub trait LimitInstaller: Send + Sync {
    fn apply(&self, limits: &ResourceLimits) -> Result<(), LimitError>;
}

/// Feed each ceiling to `set` in installation order (CPU, data, stack),
/// stopping at the first failure.
///
/// Backends plug their setter in here; tests plug in a recorder.
pub fn install_in_order<F>(limits: &ResourceLimits, mut set: F) -> Result<(), LimitError>
where
    F: FnMut(LimitKind, u64) -> Result<(), Errno>,
{
    for (kind, value) in limits.in_install_order() {
        set(kind, value).map_err(|errno| LimitError { kind, errno })?;
    }
    Ok(())
}
