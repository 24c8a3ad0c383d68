use std::path::Path;

use sandbox::{LimitKind, ResourceLimits, SandboxError};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};
use crate::size::ByteSize;

pub(crate) const DEFAULT_CPU_SECONDS: i64 = 2;
pub(crate) const DEFAULT_MEMORY_BYTES: i64 = 100 * 1024 * 1024;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub limits: LimitsConfig,
}

/// Ceilings as they appear in a config file or on the command line. Unset
/// fields fall through to the next layer (flags → file → built-in defaults).
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub cpu_seconds: Option<i64>,
    pub memory: Option<ByteSize>,
    pub stack: Option<ByteSize>,
}

impl LimitsConfig {
    /// Fields set on `self` win; the rest come from `base`.
    pub fn over(self, base: &LimitsConfig) -> LimitsConfig {
        LimitsConfig {
            cpu_seconds: self.cpu_seconds.or(base.cpu_seconds),
            memory: self.memory.or(base.memory),
            stack: self.stack.or(base.stack),
        }
    }

    /// Validate and fill in defaults.
    pub fn resolve(&self) -> RunnerResult<ResourceLimits> {
        let cpu = self.cpu_seconds.unwrap_or(DEFAULT_CPU_SECONDS);
        let memory = self.memory.map_or(DEFAULT_MEMORY_BYTES, |m| m.0);
        let limits = ResourceLimits::from_signed(cpu, memory)?;
        let Some(ByteSize(stack)) = self.stack else {
            return Ok(limits);
        };
        let stack = u64::try_from(stack).map_err(|_| SandboxError::InvalidLimit {
            kind: LimitKind::Stack,
            value: stack,
        })?;
        Ok(limits.with_stack_bytes(stack)?)
    }
}

/// Load a runner config from a YAML file.
pub fn load(path: &Path) -> RunnerResult<RunnerConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RunnerError::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| RunnerError::Config(format!("parse {}: {e}", path.display())))
}
