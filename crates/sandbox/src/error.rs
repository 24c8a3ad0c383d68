use nix::errno::Errno;

/// One of the ceilings installed on a bounded child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// CPU time in seconds (`RLIMIT_CPU`).
    Cpu,
    /// Data segment size in bytes (`RLIMIT_DATA`).
    Data,
    /// Stack size in bytes (`RLIMIT_STACK`).
    Stack,
}

impl LimitKind {
    /// Name of the underlying rlimit resource.
    pub fn resource_name(self) -> &'static str {
        match self {
            Self::Cpu => "RLIMIT_CPU",
            Self::Data => "RLIMIT_DATA",
            Self::Stack => "RLIMIT_STACK",
        }
    }
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("CPU time"),
            Self::Data => f.write_str("data segment"),
            Self::Stack => f.write_str("stack size"),
        }
    }
}

/// Installing a single ceiling failed.
///
/// `Copy` and allocation-free so it can be produced and reported from a
/// freshly forked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("failed to set {kind} limit: {errno}")]
pub struct LimitError {
    pub kind: LimitKind,
    pub errno: Errno,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid {kind} limit: {value} (must be positive)")]
    InvalidLimit { kind: LimitKind, value: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to create child process: {0}")]
    Spawn(Errno),

    #[error("child {pid}: {source}")]
    Limit {
        pid: i32,
        #[source]
        source: LimitError,
    },

    #[error("child {pid}: failed to exec {program}: {errno}")]
    Exec { pid: i32, program: String, errno: Errno },

    #[error("failed to wait for child {pid}: {errno}")]
    Wait { pid: i32, errno: Errno },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
