//! Child side of a bounded run: everything between `fork` and `exec`.
//!
//! The child is a copy of a possibly multi-threaded parent, so it only makes
//! async-signal-safe calls. Strings, pointer arrays and `/dev/null`
//! descriptors are all prepared in the parent before the fork.

use std::convert::Infallible;
use std::ffi::{CString, OsStr};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::sys::signal::{SigHandler, SigSet, SigmaskHow, Signal, signal, sigprocmask};
use nix::unistd::write;
use sandbox::{
    ExecConfig, LimitError, LimitInstaller, LimitKind, ResourceLimits, Result, SandboxError,
    SetupFailure, Stdio,
};

/// Size of a failure record on the status pipe.
pub(crate) const RECORD_LEN: usize = 8;

const TAG_CPU: i32 = 1;
const TAG_DATA: i32 = 2;
const TAG_STACK: i32 = 3;
const TAG_EXEC: i32 = 4;

/// Program and argument vector in the form `execvp` takes them.
pub(crate) struct ExecImage {
    program: CString,
    /// Owns the strings `argv_ptrs` points into.
    _argv: Vec<CString>,
    /// NULL-terminated.
    argv_ptrs: Vec<*const libc::c_char>,
}

impl ExecImage {
    pub(crate) fn new(config: &ExecConfig) -> Result<Self> {
        let program = to_cstring(config.program().as_os_str())?;
        let argv = config
            .argv()
            .iter()
            .map(|arg| to_cstring(arg))
            .collect::<Result<Vec<_>>>()?;
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        Ok(Self {
            program,
            _argv: argv,
            argv_ptrs,
        })
    }

    /// Replace the current process image. Only ever returns on failure.
    fn exec(&self) -> std::result::Result<Infallible, Errno> {
        // SAFETY: `program` and every `argv_ptrs` entry point at live
        // NUL-terminated strings owned by `self`, and the array ends in NULL.
        unsafe { libc::execvp(self.program.as_ptr(), self.argv_ptrs.as_ptr()) };
        Err(Errno::last())
    }
}

fn to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| {
        SandboxError::InvalidArgument(format!("{:?} contains a NUL byte", s.to_string_lossy()))
    })
}

/// `/dev/null` descriptors for streams the caller asked to discard.
pub(crate) struct Redirects {
    stdout: Option<File>,
    stderr: Option<File>,
}

impl Redirects {
    pub(crate) fn open(config: &ExecConfig) -> Result<Self> {
        Ok(Self {
            stdout: open_target(config.stdout_mode())?,
            stderr: open_target(config.stderr_mode())?,
        })
    }

    fn apply(&self) -> std::result::Result<(), Errno> {
        let targets = [
            (&self.stdout, libc::STDOUT_FILENO),
            (&self.stderr, libc::STDERR_FILENO),
        ];
        for (file, target) in targets {
            if let Some(file) = file {
                // SAFETY: both descriptors are open; dup2 has no memory effects.
                if unsafe { libc::dup2(file.as_raw_fd(), target) } == -1 {
                    return Err(Errno::last());
                }
            }
        }
        Ok(())
    }
}

fn open_target(stdio: Stdio) -> Result<Option<File>> {
    match stdio {
        Stdio::Inherit => Ok(None),
        Stdio::Null => Ok(Some(OpenOptions::new().write(true).open("/dev/null")?)),
    }
}

/// Body of the forked child: restore default signal handling, point the
/// streams where the caller asked, install the ceilings, then become the
/// target program. Any failure is written to `status` and ends the child with
/// a reserved exit code; the program never runs without its ceilings.
pub(crate) fn exec_bounded<I: LimitInstaller>(
    installer: &I,
    limits: &ResourceLimits,
    image: &ExecImage,
    redirects: &Redirects,
    unblocked: &SigSet,
    status: OwnedFd,
) -> ! {
    if let Err(errno) = reset_signals(unblocked) {
        fail(&status, SetupFailure::Exec(errno));
    }
    if let Err(errno) = redirects.apply() {
        fail(&status, SetupFailure::Exec(errno));
    }
    if let Err(e) = installer.apply(limits) {
        fail(&status, SetupFailure::Limit(e));
    }
    let Err(errno) = image.exec();
    fail(&status, SetupFailure::Exec(errno))
}

/// Ignored dispositions and the blocked mask survive exec. The Rust runtime
/// ignores SIGPIPE, so put it back before the target inherits it.
fn reset_signals(unblocked: &SigSet) -> std::result::Result<(), Errno> {
    // SAFETY: SIG_DFL installs no handler code in this process.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }?;
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(unblocked), None)
}

fn fail(status: &OwnedFd, failure: SetupFailure) -> ! {
    let _ = write(status, &encode(failure));

    let stderr = std::io::stderr();
    let _ = write(&stderr, b"sandbox: ");
    match failure {
        SetupFailure::Limit(LimitError { kind, errno }) => {
            let _ = write(&stderr, b"failed to set ");
            let _ = write(&stderr, kind.resource_name().as_bytes());
            let _ = write(&stderr, b": ");
            let _ = write(&stderr, errno.desc().as_bytes());
        }
        SetupFailure::Exec(errno) => {
            let _ = write(&stderr, b"exec failed: ");
            let _ = write(&stderr, errno.desc().as_bytes());
        }
    }
    let _ = write(&stderr, b"\n");

    // SAFETY: _exit skips atexit handlers and stdio flushing, which belong to
    // the parent image this child was copied from.
    unsafe { libc::_exit(failure.exit_code()) }
}

/// Status pipe record: failure tag then errno, native endian.
pub(crate) fn encode(failure: SetupFailure) -> [u8; RECORD_LEN] {
    let (tag, errno) = match failure {
        SetupFailure::Limit(LimitError { kind, errno }) => {
            let tag = match kind {
                LimitKind::Cpu => TAG_CPU,
                LimitKind::Data => TAG_DATA,
                LimitKind::Stack => TAG_STACK,
            };
            (tag, errno)
        }
        SetupFailure::Exec(errno) => (TAG_EXEC, errno),
    };
    let [a, b, c, d] = tag.to_ne_bytes();
    let [e, f, g, h] = (errno as i32).to_ne_bytes();
    [a, b, c, d, e, f, g, h]
}

/// Inverse of [`encode`]; `None` for anything that isn't a whole record.
pub(crate) fn decode(buf: &[u8]) -> Option<SetupFailure> {
    let record: &[u8; RECORD_LEN] = buf.try_into().ok()?;
    let (tag, rest) = record.split_first_chunk::<4>()?;
    let errno = Errno::from_raw(i32::from_ne_bytes(*rest.first_chunk::<4>()?));
    let kind = match i32::from_ne_bytes(*tag) {
        TAG_CPU => LimitKind::Cpu,
        TAG_DATA => LimitKind::Data,
        TAG_STACK => LimitKind::Stack,
        TAG_EXEC => return Some(SetupFailure::Exec(errno)),
        _ => return None,
    };
    Some(SetupFailure::Limit(LimitError { kind, errno }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits::new(1, 1024 * 1024).unwrap()
    }

    #[test]
    fn limit_failure_survives_the_pipe() {
        let failure = SetupFailure::Limit(LimitError {
            kind: LimitKind::Stack,
            errno: Errno::EPERM,
        });
        assert_eq!(decode(&encode(failure)), Some(failure));
    }

    #[test]
    fn exec_failure_survives_the_pipe() {
        let failure = SetupFailure::Exec(Errno::ENOENT);
        assert_eq!(decode(&encode(failure)), Some(failure));
    }

    #[test]
    fn decode_rejects_short_and_unknown_records() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[1, 0, 0]), None);

        let mut bogus = encode(SetupFailure::Exec(Errno::EACCES));
        bogus[..4].copy_from_slice(&99i32.to_ne_bytes());
        assert_eq!(decode(&bogus), None);
    }

    #[test]
    fn image_is_null_terminated() {
        let config = ExecConfig::new("/bin/echo", ["echo", "hi"], limits());
        let image = ExecImage::new(&config).unwrap();
        assert_eq!(image.program.as_bytes(), b"/bin/echo");
        assert_eq!(image.argv_ptrs.len(), 3);
        assert!(image.argv_ptrs[2].is_null());
    }

    #[test]
    fn nul_bytes_are_rejected_before_fork() {
        let config = ExecConfig::new("/bin/echo", ["echo", "a\0b"], limits());
        let err = ExecImage::new(&config).err().unwrap();
        assert!(matches!(err, SandboxError::InvalidArgument(_)));
    }

    #[test]
    fn inherit_opens_nothing() {
        let config = ExecConfig::new("/bin/true", ["true"], limits());
        let redirects = Redirects::open(&config).unwrap();
        assert!(redirects.stdout.is_none());
        assert!(redirects.stderr.is_none());
    }

    #[test]
    fn null_opens_dev_null() {
        let config = ExecConfig::new("/bin/true", ["true"], limits()).stderr(Stdio::Null);
        let redirects = Redirects::open(&config).unwrap();
        assert!(redirects.stdout.is_none());
        assert!(redirects.stderr.is_some());
    }
}
