//! Human and JSON renderings of a [`TerminationReport`].

use nix::sys::signal::Signal;
use sandbox::{ExecConfig, Outcome, TerminationReport};
use serde::Serialize;

/// One finished run, as printed with `--json` and appended to the report log.
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub ts: String,
    pub program: String,
    pub argv: Vec<String>,
    pub limits: LimitsRecord,
    pub pid: i32,
    #[serde(flatten)]
    pub outcome: OutcomeRecord,
    pub wall_ms: u64,
    pub user_cpu_ms: u64,
    pub system_cpu_ms: u64,
    pub max_rss_kib: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LimitsRecord {
    pub cpu_seconds: u64,
    pub data_bytes: u64,
    pub stack_bytes: u64,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeRecord {
    Exited {
        code: i32,
    },
    Signaled {
        signal: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal_name: Option<&'static str>,
    },
    Unknown,
}

impl From<Outcome> for OutcomeRecord {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::ExitedNormally { code } => Self::Exited { code },
            Outcome::KilledBySignal { signal } => Self::Signaled {
                signal,
                signal_name: signal_name(signal),
            },
            Outcome::Unknown => Self::Unknown,
        }
    }
}

impl RunRecord {
    pub fn new(config: &ExecConfig, report: &TerminationReport) -> Self {
        let limits = config.limits();
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            program: config.program().display().to_string(),
            argv: config
                .argv()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
            limits: LimitsRecord {
                cpu_seconds: limits.cpu_seconds(),
                data_bytes: limits.data_bytes(),
                stack_bytes: limits.stack_bytes(),
            },
            pid: report.pid,
            outcome: report.outcome.into(),
            wall_ms: report.wall_time.as_millis() as u64,
            user_cpu_ms: report.usage.user_time.as_millis() as u64,
            system_cpu_ms: report.usage.system_time.as_millis() as u64,
            max_rss_kib: report.usage.max_rss_kib,
            setup_error: report.setup_failure.map(|f| f.to_string()),
        }
    }
}

pub fn signal_name(signal: i32) -> Option<&'static str> {
    Signal::try_from(signal).ok().map(Signal::as_str)
}

pub fn started_line(pid: i32) -> String {
    format!("child started (pid {pid})")
}

pub fn outcome_line(report: &TerminationReport) -> String {
    let pid = report.pid;
    match report.outcome {
        Outcome::ExitedNormally { code } => format!("child (pid {pid}) exited with status {code}"),
        Outcome::KilledBySignal { signal } => match signal_name(signal) {
            Some(name) => format!("child (pid {pid}) was killed by signal {signal} ({name})"),
            None => format!("child (pid {pid}) was killed by signal {signal}"),
        },
        Outcome::Unknown => format!("child (pid {pid}) ended in an unknown state"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sandbox::{ResourceLimits, ResourceUsage, SetupFailure};

    use super::*;

    fn report(outcome: Outcome) -> TerminationReport {
        TerminationReport {
            pid: 4242,
            outcome,
            usage: ResourceUsage {
                user_time: Duration::from_millis(1200),
                system_time: Duration::from_millis(30),
                max_rss_kib: 2048,
            },
            wall_time: Duration::from_millis(1500),
            setup_failure: None,
        }
    }

    fn config() -> ExecConfig {
        let limits = ResourceLimits::new(1, 50 * 1024 * 1024).unwrap();
        ExecConfig::new("/usr/bin/yes", ["/usr/bin/yes"], limits)
    }

    #[test]
    fn lines_match_outcome() {
        assert_eq!(started_line(7), "child started (pid 7)");
        assert_eq!(
            outcome_line(&report(Outcome::ExitedNormally { code: 0 })),
            "child (pid 4242) exited with status 0"
        );
        assert_eq!(
            outcome_line(&report(Outcome::KilledBySignal { signal: 9 })),
            "child (pid 4242) was killed by signal 9 (SIGKILL)"
        );
        assert_eq!(
            outcome_line(&report(Outcome::Unknown)),
            "child (pid 4242) ended in an unknown state"
        );
    }

    #[test]
    fn unnamed_signal_prints_number_only() {
        assert_eq!(
            outcome_line(&report(Outcome::KilledBySignal { signal: 250 })),
            "child (pid 4242) was killed by signal 250"
        );
    }

    #[test]
    fn record_serializes_signaled_run() {
        let record = RunRecord::new(&config(), &report(Outcome::KilledBySignal { signal: 24 }));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["program"], "/usr/bin/yes");
        assert_eq!(json["argv"][0], "/usr/bin/yes");
        assert_eq!(json["limits"]["cpu_seconds"], 1);
        assert_eq!(json["limits"]["data_bytes"], 50 * 1024 * 1024);
        assert_eq!(json["limits"]["stack_bytes"], 8 * 1024 * 1024);
        assert_eq!(json["pid"], 4242);
        assert_eq!(json["outcome"], "signaled");
        assert_eq!(json["signal"], 24);
        assert_eq!(json["signal_name"], "SIGXCPU");
        assert_eq!(json["wall_ms"], 1500);
        assert_eq!(json["user_cpu_ms"], 1200);
        assert_eq!(json["system_cpu_ms"], 30);
        assert_eq!(json["max_rss_kib"], 2048);
        assert!(json.get("setup_error").is_none()); // omitted when None
        assert!(json["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn record_serializes_setup_failure() {
        let mut failed = report(Outcome::ExitedNormally { code: 127 });
        failed.setup_failure = Some(SetupFailure::Exec(nix::errno::Errno::ENOENT));
        let json = serde_json::to_value(RunRecord::new(&config(), &failed)).unwrap();
        assert_eq!(json["outcome"], "exited");
        assert_eq!(json["code"], 127);
        assert!(
            json["setup_error"].as_str().unwrap().contains("ENOENT"),
            "setup_error was {}",
            json["setup_error"]
        );
    }

    #[test]
    fn unknown_outcome_serializes_tag_only() {
        let json = serde_json::to_value(OutcomeRecord::from(Outcome::Unknown)).unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "unknown" }));
    }
}
