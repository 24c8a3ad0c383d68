//! Append-only JSONL log of finished runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::output::RunRecord;

/// Append `record` as one JSON line to `path`, creating the file if needed.
///
/// Best effort: a log that can't be written never fails the run.
pub fn append_record(path: &Path, record: &RunRecord) {
    let line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "failed to serialize run record");
            return;
        }
    };

    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{line}"));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to append run record");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sandbox::{ExecConfig, Outcome, ResourceLimits, ResourceUsage, TerminationReport};

    use super::*;

    fn record(pid: i32) -> RunRecord {
        let limits = ResourceLimits::new(2, 1024 * 1024).unwrap();
        let config = ExecConfig::new("/bin/echo", ["echo", "hi"], limits);
        let report = TerminationReport {
            pid,
            outcome: Outcome::ExitedNormally { code: 0 },
            usage: ResourceUsage::default(),
            wall_time: Duration::from_millis(3),
            setup_failure: None,
        };
        RunRecord::new(&config, &report)
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");

        append_record(&path, &record(1));
        append_record(&path, &record(2));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["pid"], 1);
        assert_eq!(lines[1]["pid"], 2);
        assert_eq!(lines[1]["outcome"], "exited");
    }

    #[test]
    fn unwritable_path_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // A directory can't be opened for appending.
        append_record(dir.path(), &record(1));
    }
}
