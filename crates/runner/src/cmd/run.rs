use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use sandbox::{ExecConfig, Stdio};
use sandbox_rlimit::BoundedExecutor;
use tracing::error;

use crate::config::{self, LimitsConfig, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::output::{self, RunRecord};
use crate::size::ByteSize;
use crate::telemetry;

#[derive(Args)]
pub struct RunArgs {
    /// Path to a runner.yaml with default limits
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// CPU time ceiling in seconds [default: 2]
    #[arg(long, allow_negative_numbers = true)]
    cpu: Option<i64>,
    /// Data segment ceiling, e.g. 100MiB [default: 100MiB]
    #[arg(long, allow_hyphen_values = true)]
    memory: Option<ByteSize>,
    /// Stack ceiling, e.g. 8MiB [default: 8MiB]
    #[arg(long, allow_hyphen_values = true)]
    stack: Option<ByteSize>,
    /// Print the report as one JSON object instead of text lines
    #[arg(long)]
    json: bool,
    /// Append a JSON line describing the run to this file
    #[arg(long, env = "RUNNER_REPORT_LOG")]
    report_log: Option<PathBuf>,
    /// Send the program's standard output to /dev/null
    #[arg(long)]
    quiet: bool,
    /// Program to run (absolute, relative, or looked up in PATH)
    program: PathBuf,
    /// Arguments for the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

impl RunArgs {
    fn flag_limits(&self) -> LimitsConfig {
        LimitsConfig {
            cpu_seconds: self.cpu,
            memory: self.memory,
            stack: self.stack,
        }
    }

    /// Merge flags over the config file and build the child's description.
    /// `argv[0]` is the program as given.
    fn exec_config(&self) -> RunnerResult<ExecConfig> {
        let file = match &self.config {
            Some(path) => config::load(path)?,
            None => RunnerConfig::default(),
        };
        let limits = self.flag_limits().over(&file.limits).resolve()?;

        let argv = std::iter::once(self.program.clone().into_os_string())
            .chain(self.args.iter().cloned());
        let mut exec = ExecConfig::new(&self.program, argv, limits);
        if self.quiet {
            exec = exec.stdout(Stdio::Null);
        }
        Ok(exec)
    }
}

/// Run one program under its ceilings and print how it ended.
///
/// The exit code mirrors the child: its own code, `128 + signal` when it was
/// killed, or the reserved 125/126/127 when setup failed in the child.
pub fn run_bounded(args: RunArgs) -> RunnerResult<ExitCode> {
    let exec = args.exec_config()?;

    let child = BoundedExecutor::new().spawn(&exec)?;
    if !args.json {
        println!("{}", output::started_line(child.pid()));
    }
    let report = child.wait()?;

    let record = RunRecord::new(&exec, &report);
    if args.json {
        let json = serde_json::to_string(&record)
            .map_err(|e| RunnerError::Internal(format!("serialize report: {e}")))?;
        println!("{json}");
    } else {
        println!("{}", output::outcome_line(&report));
    }
    if let Some(path) = &args.report_log {
        telemetry::append_record(path, &record);
    }

    let status = report.shell_status();
    if let Err(e) = report.into_result(exec.program().display().to_string()) {
        error!(error = %e, "child setup failed");
    }
    Ok(ExitCode::from(u8::try_from(status).unwrap_or(1)))
}
