//! CLI entrypoint for the exitfn harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use exitfn_core::guard_mode;
use exitfn_harness::scenario::run_scenarios_logged;
use exitfn_harness::stress::run_stress_logged;
use exitfn_harness::structured_log::{LogEmitter, validate_log_file};
use exitfn_harness::{HarnessError, ScenarioKind, StressConfig};

/// Scenario and stress tooling for the exit-function registry.
#[derive(Debug, Parser)]
#[command(name = "exitfn-harness")]
#[command(about = "Scenario and stress harness for the exitfn registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run deterministic registry scenarios.
    Scenario {
        /// Scenario name, or `all`.
        #[arg(long, default_value = "all")]
        name: String,
        /// Structured JSONL log path (if omitted, logs go to stdout).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output path for the JSON report (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run identifier used in trace ids.
        #[arg(long, default_value = "run-1")]
        run_id: String,
    },
    /// Register concurrently from many threads and check the result.
    Stress {
        #[arg(long, default_value_t = 8)]
        threads: usize,
        #[arg(long, default_value_t = 500)]
        per_thread: usize,
        /// Consume entries concurrently with registration.
        #[arg(long)]
        consume: bool,
        /// Structured JSONL log path (if omitted, logs go to stdout).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output path for the JSON report (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "run-1")]
        run_id: String,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// Log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn open_emitter(log: Option<&PathBuf>, suite: &str, run_id: &str) -> std::io::Result<LogEmitter> {
    match log {
        Some(path) => LogEmitter::to_file(path, suite, run_id),
        None => Ok(LogEmitter::to_stdout(suite, run_id)),
    }
}

fn write_report(output: Option<&PathBuf>, json: &str) -> std::io::Result<()> {
    match output {
        Some(path) => std::fs::write(path, json),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mode = guard_mode().as_str();

    match cli.command {
        Command::Scenario {
            name,
            log,
            output,
            run_id,
        } => {
            let kinds = if name == "all" {
                ScenarioKind::ALL.to_vec()
            } else {
                vec![ScenarioKind::from_name(&name)?]
            };
            let mut emitter = open_emitter(log.as_ref(), "scenario", &run_id)?;
            let reports = run_scenarios_logged(&kinds, mode, &mut emitter)?;
            write_report(output.as_ref(), &serde_json::to_string_pretty(&reports)?)?;

            let failed: Vec<&str> = reports
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.scenario.as_str())
                .collect();
            if !failed.is_empty() {
                return Err(format!("scenarios failed: {}", failed.join(", ")).into());
            }
            eprintln!("{} scenario(s) passed", reports.len());
        }
        Command::Stress {
            threads,
            per_thread,
            consume,
            log,
            output,
            run_id,
        } => {
            let config = StressConfig {
                threads,
                per_thread,
                consume,
            };
            let mut emitter = open_emitter(log.as_ref(), "stress", &run_id)?;
            let report = run_stress_logged(config, mode, &mut emitter)?;
            write_report(output.as_ref(), &serde_json::to_string_pretty(&report)?)?;
            if !report.passed {
                return Err("stress run failed its checks".into());
            }
            eprintln!(
                "{} registrations across {} thread(s), {} block(s)",
                report.registered, threads, report.blocks
            );
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(HarnessError::InvalidLog {
                    path: log.display().to_string(),
                    invalid: errors.len(),
                }
                .into());
            }
            eprintln!("{lines} line(s) valid");
        }
    }

    Ok(())
}
