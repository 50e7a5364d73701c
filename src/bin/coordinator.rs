//! taskmesh command-line coordinator.
//!
//! Loads a JSON submission file (tasks plus dependency and priority maps,
//! optionally a `config` section) and either previews the execution plan
//! or runs the submission with the built-in echo executor.
//!
//! # Usage
//!
//! ```bash
//! coordinator plan <submission.json>
//! coordinator run <submission.json>
//! ```
//!
//! Exit codes: 0 when planning succeeds / every task completes, 1 on a
//! planning error or any terminal task failure.
//!
//! # Environment Variables
//!
//! - `RUST_LOG` — log filter (default: "info")

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use taskmesh::{Coordinator, EchoExecutor, Submission};

fn usage() -> ! {
    eprintln!("usage: coordinator <plan|run> <submission.json>");
    std::process::exit(2);
}

fn load_submission(path: &str) -> Result<Submission> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read submission file '{}'", path))?;
    let submission: Submission =
        serde_json::from_str(&raw).with_context(|| format!("invalid submission in '{}'", path))?;
    if submission.tasks.is_empty() {
        bail!("submission '{}' contains no tasks", path);
    }
    Ok(submission)
}

async fn run(command: &str, path: &str) -> Result<bool> {
    let submission = load_submission(path)?;
    let config = submission.config.clone().unwrap_or_default();
    let coordinator = Coordinator::new(config, Arc::new(EchoExecutor))?;

    match command {
        "plan" => {
            let plan = coordinator.plan(&submission)?;
            for (index, phase) in plan.phases.iter().enumerate() {
                println!("phase {}: {}", index + 1, phase.tasks.join(", "));
            }
            Ok(true)
        }
        "run" => {
            let report = coordinator.run(submission).await?;
            for outcome in &report.outcomes {
                match &outcome.error {
                    Some(error) => println!(
                        "{}  {}  ({} attempt(s)): {}",
                        outcome.task_id, outcome.status, outcome.attempts, error
                    ),
                    None => println!(
                        "{}  {}  ({} attempt(s), {:.0}ms)",
                        outcome.task_id, outcome.status, outcome.attempts, outcome.duration_ms
                    ),
                }
            }
            println!(
                "{} completed, {} failed across {} phase(s)",
                report.completed, report.failed, report.phases
            );
            Ok(report.is_success())
        }
        _ => usage(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::debug!("taskmesh {}", taskmesh::VERSION);

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        usage();
    }

    match run(&args[1], &args[2]).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_submission_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tasks": [{{"id": "t1", "name": "build"}}], "priorities": {{"t1": 5}}}}"#
        )
        .unwrap();

        let submission = load_submission(file.path().to_str().unwrap()).unwrap();
        assert_eq!(submission.tasks.len(), 1);
        assert_eq!(submission.priorities["t1"], 5);
    }

    #[test]
    fn test_empty_submission_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tasks": []}}"#).unwrap();
        assert!(load_submission(file.path().to_str().unwrap()).is_err());
    }
}
