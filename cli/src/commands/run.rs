use std::path::PathBuf;

use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use tutor_core::model::RunRequest;

use crate::util::{Daemon, exit_error, read_code};

#[derive(Subcommand)]
pub enum RunCommands {
    /// Submit code to a session and run format/build/test
    Submit {
        id: Uuid,
        /// Source files or directories
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Check formatting
        #[arg(long)]
        format: bool,
        /// Skip the build step
        #[arg(long)]
        no_build: bool,
        /// Run tests after a successful build
        #[arg(long)]
        test: bool,
        /// Extra test argument (repeatable)
        #[arg(long = "test-flag", allow_hyphen_values = true)]
        test_flags: Vec<String>,
    },
    /// List runs in a session
    List { id: Uuid },
    /// Show one run
    Show { id: Uuid, run_id: Uuid },
    /// Preview the formatter's fix for the session code (or the given files)
    Format { id: Uuid, files: Vec<PathBuf> },
}

pub async fn run(daemon: &Daemon, command: RunCommands) -> i32 {
    match command {
        RunCommands::Submit {
            id,
            files,
            format,
            no_build,
            test,
            test_flags,
        } => {
            let request = RunRequest {
                code: load(&files),
                format,
                build: !no_build,
                test,
                test_flags,
            };
            let body = match serde_json::to_value(&request) {
                Ok(v) => v,
                Err(e) => exit_error(&format!("Failed to encode request: {e}"), None),
            };
            daemon.post(&format!("/v1/sessions/{id}/runs"), Some(body)).await
        }
        RunCommands::List { id } => daemon.get(&format!("/v1/sessions/{id}/runs")).await,
        RunCommands::Show { id, run_id } => {
            daemon.get(&format!("/v1/sessions/{id}/runs/{run_id}")).await
        }
        RunCommands::Format { id, files } => {
            let body = if files.is_empty() {
                json!({})
            } else {
                json!({ "code": load(&files) })
            };
            daemon.post(&format!("/v1/sessions/{id}/format"), Some(body)).await
        }
    }
}

fn load(files: &[PathBuf]) -> tutor_core::model::Code {
    match read_code(files) {
        Ok(code) => code,
        Err(e) => exit_error(&e, Some("Pass readable source files or a directory.")),
    }
}
