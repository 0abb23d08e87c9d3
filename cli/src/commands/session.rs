use clap::{Subcommand, ValueEnum};
use uuid::Uuid;

use tutor_core::model::{CreateSessionRequest, SessionIntent};

use crate::util::{Daemon, exit_error};

#[derive(Clone, Copy, ValueEnum)]
pub enum IntentArg {
    Training,
    FeatureGuidance,
    SpecAuthoring,
}

impl From<IntentArg> for SessionIntent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Training => SessionIntent::Training,
            IntentArg::FeatureGuidance => SessionIntent::FeatureGuidance,
            IntentArg::SpecAuthoring => SessionIntent::SpecAuthoring,
        }
    }
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List sessions
    List,
    /// Start a session on an exercise or a product spec
    Create {
        /// Exercise id (e.g. "go/basics/hello")
        #[arg(long, conflicts_with = "spec")]
        exercise: Option<String>,
        /// Spec path for feature guidance or spec authoring
        #[arg(long)]
        spec: Option<String>,
        /// Session intent (spec sessions only)
        #[arg(long, value_enum, requires = "spec")]
        intent: Option<IntentArg>,
        /// Learning track; the daemon default applies when omitted
        #[arg(long)]
        track: Option<String>,
        /// Authoring doc path (repeatable)
        #[arg(long = "doc")]
        docs: Vec<String>,
        /// Section currently being authored
        #[arg(long)]
        section: Option<String>,
    },
    /// Show one session
    Show { id: Uuid },
    /// Delete a session and its history
    Delete { id: Uuid },
    /// Finish a session and record learning progress
    Complete { id: Uuid },
    /// Give up on a session
    Abandon { id: Uuid },
    /// List tutor interventions in a session
    Interventions { id: Uuid },
    /// Mark a spec acceptance criterion as satisfied
    Satisfy { id: Uuid, criterion: String },
}

pub async fn run(daemon: &Daemon, command: SessionCommands) -> i32 {
    match command {
        SessionCommands::List => daemon.get("/v1/sessions").await,
        SessionCommands::Create {
            exercise,
            spec,
            intent,
            track,
            docs,
            section,
        } => {
            if exercise.is_none() && spec.is_none() {
                exit_error(
                    "A session needs an exercise or a spec",
                    Some("Pass --exercise <id> or --spec <path>."),
                );
            }
            let request = CreateSessionRequest {
                exercise_id: exercise,
                spec_path: spec,
                intent: intent.map(SessionIntent::from),
                track,
                authoring_docs: docs,
                authoring_section: section,
            };
            let body = match serde_json::to_value(&request) {
                Ok(v) => v,
                Err(e) => exit_error(&format!("Failed to encode request: {e}"), None),
            };
            daemon.post("/v1/sessions", Some(body)).await
        }
        SessionCommands::Show { id } => daemon.get(&format!("/v1/sessions/{id}")).await,
        SessionCommands::Delete { id } => {
            daemon
                .request(reqwest::Method::DELETE, &format!("/v1/sessions/{id}"), None, &[])
                .await
        }
        SessionCommands::Complete { id } => {
            daemon.post(&format!("/v1/sessions/{id}/complete"), None).await
        }
        SessionCommands::Abandon { id } => {
            daemon.post(&format!("/v1/sessions/{id}/abandon"), None).await
        }
        SessionCommands::Interventions { id } => {
            daemon.get(&format!("/v1/sessions/{id}/interventions")).await
        }
        SessionCommands::Satisfy { id, criterion } => {
            daemon
                .post(
                    &format!("/v1/sessions/{id}/spec/criteria/{criterion}/satisfy"),
                    None,
                )
                .await
        }
    }
}
