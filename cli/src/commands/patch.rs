use clap::Subcommand;
use uuid::Uuid;

use crate::util::Daemon;

#[derive(Subcommand)]
pub enum PatchCommands {
    /// Show the pending patch as a diff
    Preview { id: Uuid },
    /// Apply the pending patch to the session code
    Apply { id: Uuid },
    /// Discard the pending patch
    Reject { id: Uuid },
    /// List every patch proposed in a session
    List { id: Uuid },
}

pub async fn run(daemon: &Daemon, command: PatchCommands) -> i32 {
    match command {
        PatchCommands::Preview { id } => {
            daemon.get(&format!("/v1/sessions/{id}/patch/preview")).await
        }
        PatchCommands::Apply { id } => {
            daemon.post(&format!("/v1/sessions/{id}/patch/apply"), None).await
        }
        PatchCommands::Reject { id } => {
            daemon.post(&format!("/v1/sessions/{id}/patch/reject"), None).await
        }
        PatchCommands::List { id } => daemon.get(&format!("/v1/sessions/{id}/patches")).await,
    }
}
