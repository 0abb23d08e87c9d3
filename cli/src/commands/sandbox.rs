use clap::Subcommand;
use uuid::Uuid;

use crate::util::Daemon;

#[derive(Subcommand)]
pub enum SandboxCommands {
    /// Show the session's sandbox
    Show { id: Uuid },
    /// Provision a sandbox (no-op when one exists)
    Ensure { id: Uuid },
    /// Tear the sandbox down
    Destroy { id: Uuid },
}

pub async fn run(daemon: &Daemon, command: SandboxCommands) -> i32 {
    let (method, id) = match command {
        SandboxCommands::Show { id } => (reqwest::Method::GET, id),
        SandboxCommands::Ensure { id } => (reqwest::Method::POST, id),
        SandboxCommands::Destroy { id } => (reqwest::Method::DELETE, id),
    };
    daemon
        .request(method, &format!("/v1/sessions/{id}/sandbox"), None, &[])
        .await
}
