use clap::Subcommand;
use serde_json::json;

use crate::util::Daemon;

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// List registered model providers
    List,
    /// Choose the provider used when a request names none
    SetDefault {
        /// Registered provider name
        name: String,
    },
}

pub async fn run(daemon: &Daemon, command: ProviderCommands) -> i32 {
    match command {
        ProviderCommands::List => daemon.get("/v1/providers").await,
        ProviderCommands::SetDefault { name } => {
            daemon
                .request(
                    reqwest::Method::PUT,
                    "/v1/providers/default",
                    Some(json!({ "name": name })),
                    &[],
                )
                .await
        }
    }
}
