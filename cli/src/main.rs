use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::pair::PairArgs;
use commands::patch::PatchCommands;
use commands::provider::ProviderCommands;
use commands::run::RunCommands;
use commands::sandbox::SandboxCommands;
use commands::session::SessionCommands;
use util::Daemon;

#[derive(Parser)]
#[command(name = "tutor", version, about = "Tutor CLI: pair with an AI tutor through the tutord daemon")]
struct Cli {
    /// Daemon base URL
    #[arg(long, env = "TUTOR_URL", default_value = "http://127.0.0.1:7421")]
    url: String,

    /// Learner id sent as x-user-id
    #[arg(long, env = "TUTOR_USER", default_value = "local")]
    user: String,

    /// Skip pretty-printing (raw JSON for piping)
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check daemon health
    Health,
    /// Session lifecycle
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Format, build and test code
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Ask the tutor for help (hint, review, stuck, next, explain, escalate)
    Pair(PairArgs),
    /// Proposed code edits
    Patch {
        #[command(subcommand)]
        command: PatchCommands,
    },
    /// Session sandbox
    Sandbox {
        #[command(subcommand)]
        command: SandboxCommands,
    },
    /// Model providers
    Provider {
        #[command(subcommand)]
        command: ProviderCommands,
    },
    /// Show a learning profile
    Profile {
        /// Learner id (defaults to --user)
        user: Option<String>,
    },
    /// List learning tracks
    Tracks,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let daemon = Daemon {
        url: cli.url.trim_end_matches('/').to_string(),
        user: cli.user,
        raw: cli.raw,
    };

    let code = match cli.command {
        Commands::Health => commands::health::run(&daemon).await,
        Commands::Session { command } => commands::session::run(&daemon, command).await,
        Commands::Run { command } => commands::run::run(&daemon, command).await,
        Commands::Pair(args) => commands::pair::run(&daemon, args).await,
        Commands::Patch { command } => commands::patch::run(&daemon, command).await,
        Commands::Sandbox { command } => commands::sandbox::run(&daemon, command).await,
        Commands::Provider { command } => commands::provider::run(&daemon, command).await,
        Commands::Profile { user } => commands::profile::show(&daemon, user.as_deref()).await,
        Commands::Tracks => commands::profile::tracks(&daemon).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn session_create_needs_spec_for_intent() {
        assert!(
            Cli::try_parse_from(["tutor", "session", "create", "--intent", "spec-authoring"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from([
                "tutor",
                "session",
                "create",
                "--spec",
                "features/search.json",
                "--intent",
                "spec-authoring",
            ])
            .is_ok()
        );
    }
}
