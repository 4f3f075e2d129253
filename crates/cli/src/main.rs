//! twin CLI: the main entry point.
//!
//! Commands:
//! - `chat`     : Interactive session, or one message with `-m` (default)
//! - `sessions` : List, show, or delete saved sessions
//! - `init`     : Write the default config and create directories
//! - `models`   : List models installed on the backend

use clap::{Parser, Subcommand};
use twin_core::session::Mode;

mod commands;

#[derive(Parser)]
#[command(
    name = "twin",
    about = "twin: a local planning assistant that can use tools and improve itself",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a planning session
    Chat(ChatArgs),

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Write the default config and create twin's directories
    Init,

    /// List models installed on the backend
    Models,
}

#[derive(clap::Args, Default)]
struct ChatArgs {
    /// Model name or alias (e.g. fast, smart)
    #[arg(long)]
    model: Option<String>,

    /// work or personal
    #[arg(long)]
    mode: Option<Mode>,

    /// Agent to start with
    #[arg(long)]
    agent: Option<String>,

    /// Continue a saved session
    #[arg(long)]
    resume: Option<String>,

    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    message: Option<String>,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List saved sessions
    List,
    /// Show one saved session
    Show { id: String },
    /// Delete one saved session
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Chat(ChatArgs::default())) {
        Commands::Chat(args) => {
            commands::chat::run(commands::chat::ChatOptions {
                model: args.model,
                mode: args.mode,
                agent: args.agent,
                resume: args.resume,
                message: args.message,
            })
            .await?
        }
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list().await?,
            SessionsAction::Show { id } => commands::sessions::show(&id).await?,
            SessionsAction::Delete { id } => commands::sessions::delete(&id).await?,
        },
        Commands::Init => commands::init::run().await?,
        Commands::Models => commands::models::run().await?,
    }

    Ok(())
}
