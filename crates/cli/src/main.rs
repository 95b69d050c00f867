//! TypeClaw CLI: the main entry point.
//!
//! Commands:
//! - `run`     Run the agent once, with optional structured output
//! - `config`  Show the effective configuration or write the defaults

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "typeclaw",
    about = "TypeClaw: typed, tool-using LLM agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on a prompt
    Run(commands::run::RunArgs),

    /// Show the effective configuration
    Config {
        /// Write the default configuration file instead
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
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

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Config { init: true, force } => commands::config_cmd::init(force)?,
        Commands::Config { init: false, .. } => commands::config_cmd::show()?,
    }

    Ok(())
}
