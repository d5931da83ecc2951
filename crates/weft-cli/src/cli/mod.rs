//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use weft_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "weft")]
#[command(version = "0.1")]
#[command(about = "Agent-task orchestration kernel")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the system prompt from config
    #[arg(long, global = true)]
    system_prompt: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Runs one task against a scripted provider
    Run {
        /// Session that owns the task
        #[arg(short, long, default_value = "default")]
        session: String,

        /// The query to send to the kernel
        #[arg(short, long)]
        query: String,

        /// Response script; responses separated by lines containing only `---`
        #[arg(long, value_name = "FILE", env = "WEFT_SCRIPT")]
        script: PathBuf,

        /// Scheduling priority (defaults to config)
        #[arg(short, long)]
        priority: Option<i32>,

        /// Print task events as JSON lines on stderr
        #[arg(long)]
        events: bool,
    },

    /// Lists builtin tools
    Tools,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        system_prompt,
    } = cli;

    match command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },

        Commands::Tools => {
            commands::tools::list();
            Ok(())
        }

        Commands::Run {
            session,
            query,
            script,
            priority,
            events,
        } => {
            let mut config = config::Config::load().context("load config")?;
            if let Some(sp) = system_prompt.as_deref() {
                let trimmed = sp.trim();
                config.system_prompt = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
            let _log_guard = logging::init(&config.log).context("init logging")?;

            commands::run::run(commands::run::RunOptions {
                session: &session,
                query: &query,
                script: &script,
                priority,
                events,
                config: &config,
            })
            .await
        }
    }
}
