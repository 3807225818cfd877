mod cli;
mod doctor;
mod server;

use ainput::usage::default_usage_db_path;
use ainput::{Dispatcher, Providers, SettingsStore, SqliteUsageStore, UsageRecorder};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ainput", version, about = "Local AI text-action server for the AInput extension")]
struct Cli {
    /// Settings file (default: ~/.ainput/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Usage database (default: ~/.ainput/usage.db)
    #[arg(long, global = true)]
    usage_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8787")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Run one action against the active model and print the result
    Run {
        /// fixGrammar, translate, enhancePrompt, autoReply, autoComplete
        action: String,

        /// Input text (read from stdin when omitted)
        text: Option<String>,

        /// Print chunks as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Manage model profiles
    Profile {
        #[command(subcommand)]
        command: cli::ProfileCommand,
    },

    /// Manage per-site switches
    Site {
        #[command(subcommand)]
        command: cli::SiteCommand,
    },

    /// Set the translation target language (empty to reset)
    Language { language: String },

    /// Show recorded token usage, newest first
    Usage {
        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        page_size: u32,
    },

    /// Check the active model end to end
    Doctor,
}

impl Cli {
    fn settings_store(&self) -> SettingsStore {
        match &self.settings {
            Some(path) => SettingsStore::new(path.clone()),
            None => SettingsStore::default_path(),
        }
    }

    fn usage_recorder(&self) -> anyhow::Result<UsageRecorder> {
        let path = self.usage_db.clone().unwrap_or_else(default_usage_db_path);
        let store = SqliteUsageStore::open(&path)
            .with_context(|| format!("opening usage database {}", path.display()))?;
        Ok(UsageRecorder::spawn(Arc::new(store)))
    }

    fn dispatcher(&self) -> anyhow::Result<Dispatcher> {
        Ok(Dispatcher::new(
            self.settings_store(),
            Providers::new(),
            self.usage_recorder()?,
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ainput_server=info,ainput=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { port, host } => {
            server::run_server(host, *port, cli.dispatcher()?).await?;
        }
        Commands::Run { action, text, stream } => {
            cli::run_action(&cli.dispatcher()?, action, text.clone(), *stream).await?;
        }
        Commands::Profile { command } => {
            cli::profile(&cli.settings_store(), command)?;
        }
        Commands::Site { command } => {
            cli::site(&cli.settings_store(), command)?;
        }
        Commands::Language { language } => {
            cli.settings_store().set_target_language(language)?;
        }
        Commands::Usage { page, page_size } => {
            cli::usage(&cli.usage_recorder()?, *page, *page_size).await?;
        }
        Commands::Doctor => {
            doctor::run_doctor(&cli.settings_store(), cli.usage_db.clone()).await?;
        }
    }

    Ok(())
}
