//! cbt CLI: practice exams in the terminal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use cbt_core::model::{Level, Mode};

mod commands;

#[derive(Parser)]
#[command(name = "cbt", version, about = "Computer-based testing practice sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take an exam interactively
    Exam {
        /// Exam mode: topic, mock or game
        #[arg(long)]
        mode: Mode,

        /// Course level: 100, 200, 300 or 400
        #[arg(long)]
        level: Level,

        /// Topic (required in topic mode)
        #[arg(long)]
        topic: Option<String>,

        /// User the result is recorded for
        #[arg(long, default_value = "student")]
        user: String,

        /// Skip question synthesis and sample from the bank
        #[arg(long)]
        offline: bool,

        /// Seed for bank sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Store directory (overrides the config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Question bank file (overrides the config)
        #[arg(long)]
        bank: Option<PathBuf>,
    },

    /// Validate and summarise a question bank
    Bank {
        /// Bank TOML file; the built-in bank when omitted
        #[arg(long)]
        bank: Option<PathBuf>,
    },

    /// Show a user's past results and profile
    History {
        #[arg(long)]
        user: String,

        /// Store directory (overrides the config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter cbt.toml
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cbt=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Exam {
            mode,
            level,
            topic,
            user,
            offline,
            seed,
            config,
            store,
            bank,
        } => {
            commands::exam::execute(commands::exam::ExamArgs {
                mode,
                level,
                topic,
                user,
                offline,
                seed,
                config,
                store,
                bank,
            })
            .await
        }
        Commands::Bank { bank } => commands::bank::execute(bank),
        Commands::History {
            user,
            store,
            config,
        } => commands::history::execute(user, store, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
