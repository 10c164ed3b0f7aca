//! Strand - conversation thread tooling
//!
//! Inspect and manage conversations persisted by the strand thread engine:
//! - List, show and delete saved conversations
//! - Queue feedback for a running conversation

use anyhow::Result;
use clap::{Parser, Subcommand};

use strand_core::{paths, StrandConfig};

mod commands;

/// Strand - AI coding agent threads
#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Manage strand conversation threads", long_about = None)]
struct Cli {
    /// Database path (defaults to the config file's, then ~/.strand/strand.db)
    #[arg(long, global = true)]
    database: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Saved conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Queue feedback for a conversation
    ///
    /// The message is appended to the conversation as a user message at the
    /// start of its next exchange.
    Feedback {
        conversation_id: String,
        message: String,
    },
}

#[derive(Subcommand)]
enum ConversationAction {
    /// List conversations, most recently updated first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a conversation's transcript
    Show { id: String },
    /// Delete a conversation
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log to file so command output on stdout stays clean
    let log_dir = paths::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {}", e);
    }

    #[cfg(unix)]
    let null_device = "/dev/null";
    #[cfg(windows)]
    let null_device = "NUL";

    let log_file = match std::fs::File::create(log_dir.join(strand_core::constants::dirs::LOG_FILE_NAME)) {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "Failed to create log file: {}, falling back to null device",
                e
            );
            std::fs::File::create(null_device)?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let config = StrandConfig::load()?;
    let db_path = cli.database.unwrap_or_else(|| config.database_path());
    let ctx = commands::Context::open(&db_path)?;

    match cli.command {
        Commands::Conversations { action } => match action {
            ConversationAction::List { limit } => ctx.list(limit).await?,
            ConversationAction::Show { id } => ctx.show(&id).await?,
            ConversationAction::Delete { id } => ctx.delete(&id).await?,
        },
        Commands::Feedback {
            conversation_id,
            message,
        } => ctx.feedback(&conversation_id, &message).await?,
    }

    Ok(())
}
