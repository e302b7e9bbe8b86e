use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mission_board::board::backend::BackendKind;
use mission_board::board::models::{Assignee, DocumentType, Priority, TaskStatus};
use mission_board::config::BoardConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "mission-board")]
#[command(version, about = "Kanban task and document board with offline fallback")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to board.toml (defaults to .mission-board/board.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for local snapshots, documents and the inbox
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (task API, documents, inbox, agents, change feed)
    Serve {
        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Auto-open browser after server starts
        #[arg(long)]
        open: bool,

        /// Bind on all interfaces
        #[arg(long)]
        dev: bool,
    },
    /// Work with tasks through the configured backend
    Tasks {
        /// Backend to use: http, kv, collection, local (overrides sync.backend)
        #[arg(long, global = true)]
        backend: Option<BackendKind>,

        #[command(subcommand)]
        command: TasksCommands,
    },
    /// Work with documents in the local document collection
    Docs {
        #[command(subcommand)]
        command: DocsCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TasksCommands {
    /// Show the board, grouped by column
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        assignee: Option<Assignee>,
        #[arg(long)]
        priority: Option<Priority>,
        /// Print the task list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<Priority>,
        #[arg(short, long)]
        status: Option<TaskStatus>,
        #[arg(short, long)]
        assignee: Option<Assignee>,
        /// Due date, e.g. 2024-10-31
        #[arg(long)]
        due: Option<String>,
    },
    /// Move a task to another column
    Move {
        id: String,
        /// "To Do", "In Progress" or "Done"
        status: TaskStatus,
    },
    /// Delete a task
    Delete { id: String },
}

#[derive(Subcommand, Clone)]
pub enum DocsCommands {
    /// List documents, newest first, grouped by day
    List {
        /// Print the documents as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a document
    Add {
        title: String,
        #[arg(short, long)]
        content: Option<String>,
        #[arg(short = 't', long = "type")]
        doc_type: Option<DocumentType>,
        #[arg(long)]
        category: Option<String>,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default board.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    mission_board::logging::init_tracing(cli.verbose);

    let config = BoardConfig::load(cli.config.clone(), cli.data_dir.clone(), cli.verbose)?;

    match &cli.command {
        Commands::Serve {
            port,
            host,
            open,
            dev,
        } => {
            cmd::cmd_serve(&config, *port, host.clone(), *open, *dev).await?;
        }
        Commands::Tasks { backend, command } => {
            cmd::cmd_tasks(&config, *backend, command.clone()).await?;
        }
        Commands::Docs { command } => cmd::cmd_docs(&config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
