//! Codelens CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "codelens")]
#[command(about = "Dependency graph, impact analysis and validated patching for Python and TypeScript trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root path (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the repository and save the graph
    Index {
        /// Ignore saved state and re-index every file
        #[arg(long)]
        full: bool,
    },
    /// Show what depends on a unit
    Impact {
        /// Unit id, e.g. `user.validate_email`
        id: String,

        /// Maximum depth of the transitive walk
        #[arg(short, long)]
        depth: Option<usize>,
    },
    /// List every reference to a unit
    Usages {
        id: String,
    },
    /// List definitions unreachable from the entry points
    DeadCode {
        /// Entry point ids; detected automatically when omitted
        #[arg(long = "entry")]
        entries: Vec<String>,
    },
    /// List import and inheritance cycles
    Cycles,
    /// List references that could not be resolved
    Unresolved,
    /// Validate and apply a batch of patches from a JSON file
    Patch {
        /// JSON array of `{ "unit_id", "new_source", "allow_breaking" }`
        batch: PathBuf,

        /// Check impact and validate only; write nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Merge runtime-observed edges into the saved graph
    MergeTrace {
        /// JSON array of `{ "from", "to", "kind" }`
        trace: PathBuf,
    },
    /// Keep the saved graph in sync with file changes until interrupted
    Watch,
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; CODELENS_LOG takes precedence over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("CODELENS_LOG").unwrap_or_else(|_| EnvFilter::new(format!("codelens={}", log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Codelens v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Repository root: {}", cli.root.display());

    match cli.command {
        Commands::Index { full } => commands::index(cli.root, full).await,
        Commands::Impact { id, depth } => commands::impact(cli.root, &id, depth).await,
        Commands::Usages { id } => commands::usages(cli.root, &id).await,
        Commands::DeadCode { entries } => commands::dead_code(cli.root, entries).await,
        Commands::Cycles => commands::cycles(cli.root).await,
        Commands::Unresolved => commands::unresolved(cli.root).await,
        Commands::Patch { batch, dry_run } => commands::patch(cli.root, batch, dry_run).await,
        Commands::MergeTrace { trace } => commands::merge_trace(cli.root, trace).await,
        Commands::Watch => commands::watch(cli.root).await,
        Commands::Clear => commands::clear(cli.root),
        Commands::Version => {
            println!("codelens v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
