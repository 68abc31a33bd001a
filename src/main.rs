// Command-line entry point for lock-trace.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lock_trace::application::{AnalysisUsecase, OutputMode};
use lock_trace::domain::tracer::{CallTracer, ChainDirection, PathFilter};
use lock_trace::infrastructure::CscopeIndex;
use lock_trace::ports::SymbolQuery;

#[derive(Parser, Debug)]
#[command(version, about = "Static analysis of call stacks and lock contexts over a cscope database", long_about = None)]
struct Cli {
    /// Path to the directory containing the cscope database
    #[arg(short = 'd', long, default_value = ".")]
    database_path: PathBuf,

    /// Path to cscope.out (default: cscope.out in the database directory)
    #[arg(short = 'f', long)]
    cscope_file: Option<PathBuf>,

    /// Path to the source tree (default: the database directory)
    #[arg(short = 's', long)]
    source_dir: Option<PathBuf>,

    /// Maximum depth for call tracing
    #[arg(short = 'm', long, default_value_t = 10)]
    max_depth: usize,

    /// Display results as a tree of unique call chains
    #[arg(short, long)]
    tree: bool,

    /// Show all paths, including duplicates
    #[arg(short, long)]
    verbose: bool,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    /// Comma-separated function names to exclude from call paths
    #[arg(short = 'e', long, value_delimiter = ',')]
    exclude_functions: Vec<String>,

    /// Comma-separated directory names to exclude from call paths
    #[arg(short = 'E', long, value_delimiter = ',')]
    exclude_directories: Vec<String>,

    /// Disable callback (function pointer) caller resolution
    #[arg(long)]
    disable_callback_search: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trace caller paths to a function
    Callers { function: String },

    /// Trace callee paths from a function
    Callees { function: String },

    /// Find call paths between two functions
    Paths { from: String, to: String },

    /// Check whether a function is always called with a lock held
    LockCheck { function: String, lock: String },

    /// Analyze lock context for a function's callers
    LockContext {
        function: String,
        /// Optional comma-separated list of specific locks to track
        #[arg(value_delimiter = ',')]
        locks: Vec<String>,
    },

    /// Find call paths that are missing required locks
    Unprotected {
        function: String,
        /// Comma-separated list of locks that must be held
        #[arg(value_delimiter = ',')]
        required_locks: Vec<String>,
    },

    /// Show call and lock statistics for a function
    Stats { function: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let index = CscopeIndex::new(cli.database_path, cli.cscope_file, cli.source_dir);
    index.validate().await.context("cscope setup failed")?;

    let symbols: Arc<dyn SymbolQuery> = Arc::new(index);
    let tracer = Arc::new(
        CallTracer::new(symbols.clone())
            .with_max_depth(cli.max_depth)
            .with_callback_search(!cli.disable_callback_search),
    );
    let usecase = AnalysisUsecase::new(symbols, tracer);

    let mode = OutputMode {
        tree: cli.tree,
        verbose: cli.verbose,
        json: cli.json,
    };
    let filter = PathFilter {
        functions: cli.exclude_functions.into_iter().collect(),
        directories: cli.exclude_directories.into_iter().collect(),
    };

    match cli.command {
        Commands::Callers { function } => {
            usecase
                .trace(&function, ChainDirection::Caller, None, mode, &filter)
                .await
        }
        Commands::Callees { function } => {
            usecase
                .trace(&function, ChainDirection::Callee, None, mode, &filter)
                .await
        }
        Commands::Paths { from, to } => usecase.find_paths(&from, &to, None, mode).await,
        Commands::LockCheck { function, lock } => {
            usecase
                .check_lock_protection(&function, &lock, mode, &filter)
                .await
        }
        Commands::LockContext { function, locks } => {
            let locks = if locks.is_empty() { None } else { Some(locks) };
            usecase
                .analyze_lock_context(&function, locks.as_deref(), mode, &filter)
                .await
        }
        Commands::Unprotected {
            function,
            required_locks,
        } => {
            usecase
                .find_unprotected_calls(&function, &required_locks, mode, &filter)
                .await
        }
        Commands::Stats { function } => usecase.function_stats(&function, mode).await,
    }
}
