use clap::{Parser, Subcommand, ValueEnum};

/// Browse the university catalog through the local cache store.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List one page of universities
    Search {
        /// Free-text search query
        #[arg(default_value = "")]
        query: String,
        #[arg(long)]
        country: Option<String>,
        /// Filter on university name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        fees: Option<String>,
        #[arg(long, short, default_value_t = 1)]
        page: i64,
        /// Also warm the cache for the following N pages
        #[arg(long, default_value_t = 0)]
        prefetch: u32,
        /// Bypass the cache and the refetch cooldown
        #[arg(long)]
        refresh: bool,
    },
    /// Show one university by slug, id or name
    Detail {
        identifier: String,
        #[arg(long)]
        refresh: bool,
    },
    /// Inspect or maintain the persisted cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Print cache counters
    Stats,
    /// Drop every cached page and record
    Clear,
    /// Evict expired pages
    Sweep,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
