//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use chat_backup_core::listing::MAX_PAGE_SIZE;
use chat_backup_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};

/// Back up remote conversation history to a local directory.
///
/// Conversations are stored as raw JSON, one file per conversation. Later
/// runs only fetch conversations that changed since the previous run.
#[derive(Parser, Debug)]
#[command(name = "chat-backup")]
#[command(author, version, about)]
#[command(
    after_help = "Exit status: 0 when nothing failed, 1 when some conversations or files failed, 2 when every attempted item failed."
)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory to write the backup into
    #[arg(short = 'o', long = "output", default_value = "chat-backup")]
    pub output_dir: PathBuf,

    /// API base URL (falls back to CHAT_BACKUP_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bearer token (falls back to CHAT_BACKUP_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Delay after starting each download in milliseconds (0 to disable, max 60000)
    #[arg(short = 'd', long, default_value_t = 0, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub item_delay: u64,

    /// Delay between listing pages in milliseconds (0 to disable, max 60000)
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub page_delay: u64,

    /// Conversations requested per listing page (1-100)
    #[arg(long, default_value_t = MAX_PAGE_SIZE as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub page_size: u8,

    /// Re-download every conversation, ignoring local copies
    #[arg(long)]
    pub full: bool,

    /// Also back up every project's conversations
    #[arg(long)]
    pub projects: bool,

    /// Download files referenced by stored conversations after the backup
    #[arg(long)]
    pub files: bool,

    /// Only download referenced files; skip the conversation backup
    #[arg(long, conflicts_with_all = ["full", "projects", "markdown"])]
    pub files_only: bool,

    /// Forget files that failed in earlier runs and try them again
    #[arg(long)]
    pub retry_failed_files: bool,

    /// Write a markdown transcript next to each downloaded conversation
    #[arg(long)]
    pub markdown: bool,
}
