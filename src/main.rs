//! CLI entry point for the chat backup tool.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use chat_backup_core::backup::{BackupEngine, BackupOptions, BackupRunResult, Collection};
use chat_backup_core::download::BatchObserver;
use chat_backup_core::files::{FileDownloadResult, PermanentFailureSet, group_errors_by_message};
use chat_backup_core::listing::ListingOptions;
use chat_backup_core::{ApiClient, BackupError, ConversationStore, DownloadEngine, RetryPolicy};
use tracing::{debug, info, warn};

mod cli;
mod config;
mod progress;

use cli::Args;
use config::BackupConfig;
use progress::ProgressReporter;

/// Process outcome after all phases ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(1),
            ProcessExit::Failure => ExitCode::from(2),
        }
    }
}

/// Maps completed and failed item counts to the process outcome.
fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    let config = BackupConfig::resolve(&args)?;
    info!(output = %config.output_dir.display(), "Chat backup starting");

    let progress = ProgressReporter::new(!args.quiet && io::stderr().is_terminal());

    let client = ApiClient::new(
        &config.base_url,
        Some(config.token.clone()),
        RetryPolicy::with_max_retries(config.max_retries),
    )?;
    let engine = DownloadEngine::new(config.concurrency, config.item_delay)?;
    let store = ConversationStore::new(&config.output_dir);
    let options = BackupOptions {
        incremental: config.incremental,
        markdown: config.markdown,
        listing: ListingOptions {
            page_size: config.page_size,
            page_delay: config.page_delay,
            progress: Some(progress.listing_callback()),
        },
    };
    let backup = BackupEngine::new(client, store, engine, options);

    let mut completed = 0usize;
    let mut failed = 0usize;

    if !config.files_only {
        let mut collections = vec![Collection::Default];
        if config.include_projects {
            progress.begin_listing("projects");
            let projects = backup.discover_projects().await.map_err(explain)?;
            progress.end_listing();
            collections.extend(projects);
        }

        for collection in &collections {
            let label = collection.label();
            progress.begin_listing(&label);
            let bar = progress.batch(&label);
            let outcome = backup.run(collection, Some(&bar as &dyn BatchObserver)).await;
            progress.end_listing();
            bar.finish();
            let result = outcome.map_err(explain)?;
            report_backup(&result);
            completed += result.downloaded + result.skipped;
            failed += result.failed;
        }
    }

    if config.download_files {
        if config.retry_failed_files {
            PermanentFailureSet::clear(&backup.store().failed_files_path()).await?;
        }
        let bar = progress.batch("files");
        let outcome = backup.materialize_files(Some(&bar as &dyn BatchObserver)).await;
        bar.finish();
        let result = outcome.map_err(explain)?;
        report_files(&result);
        completed += result.downloaded + result.skipped;
        failed += result.failed;
    }

    if failed > 0 {
        warn!(failed, "Backup finished with failures; details are in backup.log");
    } else {
        info!("Backup complete");
    }

    Ok(determine_exit_outcome(completed, failed).into())
}

fn explain(error: BackupError) -> anyhow::Error {
    if error.is_authentication() {
        let hint = format!(
            "The access token was rejected.\n  \
             Refresh it and pass --token TOKEN or set {}",
            config::TOKEN_ENV
        );
        return anyhow::Error::new(error).context(hint);
    }
    anyhow::Error::new(error)
}

fn report_backup(result: &BackupRunResult) {
    info!(
        collection = %result.collection,
        total = result.total_items,
        downloaded = result.downloaded,
        skipped = result.skipped,
        failed = result.failed,
        "Collection backed up"
    );
    for failure in &result.errors {
        warn!(conversation = %failure.item_id, error = %failure.message, "Conversation failed");
    }
}

fn report_files(result: &FileDownloadResult) {
    if result.excluded > 0 {
        info!(
            excluded = result.excluded,
            "Skipped files that failed in earlier runs (use --retry-failed-files to try again)"
        );
    }
    info!(
        total = result.total,
        downloaded = result.downloaded,
        skipped = result.skipped,
        failed = result.failed,
        "Files downloaded"
    );
    for line in group_errors_by_message(&result.errors) {
        warn!("{line}");
    }
}
