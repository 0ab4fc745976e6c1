//! Resolved run configuration: CLI values merged with environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use url::Url;

use crate::cli::Args;

/// Environment variable holding the bearer token.
pub(crate) const TOKEN_ENV: &str = "CHAT_BACKUP_TOKEN";

/// Environment variable holding the API base URL.
pub(crate) const BASE_URL_ENV: &str = "CHAT_BACKUP_BASE_URL";

/// Everything `main` needs to build the client and engines.
#[derive(Debug, Clone)]
pub(crate) struct BackupConfig {
    pub(crate) output_dir: PathBuf,
    pub(crate) base_url: String,
    pub(crate) token: String,
    pub(crate) concurrency: usize,
    pub(crate) max_retries: u32,
    pub(crate) item_delay: Duration,
    pub(crate) page_delay: Duration,
    pub(crate) page_size: usize,
    pub(crate) incremental: bool,
    pub(crate) include_projects: bool,
    pub(crate) download_files: bool,
    pub(crate) files_only: bool,
    pub(crate) retry_failed_files: bool,
    pub(crate) markdown: bool,
}

impl BackupConfig {
    /// Resolves the configuration from CLI arguments and the process environment.
    pub(crate) fn resolve(args: &Args) -> Result<Self> {
        Self::resolve_with(args, |key| std::env::var(key).ok())
    }

    /// Resolves the configuration using `env` for fallback lookups.
    pub(crate) fn resolve_with<E>(args: &Args, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let base_url = first_non_blank(args.base_url.clone(), env(BASE_URL_ENV));
        let Some(base_url) = base_url else {
            bail!(
                "No API base URL configured.\n  \
                 Pass --base-url URL or set {BASE_URL_ENV}"
            );
        };
        validate_base_url(&base_url)?;

        let Some(token) = first_non_blank(args.token.clone(), env(TOKEN_ENV)) else {
            bail!(
                "No access token configured.\n  \
                 Pass --token TOKEN or set {TOKEN_ENV}"
            );
        };

        if args.retry_failed_files && !(args.files || args.files_only) {
            bail!(
                "--retry-failed-files only applies to file downloads.\n  \
                 Combine it with --files or --files-only"
            );
        }

        Ok(Self {
            output_dir: args.output_dir.clone(),
            base_url,
            token,
            concurrency: usize::from(args.concurrency),
            max_retries: u32::from(args.max_retries),
            item_delay: Duration::from_millis(args.item_delay),
            page_delay: Duration::from_millis(args.page_delay),
            page_size: usize::from(args.page_size),
            incremental: !args.full,
            include_projects: args.projects,
            download_files: args.files || args.files_only,
            files_only: args.files_only,
            retry_failed_files: args.retry_failed_files,
            markdown: args.markdown,
        })
    }
}

fn first_non_blank(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    [primary, fallback]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let parsed = match Url::parse(base_url) {
        Ok(parsed) => parsed,
        Err(e) => bail!("Invalid API base URL '{base_url}': {e}"),
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!(
            "Invalid API base URL '{base_url}': scheme must be http or https, got '{}'",
            parsed.scheme()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["chat-backup"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_cli_values_win_over_env() {
        let args = parse(&["--base-url", "https://cli.example/api/", "--token", "cli-token"]);
        let env = env_from(&[
            (BASE_URL_ENV, "https://env.example/api/"),
            (TOKEN_ENV, "env-token"),
        ]);
        let config = BackupConfig::resolve_with(&args, env).unwrap();
        assert_eq!(config.base_url, "https://cli.example/api/");
        assert_eq!(config.token, "cli-token");
    }

    #[test]
    fn test_env_fallbacks_used() {
        let args = parse(&[]);
        let env = env_from(&[
            (BASE_URL_ENV, "https://env.example/api/"),
            (TOKEN_ENV, "  env-token  "),
        ]);
        let config = BackupConfig::resolve_with(&args, env).unwrap();
        assert_eq!(config.base_url, "https://env.example/api/");
        assert_eq!(config.token, "env-token");
        assert!(config.incremental);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.page_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let args = parse(&["--token", "t"]);
        let err = BackupConfig::resolve_with(&args, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("No API base URL"));
    }

    #[test]
    fn test_blank_token_rejected() {
        let args = parse(&["--base-url", "https://x.example/", "--token", "   "]);
        let err = BackupConfig::resolve_with(&args, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains(TOKEN_ENV));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let args = parse(&["--base-url", "ftp://x.example/", "--token", "t"]);
        let err = BackupConfig::resolve_with(&args, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("scheme must be http or https"));
    }

    #[test]
    fn test_retry_failed_files_requires_file_mode() {
        let args = parse(&["--base-url", "https://x.example/", "--token", "t", "--retry-failed-files"]);
        let err = BackupConfig::resolve_with(&args, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("--files"));
    }

    #[test]
    fn test_mode_flags_resolved() {
        let args = parse(&[
            "--base-url",
            "https://x.example/",
            "--token",
            "t",
            "--full",
            "--files",
            "--projects",
        ]);
        let config = BackupConfig::resolve_with(&args, env_from(&[])).unwrap();
        assert!(!config.incremental);
        assert!(config.download_files);
        assert!(config.include_projects);
        assert!(!config.files_only);

        let args = parse(&["--base-url", "https://x.example/", "--token", "t", "--files-only"]);
        let config = BackupConfig::resolve_with(&args, env_from(&[])).unwrap();
        assert!(config.download_files);
        assert!(config.files_only);
    }
}
