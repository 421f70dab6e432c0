//! Configuration for feed-publisher
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! has an environment fallback so CI jobs can configure a run without a
//! command line, and a `.env` file is honoured by `main`.

use clap::{ArgAction, Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::{GithubConfig, DEFAULT_MAX_ARCHIVE_BYTES};
use crate::error::{PublishError, Result};
use crate::gateway::HttpGatewayConfig;
use crate::logging::LogFormat;
use crate::monitor::{MonitorConfig, DEFAULT_MAX_STALL_TRIALS};
use crate::orchestrator::PublishSettings;
use crate::types::{ManifestOptions, RedundancyLevel};

/// feed-publisher - publish a static build to content-addressed storage
#[derive(Parser, Debug, Clone)]
#[command(name = "feed-publisher", version)]
#[command(about = "Upload the latest build artifact and point a signed feed at it")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub args: Args,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Keystore utilities
    #[command(subcommand)]
    Keystore(KeystoreCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum KeystoreCommand {
    /// Generate a new identity and print its encrypted keystore JSON
    New,
    /// Print the owner address of --keystore
    Address,
}

/// Publish run settings
#[derive(clap::Args, Debug, Clone)]
pub struct Args {
    /// Owner of the repository producing the build artifact
    #[arg(long, env = "REPO_OWNER")]
    pub repo_owner: Option<String>,

    /// Repository producing the build artifact
    #[arg(long, env = "REPO_NAME")]
    pub repo_name: Option<String>,

    /// Exact name of the artifact to publish
    #[arg(long, env = "ARTIFACT_NAME")]
    pub artifact_name: Option<String>,

    /// Token used for the artifact API and download
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub API root
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// Largest artifact archive accepted, in bytes
    #[arg(long, env = "MAX_ARTIFACT_BYTES", default_value_t = DEFAULT_MAX_ARCHIVE_BYTES)]
    pub max_artifact_bytes: u64,

    /// Workspace the artifact is extracted into (cleared on every run)
    #[arg(long, env = "BUILD_DIR", default_value = "build")]
    pub build_dir: PathBuf,

    /// Encrypted keystore JSON
    #[arg(long, env = "KEYSTORE", hide_env_values = true)]
    pub keystore: Option<String>,

    /// Passphrase for the keystore
    #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
    pub keystore_password: Option<String>,

    /// Feed topic name
    #[arg(long = "topic", env = "FEED_TOPIC")]
    pub topic: Option<String>,

    /// Storage node API URL
    #[arg(long, env = "STORAGE_URL", default_value = "http://localhost:1633")]
    pub storage_url: String,

    /// Document served at the collection root
    #[arg(long, env = "INDEX_DOCUMENT", default_value = "index.html")]
    pub index_document: String,

    /// Document served for missing paths
    #[arg(long, env = "ERROR_DOCUMENT")]
    pub error_document: Option<String>,

    /// Pin uploaded content on the storage node
    #[arg(long, env = "PIN", default_value = "false")]
    pub pin: bool,

    /// Encrypt uploaded content
    #[arg(long, env = "ENCRYPT", default_value = "false")]
    pub encrypt: bool,

    /// Deferred upload (pass `--deferred false` to wait for push-sync)
    #[arg(long, env = "DEFERRED_UPLOAD", default_value_t = true, action = ArgAction::Set)]
    pub deferred: bool,

    /// Erasure coding level (medium, strong, insane, paranoid or 1-4)
    #[arg(long, env = "REDUNDANCY_LEVEL")]
    pub redundancy: Option<RedundancyLevel>,

    /// Delay between replication polls in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "500")]
    pub poll_interval_ms: u64,

    /// Polls without progress before replication is declared stalled
    #[arg(long, env = "MAX_STALL_TRIALS", default_value_t = DEFAULT_MAX_STALL_TRIALS)]
    pub max_stall_trials: u32,

    /// Overall replication ceiling in seconds (unset waits while progress continues)
    #[arg(long, env = "REPLICATION_MAX_WAIT_SECS")]
    pub max_wait_secs: Option<u64>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "120")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    /// Validate settings needed for a publish run
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("REPO_OWNER", &self.repo_owner),
            ("REPO_NAME", &self.repo_name),
            ("ARTIFACT_NAME", &self.artifact_name),
            ("KEYSTORE", &self.keystore),
            ("KEYSTORE_PASSWORD", &self.keystore_password),
            ("FEED_TOPIC", &self.topic),
        ];
        for (name, value) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(PublishError::Configuration(format!("{} is required", name)));
            }
        }

        if self.max_stall_trials == 0 {
            return Err(PublishError::Configuration(
                "MAX_STALL_TRIALS must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(PublishError::Configuration(
                "REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.max_artifact_bytes == 0 {
            return Err(PublishError::Configuration(
                "MAX_ARTIFACT_BYTES must be greater than zero".to_string(),
            ));
        }
        if self.index_document.trim().is_empty() {
            return Err(PublishError::Configuration(
                "INDEX_DOCUMENT must not be empty".to_string(),
            ));
        }

        parse_url("STORAGE_URL", &self.storage_url)?;
        parse_url("GITHUB_API_URL", &self.github_api_url)?;

        Ok(())
    }

    /// Keystore JSON and passphrase, for the keystore subcommands and the run
    pub fn keystore_credentials(&self) -> Result<(&str, &str)> {
        let password = self
            .keystore_password
            .as_deref()
            .ok_or_else(|| PublishError::Configuration("KEYSTORE_PASSWORD is required".into()))?;
        let keystore = self
            .keystore
            .as_deref()
            .ok_or_else(|| PublishError::Configuration("KEYSTORE is required".into()))?;
        Ok((keystore, password))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_stall_trials: self.max_stall_trials,
            max_wait: self.max_wait_secs.map(Duration::from_secs),
        }
    }

    pub fn manifest_options(&self) -> ManifestOptions {
        ManifestOptions {
            index_document: self.index_document.clone(),
            error_document: self.error_document.clone().filter(|d| !d.is_empty()),
            pin: self.pin,
            encrypt: self.encrypt,
            deferred: self.deferred,
            redundancy: self.redundancy,
        }
    }

    pub fn gateway_config(&self) -> HttpGatewayConfig {
        HttpGatewayConfig {
            base_url: self.storage_url.clone(),
            timeout: self.request_timeout(),
        }
    }

    pub fn github_config(&self) -> GithubConfig {
        GithubConfig {
            api_url: self.github_api_url.clone(),
            owner: self.repo_owner.clone().unwrap_or_default(),
            repo: self.repo_name.clone().unwrap_or_default(),
            token: self.github_token.clone().filter(|t| !t.is_empty()),
            timeout: self.request_timeout(),
            max_archive_bytes: self.max_artifact_bytes,
        }
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            artifact_name: self.artifact_name.clone().unwrap_or_default(),
            build_dir: self.build_dir.clone(),
            topic: self.topic.clone().unwrap_or_default(),
            manifest: self.manifest_options(),
            monitor: self.monitor_config(),
        }
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| PublishError::Configuration(format!("{} is not a valid URL: {}", name, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PublishError::Configuration(format!(
            "{} must use http or https",
            name
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &[
        "feed-publisher",
        "--repo-owner",
        "acme",
        "--repo-name",
        "site",
        "--artifact-name",
        "dist",
        "--keystore",
        "{}",
        "--keystore-password",
        "secret",
        "--topic",
        "website",
    ];

    fn parse(extra: &[&str]) -> Cli {
        let argv: Vec<&str> = REQUIRED.iter().chain(extra.iter()).copied().collect();
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        cli.args.validate().unwrap();

        let monitor = cli.args.monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_millis(500));
        assert_eq!(monitor.max_stall_trials, 15);
        assert!(monitor.max_wait.is_none());

        let options = cli.args.manifest_options();
        assert_eq!(options, ManifestOptions::default());
        assert_eq!(cli.args.gateway_config().base_url, "http://localhost:1633");
        assert_eq!(cli.args.github_config().max_archive_bytes, 1 << 30);
    }

    #[test]
    fn test_upload_options() {
        let cli = parse(&[
            "--pin",
            "--encrypt",
            "--deferred",
            "false",
            "--redundancy",
            "strong",
            "--error-document",
            "404.html",
            "--max-wait-secs",
            "90",
        ]);

        let options = cli.args.manifest_options();
        assert!(options.pin);
        assert!(options.encrypt);
        assert!(!options.deferred);
        assert_eq!(options.redundancy, Some(RedundancyLevel::Strong));
        assert_eq!(options.error_document.as_deref(), Some("404.html"));
        assert_eq!(
            cli.args.monitor_config().max_wait,
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn test_zero_stall_trials_rejected() {
        let cli = parse(&["--max-stall-trials", "0"]);
        let err = cli.args.validate().unwrap_err();
        assert!(err.to_string().contains("MAX_STALL_TRIALS"));
    }

    #[test]
    fn test_bad_storage_url_rejected() {
        let cli = parse(&["--storage-url", "not a url"]);
        assert_eq!(cli.args.validate().unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_keystore_subcommand() {
        let cli = Cli::try_parse_from(["feed-publisher", "keystore", "new"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Keystore(KeystoreCommand::New))
        ));
    }
}
