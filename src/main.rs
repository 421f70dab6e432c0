//! feed-publisher binary
//!
//! Exit status is 0 when the feed points at the new content and 1 for any
//! failure, including content that was stored but never referenced.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use feed_publisher::{
    artifact::GithubArtifacts,
    config::{Args, Cli, Command, KeystoreCommand},
    gateway::HttpGateway,
    keystore::{self, SigningIdentity},
    logging,
    monitor::TracingProgress,
    Orchestrator, PublishError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init_tracing(&cli.args.log_level, cli.args.log_format);

    if let Some(Command::Keystore(command)) = cli.command {
        return run_keystore_command(command, &cli.args);
    }

    if let Err(e) = publish(&cli.args).await {
        error!(kind = e.kind(), "{}", e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn publish(args: &Args) -> Result<(), PublishError> {
    args.validate()?;

    let identity = unlock_identity(args)?;

    info!("======================================");
    info!("  feed-publisher");
    info!("======================================");
    info!(
        "Repository: {}/{}",
        args.repo_owner.as_deref().unwrap_or_default(),
        args.repo_name.as_deref().unwrap_or_default()
    );
    info!("Artifact: {}", args.artifact_name.as_deref().unwrap_or_default());
    info!("Storage node: {}", args.storage_url);
    info!("Feed owner: {}", identity.address());
    info!("Topic: {}", args.topic.as_deref().unwrap_or_default());
    info!("======================================");

    let gateway = HttpGateway::new(args.gateway_config())
        .map_err(|e| PublishError::Configuration(format!("storage client: {}", e)))?;
    let artifacts = GithubArtifacts::new(args.github_config())
        .map_err(|e| PublishError::Configuration(format!("artifact client: {}", e)))?;

    let orchestrator = Orchestrator::new(
        Arc::new(artifacts),
        Arc::new(gateway),
        Arc::new(TracingProgress::new()),
        args.publish_settings(),
    );
    let report = orchestrator.run(&identity).await?;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| PublishError::Workspace(format!("encoding report: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn unlock_identity(args: &Args) -> Result<SigningIdentity, PublishError> {
    let (keystore_json, password) = args.keystore_credentials()?;
    keystore::unlock(keystore_json, password.as_bytes())
        .map_err(|e| PublishError::Configuration(format!("keystore unlock failed: {}", e)))
}

fn run_keystore_command(command: KeystoreCommand, args: &Args) -> anyhow::Result<()> {
    match command {
        KeystoreCommand::New => {
            let password = args
                .keystore_password
                .as_deref()
                .filter(|p| !p.is_empty())
                .context("KEYSTORE_PASSWORD is required to encrypt a new keystore")?;

            let identity = SigningIdentity::generate();
            let file = keystore::encrypt_identity(&identity, password.as_bytes())?;
            info!(address = identity.address(), "Generated new identity");
            println!("{}", file.to_json()?);
        }
        KeystoreCommand::Address => {
            let identity = unlock_identity(args)?;
            println!("{}", identity.address());
        }
    }
    Ok(())
}
