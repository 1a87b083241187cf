//! Role Audit Agent - Standalone Binary
//!
//! Classifies every IAM role the directory can see as CloudFormation-managed
//! (stack or stack set) or manually created, and writes the provenance audit
//! artifact. Pure reads; safe to run as often as needed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trust_sync::aws::cloudformation::CloudFormationClient;
use trust_sync::aws::iam::IamClient;
use trust_sync::aws::AwsConfig;
use trust_sync::provenance::RoleOrigin;
use trust_sync::report;
use trust_sync::{ProvenanceClassifier, RoleDirectory};

/// Role Audit Agent - reports whether each IAM role was created by
/// CloudFormation or by hand
#[derive(Parser, Debug)]
#[command(name = "role-audit-agent", version, about)]
struct Args {
    /// Provenance CSV path
    #[arg(long, default_value = "roles_audit.csv")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = AwsConfig::from_env()?;
    let iam = Arc::new(IamClient::new(&config));
    let cloudformation = Arc::new(CloudFormationClient::new(&config));

    info!("gathering role provenance data");

    let roles = RoleDirectory::new(iam)
        .list_all_roles()
        .await
        .context("role directory listing failed")?;

    let records = ProvenanceClassifier::new(cloudformation)
        .classify(&roles)
        .await
        .context("provenance classification failed")?;

    let cloudformation_count = records
        .iter()
        .filter(|r| r.origin != RoleOrigin::Manual)
        .count();
    info!(
        total = records.len(),
        cloudformation = cloudformation_count,
        manual = records.len() - cloudformation_count,
        "classification complete, writing audit artifact"
    );

    report::write_provenance(&args.output, &records)?;

    info!(output = %args.output.display(), "role audit complete");
    Ok(())
}
