//! Account Status Agent - Standalone Binary
//!
//! Walks the organization's top-level OUs and reports each member account's
//! active/suspended status as a terminal table.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use trust_sync::aws::organizations::{OrganizationsApi, OrganizationsClient};
use trust_sync::aws::AwsConfig;

/// Account Status Agent - reports suspended accounts per organizational unit
#[derive(Parser, Debug)]
#[command(name = "account-status-agent", version, about)]
struct Args {}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let _args = Args::parse();

    let config = AwsConfig::from_env()?;
    let organizations: Arc<dyn OrganizationsApi> = Arc::new(OrganizationsClient::new(&config));

    let roots = organizations
        .list_roots()
        .await
        .context("failed to list organization roots")?;
    let root = roots.first().context("organization has no root")?;

    let units = organizations
        .list_organizational_units(&root.id)
        .await
        .context("failed to list organizational units")?;

    let mut table = Table::new();
    table.set_header(vec!["OU ID", "Account ID", "Status"]);

    let progress = ProgressBar::new(units.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );

    for unit in &units {
        progress.set_message(unit.name.clone());

        let accounts = organizations
            .list_accounts_for_parent(&unit.id)
            .await
            .with_context(|| format!("failed to list accounts for OU {}", unit.id))?;

        for account in accounts {
            // Per-account status read; a failure is a row, not a crash.
            let status = match organizations.describe_account(&account.id).await {
                Ok(described) if described.is_suspended() => "Suspended".to_string(),
                Ok(_) => "Active".to_string(),
                Err(error) => {
                    warn!(account = %account.id, error = %error, "could not describe account");
                    format!("Error: {error}")
                }
            };
            table.add_row(vec![unit.id.clone(), account.id.clone(), status]);
        }

        progress.inc(1);
    }
    progress.finish_and_clear();

    println!("{table}");
    Ok(())
}
