//! Trust Policy Propagation Agent - Standalone Binary
//!
//! Rolls a trust-policy statement out to a set of IAM roles: every role the
//! directory can see, or the roles listed in an input CSV. Results land in a
//! terminal table and a CSV artifact; individual role failures are data, not
//! process failures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trust_sync::aws::iam::{IamClient, IamClientFactory};
use trust_sync::aws::sts::StsClient;
use trust_sync::aws::{AwsConfig, Role};
use trust_sync::broker::{CredentialBroker, DEFAULT_SESSION_NAME};
use trust_sync::coordinator::{CancelFlag, Coordinator, PROTECTED_ROLE_PREFIX};
use trust_sync::mutator::ApplyMode;
use trust_sync::policy::{Statement, TrustDocument};
use trust_sync::report;
use trust_sync::RoleDirectory;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Append the statement unless it is already present
    Merge,
    /// Overwrite each role's trust document wholesale
    Replace,
}

/// Trust Policy Propagation Agent - distributes a trust-policy statement
/// across IAM roles
#[derive(Parser, Debug)]
#[command(name = "trust-sync-agent", version, about)]
struct Args {
    /// Propagation mode
    #[arg(long, value_enum, default_value = "merge")]
    mode: Mode,

    /// Policy JSON: a single statement in merge mode, a full trust document
    /// in replace mode
    #[arg(long)]
    policy_file: PathBuf,

    /// Optional CSV of target roles (AccountID,RoleName); discovered from
    /// IAM when omitted
    #[arg(long)]
    input_csv: Option<PathBuf>,

    /// Assume each target role before mutating it
    #[arg(long, default_value = "false")]
    cross_account: bool,

    /// Results CSV path
    #[arg(long, default_value = "trust_policy_update_results.csv")]
    output: PathBuf,

    /// Concurrent role operations
    #[arg(long, default_value = "1")]
    concurrency: usize,

    /// STS session name for cross-account assumption
    #[arg(long, default_value = DEFAULT_SESSION_NAME, env = "TRUST_SYNC_SESSION_NAME")]
    session_name: String,

    /// Role-name prefix excluded from mutation
    #[arg(long, default_value = PROTECTED_ROLE_PREFIX)]
    protected_prefix: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let started = Instant::now();

    let policy_json = std::fs::read_to_string(&args.policy_file)
        .with_context(|| format!("failed to read policy file {}", args.policy_file.display()))?;
    let mode = match args.mode {
        Mode::Merge => ApplyMode::Merge(
            Statement::from_json(&policy_json).context("policy file is not a valid statement")?,
        ),
        Mode::Replace => ApplyMode::Replace(
            TrustDocument::from_json(&policy_json)
                .context("policy file is not a valid trust document")?,
        ),
    };

    let config = AwsConfig::from_env()?;
    let iam: Arc<IamClient> = Arc::new(IamClient::new(&config));
    let sts = Arc::new(StsClient::new(&config));
    let broker = CredentialBroker::new(sts).with_session_name(args.session_name.clone());

    info!(
        cross_account = args.cross_account,
        concurrency = args.concurrency,
        "starting trust-sync agent"
    );

    // Target set: supplied out-of-band or discovered from the directory.
    let roles: Vec<Role> = match &args.input_csv {
        Some(path) => report::read_role_targets(path)?
            .into_iter()
            .map(|target| Role::new(target.account_id, target.role_name))
            .collect(),
        None => RoleDirectory::new(iam.clone())
            .list_all_roles()
            .await
            .context("role directory listing failed")?,
    };

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, letting in-flight role operations finish");
                cancel.cancel();
            }
        });
    }

    let progress = ProgressBar::new(roles.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );

    let coordinator = {
        let progress = progress.clone();
        Coordinator::new(iam, Arc::new(IamClientFactory), broker)
            .with_protected_prefix(args.protected_prefix)
            .with_concurrency(args.concurrency)
            .with_cancel_flag(cancel)
            .with_progress(Arc::new(move |result| {
                progress.set_message(result.role_name.clone());
                progress.inc(1);
            }))
    };

    let results = coordinator.run(&roles, &mode, args.cross_account).await;
    progress.finish_and_clear();

    let mut table = Table::new();
    table.set_header(vec!["Account ID", "Role Name", "Trust Policy Updated"]);
    for result in &results {
        table.add_row(vec![
            result.account_id.clone(),
            result.role_name.clone(),
            result.outcome.to_string(),
        ]);
    }
    println!("{table}");

    report::write_results(&args.output, &results)?;

    info!(
        roles = results.len(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        output = %args.output.display(),
        "trust-sync run complete"
    );
    Ok(())
}
