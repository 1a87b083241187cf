//! Run Coordinator & Result Aggregator
//!
//! Drives the per-role pipeline: exclusion check, optional cross-account
//! credential acquisition, mutation, and result recording. Every role that
//! enters a run leaves with exactly one terminal outcome, in input order;
//! one role's failure never cancels its siblings. Roles whose names carry
//! the platform-reserved prefix are skipped before any network call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::aws::iam::{IamApi, ScopedIamFactory};
use crate::aws::{Credentials, Role};
use crate::broker::CredentialBroker;
use crate::mutator::{ApplyMode, MutationError, MutationOutcome, TrustPolicyMutator};
use crate::retry::RetryPolicy;

/// Role-name prefix of platform-managed roles that must never be written.
pub const PROTECTED_ROLE_PREFIX: &str = "AWSServiceRole";

/// Why a role was skipped without any API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ProtectedByPlatform,
    Cancelled,
}

/// Terminal outcome for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Updated,
    AlreadyPresent,
    Skipped(SkipReason),
    AssumeRoleFailed(String),
    MutationFailed(MutationError),
}

impl std::fmt::Display for Outcome {
    /// The report vocabulary: `Updated` and `AlreadyPresent` both render as
    /// `True` (the statement is in place), failures as `False`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Updated | Outcome::AlreadyPresent => write!(f, "True"),
            Outcome::Skipped(SkipReason::ProtectedByPlatform) => {
                write!(f, "Skipped (Protected role)")
            }
            Outcome::Skipped(SkipReason::Cancelled) => write!(f, "Skipped (Cancelled)"),
            Outcome::AssumeRoleFailed(_) => write!(f, "Assume Role Failed"),
            Outcome::MutationFailed(_) => write!(f, "False"),
        }
    }
}

/// One row of the final report. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub account_id: String,
    pub role_name: String,
    pub outcome: Outcome,
}

/// Cooperative cancellation: stops new per-role work, lets in-flight
/// operations reach a terminal outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type ProgressCallback = Arc<dyn Fn(&OperationResult) + Send + Sync>;

/// Orchestrates a propagation run over a set of roles.
pub struct Coordinator {
    iam: Arc<dyn IamApi>,
    scoped_iam: Arc<dyn ScopedIamFactory>,
    broker: CredentialBroker,
    mutator: TrustPolicyMutator,
    retry: RetryPolicy,
    protected_prefix: String,
    concurrency: usize,
    cancel: CancelFlag,
    progress: Option<ProgressCallback>,
}

impl Coordinator {
    pub fn new(
        iam: Arc<dyn IamApi>,
        scoped_iam: Arc<dyn ScopedIamFactory>,
        broker: CredentialBroker,
    ) -> Self {
        Self {
            iam,
            scoped_iam,
            broker,
            mutator: TrustPolicyMutator::default(),
            retry: RetryPolicy::default(),
            protected_prefix: PROTECTED_ROLE_PREFIX.to_string(),
            concurrency: 1,
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    /// The coordinator owns the retry policy for every per-role API call,
    /// including the ones the mutator makes on its behalf.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.mutator = TrustPolicyMutator::new(retry);
        self
    }

    pub fn with_protected_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.protected_prefix = prefix.into();
        self
    }

    /// Bounded worker fan-out. Role operations are independent (each role
    /// appears once in the input), so widths above one only change
    /// throughput, not semantics.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Process every role, returning exactly one result per input role in
    /// input order.
    pub async fn run(
        &self,
        roles: &[Role],
        mode: &ApplyMode,
        cross_account: bool,
    ) -> Vec<OperationResult> {
        info!(
            roles = roles.len(),
            cross_account,
            concurrency = self.concurrency,
            "starting propagation run"
        );

        let results: Vec<OperationResult> = stream::iter(roles.iter())
            .map(|role| self.process_role(role, mode, cross_account))
            .buffered(self.concurrency)
            .collect()
            .await;

        let updated = results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Updated | Outcome::AlreadyPresent))
            .count();
        info!(
            roles = results.len(),
            in_place = updated,
            "propagation run complete"
        );

        results
    }

    async fn process_role(
        &self,
        role: &Role,
        mode: &ApplyMode,
        cross_account: bool,
    ) -> OperationResult {
        let outcome = self.role_outcome(role, mode, cross_account).await;
        let result = OperationResult {
            account_id: role.account_id.clone(),
            role_name: role.role_name.clone(),
            outcome,
        };
        if let Some(progress) = &self.progress {
            progress(&result);
        }
        result
    }

    async fn role_outcome(&self, role: &Role, mode: &ApplyMode, cross_account: bool) -> Outcome {
        // Exclusion policy runs first: protected roles must never see a
        // network call, not even a credential request.
        if role.role_name.starts_with(&self.protected_prefix) {
            info!(role = %role.role_name, "skipping protected role");
            return Outcome::Skipped(SkipReason::ProtectedByPlatform);
        }

        if self.cancel.is_cancelled() {
            debug!(role = %role.role_name, "run cancelled before this role started");
            return Outcome::Skipped(SkipReason::Cancelled);
        }

        let iam: Arc<dyn IamApi> = if cross_account {
            let credentials = match self.assume_with_retry(role).await {
                Ok(credentials) => credentials,
                Err(cause) => return Outcome::AssumeRoleFailed(cause),
            };
            if credentials.is_expired() {
                warn!(role = %role.role_name, "assumed credentials already expired");
                return Outcome::AssumeRoleFailed("credentials expired before use".to_string());
            }
            self.scoped_iam.scoped(&credentials)
        } else {
            Arc::clone(&self.iam)
        };

        match self.mutator.apply(iam.as_ref(), &role.role_name, mode).await {
            MutationOutcome::Updated => {
                info!(role = %role.role_name, account = %role.account_id, "trust policy updated");
                Outcome::Updated
            }
            MutationOutcome::AlreadyPresent => {
                debug!(role = %role.role_name, "trust policy already in place");
                Outcome::AlreadyPresent
            }
            MutationOutcome::Failed(error) => {
                warn!(role = %role.role_name, account = %role.account_id, error = %error, "trust policy update failed");
                Outcome::MutationFailed(error)
            }
        }
    }

    /// Assume the role, retrying throttled attempts under the coordinator's
    /// retry policy. The broker itself never retries.
    async fn assume_with_retry(&self, role: &Role) -> Result<Credentials, String> {
        let mut delay = self.retry.base_delay;
        let mut attempt = 1u32;

        loop {
            match self.broker.assume(&role.account_id, &role.role_name).await {
                Ok(credentials) => return Ok(credentials),
                Err(failure) if failure.transient && attempt < self.retry.max_attempts => {
                    warn!(
                        role = %role.role_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient assume-role failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(failure) => return Err(failure.cause),
            }
        }
    }
}
