//! Trust-Policy Mutator
//!
//! The per-role merge/update state machine. Merge mode reads the current
//! trust document and appends the new statement only when it is not already
//! present, so re-running a rollout never duplicates statements or produces
//! spurious writes. Replace mode overwrites the whole document. A write is
//! always the full document; there is no partial write path.

use tracing::debug;

use crate::aws::iam::IamApi;
use crate::aws::ApiError;
use crate::policy::{Statement, TrustDocument};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// What to do to each role's trust document.
#[derive(Debug, Clone)]
pub enum ApplyMode {
    /// Overwrite with this full document.
    Replace(TrustDocument),
    /// Append this statement unless it is already present.
    Merge(Statement),
}

/// Why a mutation failed, as recorded per role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    NotFound,
    Unmodifiable,
    Other(String),
}

impl std::fmt::Display for MutationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationError::NotFound => write!(f, "role not found"),
            MutationError::Unmodifiable => write!(f, "role is protected and cannot be modified"),
            MutationError::Other(cause) => write!(f, "{cause}"),
        }
    }
}

/// Terminal outcome of one mutation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Updated,
    AlreadyPresent,
    Failed(MutationError),
}

/// Applies an [`ApplyMode`] to one role's trust document.
pub struct TrustPolicyMutator {
    retry: RetryPolicy,
}

impl Default for TrustPolicyMutator {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl TrustPolicyMutator {
    /// The retry policy is handed in by the coordinator, which owns it.
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub async fn apply(
        &self,
        iam: &dyn IamApi,
        role_name: &str,
        mode: &ApplyMode,
    ) -> MutationOutcome {
        match mode {
            ApplyMode::Replace(document) => self.write(iam, role_name, document).await,
            ApplyMode::Merge(statement) => self.merge(iam, role_name, statement).await,
        }
    }

    async fn merge(
        &self,
        iam: &dyn IamApi,
        role_name: &str,
        statement: &Statement,
    ) -> MutationOutcome {
        let detail = match retry_with_backoff(&self.retry, "GetRole", || iam.get_role(role_name))
            .await
        {
            Ok(detail) => detail,
            Err(error) => return MutationOutcome::Failed(classify(error)),
        };

        let current = match TrustDocument::from_json(&detail.trust_document_json) {
            Ok(document) => document,
            Err(error) => {
                return MutationOutcome::Failed(MutationError::Other(format!(
                    "unparseable trust document: {error}"
                )))
            }
        };

        if current.contains(statement) {
            debug!(role = %role_name, "statement already present, no write");
            return MutationOutcome::AlreadyPresent;
        }

        let updated = current.with_statement(statement.clone());
        self.write(iam, role_name, &updated).await
    }

    async fn write(
        &self,
        iam: &dyn IamApi,
        role_name: &str,
        document: &TrustDocument,
    ) -> MutationOutcome {
        let json = document.to_json();
        match retry_with_backoff(&self.retry, "UpdateAssumeRolePolicy", || {
            iam.update_assume_role_policy(role_name, &json)
        })
        .await
        {
            Ok(()) => MutationOutcome::Updated,
            Err(error) => MutationOutcome::Failed(classify(error)),
        }
    }
}

fn classify(error: ApiError) -> MutationError {
    if error.is_not_found() {
        MutationError::NotFound
    } else if error.is_unmodifiable() {
        MutationError::Unmodifiable
    } else {
        MutationError::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::types::{Role, RoleDetail, RolePage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// One role's trust document plus call accounting.
    struct FakeIam {
        document: Mutex<Option<String>>,
        reads: AtomicU32,
        writes: AtomicU32,
        fail_write_with: Option<&'static str>,
    }

    impl FakeIam {
        fn with_document(json: &str) -> Self {
            Self {
                document: Mutex::new(Some(json.to_string())),
                reads: AtomicU32::new(0),
                writes: AtomicU32::new(0),
                fail_write_with: None,
            }
        }

        fn missing_role() -> Self {
            Self {
                document: Mutex::new(None),
                reads: AtomicU32::new(0),
                writes: AtomicU32::new(0),
                fail_write_with: None,
            }
        }

        fn failing_writes(json: &str, code: &'static str) -> Self {
            Self {
                document: Mutex::new(Some(json.to_string())),
                reads: AtomicU32::new(0),
                writes: AtomicU32::new(0),
                fail_write_with: Some(code),
            }
        }

        fn written_document(&self) -> TrustDocument {
            TrustDocument::from_json(self.document.lock().unwrap().as_ref().unwrap()).unwrap()
        }
    }

    #[async_trait]
    impl IamApi for FakeIam {
        async fn list_roles(&self, _marker: Option<&str>) -> Result<RolePage, ApiError> {
            unimplemented!("not used by the mutator")
        }

        async fn get_role(&self, role_name: &str) -> Result<RoleDetail, ApiError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.document.lock().unwrap().clone() {
                Some(json) => Ok(RoleDetail {
                    role: Role::new("123456789012", role_name),
                    trust_document_json: json,
                }),
                None => Err(ApiError::Api {
                    service: "iam",
                    code: "NoSuchEntity".to_string(),
                    message: format!("role {role_name} not found"),
                }),
            }
        }

        async fn update_assume_role_policy(
            &self,
            _role_name: &str,
            policy_document: &str,
        ) -> Result<(), ApiError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = self.fail_write_with {
                return Err(ApiError::Api {
                    service: "iam",
                    code: code.to_string(),
                    message: "rejected".to_string(),
                });
            }
            *self.document.lock().unwrap() = Some(policy_document.to_string());
            Ok(())
        }
    }

    fn statement() -> Statement {
        Statement::new(json!({
            "Effect": "Allow",
            "Principal": { "Service": "ds.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }))
    }

    fn document_without_statement() -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ec2.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        })
        .to_string()
    }

    fn document_with_statement() -> String {
        json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Principal": { "Service": "ec2.amazonaws.com" },
                    "Action": "sts:AssumeRole"
                },
                {
                    "Effect": "Allow",
                    "Principal": { "Service": "ds.amazonaws.com" },
                    "Action": "sts:AssumeRole"
                }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_merge_appends_and_preserves_prior_statements() {
        let iam = FakeIam::with_document(&document_without_statement());
        let mutator = TrustPolicyMutator::default();

        let outcome = mutator
            .apply(&iam, "app-runner", &ApplyMode::Merge(statement()))
            .await;

        assert_eq!(outcome, MutationOutcome::Updated);
        assert_eq!(iam.writes.load(Ordering::SeqCst), 1);
        let written = iam.written_document();
        assert_eq!(written.statements.len(), 2);
        assert!(written.contains(&statement()));
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let iam = FakeIam::with_document(&document_without_statement());
        let mutator = TrustPolicyMutator::default();
        let mode = ApplyMode::Merge(statement());

        let first = mutator.apply(&iam, "app-runner", &mode).await;
        let second = mutator.apply(&iam, "app-runner", &mode).await;

        assert_eq!(first, MutationOutcome::Updated);
        assert_eq!(second, MutationOutcome::AlreadyPresent);
        // One write total; the second run must not touch the document.
        assert_eq!(iam.writes.load(Ordering::SeqCst), 1);
        assert_eq!(iam.written_document().statements.len(), 2);
    }

    #[tokio::test]
    async fn test_already_present_issues_no_write() {
        let iam = FakeIam::with_document(&document_with_statement());
        let mutator = TrustPolicyMutator::default();

        let outcome = mutator
            .apply(&iam, "app-runner", &ApplyMode::Merge(statement()))
            .await;

        assert_eq!(outcome, MutationOutcome::AlreadyPresent);
        assert_eq!(iam.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_role_maps_to_not_found() {
        let iam = FakeIam::missing_role();
        let mutator = TrustPolicyMutator::default();

        let outcome = mutator
            .apply(&iam, "ghost", &ApplyMode::Merge(statement()))
            .await;

        assert_eq!(outcome, MutationOutcome::Failed(MutationError::NotFound));
    }

    #[tokio::test]
    async fn test_unmodifiable_role_maps_to_unmodifiable() {
        let iam = FakeIam::failing_writes(&document_without_statement(), "UnmodifiableEntity");
        let mutator = TrustPolicyMutator::default();

        let outcome = mutator
            .apply(&iam, "service-linked", &ApplyMode::Merge(statement()))
            .await;

        assert_eq!(outcome, MutationOutcome::Failed(MutationError::Unmodifiable));
    }

    #[tokio::test]
    async fn test_replace_writes_without_reading() {
        let iam = FakeIam::with_document(&document_without_statement());
        let mutator = TrustPolicyMutator::default();
        let replacement = TrustDocument::new(vec![statement()]);

        let outcome = mutator
            .apply(&iam, "app-runner", &ApplyMode::Replace(replacement.clone()))
            .await;

        assert_eq!(outcome, MutationOutcome::Updated);
        assert_eq!(iam.reads.load(Ordering::SeqCst), 0);
        assert_eq!(iam.written_document(), replacement);
    }

    #[tokio::test]
    async fn test_other_rejections_carry_the_cause() {
        let iam = FakeIam::failing_writes(&document_without_statement(), "AccessDenied");
        let mutator = TrustPolicyMutator::default();

        let outcome = mutator
            .apply(&iam, "app-runner", &ApplyMode::Merge(statement()))
            .await;

        match outcome {
            MutationOutcome::Failed(MutationError::Other(cause)) => {
                assert!(cause.contains("AccessDenied"));
            }
            other => panic!("expected Other failure, got {other:?}"),
        }
    }
}
