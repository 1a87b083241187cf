//! Cross-Account Credential Broker
//!
//! Builds the canonical role ARN and requests temporary credentials with a
//! fixed session name. Credentials are never cached or reused across roles;
//! retry policy is owned by the coordinator, not here. Any denial,
//! throttling, or nonexistence error becomes an `AssumeRoleFailed` the
//! caller must treat as terminal for that role only.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::aws::sts::StsApi;
use crate::aws::{Credentials, Role};

/// The session name used for every assumption.
pub const DEFAULT_SESSION_NAME: &str = "AssumeRoleSession";

/// Terminal-for-this-role assumption failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not assume {role_arn}: {cause}")]
pub struct AssumeRoleFailed {
    pub role_arn: String,
    pub cause: String,
    /// Whether the underlying error was throttling/transport trouble. The
    /// broker never retries; the coordinator owns that policy.
    pub transient: bool,
}

/// Acquires scoped credentials for one role at a time.
pub struct CredentialBroker {
    sts: Arc<dyn StsApi>,
    session_name: String,
}

impl CredentialBroker {
    pub fn new(sts: Arc<dyn StsApi>) -> Self {
        Self {
            sts,
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }

    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    /// Assume `role_name` in `account_id`.
    pub async fn assume(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<Credentials, AssumeRoleFailed> {
        let role_arn = Role::new(account_id, role_name).arn;

        match self.sts.assume_role(&role_arn, &self.session_name).await {
            Ok(credentials) => {
                info!(role = %role_name, account = %account_id, "assumed role");
                Ok(credentials)
            }
            Err(error) => {
                warn!(role = %role_name, account = %account_id, error = %error, "assume role failed");
                Err(AssumeRoleFailed {
                    role_arn,
                    cause: error.to_string(),
                    transient: error.is_transient(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ApiError;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    struct FakeSts {
        deny: bool,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl FakeSts {
        fn allowing() -> Self {
            Self {
                deny: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn denying() -> Self {
            Self {
                deny: true,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StsApi for FakeSts {
        async fn assume_role(
            &self,
            role_arn: &str,
            session_name: &str,
        ) -> Result<Credentials, ApiError> {
            self.seen
                .lock()
                .unwrap()
                .push((role_arn.to_string(), session_name.to_string()));
            if self.deny {
                return Err(ApiError::Api {
                    service: "sts",
                    code: "AccessDenied".to_string(),
                    message: "not authorized".to_string(),
                });
            }
            Ok(Credentials {
                access_key_id: "ASIAEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: "token".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }
    }

    #[tokio::test]
    async fn test_canonical_arn_and_session_name() {
        let sts = Arc::new(FakeSts::allowing());
        let broker = CredentialBroker::new(sts.clone());

        broker.assume("123456789012", "deploy").await.unwrap();

        let seen = sts.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (
                "arn:aws:iam::123456789012:role/deploy".to_string(),
                DEFAULT_SESSION_NAME.to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_denial_becomes_assume_role_failed() {
        let broker = CredentialBroker::new(Arc::new(FakeSts::denying()));

        let error = broker.assume("123456789012", "deploy").await.unwrap_err();
        assert_eq!(error.role_arn, "arn:aws:iam::123456789012:role/deploy");
        assert!(error.cause.contains("AccessDenied"));
        assert!(!error.transient);
    }

    #[tokio::test]
    async fn test_custom_session_name() {
        let sts = Arc::new(FakeSts::allowing());
        let broker = CredentialBroker::new(sts.clone()).with_session_name("trust-sync");

        broker.assume("123456789012", "deploy").await.unwrap();

        assert_eq!(sts.seen.lock().unwrap()[0].1, "trust-sync");
    }
}
