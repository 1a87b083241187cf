//! Role & Account Directory
//!
//! Exhaustively pages the IAM role listing and deduplicates by role name.
//! Downstream provenance classification is a set difference over this
//! listing, so a partial directory is worse than none: any page failure
//! that survives the retry policy aborts the whole listing.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::aws::iam::IamApi;
use crate::aws::{ApiError, Role};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// The role listing could not be completed; no partial directory is trusted.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("role directory unavailable: {0}")]
    Unavailable(ApiError),
}

/// Enumerates every role visible to the calling identity.
pub struct RoleDirectory {
    iam: Arc<dyn IamApi>,
    retry: RetryPolicy,
}

impl RoleDirectory {
    pub fn new(iam: Arc<dyn IamApi>) -> Self {
        Self {
            iam,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The complete role listing, deduplicated by role name (first
    /// occurrence wins), in enumeration order.
    pub async fn list_all_roles(&self) -> Result<Vec<Role>, DirectoryError> {
        let mut roles = Vec::new();
        let mut seen = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let page = retry_with_backoff(&self.retry, "ListRoles", || {
                self.iam.list_roles(marker.as_deref())
            })
            .await
            .map_err(DirectoryError::Unavailable)?;

            for role in page.roles {
                if seen.insert(role.role_name.clone()) {
                    roles.push(role);
                } else {
                    debug!(role = %role.role_name, "duplicate role name in listing, keeping first");
                }
            }

            match page.marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        info!(count = roles.len(), "role directory complete");
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::types::{RoleDetail, RolePage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves canned pages keyed by marker; optionally fails every call.
    struct FakeIam {
        pages: Vec<RolePage>,
        calls: AtomicU32,
        always_throttle: bool,
    }

    impl FakeIam {
        fn with_pages(pages: Vec<RolePage>) -> Self {
            Self {
                pages,
                calls: AtomicU32::new(0),
                always_throttle: false,
            }
        }

        fn throttling() -> Self {
            Self {
                pages: Vec::new(),
                calls: AtomicU32::new(0),
                always_throttle: true,
            }
        }
    }

    #[async_trait]
    impl IamApi for FakeIam {
        async fn list_roles(&self, marker: Option<&str>) -> Result<RolePage, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_throttle {
                return Err(ApiError::Api {
                    service: "iam",
                    code: "Throttling".to_string(),
                    message: "rate exceeded".to_string(),
                });
            }
            let index = match marker {
                None => 0,
                Some(m) => m.parse::<usize>().unwrap(),
            };
            Ok(self.pages[index].clone())
        }

        async fn get_role(&self, _role_name: &str) -> Result<RoleDetail, ApiError> {
            unimplemented!("not used by the directory")
        }

        async fn update_assume_role_policy(
            &self,
            _role_name: &str,
            _policy_document: &str,
        ) -> Result<(), ApiError> {
            unimplemented!("not used by the directory")
        }
    }

    fn page(names: &[&str], marker: Option<&str>) -> RolePage {
        RolePage {
            roles: names
                .iter()
                .map(|name| Role::new("123456789012", *name))
                .collect(),
            marker: marker.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_pages_are_exhausted_in_order() {
        let iam = Arc::new(FakeIam::with_pages(vec![
            page(&["alpha", "beta"], Some("1")),
            page(&["gamma"], None),
        ]));
        let directory = RoleDirectory::new(iam.clone());

        let roles = directory.list_all_roles().await.unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.role_name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "gamma"]);
        assert_eq!(iam.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_first_occurrence() {
        let iam = Arc::new(FakeIam::with_pages(vec![
            page(&["alpha", "beta"], Some("1")),
            page(&["beta", "gamma"], None),
        ]));
        let directory = RoleDirectory::new(iam);

        let roles = directory.list_all_roles().await.unwrap();
        let names: Vec<&str> = roles.iter().map(|r| r.role_name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "gamma"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_page_failure_aborts_listing() {
        let iam = Arc::new(FakeIam::throttling());
        let directory = RoleDirectory::new(iam.clone()).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
        });

        let result = directory.list_all_roles().await;
        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
        assert_eq!(iam.calls.load(Ordering::SeqCst), 2);
    }
}
