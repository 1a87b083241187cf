//! Provenance Classifier
//!
//! Correlates IAM roles against CloudFormation ownership: a role referenced
//! as an `AWS::IAM::Role` physical resource by any stack or stack-set
//! instance is CloudFormation-managed, everything else in the directory is
//! manual. Pure reads, fully idempotent, safe to re-run.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aws::cloudformation::CloudFormationApi;
use crate::aws::{ApiError, Role};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// The CloudFormation resource type that identifies a role.
pub const IAM_ROLE_RESOURCE_TYPE: &str = "AWS::IAM::Role";

/// How a role came to exist. Exactly one origin per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoleOrigin {
    CloudFormationStack,
    CloudFormationStackSet,
    Manual,
}

impl std::fmt::Display for RoleOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleOrigin::CloudFormationStack => write!(f, "CloudFormation"),
            RoleOrigin::CloudFormationStackSet => write!(f, "CloudFormation StackSet"),
            RoleOrigin::Manual => write!(f, "Manual"),
        }
    }
}

/// The provenance verdict for one role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceRecord {
    pub role_name: String,
    pub origin: RoleOrigin,
    /// Stack name or stack-set id; absent for manual roles.
    pub stack_or_set_id: Option<String>,
    /// ARN of the owning stack or stack instance; absent for manual roles.
    pub stack_arn: Option<String>,
}

impl ProvenanceRecord {
    fn manual(role_name: &str) -> Self {
        Self {
            role_name: role_name.to_string(),
            origin: RoleOrigin::Manual,
            stack_or_set_id: None,
            stack_arn: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Ownership {
    origin: RoleOrigin,
    stack_or_set_id: String,
    stack_arn: String,
}

/// Correlates directory roles to the CloudFormation resources that own them.
pub struct ProvenanceClassifier {
    cloudformation: Arc<dyn CloudFormationApi>,
    retry: RetryPolicy,
}

impl ProvenanceClassifier {
    pub fn new(cloudformation: Arc<dyn CloudFormationApi>) -> Self {
        Self {
            cloudformation,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One record per directory role, in directory order.
    ///
    /// CloudFormation references to roles the directory does not know are
    /// dropped with a diagnostic; they are stale, not roles.
    pub async fn classify(&self, roles: &[Role]) -> Result<Vec<ProvenanceRecord>, ApiError> {
        let owned = self.cloudformation_owned_roles().await?;

        let directory: HashSet<&str> = roles.iter().map(|r| r.role_name.as_str()).collect();
        for name in owned.keys() {
            if !directory.contains(name.as_str()) {
                debug!(role = %name, "stale CloudFormation role reference, dropping");
            }
        }

        let records: Vec<ProvenanceRecord> = roles
            .iter()
            .map(|role| match owned.get(&role.role_name) {
                Some(ownership) => ProvenanceRecord {
                    role_name: role.role_name.clone(),
                    origin: ownership.origin,
                    stack_or_set_id: Some(ownership.stack_or_set_id.clone()),
                    stack_arn: Some(ownership.stack_arn.clone()),
                },
                None => ProvenanceRecord::manual(&role.role_name),
            })
            .collect();

        let cloudformation_count = records
            .iter()
            .filter(|r| r.origin != RoleOrigin::Manual)
            .count();
        info!(
            total = records.len(),
            cloudformation = cloudformation_count,
            manual = records.len() - cloudformation_count,
            "provenance classification complete"
        );

        Ok(records)
    }

    /// Role name -> owning stack/instance, first discovery wins.
    ///
    /// Stacks are scanned before stack sets; within each scan, discovery
    /// order is the API's enumeration order, so ties break deterministically.
    async fn cloudformation_owned_roles(&self) -> Result<IndexMap<String, Ownership>, ApiError> {
        let mut owned: IndexMap<String, Ownership> = IndexMap::new();

        let mut next_token: Option<String> = None;
        loop {
            let page = retry_with_backoff(&self.retry, "DescribeStacks", || {
                self.cloudformation.describe_stacks(next_token.as_deref())
            })
            .await?;

            for stack in page.stacks {
                let resources = retry_with_backoff(&self.retry, "ListStackResources", || {
                    self.cloudformation.list_stack_resources(&stack.stack_name)
                })
                .await?;

                for name in role_resource_names(resources) {
                    owned.entry(name).or_insert_with(|| Ownership {
                        origin: RoleOrigin::CloudFormationStack,
                        stack_or_set_id: stack.stack_name.clone(),
                        stack_arn: stack.stack_id.clone(),
                    });
                }
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        let mut unresolved_instances = 0usize;
        let mut next_token: Option<String> = None;
        loop {
            let page = retry_with_backoff(&self.retry, "ListStackSets", || {
                self.cloudformation.list_stack_sets(next_token.as_deref())
            })
            .await?;

            for stack_set in page.stack_sets {
                let mut instance_token: Option<String> = None;
                loop {
                    let instances = retry_with_backoff(&self.retry, "ListStackInstances", || {
                        self.cloudformation
                            .list_stack_instances(&stack_set.stack_set_name, instance_token.as_deref())
                    })
                    .await?;

                    for instance in instances.instances {
                        let Some(stack_id) = instance.stack_id else {
                            unresolved_instances += 1;
                            warn!(
                                stack_set = %stack_set.stack_set_name,
                                account = instance.account.as_deref().unwrap_or("unknown"),
                                "stack instance has no stack id, excluding from correlation"
                            );
                            continue;
                        };

                        let resources =
                            retry_with_backoff(&self.retry, "ListStackResources", || {
                                self.cloudformation.list_stack_resources(&stack_id)
                            })
                            .await?;

                        for name in role_resource_names(resources) {
                            owned.entry(name).or_insert_with(|| Ownership {
                                origin: RoleOrigin::CloudFormationStackSet,
                                stack_or_set_id: stack_set.stack_set_id.clone(),
                                stack_arn: stack_id.clone(),
                            });
                        }
                    }

                    match instances.next_token {
                        Some(token) => instance_token = Some(token),
                        None => break,
                    }
                }
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        if unresolved_instances > 0 {
            warn!(
                count = unresolved_instances,
                "stack instances excluded from correlation"
            );
        }

        Ok(owned)
    }
}

fn role_resource_names(resources: Vec<crate::aws::types::StackResource>) -> Vec<String> {
    resources
        .into_iter()
        .filter(|r| r.resource_type == IAM_ROLE_RESOURCE_TYPE)
        .filter_map(|r| r.physical_resource_id)
        .collect()
}
