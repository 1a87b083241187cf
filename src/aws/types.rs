//! Core AWS identity and resource types
//!
//! Value types shared by the capability traits. Credentials are plain values
//! with an explicit expiry, handed to exactly one role's mutation and never
//! stored in shared state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An IAM role identity.
///
/// The ARN encodes the owning account id at colon-separated field 4
/// (`arn:aws:iam::123456789012:role/Name`); both constructors keep the three
/// fields consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub account_id: String,
    pub role_name: String,
    pub arn: String,
}

impl Role {
    /// Build a role with its canonical ARN from account id and name.
    pub fn new(account_id: impl Into<String>, role_name: impl Into<String>) -> Self {
        let account_id = account_id.into();
        let role_name = role_name.into();
        let arn = format!("arn:aws:iam::{account_id}:role/{role_name}");
        Self {
            account_id,
            role_name,
            arn,
        }
    }

    /// Parse a role from its ARN. Returns `None` when the ARN does not have
    /// the `arn:aws:iam::<account>:role/...` shape.
    pub fn from_arn(arn: &str) -> Option<Self> {
        let fields: Vec<&str> = arn.splitn(6, ':').collect();
        if fields.len() != 6 || fields[2] != "iam" {
            return None;
        }
        let account_id = fields[4];
        let resource = fields[5];
        let role_name = resource.strip_prefix("role/")?.rsplit('/').next()?;
        if account_id.is_empty() || role_name.is_empty() {
            return None;
        }
        Some(Self {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            arn: arn.to_string(),
        })
    }
}

/// One page of a role listing.
#[derive(Debug, Clone)]
pub struct RolePage {
    pub roles: Vec<Role>,
    /// Continuation marker; `None` on the last page.
    pub marker: Option<String>,
}

/// A single role as returned by `GetRole`, with its decoded trust document.
#[derive(Debug, Clone)]
pub struct RoleDetail {
    pub role: Role,
    /// The assume-role policy document as JSON text.
    pub trust_document_json: String,
}

/// Temporary credentials from one assume-role call.
///
/// Owned by the credential broker for the duration of one role's mutation;
/// never persisted, never shared across roles.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A CloudFormation stack summary.
#[derive(Debug, Clone)]
pub struct Stack {
    pub stack_name: String,
    /// The stack id is the stack's ARN.
    pub stack_id: String,
}

#[derive(Debug, Clone)]
pub struct StackPage {
    pub stacks: Vec<Stack>,
    pub next_token: Option<String>,
}

/// One resource owned by a stack.
#[derive(Debug, Clone)]
pub struct StackResource {
    pub resource_type: String,
    pub logical_resource_id: String,
    /// Absent while a resource is still being created.
    pub physical_resource_id: Option<String>,
}

/// A CloudFormation stack-set summary.
#[derive(Debug, Clone)]
pub struct StackSet {
    pub stack_set_name: String,
    pub stack_set_id: String,
}

#[derive(Debug, Clone)]
pub struct StackSetPage {
    pub stack_sets: Vec<StackSet>,
    pub next_token: Option<String>,
}

/// One deployed instance of a stack set.
#[derive(Debug, Clone)]
pub struct StackInstance {
    pub stack_set_id: String,
    /// Absent for instances that never finished deploying; such instances
    /// cannot be correlated to resources.
    pub stack_id: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StackInstancePage {
    pub instances: Vec<StackInstance>,
    pub next_token: Option<String>,
}

/// The root of an AWS Organization.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationRoot {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// An organizational unit.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationalUnit {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// A member account of the organization.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl AccountSummary {
    pub fn is_suspended(&self) -> bool {
        self.status == "SUSPENDED"
    }
}
