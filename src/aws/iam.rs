//! IAM capability trait and Query API client
//!
//! The trait exposes exactly the three calls the engine needs: paged role
//! listing, trust-document read, and trust-document write. `GetRole` returns
//! the assume-role policy document URL-encoded; the client decodes it so the
//! rest of the system only ever sees JSON text.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::types::{Credentials, Role, RoleDetail, RolePage};
use super::{AwsConfig, QueryClient, SigningCredentials};

const IAM_HOST: &str = "iam.amazonaws.com";
const IAM_API_VERSION: &str = "2010-05-08";
/// The global IAM endpoint is signed against us-east-1.
const IAM_SIGNING_REGION: &str = "us-east-1";
const SERVICE: &str = "iam";
const LIST_ROLES_PAGE_SIZE: &str = "1000";

/// IAM operations consumed by the directory and the mutator.
#[async_trait]
pub trait IamApi: Send + Sync {
    /// One page of the role listing; pass the previous page's marker to
    /// continue.
    async fn list_roles(&self, marker: Option<&str>) -> Result<RolePage, ApiError>;

    /// The role and its current trust document.
    async fn get_role(&self, role_name: &str) -> Result<RoleDetail, ApiError>;

    /// Replace the role's trust document with `policy_document` (JSON text).
    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        policy_document: &str,
    ) -> Result<(), ApiError>;
}

/// Builds IAM handles bound to assumed-role credentials, one per role
/// mutation. This is how the coordinator rebinds IAM calls to another
/// account without any shared client state.
pub trait ScopedIamFactory: Send + Sync {
    fn scoped(&self, credentials: &Credentials) -> Arc<dyn IamApi>;
}

/// IAM Query API client.
pub struct IamClient {
    query: QueryClient,
}

impl IamClient {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            query: QueryClient::new(IAM_SIGNING_REGION, config.credentials.clone()),
        }
    }

    /// A client signing with temporary session credentials.
    pub fn with_credentials(credentials: &Credentials) -> Self {
        Self {
            query: QueryClient::new(IAM_SIGNING_REGION, SigningCredentials::from(credentials)),
        }
    }
}

#[async_trait]
impl IamApi for IamClient {
    async fn list_roles(&self, marker: Option<&str>) -> Result<RolePage, ApiError> {
        let mut params = vec![
            ("Action", "ListRoles".to_string()),
            ("Version", IAM_API_VERSION.to_string()),
            ("MaxItems", LIST_ROLES_PAGE_SIZE.to_string()),
        ];
        if let Some(marker) = marker {
            params.push(("Marker", marker.to_string()));
        }

        let body = self.query.post_query(SERVICE, IAM_HOST, &params).await?;
        parse_list_roles(&body)
    }

    async fn get_role(&self, role_name: &str) -> Result<RoleDetail, ApiError> {
        let params = [
            ("Action", "GetRole".to_string()),
            ("Version", IAM_API_VERSION.to_string()),
            ("RoleName", role_name.to_string()),
        ];

        let body = self.query.post_query(SERVICE, IAM_HOST, &params).await?;
        parse_get_role(&body)
    }

    async fn update_assume_role_policy(
        &self,
        role_name: &str,
        policy_document: &str,
    ) -> Result<(), ApiError> {
        let params = [
            ("Action", "UpdateAssumeRolePolicy".to_string()),
            ("Version", IAM_API_VERSION.to_string()),
            ("RoleName", role_name.to_string()),
            ("PolicyDocument", policy_document.to_string()),
        ];

        self.query.post_query(SERVICE, IAM_HOST, &params).await?;
        Ok(())
    }
}

/// Produces session-scoped [`IamClient`]s.
pub struct IamClientFactory;

impl ScopedIamFactory for IamClientFactory {
    fn scoped(&self, credentials: &Credentials) -> Arc<dyn IamApi> {
        Arc::new(IamClient::with_credentials(credentials))
    }
}

// ============================================================
// Response parsing
// ============================================================

#[derive(Debug, Deserialize)]
struct ListRolesResponse {
    #[serde(rename = "ListRolesResult")]
    result: ListRolesResult,
}

#[derive(Debug, Deserialize)]
struct ListRolesResult {
    #[serde(rename = "Roles", default)]
    roles: MemberList<RoleXml>,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "Marker")]
    marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberList<T> {
    #[serde(rename = "member", default)]
    member: Vec<T>,
}

impl<T> Default for MemberList<T> {
    fn default() -> Self {
        Self { member: Vec::new() }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RoleXml {
    #[serde(rename = "RoleName")]
    role_name: String,
    #[serde(rename = "Arn")]
    arn: String,
}

#[derive(Debug, Deserialize)]
struct GetRoleResponse {
    #[serde(rename = "GetRoleResult")]
    result: GetRoleResult,
}

#[derive(Debug, Deserialize)]
struct GetRoleResult {
    #[serde(rename = "Role")]
    role: GetRoleRoleXml,
}

#[derive(Debug, Deserialize)]
struct GetRoleRoleXml {
    #[serde(rename = "RoleName")]
    role_name: String,
    #[serde(rename = "Arn")]
    arn: String,
    #[serde(rename = "AssumeRolePolicyDocument")]
    assume_role_policy_document: Option<String>,
}

fn parse_list_roles(body: &str) -> Result<RolePage, ApiError> {
    let response: ListRolesResponse =
        quick_xml::de::from_str(body).map_err(|e| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("ListRoles: {e}"),
        })?;

    let mut roles = Vec::with_capacity(response.result.roles.member.len());
    for member in response.result.roles.member {
        let role = Role::from_arn(&member.arn).ok_or_else(|| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("malformed role ARN for {}: {}", member.role_name, member.arn),
        })?;
        roles.push(role);
    }

    let marker = if response.result.is_truncated {
        response.result.marker
    } else {
        None
    };

    Ok(RolePage { roles, marker })
}

fn parse_get_role(body: &str) -> Result<RoleDetail, ApiError> {
    let response: GetRoleResponse =
        quick_xml::de::from_str(body).map_err(|e| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("GetRole: {e}"),
        })?;

    let role_xml = response.result.role;
    let role = Role::from_arn(&role_xml.arn).ok_or_else(|| ApiError::InvalidResponse {
        service: SERVICE,
        detail: format!(
            "malformed role ARN for {}: {}",
            role_xml.role_name, role_xml.arn
        ),
    })?;

    let encoded = role_xml
        .assume_role_policy_document
        .ok_or_else(|| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("GetRole for {} returned no trust document", role.role_name),
        })?;
    let trust_document_json = urlencoding::decode(&encoded)
        .map_err(|e| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("trust document for {} is not valid UTF-8: {e}", role.role_name),
        })?
        .into_owned();

    Ok(RoleDetail {
        role,
        trust_document_json,
    })
}
