//! Organizations capability trait and JSON 1.1 client
//!
//! Used by the account-status agent to walk the organization tree. The JSON
//! protocol dispatches on the `X-Amz-Target` header; pagination is internal
//! because callers always want the complete listing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::error::ApiError;
use super::types::{AccountSummary, OrganizationRoot, OrganizationalUnit};
use super::{AwsConfig, QueryClient};

const ORG_HOST: &str = "organizations.us-east-1.amazonaws.com";
/// Organizations is a global service homed in us-east-1.
const ORG_SIGNING_REGION: &str = "us-east-1";
const SERVICE: &str = "organizations";

/// Organization tree operations consumed by the account-status agent.
#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    async fn list_roots(&self) -> Result<Vec<OrganizationRoot>, ApiError>;

    async fn list_organizational_units(
        &self,
        parent_id: &str,
    ) -> Result<Vec<OrganizationalUnit>, ApiError>;

    async fn list_accounts_for_parent(
        &self,
        parent_id: &str,
    ) -> Result<Vec<AccountSummary>, ApiError>;

    async fn describe_account(&self, account_id: &str) -> Result<AccountSummary, ApiError>;
}

/// Organizations JSON API client.
pub struct OrganizationsClient {
    query: QueryClient,
}

impl OrganizationsClient {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            query: QueryClient::new(ORG_SIGNING_REGION, config.credentials.clone()),
        }
    }

    async fn call(&self, target: &str, payload: serde_json::Value) -> Result<String, ApiError> {
        self.query
            .post_json(SERVICE, ORG_HOST, &format!("AWSOrganizations.{target}"), &payload)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ListRootsBody {
    #[serde(rename = "Roots", default)]
    roots: Vec<OrganizationRoot>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListOusBody {
    #[serde(rename = "OrganizationalUnits", default)]
    organizational_units: Vec<OrganizationalUnit>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListAccountsBody {
    #[serde(rename = "Accounts", default)]
    accounts: Vec<AccountSummary>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeAccountBody {
    #[serde(rename = "Account")]
    account: AccountSummary,
}

fn parse<T: for<'de> Deserialize<'de>>(target: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::InvalidResponse {
        service: SERVICE,
        detail: format!("{target}: {e}"),
    })
}

#[async_trait]
impl OrganizationsApi for OrganizationsClient {
    async fn list_roots(&self) -> Result<Vec<OrganizationRoot>, ApiError> {
        let mut roots = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut payload = json!({});
            if let Some(token) = &next_token {
                payload["NextToken"] = json!(token);
            }
            let body = self.call("ListRoots", payload).await?;
            let parsed: ListRootsBody = parse("ListRoots", &body)?;
            roots.extend(parsed.roots);
            match parsed.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(roots)
    }

    async fn list_organizational_units(
        &self,
        parent_id: &str,
    ) -> Result<Vec<OrganizationalUnit>, ApiError> {
        let mut units = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut payload = json!({ "ParentId": parent_id });
            if let Some(token) = &next_token {
                payload["NextToken"] = json!(token);
            }
            let body = self.call("ListOrganizationalUnitsForParent", payload).await?;
            let parsed: ListOusBody = parse("ListOrganizationalUnitsForParent", &body)?;
            units.extend(parsed.organizational_units);
            match parsed.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(units)
    }

    async fn list_accounts_for_parent(
        &self,
        parent_id: &str,
    ) -> Result<Vec<AccountSummary>, ApiError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut payload = json!({ "ParentId": parent_id });
            if let Some(token) = &next_token {
                payload["NextToken"] = json!(token);
            }
            let body = self.call("ListAccountsForParent", payload).await?;
            let parsed: ListAccountsBody = parse("ListAccountsForParent", &body)?;
            accounts.extend(parsed.accounts);
            match parsed.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(accounts)
    }

    async fn describe_account(&self, account_id: &str) -> Result<AccountSummary, ApiError> {
        let body = self
            .call("DescribeAccount", json!({ "AccountId": account_id }))
            .await?;
        let parsed: DescribeAccountBody = parse("DescribeAccount", &body)?;
        Ok(parsed.account)
    }
}
