//! STS capability trait and Query API client
//!
//! One operation: `AssumeRole`. The response XML carries the temporary
//! credentials and their expiry, which the broker hands to exactly one role's
//! mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::ApiError;
use super::types::Credentials;
use super::{AwsConfig, QueryClient};

const STS_HOST: &str = "sts.amazonaws.com";
const STS_API_VERSION: &str = "2011-06-15";
/// The global STS endpoint is signed against us-east-1.
const STS_SIGNING_REGION: &str = "us-east-1";
const SERVICE: &str = "sts";

/// Credential acquisition for cross-account mutation.
#[async_trait]
pub trait StsApi: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Credentials, ApiError>;
}

/// STS Query API client.
pub struct StsClient {
    query: QueryClient,
}

impl StsClient {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            query: QueryClient::new(STS_SIGNING_REGION, config.credentials.clone()),
        }
    }
}

#[async_trait]
impl StsApi for StsClient {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
    ) -> Result<Credentials, ApiError> {
        let params = [
            ("Action", "AssumeRole".to_string()),
            ("Version", STS_API_VERSION.to_string()),
            ("RoleArn", role_arn.to_string()),
            ("RoleSessionName", session_name.to_string()),
        ];

        let body = self.query.post_query(SERVICE, STS_HOST, &params).await?;
        parse_assume_role(&body)
    }
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResponse {
    #[serde(rename = "AssumeRoleResult")]
    result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
struct AssumeRoleResult {
    #[serde(rename = "Credentials")]
    credentials: CredentialsXml,
}

#[derive(Debug, Deserialize)]
struct CredentialsXml {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    #[serde(rename = "Expiration")]
    expiration: String,
}

fn parse_assume_role(body: &str) -> Result<Credentials, ApiError> {
    let response: AssumeRoleResponse =
        quick_xml::de::from_str(body).map_err(|e| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("AssumeRole: {e}"),
        })?;

    let xml = response.result.credentials;
    let expires_at = DateTime::parse_from_rfc3339(&xml.expiration)
        .map_err(|e| ApiError::InvalidResponse {
            service: SERVICE,
            detail: format!("bad credential expiration {}: {e}", xml.expiration),
        })?
        .with_timezone(&Utc);

    Ok(Credentials {
        access_key_id: xml.access_key_id,
        secret_access_key: xml.secret_access_key,
        session_token: xml.session_token,
        expires_at,
    })
}
