//! AWS capability clients
//!
//! Trait-based capability handles over the AWS APIs this system consumes,
//! with one concrete client per service speaking the wire protocol directly:
//! the Query services (IAM, STS, CloudFormation) take form-encoded requests
//! and answer XML; Organizations speaks the JSON 1.1 protocol. All requests
//! are SigV4-signed. Components receive the traits by constructor so tests
//! substitute in-memory fakes.

pub mod cloudformation;
pub mod error;
pub mod iam;
pub mod organizations;
pub mod sigv4;
pub mod sts;
pub mod types;

pub use error::ApiError;
pub use types::{Credentials, Role, RoleDetail, RolePage};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use sigv4::SigningParams;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-lived signing material for the caller's own identity.
///
/// Session credentials obtained from the broker are converted into this for
/// the lifetime of one role's mutation.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl SigningCredentials {
    /// Read the standard AWS credential variables from the environment.
    pub fn from_env() -> Result<Self> {
        let access_key_id =
            env::var("AWS_ACCESS_KEY_ID").context("AWS_ACCESS_KEY_ID must be set")?;
        let secret_access_key =
            env::var("AWS_SECRET_ACCESS_KEY").context("AWS_SECRET_ACCESS_KEY must be set")?;
        let session_token = env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl From<&Credentials> for SigningCredentials {
    fn from(credentials: &Credentials) -> Self {
        Self {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            session_token: Some(credentials.session_token.clone()),
        }
    }
}

/// Region and base identity for constructing clients.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub credentials: SigningCredentials,
}

impl AwsConfig {
    /// Region from `AWS_REGION` (default `us-east-1`), credentials from the
    /// standard environment variables.
    pub fn from_env() -> Result<Self> {
        let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        Ok(Self {
            region,
            credentials: SigningCredentials::from_env()?,
        })
    }
}

/// Shared signed-request plumbing for the service clients.
pub(crate) struct QueryClient {
    http: reqwest::Client,
    region: String,
    credentials: SigningCredentials,
}

impl QueryClient {
    pub(crate) fn new(region: &str, credentials: SigningCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            region: region.to_string(),
            credentials,
        }
    }

    fn signing_params<'a>(&'a self, service: &'static str) -> SigningParams<'a> {
        SigningParams {
            access_key_id: &self.credentials.access_key_id,
            secret_access_key: &self.credentials.secret_access_key,
            session_token: self.credentials.session_token.as_deref(),
            region: &self.region,
            service,
        }
    }

    /// POST a Query API action and return the raw XML body.
    pub(crate) async fn post_query(
        &self,
        service: &'static str,
        host: &str,
        params: &[(&str, String)],
    ) -> Result<String, ApiError> {
        let body = encode_form(params);
        let signed = sigv4::sign(
            &self.signing_params(service),
            "POST",
            host,
            "/",
            "",
            &[("content-type", FORM_CONTENT_TYPE)],
            body.as_bytes(),
            Utc::now(),
        );

        let mut request = self
            .http
            .post(format!("https://{host}/"))
            .header("Content-Type", FORM_CONTENT_TYPE)
            .header("X-Amz-Date", signed.amz_date.as_str())
            .header("Authorization", signed.authorization.as_str());
        if let Some(token) = &self.credentials.session_token {
            request = request.header("X-Amz-Security-Token", token.as_str());
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(parse_query_error(service, status.as_u16(), &text))
        }
    }

    /// POST a JSON 1.1 action (`X-Amz-Target` dispatch) and return the body.
    pub(crate) async fn post_json(
        &self,
        service: &'static str,
        host: &str,
        target: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ApiError> {
        let body = payload.to_string();
        let signed = sigv4::sign(
            &self.signing_params(service),
            "POST",
            host,
            "/",
            "",
            &[("content-type", JSON_CONTENT_TYPE), ("x-amz-target", target)],
            body.as_bytes(),
            Utc::now(),
        );

        let mut request = self
            .http
            .post(format!("https://{host}/"))
            .header("Content-Type", JSON_CONTENT_TYPE)
            .header("X-Amz-Target", target)
            .header("X-Amz-Date", signed.amz_date.as_str())
            .header("Authorization", signed.authorization.as_str());
        if let Some(token) = &self.credentials.session_token {
            request = request.header("X-Amz-Security-Token", token.as_str());
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(parse_json_error(service, status.as_u16(), &text))
        }
    }
}

fn encode_form(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Standard Query API error envelope.
#[derive(Debug, Deserialize)]
struct ErrorResponseXml {
    #[serde(rename = "Error")]
    error: ErrorXml,
}

#[derive(Debug, Deserialize)]
struct ErrorXml {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn parse_query_error(service: &'static str, status: u16, body: &str) -> ApiError {
    match quick_xml::de::from_str::<ErrorResponseXml>(body) {
        Ok(envelope) => ApiError::Api {
            service,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => ApiError::Api {
            service,
            code: if status >= 500 {
                "ServiceUnavailable".to_string()
            } else {
                format!("Http{status}")
            },
            message: truncate(body),
        },
    }
}

/// JSON 1.1 error envelope; the code rides in `__type`, optionally
/// namespace-qualified with a `#`.
#[derive(Debug, Deserialize)]
struct JsonErrorBody {
    #[serde(rename = "__type")]
    error_type: String,
    #[serde(rename = "Message", alias = "message", default)]
    message: String,
}

fn parse_json_error(service: &'static str, status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<JsonErrorBody>(body) {
        Ok(envelope) => {
            let code = envelope
                .error_type
                .rsplit('#')
                .next()
                .unwrap_or(&envelope.error_type)
                .to_string();
            ApiError::Api {
                service,
                code,
                message: envelope.message,
            }
        }
        Err(_) => ApiError::Api {
            service,
            code: if status >= 500 {
                "ServiceUnavailable".to_string()
            } else {
                format!("Http{status}")
            },
            message: truncate(body),
        },
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let mut end = LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_encoding() {
        let params = [
            ("Action", "AssumeRole".to_string()),
            (
                "RoleArn",
                "arn:aws:iam::123456789012:role/deploy".to_string(),
            ),
        ];
        assert_eq!(
            encode_form(&params),
            "Action=AssumeRole&RoleArn=arn%3Aaws%3Aiam%3A%3A123456789012%3Arole%2Fdeploy"
        );
    }

    #[test]
    fn test_query_error_parsing() {
        let body = r#"<ErrorResponse xmlns="https://iam.amazonaws.com/doc/2010-05-08/">
  <Error>
    <Type>Sender</Type>
    <Code>NoSuchEntity</Code>
    <Message>The role with name missing-role cannot be found.</Message>
  </Error>
  <RequestId>0b9c2a1e-example</RequestId>
</ErrorResponse>"#;

        let err = parse_query_error("iam", 404, body);
        assert_eq!(err.code(), Some("NoSuchEntity"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unparseable_5xx_is_transient() {
        let err = parse_query_error("iam", 503, "<html>gateway</html>");
        assert!(err.is_transient());
    }

    #[test]
    fn test_json_error_parsing() {
        let body = r#"{"__type":"com.amazonaws.organizations#AccessDeniedException","Message":"denied"}"#;
        let err = parse_json_error("organizations", 400, body);
        assert_eq!(err.code(), Some("AccessDeniedException"));
        assert!(!err.is_transient());
    }
}
