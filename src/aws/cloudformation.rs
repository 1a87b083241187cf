//! CloudFormation capability trait and Query API client
//!
//! Read-only listing calls used by the provenance classifier. Stack and
//! stack-set listings are exposed page by page; per-stack resource listing
//! pages internally because callers always want the full resource set.

use async_trait::async_trait;
use serde::Deserialize;

use super::error::ApiError;
use super::types::{
    Stack, StackInstance, StackInstancePage, StackPage, StackResource, StackSet, StackSetPage,
};
use super::{AwsConfig, QueryClient};

const CFN_API_VERSION: &str = "2010-05-15";
const SERVICE: &str = "cloudformation";

/// CloudFormation listing operations consumed by the classifier.
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    async fn describe_stacks(&self, next_token: Option<&str>) -> Result<StackPage, ApiError>;

    /// Every resource of a stack. `stack_name` accepts a name or a stack id.
    async fn list_stack_resources(&self, stack_name: &str)
        -> Result<Vec<StackResource>, ApiError>;

    async fn list_stack_sets(&self, next_token: Option<&str>) -> Result<StackSetPage, ApiError>;

    async fn list_stack_instances(
        &self,
        stack_set_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackInstancePage, ApiError>;
}

/// CloudFormation Query API client.
pub struct CloudFormationClient {
    query: QueryClient,
    host: String,
}

impl CloudFormationClient {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            query: QueryClient::new(&config.region, config.credentials.clone()),
            host: format!("cloudformation.{}.amazonaws.com", config.region),
        }
    }
}

#[async_trait]
impl CloudFormationApi for CloudFormationClient {
    async fn describe_stacks(&self, next_token: Option<&str>) -> Result<StackPage, ApiError> {
        let mut params = vec![
            ("Action", "DescribeStacks".to_string()),
            ("Version", CFN_API_VERSION.to_string()),
        ];
        if let Some(token) = next_token {
            params.push(("NextToken", token.to_string()));
        }

        let body = self.query.post_query(SERVICE, &self.host, &params).await?;
        parse_describe_stacks(&body)
    }

    async fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, ApiError> {
        let mut resources = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("Action", "ListStackResources".to_string()),
                ("Version", CFN_API_VERSION.to_string()),
                ("StackName", stack_name.to_string()),
            ];
            if let Some(token) = &next_token {
                params.push(("NextToken", token.clone()));
            }

            let body = self.query.post_query(SERVICE, &self.host, &params).await?;
            let page = parse_list_stack_resources(&body)?;
            resources.extend(page.0);

            match page.1 {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(resources)
    }

    async fn list_stack_sets(&self, next_token: Option<&str>) -> Result<StackSetPage, ApiError> {
        let mut params = vec![
            ("Action", "ListStackSets".to_string()),
            ("Version", CFN_API_VERSION.to_string()),
        ];
        if let Some(token) = next_token {
            params.push(("NextToken", token.to_string()));
        }

        let body = self.query.post_query(SERVICE, &self.host, &params).await?;
        parse_list_stack_sets(&body)
    }

    async fn list_stack_instances(
        &self,
        stack_set_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackInstancePage, ApiError> {
        let mut params = vec![
            ("Action", "ListStackInstances".to_string()),
            ("Version", CFN_API_VERSION.to_string()),
            ("StackSetName", stack_set_name.to_string()),
        ];
        if let Some(token) = next_token {
            params.push(("NextToken", token.to_string()));
        }

        let body = self.query.post_query(SERVICE, &self.host, &params).await?;
        parse_list_stack_instances(&body)
    }
}

// ============================================================
// Response parsing
// ============================================================

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

#[derive(Debug, Deserialize)]
struct DescribeStacksResponse {
    #[serde(rename = "DescribeStacksResult")]
    result: DescribeStacksResult,
}

#[derive(Debug, Deserialize)]
struct DescribeStacksResult {
    #[serde(rename = "Stacks", default)]
    stacks: MemberList<StackXml>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StackXml {
    #[serde(rename = "StackName")]
    stack_name: String,
    #[serde(rename = "StackId")]
    stack_id: String,
}

#[derive(Debug, Deserialize)]
struct ListStackResourcesResponse {
    #[serde(rename = "ListStackResourcesResult")]
    result: ListStackResourcesResult,
}

#[derive(Debug, Deserialize)]
struct ListStackResourcesResult {
    #[serde(rename = "StackResourceSummaries", default)]
    summaries: MemberList<StackResourceXml>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StackResourceXml {
    #[serde(rename = "ResourceType")]
    resource_type: String,
    #[serde(rename = "LogicalResourceId")]
    logical_resource_id: String,
    #[serde(rename = "PhysicalResourceId")]
    physical_resource_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListStackSetsResponse {
    #[serde(rename = "ListStackSetsResult")]
    result: ListStackSetsResult,
}

#[derive(Debug, Deserialize)]
struct ListStackSetsResult {
    #[serde(rename = "Summaries", default)]
    summaries: MemberList<StackSetXml>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StackSetXml {
    #[serde(rename = "StackSetName")]
    stack_set_name: String,
    #[serde(rename = "StackSetId")]
    stack_set_id: String,
}

#[derive(Debug, Deserialize)]
struct ListStackInstancesResponse {
    #[serde(rename = "ListStackInstancesResult")]
    result: ListStackInstancesResult,
}

#[derive(Debug, Deserialize)]
struct ListStackInstancesResult {
    #[serde(rename = "Summaries", default)]
    summaries: MemberList<StackInstanceXml>,
    #[serde(rename = "NextToken")]
    next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StackInstanceXml {
    #[serde(rename = "StackSetId")]
    stack_set_id: String,
    #[serde(rename = "StackId")]
    stack_id: Option<String>,
    #[serde(rename = "Account")]
    account: Option<String>,
    #[serde(rename = "Region")]
    region: Option<String>,
}

fn invalid(detail: String) -> ApiError {
    ApiError::InvalidResponse {
        service: SERVICE,
        detail,
    }
}

fn parse_describe_stacks(body: &str) -> Result<StackPage, ApiError> {
    let response: DescribeStacksResponse =
        quick_xml::de::from_str(body).map_err(|e| invalid(format!("DescribeStacks: {e}")))?;

    let stacks = response
        .result
        .stacks
        .member
        .into_iter()
        .map(|s| Stack {
            stack_name: s.stack_name,
            stack_id: s.stack_id,
        })
        .collect();

    Ok(StackPage {
        stacks,
        next_token: response.result.next_token,
    })
}

fn parse_list_stack_resources(
    body: &str,
) -> Result<(Vec<StackResource>, Option<String>), ApiError> {
    let response: ListStackResourcesResponse =
        quick_xml::de::from_str(body).map_err(|e| invalid(format!("ListStackResources: {e}")))?;

    let resources = response
        .result
        .summaries
        .member
        .into_iter()
        .map(|r| StackResource {
            resource_type: r.resource_type,
            logical_resource_id: r.logical_resource_id,
            physical_resource_id: r.physical_resource_id,
        })
        .collect();

    Ok((resources, response.result.next_token))
}

fn parse_list_stack_sets(body: &str) -> Result<StackSetPage, ApiError> {
    let response: ListStackSetsResponse =
        quick_xml::de::from_str(body).map_err(|e| invalid(format!("ListStackSets: {e}")))?;

    let stack_sets = response
        .result
        .summaries
        .member
        .into_iter()
        .map(|s| StackSet {
            stack_set_name: s.stack_set_name,
            stack_set_id: s.stack_set_id,
        })
        .collect();

    Ok(StackSetPage {
        stack_sets,
        next_token: response.result.next_token,
    })
}

fn parse_list_stack_instances(body: &str) -> Result<StackInstancePage, ApiError> {
    let response: ListStackInstancesResponse =
        quick_xml::de::from_str(body).map_err(|e| invalid(format!("ListStackInstances: {e}")))?;

    let instances = response
        .result
        .summaries
        .member
        .into_iter()
        .map(|i| StackInstance {
            stack_set_id: i.stack_set_id,
            stack_id: i.stack_id,
            account: i.account,
            region: i.region,
        })
        .collect();

    Ok(StackInstancePage {
        instances,
        next_token: response.result.next_token,
    })
}
