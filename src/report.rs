//! CSV artifacts
//!
//! The durable record of a run: the results artifact is always written, one
//! row per processed role; the provenance artifact backs the role audit.
//! The input artifact supplies the target set when it is not discovered.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coordinator::OperationResult;
use crate::provenance::ProvenanceRecord;

/// One target role from the input artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTarget {
    #[serde(rename = "AccountID")]
    pub account_id: String,
    #[serde(rename = "RoleName")]
    pub role_name: String,
}

/// Read the target set from `AccountID,RoleName` rows.
pub fn read_role_targets(path: &Path) -> Result<Vec<RoleTarget>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open input CSV {}", path.display()))?;
    let targets = reader
        .deserialize()
        .collect::<std::result::Result<Vec<RoleTarget>, _>>()
        .with_context(|| format!("failed to parse input CSV {}", path.display()))?;

    info!(count = targets.len(), path = %path.display(), "loaded role targets");
    Ok(targets)
}

#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    #[serde(rename = "AccountID")]
    account_id: &'a str,
    #[serde(rename = "RoleName")]
    role_name: &'a str,
    #[serde(rename = "TrustPolicyUpdated")]
    trust_policy_updated: String,
}

/// Write the results artifact. Failure here is run-fatal.
pub fn write_results(path: &Path, results: &[OperationResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create results CSV {}", path.display()))?;

    for result in results {
        writer
            .serialize(ResultRow {
                account_id: &result.account_id,
                role_name: &result.role_name,
                trust_policy_updated: result.outcome.to_string(),
            })
            .context("failed to write results row")?;
    }
    writer.flush().context("failed to flush results CSV")?;

    info!(rows = results.len(), path = %path.display(), "results artifact written");
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProvenanceRow<'a> {
    #[serde(rename = "RoleName")]
    role_name: &'a str,
    #[serde(rename = "CreationMethod")]
    creation_method: String,
    #[serde(rename = "StackNameOrSetId")]
    stack_name_or_set_id: &'a str,
    #[serde(rename = "StackARN")]
    stack_arn: &'a str,
}

/// Write the role-provenance audit artifact.
pub fn write_provenance(path: &Path, records: &[ProvenanceRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create provenance CSV {}", path.display()))?;

    for record in records {
        writer
            .serialize(ProvenanceRow {
                role_name: &record.role_name,
                creation_method: record.origin.to_string(),
                stack_name_or_set_id: record.stack_or_set_id.as_deref().unwrap_or("N/A"),
                stack_arn: record.stack_arn.as_deref().unwrap_or("N/A"),
            })
            .context("failed to write provenance row")?;
    }
    writer.flush().context("failed to flush provenance CSV")?;

    info!(rows = records.len(), path = %path.display(), "provenance artifact written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Outcome, SkipReason};
    use crate::mutator::MutationError;
    use crate::provenance::RoleOrigin;
    use std::fs;

    fn result(account_id: &str, role_name: &str, outcome: Outcome) -> OperationResult {
        OperationResult {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            outcome,
        }
    }

    #[test]
    fn test_results_artifact_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let results = vec![
            result(
                "123456789012",
                "AWSServiceRoleForSupport",
                Outcome::Skipped(SkipReason::ProtectedByPlatform),
            ),
            result("123456789012", "app-runner", Outcome::Updated),
            result("123456789012", "ci-deploy", Outcome::AlreadyPresent),
            result(
                "210987654321",
                "remote",
                Outcome::AssumeRoleFailed("denied".to_string()),
            ),
            result(
                "123456789012",
                "ghost",
                Outcome::MutationFailed(MutationError::NotFound),
            ),
        ];
        write_results(&path, &results).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "AccountID,RoleName,TrustPolicyUpdated");
        assert_eq!(lines.len(), results.len() + 1);
        assert_eq!(
            lines[1],
            "123456789012,AWSServiceRoleForSupport,Skipped (Protected role)"
        );
        assert_eq!(lines[2], "123456789012,app-runner,True");
        assert_eq!(lines[3], "123456789012,ci-deploy,True");
        assert_eq!(lines[4], "210987654321,remote,Assume Role Failed");
        assert_eq!(lines[5], "123456789012,ghost,False");
    }

    #[test]
    fn test_role_targets_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        fs::write(
            &path,
            "AccountID,RoleName\n123456789012,app-runner\n210987654321,remote\n",
        )
        .unwrap();

        let targets = read_role_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets[0],
            RoleTarget {
                account_id: "123456789012".to_string(),
                role_name: "app-runner".to_string(),
            }
        );
    }

    #[test]
    fn test_provenance_artifact_uses_na_for_manual_roles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");

        let records = vec![
            ProvenanceRecord {
                role_name: "stack-role".to_string(),
                origin: RoleOrigin::CloudFormationStack,
                stack_or_set_id: Some("network-baseline".to_string()),
                stack_arn: Some("arn:aws:cloudformation:us-east-1:123456789012:stack/network-baseline/guid".to_string()),
            },
            ProvenanceRecord {
                role_name: "hand-made".to_string(),
                origin: RoleOrigin::Manual,
                stack_or_set_id: None,
                stack_arn: None,
            },
        ];
        write_provenance(&path, &records).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "RoleName,CreationMethod,StackNameOrSetId,StackARN");
        assert!(lines[1].starts_with("stack-role,CloudFormation,network-baseline,"));
        assert_eq!(lines[2], "hand-made,Manual,N/A,N/A");
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_role_targets(&dir.path().join("absent.csv")).is_err());
    }
}
