//! Trust-policy documents and statements
//!
//! A trust document is the policy attached to a role that defines who may
//! assume it. Statements are kept as opaque JSON values and compared by deep
//! value equality, so duplicate detection is content-based: two statements
//! with the same fields in a different key order are the same statement.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The fixed IAM policy-language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// One effect/principal/action/condition clause of a trust document.
///
/// Structurally comparable, never interpreted beyond that: this system
/// distributes statements, it does not author them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Statement(Value);

impl Statement {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::from_str(json)?))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// A versioned trust document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDocument {
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,
    /// IAM accepts a single statement object or an array; both parse into
    /// the sequence form.
    #[serde(rename = "Statement", deserialize_with = "one_or_many", default)]
    pub statements: Vec<Statement>,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Statement>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => Ok(items.into_iter().map(Statement).collect()),
        other => Ok(vec![Statement(other)]),
    }
}

impl TrustDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: default_version(),
            statements,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("trust document serializes")
    }

    /// Content-based membership: deep value equality against every statement
    /// in the document, regardless of position.
    pub fn contains(&self, statement: &Statement) -> bool {
        self.statements.iter().any(|s| s == statement)
    }

    /// A copy of this document with `statement` appended; all prior
    /// statements are preserved in order.
    pub fn with_statement(&self, statement: Statement) -> TrustDocument {
        let mut statements = self.statements.clone();
        statements.push(statement);
        TrustDocument {
            version: self.version.clone(),
            statements,
        }
    }
}
