//! Trust-policy propagation and role-provenance engine
//!
//! Distributes a cross-account IAM trust-policy statement across every role
//! in an AWS Organization (or a CSV-supplied role list) and classifies each
//! role's provenance (CloudFormation stack, stack set, or manual). The
//! pipeline: the directory enumerates roles, the coordinator filters them by
//! the protected-prefix exclusion policy, the broker acquires per-role
//! credentials for cross-account runs, the mutator merges or replaces the
//! trust document, and the aggregated results land in a CSV audit artifact.

pub mod aws;
pub mod broker;
pub mod coordinator;
pub mod directory;
pub mod mutator;
pub mod policy;
pub mod provenance;
pub mod report;
pub mod retry;

pub use broker::CredentialBroker;
pub use coordinator::{CancelFlag, Coordinator, OperationResult, Outcome};
pub use directory::RoleDirectory;
pub use mutator::{ApplyMode, TrustPolicyMutator};
pub use policy::{Statement, TrustDocument};
pub use provenance::{ProvenanceClassifier, ProvenanceRecord, RoleOrigin};
