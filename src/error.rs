//! Error types for RO-Crate synchronization
//!
//! `SyncError` covers failures of an operation as a whole. `ImportIssue`
//! is one entry of the aggregated report an import validation produces,
//! and `ReconciliationWarning` is informational only.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to load crate from {path}: {reason}")]
    LoadError { path: String, reason: String },

    #[error("Invalid crate structure: {0}")]
    InvalidStructure(String),

    #[error("Missing root entity in crate")]
    MissingRootEntity,

    #[error("No ro-crate-metadata.json found in {0}")]
    MissingMetadataFile(PathBuf),

    #[error("Compound value #{position} of field '{field}' has no row id")]
    MissingRowId { field: String, position: usize },

    #[error("Unknown dataset version '{0}'")]
    UnknownVersion(String),

    #[error("Field '{0}' is not known to the field-type catalog")]
    UnknownField(String),

    #[error("Import rejected with {} error(s)", .0.len())]
    ImportRejected(Vec<ImportIssue>),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
}

/// Category of an import issue. Every category aborts reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Missing/duplicate id or type, illegal File/Dataset property,
    /// unresolved reference, second parent, cycle
    Structural,
    /// Type mismatch, multiplicity, vocabulary, malformed values
    Validation,
    /// A file's content hash changed under an unchanged id
    Integrity,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportIssue {
    #[error("The RO-Crate does not contain an '@graph' array")]
    MissingGraph,

    #[error("Missing '@id' for entity: {0}")]
    MissingId(String),

    #[error("The entity with id: '{0}' does not have a '@type'")]
    MissingType(String),

    #[error("The RO-Crate contains the following '@id' multiple times: {0}")]
    DuplicateId(String),

    #[error("The RO-Crate does not contain a root data entity")]
    MissingRoot,

    #[error("{kind} entity with id: '{id}' contains the following invalid properties: {}", .properties.join(", "))]
    IllegalProperties {
        id: String,
        kind: String,
        properties: Vec<String>,
    },

    #[error("Entity with id: '{id}' has an invalid type: {found}")]
    NotADataEntity { id: String, found: String },

    #[error("No child entity '{id}' found for the parent entity with id: '{parent}'")]
    UnresolvedReference { parent: String, id: String },

    #[error("Entity with id: '{id}' is part of more than one parent: {}", .parents.join(", "))]
    MultipleParents { id: String, parents: Vec<String> },

    #[error("Circular reference: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Entities with the following '@id'-s could not be validated, check their relations in the RO-Crate: {}", .0.join(", "))]
    UnaccountedEntities(Vec<String>),

    #[error("The field '{field}' does not allow multiple values, but got {count}")]
    Multiplicity { field: String, count: usize },

    #[error("Invalid value for field '{field}' on entity '{entity}': {reason}")]
    InvalidValue {
        field: String,
        entity: String,
        reason: String,
    },

    #[error("Invalid controlled vocabulary value: '{value}' for field: '{field}'")]
    UnknownVocabularyTerm { field: String, value: String },

    #[error("Compound values are not allowed at this level! Invalid compound value: '{0}'")]
    NestingTooDeep(String),

    #[error("The entity with id: '{id}' has invalid type! The correct type would be: {expected}")]
    CompoundTypeMismatch { id: String, expected: String },

    #[error("The field '{field}' on entity '{entity}' must contain '@id' references")]
    CompoundNotReference { field: String, entity: String },

    #[error("Entity with id: '{id}' contains invalid conformsTo {reason}")]
    InvalidConformsTo { id: String, reason: String },

    #[error("The required field '{0}' is missing")]
    MissingRequiredField(String),

    #[error("Corrupted hash found for a File entity with id: {0}")]
    CorruptedHash(String),

    #[error("Corrupted id '{id}' found for a File entity with hash: {hash}")]
    CorruptedId { id: String, hash: String },
}

impl ImportIssue {
    pub fn kind(&self) -> IssueKind {
        match self {
            ImportIssue::MissingGraph
            | ImportIssue::MissingId(_)
            | ImportIssue::MissingType(_)
            | ImportIssue::DuplicateId(_)
            | ImportIssue::MissingRoot
            | ImportIssue::IllegalProperties { .. }
            | ImportIssue::NotADataEntity { .. }
            | ImportIssue::UnresolvedReference { .. }
            | ImportIssue::MultipleParents { .. }
            | ImportIssue::Cycle(_)
            | ImportIssue::UnaccountedEntities(_) => IssueKind::Structural,
            ImportIssue::CorruptedHash(_) | ImportIssue::CorruptedId { .. } => IssueKind::Integrity,
            _ => IssueKind::Validation,
        }
    }
}

/// Informational findings of a pipeline run; never abort anything
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationWarning {
    #[error("Entity '{0}' has no backing file or folder")]
    VirtualEntity(String),

    #[error("Entity '{0}' carries foreign properties and was kept")]
    ForeignEntityKept(String),

    #[error("Entity '{id}' keeps foreign property '{property}'")]
    ForeignPropertyRetained { id: String, property: String },

    #[error("Entity '{0}' could not be given a canonical id")]
    UncanonicalizableEntity(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_kinds() {
        assert_eq!(
            ImportIssue::DuplicateId("#1".to_string()).kind(),
            IssueKind::Structural
        );
        assert_eq!(
            ImportIssue::CorruptedHash("#f1".to_string()).kind(),
            IssueKind::Integrity
        );
        assert_eq!(
            ImportIssue::Multiplicity {
                field: "title".to_string(),
                count: 2
            }
            .kind(),
            IssueKind::Validation
        );
    }

    #[test]
    fn test_issue_messages_name_the_culprit() {
        let dup = ImportIssue::DuplicateId("#1".to_string());
        assert!(dup.to_string().contains("#1"));

        let cycle = ImportIssue::Cycle(vec!["a/".into(), "b/".into(), "a/".into()]);
        assert_eq!(cycle.to_string(), "Circular reference: a/ -> b/ -> a/");

        let rejected = SyncError::ImportRejected(vec![dup, cycle]);
        assert_eq!(rejected.to_string(), "Import rejected with 2 error(s)");
    }
}
