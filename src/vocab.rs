//! Vocabulary definitions for RO-Crate synchronization
//!
//! Names of the entities, types and properties the sync engine treats
//! specially. Everything not listed here is either a catalog-backed field
//! or foreign data added by the external editor.

/// Root entity ID
pub const ROOT_ENTITY_ID: &str = "./";

/// Standard metadata descriptor filename (and its @id)
pub const METADATA_DESCRIPTOR_ID: &str = "ro-crate-metadata.json";

/// Default RO-Crate JSON-LD context
pub const ROCRATE_CONTEXT: &str = "https://w3id.org/ro/crate/1.1/context";

/// RO-Crate 1.1 profile the descriptor conforms to
pub const ROCRATE_PROFILE: &str = "https://w3id.org/ro/crate/1.1";

pub const FILE_TYPE: &str = "File";
pub const DATASET_TYPE: &str = "Dataset";
pub const URL_TYPE: &str = "URL";

pub const HAS_PART: &str = "hasPart";
pub const NAME: &str = "name";
pub const CONFORMS_TO: &str = "conformsTo";
pub const LICENSE: &str = "license";
pub const DATE_PUBLISHED: &str = "datePublished";
pub const REVERSE: &str = "@reverse";

/// Persistent identifier of the dataset (on the root) or of a real file
pub const ARP_PID: &str = "@arpPid";

pub const HASH: &str = "hash";
pub const CONTENT_SIZE: &str = "contentSize";
pub const ENCODING_FORMAT: &str = "encodingFormat";
pub const DESCRIPTION: &str = "description";
pub const DIRECTORY_LABEL: &str = "directoryLabel";
pub const TAGS: &str = "tags";

/// Role name used by the identity scheme for file entities
pub const FILE_ROLE: &str = "file";

/// Properties a Dataset (folder) entity must never carry
pub const FILE_ONLY_PROPERTIES: &[&str] = &[HASH, CONTENT_SIZE];

/// Properties a File entity must never carry
pub const DATASET_ONLY_PROPERTIES: &[&str] = &[HAS_PART];

/// Root properties that look like fields but are never catalog-backed
pub const IGNORED_PROPERTIES: &[&str] = &[CONFORMS_TO, NAME, HAS_PART, LICENSE];

/// Properties the repository itself writes on File entities
pub const REPOSITORY_FILE_PROPERTIES: &[&str] = &[
    "@id",
    "@type",
    NAME,
    CONTENT_SIZE,
    ENCODING_FORMAT,
    DIRECTORY_LABEL,
    DESCRIPTION,
    "identifier",
    ARP_PID,
    HASH,
    TAGS,
];

/// Properties the repository itself writes on Dataset (folder) entities
pub const REPOSITORY_DATASET_PROPERTIES: &[&str] = &["@id", "@type", NAME, HAS_PART];

/// Check if a property name is skipped when mapping properties to fields
pub fn is_ignored_property(name: &str) -> bool {
    name.starts_with('@') || IGNORED_PROPERTIES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_properties() {
        assert!(is_ignored_property("@arpPid"));
        assert!(is_ignored_property("hasPart"));
        assert!(is_ignored_property("conformsTo"));
        assert!(!is_ignored_property("author"));
        assert!(!is_ignored_property("subject"));
    }
}
