//! Identity scheme and id rewriting
//!
//! Metadata nodes get ids of the form `{base}/{pid}/{field}/{rowId}`, file
//! nodes use the role name `file` in place of a field, and folder nodes are
//! the concatenation of their parent's id and the encoded folder name.

use std::collections::HashMap;

use serde_json::Value;
use url::form_urlencoded;

use crate::vocab::{FILE_ROLE, ROOT_ENTITY_ID};

/// Default prefix of every generated metadata/file id
pub const DEFAULT_IDENTITY_BASE: &str = "https://w3id.org/arp/ro-id";

/// Classification of an entity @id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdKind {
    /// Root entity: "./"
    Root,
    /// Relative path: "raw/", "raw/2021/"
    Relative,
    /// Fragment identifier: "#person1"
    Fragment,
    /// Absolute URI: "https://...", "http://...", "urn:..."
    Absolute,
    /// Metadata descriptor: "ro-crate-metadata.json" or variants
    MetadataDescriptor,
}

/// Classify an @id string
pub fn classify_id(id: &str) -> IdKind {
    if id == ROOT_ENTITY_ID {
        IdKind::Root
    } else if id.ends_with("ro-crate-metadata.json") {
        IdKind::MetadataDescriptor
    } else if id.starts_with('#') {
        IdKind::Fragment
    } else if id.starts_with("http://")
        || id.starts_with("https://")
        || id.starts_with("urn:")
        || id.starts_with("mailto:")
        || id.starts_with("arcp:")
    {
        IdKind::Absolute
    } else {
        IdKind::Relative
    }
}

/// Deterministic id generation for one repository installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityScheme {
    base: String,
}

impl Default for IdentityScheme {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_BASE)
    }
}

impl IdentityScheme {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Id of a compound row (or any role-scoped node) of a dataset
    pub fn id_for_field(&self, pid: &str, field: &str, row_id: u64) -> String {
        format!("{}/{}/{}/{}", self.base, pid, field, row_id)
    }

    /// Id of a file entity
    pub fn id_for_file(&self, pid: &str, file_id: u64) -> String {
        self.id_for_field(pid, FILE_ROLE, file_id)
    }

    /// Whether `id` was generated for `field` of dataset `pid`
    pub fn is_field_id(&self, id: &str, pid: &str, field: &str) -> bool {
        let prefix = format!("{}/{}/{}/", self.base, pid, field);
        id.strip_prefix(&prefix)
            .map(|tail| tail.parse::<u64>().is_ok())
            .unwrap_or(false)
    }

    /// Recover the numeric row id: the last path segment of a generated id
    pub fn row_id_from(id: &str) -> Option<u64> {
        id.rsplit('/').next().and_then(|last| last.parse().ok())
    }

    /// Id of a folder named `name` under `parent_id`
    ///
    /// Whitespace becomes `_` and the rest is form-urlencoded, so two
    /// folders with the same name under one parent always share an id.
    pub fn id_for_folder(parent_id: &str, name: &str) -> String {
        let parent = if parent_id == ROOT_ENTITY_ID {
            ""
        } else {
            parent_id
        };
        let underscored: String = name
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        let encoded: String = form_urlencoded::byte_serialize(underscored.as_bytes()).collect();
        format!("{}{}/", parent, encoded)
    }
}

/// Rewrite @id references within a JSON value (recursive)
///
/// Finds all {"@id": "..."} patterns and rewrites them using the provided map
pub fn rewrite_json_references(value: &mut Value, id_map: &HashMap<String, String>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(id_val)) = obj.get("@id") {
                if let Some(new_id) = id_map.get(id_val) {
                    obj.insert("@id".to_string(), Value::String(new_id.clone()));
                }
            }
            for (_, v) in obj.iter_mut() {
                rewrite_json_references(v, id_map);
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                rewrite_json_references(item, id_map);
            }
        }
        _ => {}
    }
}

/// Collect every {"@id": "..."} reference nested in a JSON value
pub fn collect_json_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(id)) = obj.get("@id") {
                out.push(id.clone());
            }
            for (key, v) in obj {
                if key != "@id" {
                    collect_json_references(v, out);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                collect_json_references(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_id() {
        assert_eq!(classify_id("./"), IdKind::Root);
        assert_eq!(classify_id("raw/2021/"), IdKind::Relative);
        assert_eq!(classify_id("#person1"), IdKind::Fragment);
        assert_eq!(classify_id("https://orcid.org/0000-0001"), IdKind::Absolute);
        assert_eq!(classify_id("ro-crate-metadata.json"), IdKind::MetadataDescriptor);
    }

    #[test]
    fn test_field_ids_are_stable() {
        let scheme = IdentityScheme::default();
        let id = scheme.id_for_field("doi:10.5072/FK2/ABC", "author", 42);
        assert_eq!(id, "https://w3id.org/arp/ro-id/doi:10.5072/FK2/ABC/author/42");
        assert_eq!(id, scheme.id_for_field("doi:10.5072/FK2/ABC", "author", 42));
        assert_eq!(IdentityScheme::row_id_from(&id), Some(42));
        assert!(scheme.is_field_id(&id, "doi:10.5072/FK2/ABC", "author"));
        assert!(!scheme.is_field_id(&id, "doi:10.5072/FK2/ABC", "keyword"));
    }

    #[test]
    fn test_file_ids_use_file_role() {
        let scheme = IdentityScheme::new("https://example.org/ids/");
        assert_eq!(scheme.id_for_file("pid", 7), "https://example.org/ids/pid/file/7");
    }

    #[test]
    fn test_row_id_from_foreign_id() {
        assert_eq!(IdentityScheme::row_id_from("#person1"), None);
        assert_eq!(IdentityScheme::row_id_from("raw/"), None);
    }

    #[test]
    fn test_folder_ids() {
        assert_eq!(IdentityScheme::id_for_folder("./", "raw"), "raw/");
        assert_eq!(IdentityScheme::id_for_folder("raw/", "2021"), "raw/2021/");
        assert_eq!(IdentityScheme::id_for_folder("./", "my data"), "my_data/");
        assert_eq!(IdentityScheme::id_for_folder("./", "a&b"), "a%26b/");
        assert_eq!(
            IdentityScheme::id_for_folder("./", "raw"),
            IdentityScheme::id_for_folder("./", "raw")
        );
    }

    #[test]
    fn test_rewrite_json_references() {
        let mut value = json!({
            "author": {"@id": "#person1"},
            "hasPart": [
                {"@id": "raw/"},
                {"@id": "https://external.org/resource"}
            ]
        });

        let mut id_map = HashMap::new();
        id_map.insert("#person1".to_string(), "https://w3id.org/arp/ro-id/p/author/1".to_string());
        id_map.insert("raw/".to_string(), "data/".to_string());

        rewrite_json_references(&mut value, &id_map);

        assert_eq!(value["author"]["@id"], "https://w3id.org/arp/ro-id/p/author/1");
        assert_eq!(value["hasPart"][0]["@id"], "data/");
        assert_eq!(value["hasPart"][1]["@id"], "https://external.org/resource");
    }

    #[test]
    fn test_collect_json_references() {
        let value = json!([{"@id": "#a"}, "text", {"nested": {"@id": "#b"}}]);
        let mut out = Vec::new();
        collect_json_references(&value, &mut out);
        assert_eq!(out, vec!["#a".to_string(), "#b".to_string()]);
    }
}
