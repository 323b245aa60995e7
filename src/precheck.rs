//! Structural pre-check of an incoming crate
//!
//! Runs on the raw JSON before anything is interpreted. Entity-level
//! problems (missing `@id`/`@type`, duplicate ids) stop the check, since no
//! consistent document can be built from such input. Everything found by
//! the `hasPart` walk is collected and returned together.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ImportIssue;
use crate::folders::is_real_file;
use crate::graph::{GraphDocument, GraphEntity};
use crate::vocab::{DATASET_ONLY_PROPERTIES, FILE_ONLY_PROPERTIES, HASH, REVERSE, ROOT_ENTITY_ID};

/// Outcome of the pre-check
#[derive(Debug, Default)]
pub struct Precheck {
    /// Parsed document; `None` when entity-level problems were found
    pub document: Option<GraphDocument>,
    pub issues: Vec<ImportIssue>,
    /// Data entities reached from the root through `hasPart`, in walk order
    pub data_entities: Vec<String>,
}

fn has_type(obj: &Map<String, Value>) -> bool {
    match obj.get("@type") {
        Some(Value::String(t)) => !t.is_empty(),
        Some(Value::Array(items)) => items.iter().any(|t| t.as_str().is_some_and(|s| !s.is_empty())),
        _ => false,
    }
}

/// Check `raw` and build the document it describes
///
/// With a `previous` document, File hashes are compared against it.
pub fn precheck(raw: &Value, previous: Option<&GraphDocument>) -> Precheck {
    let mut result = Precheck::default();

    let Some(graph) = raw.get("@graph").and_then(Value::as_array) else {
        result.issues.push(ImportIssue::MissingGraph);
        return result;
    };

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut cleaned = Vec::with_capacity(graph.len());
    for item in graph {
        let Some(id) = item.get("@id").and_then(Value::as_str) else {
            result.issues.push(ImportIssue::MissingId(item.to_string()));
            continue;
        };
        let Some(obj) = item.as_object().filter(|o| has_type(o)) else {
            result.issues.push(ImportIssue::MissingType(id.to_string()));
            continue;
        };
        if !seen.insert(id) {
            if reported.insert(id) {
                result.issues.push(ImportIssue::DuplicateId(id.to_string()));
            }
            continue;
        }
        let mut obj = obj.clone();
        if obj.remove(REVERSE).is_some() {
            debug!(entity = %id, "dropped @reverse property");
        }
        cleaned.push(Value::Object(obj));
    }
    if !seen.contains(ROOT_ENTITY_ID) {
        result.issues.push(ImportIssue::MissingRoot);
    }
    if !result.issues.is_empty() {
        return result;
    }

    let mut normalized = Map::new();
    normalized.insert(
        "@context".to_string(),
        raw.get("@context").cloned().unwrap_or(Value::Null),
    );
    normalized.insert("@graph".to_string(), Value::Array(cleaned));
    let document = match GraphDocument::from_json(&Value::Object(normalized)) {
        Ok(document) => document,
        Err(_) => {
            result.issues.push(ImportIssue::MissingRoot);
            return result;
        }
    };

    walk_data_entities(&document, previous, &mut result);
    result.document = Some(document);
    result
}

/// Depth-first walk from the root's `hasPart` with an explicit stack
fn walk_data_entities(document: &GraphDocument, previous: Option<&GraphDocument>, result: &mut Precheck) {
    let previous_hashes: HashMap<&str, &str> = previous
        .map(|prev| {
            prev.entities()
                .filter(|e| is_real_file(e))
                .filter_map(|e| e.text(HASH).map(|h| (h, e.id.as_str())))
                .collect()
        })
        .unwrap_or_default();

    let root_chain = vec![ROOT_ENTITY_ID.to_string()];
    let mut stack: Vec<(String, String, Vec<String>)> = document
        .root()
        .has_part()
        .into_iter()
        .rev()
        .map(|id| (id.to_string(), ROOT_ENTITY_ID.to_string(), root_chain.clone()))
        .collect();
    let mut first_parent: HashMap<String, String> = HashMap::new();

    while let Some((id, parent, chain)) = stack.pop() {
        let Some(entity) = document.get(&id) else {
            result
                .issues
                .push(ImportIssue::UnresolvedReference { parent, id });
            continue;
        };
        if chain.contains(&id) {
            let mut cycle = chain;
            cycle.push(id);
            result.issues.push(ImportIssue::Cycle(cycle));
            continue;
        }
        if let Some(first) = first_parent.get(&id) {
            if *first != parent {
                debug!(entity = %id, %first, second = %parent, "data entity has two parents");
                result.issues.push(ImportIssue::MultipleParents {
                    id: id.clone(),
                    parents: vec![first.clone(), parent],
                });
            }
            continue;
        }
        first_parent.insert(id.clone(), parent);
        result.data_entities.push(id.clone());

        if entity.is_file() {
            report_illegal(entity, "File", DATASET_ONLY_PROPERTIES, result);
            if let Some(previous) = previous {
                check_file_integrity(entity, previous, &previous_hashes, result);
            }
        } else if entity.is_dataset() {
            report_illegal(entity, "Dataset", FILE_ONLY_PROPERTIES, result);
            let mut child_chain = chain;
            child_chain.push(id.clone());
            for child in entity.has_part().into_iter().rev() {
                stack.push((child.to_string(), id.clone(), child_chain.clone()));
            }
        } else {
            result.issues.push(ImportIssue::NotADataEntity {
                id: id.clone(),
                found: entity.type_label(),
            });
        }
    }

    // Files detached from every parent still keep their hash
    if let Some(previous) = previous {
        for entity in document
            .entities()
            .filter(|e| e.is_file() && !first_parent.contains_key(&e.id))
        {
            check_file_integrity(entity, previous, &previous_hashes, result);
        }
    }
}

fn report_illegal(entity: &GraphEntity, kind: &str, forbidden: &[&str], result: &mut Precheck) {
    let properties: Vec<String> = forbidden
        .iter()
        .filter(|p| entity.contains(p))
        .map(|p| p.to_string())
        .collect();
    if !properties.is_empty() {
        result.issues.push(ImportIssue::IllegalProperties {
            id: entity.id.clone(),
            kind: kind.to_string(),
            properties,
        });
    }
}

/// A file keeps its hash under its id; a new id must not reuse a known hash
fn check_file_integrity(
    entity: &GraphEntity,
    previous: &GraphDocument,
    previous_hashes: &HashMap<&str, &str>,
    result: &mut Precheck,
) {
    match previous.get(&entity.id) {
        Some(original) => match (original.text(HASH), entity.text(HASH)) {
            (None, None) => {}
            (Some(old), Some(new)) if old == new => {}
            _ => result
                .issues
                .push(ImportIssue::CorruptedHash(entity.id.clone())),
        },
        None => {
            if let Some(hash) = entity.text(HASH) {
                if previous_hashes.contains_key(hash) {
                    result.issues.push(ImportIssue::CorruptedId {
                        id: entity.id.clone(),
                        hash: hash.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IssueKind;
    use serde_json::json;

    fn crate_with(entities: Vec<Value>) -> Value {
        let mut graph = vec![
            json!({"@id": "ro-crate-metadata.json", "@type": "CreativeWork", "about": {"@id": "./"}}),
        ];
        graph.extend(entities);
        json!({"@context": "https://w3id.org/ro/crate/1.1/context", "@graph": graph})
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset"}),
            json!({"@id": "#1", "@type": "author"}),
            json!({"@id": "#1", "@type": "author"}),
        ]);
        let result = precheck(&raw, None);
        assert!(result.document.is_none());
        assert_eq!(result.issues, vec![ImportIssue::DuplicateId("#1".to_string())]);
        assert!(result.issues[0].to_string().contains("#1"));
    }

    #[test]
    fn test_missing_id_and_type_collected() {
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset"}),
            json!({"@type": "author", "name": "x"}),
            json!({"@id": "#2"}),
        ]);
        let result = precheck(&raw, None);
        assert_eq!(result.issues.len(), 2);
        assert!(matches!(result.issues[0], ImportIssue::MissingId(_)));
        assert_eq!(result.issues[1], ImportIssue::MissingType("#2".to_string()));
    }

    #[test]
    fn test_missing_graph_and_root() {
        assert_eq!(precheck(&json!({}), None).issues, vec![ImportIssue::MissingGraph]);
        let raw = crate_with(vec![]);
        assert_eq!(precheck(&raw, None).issues, vec![ImportIssue::MissingRoot]);
    }

    #[test]
    fn test_reverse_dropped() {
        let raw = crate_with(vec![json!({
            "@id": "./", "@type": "Dataset",
            "@reverse": {"isPartOf": {"@id": "#x"}}
        })]);
        let result = precheck(&raw, None);
        assert!(result.issues.is_empty());
        assert!(!result.document.unwrap().root().contains(REVERSE));
    }

    #[test]
    fn test_illegal_properties_and_types() {
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": [{"@id": "a.csv"}, {"@id": "raw/"}, {"@id": "#p"}, {"@id": "gone/"}]}),
            json!({"@id": "a.csv", "@type": "File", "hasPart": {"@id": "raw/"}}),
            json!({"@id": "raw/", "@type": "Dataset", "hash": "x", "contentSize": "1"}),
            json!({"@id": "#p", "@type": "Person"}),
        ]);
        let result = precheck(&raw, None);
        assert_eq!(
            result.issues,
            vec![
                ImportIssue::IllegalProperties {
                    id: "a.csv".into(),
                    kind: "File".into(),
                    properties: vec!["hasPart".into()]
                },
                ImportIssue::IllegalProperties {
                    id: "raw/".into(),
                    kind: "Dataset".into(),
                    properties: vec!["hash".into(), "contentSize".into()]
                },
                ImportIssue::NotADataEntity {
                    id: "#p".into(),
                    found: "Person".into()
                },
                ImportIssue::UnresolvedReference {
                    parent: "./".into(),
                    id: "gone/".into()
                },
            ]
        );
        assert!(result.issues.iter().all(|i| i.kind() == IssueKind::Structural));
    }

    #[test]
    fn test_cycle_reported_with_chain() {
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": {"@id": "a/"}}),
            json!({"@id": "a/", "@type": "Dataset", "hasPart": {"@id": "b/"}}),
            json!({"@id": "b/", "@type": "Dataset", "hasPart": {"@id": "a/"}}),
        ]);
        let result = precheck(&raw, None);
        assert_eq!(
            result.issues,
            vec![ImportIssue::Cycle(vec![
                "./".into(),
                "a/".into(),
                "b/".into(),
                "a/".into()
            ])]
        );
        assert_eq!(result.data_entities, vec!["a/".to_string(), "b/".to_string()]);
    }

    fn previous_with_file() -> GraphDocument {
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": {"@id": "#f1"}}),
            json!({"@id": "#f1", "@type": "File", "@arpPid": "", "hash": "abc"}),
        ]);
        GraphDocument::from_json(&raw).unwrap()
    }

    #[test]
    fn test_hash_tamper_detected() {
        let previous = previous_with_file();
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": {"@id": "#f1"}}),
            json!({"@id": "#f1", "@type": "File", "@arpPid": "", "hash": "xyz"}),
        ]);
        let result = precheck(&raw, Some(&previous));
        assert_eq!(result.issues, vec![ImportIssue::CorruptedHash("#f1".to_string())]);
        assert_eq!(result.issues[0].kind(), IssueKind::Integrity);
    }

    #[test]
    fn test_reused_hash_under_new_id() {
        let previous = previous_with_file();
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": [{"@id": "#f1"}, {"@id": "#f2"}]}),
            json!({"@id": "#f1", "@type": "File", "@arpPid": "", "hash": "abc"}),
            json!({"@id": "#f2", "@type": "File", "hash": "abc"}),
        ]);
        let result = precheck(&raw, Some(&previous));
        assert_eq!(
            result.issues,
            vec![ImportIssue::CorruptedId {
                id: "#f2".into(),
                hash: "abc".into()
            }]
        );
    }

    #[test]
    fn test_hash_tamper_detected_on_detached_file() {
        let previous = previous_with_file();
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset"}),
            json!({"@id": "#f1", "@type": "File", "@arpPid": "", "hash": "tampered"}),
        ]);
        let result = precheck(&raw, Some(&previous));
        assert_eq!(result.issues, vec![ImportIssue::CorruptedHash("#f1".to_string())]);
        assert!(result.data_entities.is_empty());
    }

    #[test]
    fn test_entity_with_two_parents_reported() {
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": [{"@id": "a/"}, {"@id": "b/"}]}),
            json!({"@id": "a/", "@type": "Dataset", "hasPart": {"@id": "x.csv"}}),
            json!({"@id": "b/", "@type": "Dataset", "hasPart": {"@id": "x.csv"}}),
            json!({"@id": "x.csv", "@type": "File"}),
        ]);
        let result = precheck(&raw, None);
        assert_eq!(
            result.issues,
            vec![ImportIssue::MultipleParents {
                id: "x.csv".into(),
                parents: vec!["a/".into(), "b/".into()]
            }]
        );
        assert_eq!(result.issues[0].kind(), IssueKind::Structural);
        assert_eq!(
            result.data_entities,
            vec!["a/".to_string(), "x.csv".to_string(), "b/".to_string()]
        );
    }

    #[test]
    fn test_new_virtual_file_accepted() {
        let previous = previous_with_file();
        let raw = crate_with(vec![
            json!({"@id": "./", "@type": "Dataset", "hasPart": [{"@id": "#f1"}, {"@id": "notes.txt"}]}),
            json!({"@id": "#f1", "@type": "File", "@arpPid": "", "hash": "abc"}),
            json!({"@id": "notes.txt", "@type": "File", "name": "notes"}),
        ]);
        let result = precheck(&raw, Some(&previous));
        assert!(result.issues.is_empty());
        assert_eq!(result.data_entities, vec!["#f1".to_string(), "notes.txt".to_string()]);
    }
}
