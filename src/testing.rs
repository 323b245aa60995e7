//! Shared fixtures for unit tests

use serde_json::json;

use crate::catalog::InMemoryCatalog;
use crate::tree::{CompoundRow, DatasetVersion, FieldNode, FileNode};

pub const PID: &str = "doi:10.5072/FK2/ABC";
pub const CITATION_SCHEMA: &str = "https://repo.example.org/schema/citation";
pub const GEO_SCHEMA: &str = "https://repo.example.org/schema/geospatial";

/// Citation-like block plus a small geospatial block
pub fn sample_catalog() -> InMemoryCatalog {
    let definition = json!({
        "blocks": [
            {
                "name": "citation",
                "namespace_uri": "https://dataverse.org/schema/citation/",
                "conforms_to": CITATION_SCHEMA,
                "fields": [
                    {"name": "title", "uri": "http://purl.org/dc/terms/title", "required": true},
                    {"name": "subject", "kind": "vocabulary", "multiple": true,
                     "vocabulary": ["Engineering", "Law", "Medicine", "Other"]},
                    {"name": "productionDate", "primitive": "DATE"},
                    {"name": "alternativeURL", "primitive": "URL"},
                    {"name": "notesText", "primitive": "TEXTBOX"},
                    {"name": "author", "kind": "compound", "multiple": true,
                     "display_name_field": "authorName",
                     "children": [
                        {"name": "authorName"},
                        {"name": "authorAffiliation"}
                     ]},
                    {"name": "datasetContact", "kind": "compound",
                     "children": [
                        {"name": "datasetContactName"},
                        {"name": "datasetContactEmail", "primitive": "EMAIL"}
                     ]},
                    {"name": "keyword", "kind": "compound", "multiple": true,
                     "children": [
                        {"name": "keywordValue"},
                        {"name": "keywordVocabulary", "kind": "vocabulary", "open_vocabulary": true}
                     ]}
                ]
            },
            {
                "name": "geospatial",
                "namespace_uri": "https://dataverse.org/schema/geospatial/",
                "conforms_to": GEO_SCHEMA,
                "fields": [
                    {"name": "numberOfSites", "primitive": "INT"},
                    {"name": "geographicBoundingBox", "kind": "compound",
                     "children": [
                        {"name": "westLongitude", "primitive": "FLOAT"},
                        {"name": "eastLongitude", "primitive": "FLOAT"}
                     ]}
                ]
            }
        ]
    });
    match InMemoryCatalog::from_json_str(&definition.to_string()) {
        Ok(catalog) => catalog,
        Err(e) => panic!("fixture catalog is invalid: {}", e),
    }
}

pub fn file(id: u64, name: &str, folder: &str, hash: &str) -> FileNode {
    FileNode {
        id,
        name: name.to_string(),
        directory_label: if folder.is_empty() {
            None
        } else {
            Some(folder.to_string())
        },
        hash: hash.to_string(),
        size: 100 * id,
        content_type: Some("text/csv".to_string()),
        description: None,
        tags: Vec::new(),
        pid: Some(format!("{}/F{}", PID, id)),
    }
}

pub fn author(id: u64, name: &str, affiliation: &str) -> CompoundRow {
    CompoundRow::new(
        id,
        vec![
            FieldNode::primitive("authorName", [name]),
            FieldNode::primitive("authorAffiliation", [affiliation]),
        ],
    )
}

/// A version with primitive, vocabulary and compound fields and two files
pub fn sample_version() -> DatasetVersion {
    let mut version = DatasetVersion::new(PID);
    version.license = Some("http://creativecommons.org/publicdomain/zero/1.0".to_string());
    version.date_published = Some("2024-03-01".to_string());
    version.fields = vec![
        FieldNode::primitive("title", ["Soil samples"]),
        FieldNode::vocabulary("subject", ["Engineering", "Law"]),
        FieldNode::compound(
            "author",
            vec![author(1, "Doe, Jane", "KIT"), author(2, "Roe, Rick", "SZTAKI")],
        ),
    ];
    version.files = vec![
        file(10, "a.csv", "raw", "abc"),
        file(11, "readme.txt", "", "def"),
    ];
    version
}
