//! Import validation: graph document checked against the field-type catalog
//!
//! Field properties are checked entity by entity from an explicit queue.
//! The root and every data entity hold top-level fields (depth 0), the
//! contextual entities of compound values hold child fields (depth 1) and
//! nothing deeper is allowed. Every entity of the document has to be
//! reached either through a field or through a foreign property; whatever
//! is left over is reported.
//!
//! The document in the report carries the normalizations applied along
//! the way (timestamps in DATE fields become calendar dates, missing
//! context terms are added).

use std::collections::{HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::{FieldType, FieldTypeCatalog, PrimitiveType};
use crate::conforms::conformed_blocks;
use crate::error::{ImportIssue, ReconciliationWarning};
use crate::graph::{GraphDocument, GraphEntity, PropertyValue, Scalar};
use crate::id::{classify_id, IdKind};
use crate::precheck::precheck;
use crate::values::{check_scalar, check_url, is_url};
use crate::vocab::{is_ignored_property, CONFORMS_TO, METADATA_DESCRIPTOR_ID, ROOT_ENTITY_ID, URL_TYPE};

/// Deepest level a field may live at: 0 on the root, 1 inside a compound
const MAX_FIELD_DEPTH: usize = 1;

/// Outcome of import validation
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Normalized document; `None` when no document could be built at all
    pub document: Option<GraphDocument>,
    pub errors: Vec<ImportIssue>,
    pub warnings: Vec<ReconciliationWarning>,
    /// Values of open vocabularies seen for the first time, as (field, value)
    pub new_terms: Vec<(String, String)>,
}

impl ImportReport {
    pub fn is_valid(&self) -> bool {
        self.document.is_some() && self.errors.is_empty()
    }
}

#[derive(Debug)]
struct Pending {
    entity_id: String,
    depth: usize,
}

struct Validator<'a> {
    catalog: &'a dyn FieldTypeCatalog,
    document: GraphDocument,
    errors: Vec<ImportIssue>,
    warnings: Vec<ReconciliationWarning>,
    new_terms: Vec<(String, String)>,
    accounted: HashSet<String>,
    queued: HashSet<String>,
    queue: VecDeque<Pending>,
}

/// Check a raw crate for import
///
/// Collects every structural, validation and integrity issue instead of
/// stopping at the first one. `previous` enables the file hash check.
pub fn validate_for_import(
    raw: &Value,
    previous: Option<&GraphDocument>,
    catalog: &dyn FieldTypeCatalog,
) -> ImportReport {
    let checked = precheck(raw, previous);
    let Some(document) = checked.document else {
        info!(errors = checked.issues.len(), "import rejected by pre-check");
        return ImportReport {
            errors: checked.issues,
            ..Default::default()
        };
    };

    let mut validator = Validator {
        catalog,
        document,
        errors: checked.issues,
        warnings: Vec::new(),
        new_terms: Vec::new(),
        accounted: HashSet::new(),
        queued: HashSet::new(),
        queue: VecDeque::new(),
    };
    validator.enqueue(ROOT_ENTITY_ID, 0);
    for id in &checked.data_entities {
        validator.accounted.insert(id.clone());
        validator.enqueue(id, 0);
    }
    while let Some(pending) = validator.queue.pop_front() {
        validator.process(&pending);
    }
    validator.check_required_fields();
    validator.check_unaccounted();

    info!(
        errors = validator.errors.len(),
        new_terms = validator.new_terms.len(),
        "import validation finished"
    );
    ImportReport {
        document: Some(validator.document),
        errors: validator.errors,
        warnings: validator.warnings,
        new_terms: validator.new_terms,
    }
}

/// Issues with the `conformsTo` of a compound entity
fn conforms_to_issues(entity: &GraphEntity) -> Vec<ImportIssue> {
    let issue = |reason: &str| ImportIssue::InvalidConformsTo {
        id: entity.id.clone(),
        reason: reason.to_string(),
    };
    match entity.get(CONFORMS_TO) {
        None => Vec::new(),
        Some(value @ (PropertyValue::Reference(_) | PropertyValue::References(_))) => value
            .reference_ids()
            .into_iter()
            .filter(|id| !is_url(id))
            .map(|_| issue("URL"))
            .collect(),
        Some(_) => vec![issue("property")],
    }
}

impl<'a> Validator<'a> {
    fn enqueue(&mut self, entity_id: &str, depth: usize) {
        if self.queued.insert(entity_id.to_string()) {
            self.queue.push_back(Pending {
                entity_id: entity_id.to_string(),
                depth,
            });
        }
    }

    fn process(&mut self, pending: &Pending) {
        let Some(entity) = self.document.get(&pending.entity_id) else {
            return;
        };
        if pending.depth > 0 {
            let issues = conforms_to_issues(entity);
            self.errors.extend(issues);
        }
        let properties: Vec<(String, PropertyValue)> = entity
            .properties
            .iter()
            .filter(|(key, _)| !key.starts_with('@'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let catalog = self.catalog;
        for (key, value) in properties {
            if is_ignored_property(&key) {
                self.account_references(&value);
                continue;
            }
            match catalog.resolve_property(&key) {
                Some(field) => self.check_field(pending, &key, field, &value),
                None => {
                    if pending.depth > 0 {
                        debug!(entity = %pending.entity_id, property = %key, "foreign property on compound value");
                        self.warnings.push(ReconciliationWarning::ForeignPropertyRetained {
                            id: pending.entity_id.clone(),
                            property: key.clone(),
                        });
                    }
                    self.check_foreign(&pending.entity_id, &value)
                }
            }
        }
    }

    /// Account for everything a non-field property points at
    fn check_foreign(&mut self, entity_id: &str, value: &PropertyValue) {
        for id in value.referenced_ids() {
            if self.document.contains(&id) {
                self.account_transitively(&id);
            } else if classify_id(&id) != IdKind::Absolute {
                self.errors.push(ImportIssue::UnresolvedReference {
                    parent: entity_id.to_string(),
                    id,
                });
            }
        }
    }

    /// Same as [`Self::check_foreign`], without complaining about dangling ids
    fn account_references(&mut self, value: &PropertyValue) {
        for id in value.referenced_ids() {
            if self.document.contains(&id) {
                self.account_transitively(&id);
            }
        }
    }

    fn account_transitively(&mut self, start: &str) {
        let mut stack = vec![start.to_string()];
        while let Some(id) = stack.pop() {
            if !self.accounted.insert(id.clone()) {
                continue;
            }
            if let Some(entity) = self.document.get(&id) {
                stack.extend(
                    entity
                        .referenced_ids()
                        .into_iter()
                        .filter(|r| self.document.contains(r)),
                );
            }
        }
    }

    fn check_field(&mut self, pending: &Pending, key: &str, field: &FieldType, value: &PropertyValue) {
        if key == field.name && !self.document.context.has_term(key) {
            if let Some(uri) = self.catalog.term_uri(&field.name) {
                debug!(term = %key, %uri, "adding missing context term");
                self.document.context.set_term(key, uri);
            }
        }
        if !field.multiple && value.count() > 1 {
            self.errors.push(ImportIssue::Multiplicity {
                field: field.name.clone(),
                count: value.count(),
            });
        }

        if field.is_compound() {
            self.check_compound(pending, field, value);
        } else if field.is_controlled_vocabulary() {
            self.check_vocabulary(&pending.entity_id, field, value);
        } else {
            self.check_primitive(&pending.entity_id, key, field, value);
        }
    }

    fn check_compound(&mut self, pending: &Pending, field: &FieldType, value: &PropertyValue) {
        if pending.depth >= MAX_FIELD_DEPTH {
            self.errors
                .push(ImportIssue::NestingTooDeep(field.name.clone()));
            return;
        }
        let ids = value.reference_ids();
        if ids.len() != value.count() {
            self.errors.push(ImportIssue::CompoundNotReference {
                field: field.name.clone(),
                entity: pending.entity_id.clone(),
            });
        }

        for id in ids {
            self.accounted.insert(id.to_string());
            let state = self
                .document
                .get(id)
                .map(|e| (e.has_type(&field.name), e.is_bare()));
            match state {
                None => self.errors.push(ImportIssue::UnresolvedReference {
                    parent: pending.entity_id.clone(),
                    id: id.to_string(),
                }),
                Some((false, _)) => self.errors.push(ImportIssue::CompoundTypeMismatch {
                    id: id.to_string(),
                    expected: field.name.clone(),
                }),
                Some((true, true)) => {
                    debug!(entity = %id, "compound entity without values, skipped");
                }
                Some((true, false)) => self.enqueue(id, pending.depth + 1),
            }
        }
    }

    fn check_vocabulary(&mut self, entity_id: &str, field: &FieldType, value: &PropertyValue) {
        let scalars = value.scalars();
        if scalars.len() != value.count() {
            self.errors.push(ImportIssue::InvalidValue {
                field: field.name.clone(),
                entity: entity_id.to_string(),
                reason: "controlled vocabulary values must be literals".to_string(),
            });
        }
        for scalar in scalars {
            let term = scalar.lexical();
            if field.vocabulary.contains(&term) {
                continue;
            }
            if field.open_vocabulary {
                let entry = (field.name.clone(), term);
                if !self.new_terms.contains(&entry) {
                    debug!(field = %field.name, value = %entry.1, "new vocabulary term");
                    self.new_terms.push(entry);
                }
            } else {
                self.errors.push(ImportIssue::UnknownVocabularyTerm {
                    field: field.name.clone(),
                    value: term,
                });
            }
        }
    }

    fn check_primitive(&mut self, entity_id: &str, key: &str, field: &FieldType, value: &PropertyValue) {
        let replacement = match value {
            PropertyValue::Scalar(scalar) => self
                .check_scalar_value(entity_id, field, scalar)
                .map(PropertyValue::Scalar),
            PropertyValue::List(items) => {
                let checked: Vec<Option<Scalar>> = items
                    .iter()
                    .map(|item| self.check_scalar_value(entity_id, field, item))
                    .collect();
                if checked.iter().any(Option::is_some) {
                    Some(PropertyValue::List(
                        items
                            .iter()
                            .zip(checked)
                            .map(|(item, normalized)| normalized.unwrap_or_else(|| item.clone()))
                            .collect(),
                    ))
                } else {
                    None
                }
            }
            PropertyValue::Reference(_) | PropertyValue::References(_)
                if field.primitive == PrimitiveType::Url =>
            {
                for id in value.reference_ids() {
                    self.check_url_reference(entity_id, field, id);
                }
                None
            }
            PropertyValue::Reference(_) | PropertyValue::References(_) => {
                self.invalid(field, entity_id, "expected a literal value, got a reference");
                None
            }
            PropertyValue::Opaque(Value::Array(_)) => {
                self.invalid(field, entity_id, "arrays can not contain arrays or objects");
                None
            }
            PropertyValue::Opaque(_) => {
                self.invalid(field, entity_id, "unsupported value");
                None
            }
        };

        if let Some(normalized) = replacement {
            if let Some(entity) = self.document.get_mut(entity_id) {
                entity.set(key, normalized);
            }
        }
    }

    fn check_scalar_value(&mut self, entity_id: &str, field: &FieldType, scalar: &Scalar) -> Option<Scalar> {
        match check_scalar(field.primitive, scalar) {
            Ok(normalized) => normalized,
            Err(reason) => {
                self.invalid(field, entity_id, &reason);
                None
            }
        }
    }

    /// URL values may point at a `URL` entity whose name holds the address
    fn check_url_reference(&mut self, entity_id: &str, field: &FieldType, id: &str) {
        self.accounted.insert(id.to_string());
        let name = self
            .document
            .get(id)
            .map(|e| e.name().map(str::to_string));
        match name {
            None => self.errors.push(ImportIssue::UnresolvedReference {
                parent: entity_id.to_string(),
                id: id.to_string(),
            }),
            Some(None) => self.invalid(field, entity_id, "the referenced URL entity has no name"),
            Some(Some(url)) => {
                if let Err(reason) = check_url(&url) {
                    self.invalid(field, entity_id, &reason);
                }
            }
        }
    }

    fn invalid(&mut self, field: &FieldType, entity_id: &str, reason: &str) {
        self.errors.push(ImportIssue::InvalidValue {
            field: field.name.clone(),
            entity: entity_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn check_required_fields(&mut self) {
        let catalog = self.catalog;
        for block in conformed_blocks(&self.document, catalog) {
            for field in catalog.fields_in_block(&block.name) {
                if !field.required || !field.is_top_level() {
                    continue;
                }
                let root = self.document.root();
                let present = root
                    .get(&field.name)
                    .or_else(|| catalog.term_uri(&field.name).and_then(|uri| root.get(&uri)))
                    .is_some_and(|v| !v.is_empty());
                if !present {
                    self.errors
                        .push(ImportIssue::MissingRequiredField(field.name.clone()));
                }
            }
        }
    }

    fn check_unaccounted(&mut self) {
        let left: Vec<String> = self
            .document
            .entities()
            .filter(|e| {
                e.id != ROOT_ENTITY_ID
                    && e.id != METADATA_DESCRIPTOR_ID
                    && !e.has_type(URL_TYPE)
                    && !self.accounted.contains(&e.id)
            })
            .map(|e| e.id.clone())
            .collect();
        if !left.is_empty() {
            self.errors.push(ImportIssue::UnaccountedEntities(left));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IssueKind;
    use crate::export::{export_to_document, ExportOptions};
    use crate::testing::{sample_catalog, sample_version, CITATION_SCHEMA};
    use serde_json::json;

    fn crate_with(root: Value, entities: Vec<Value>) -> Value {
        let mut graph = vec![
            json!({"@id": "ro-crate-metadata.json", "@type": "CreativeWork", "about": {"@id": "./"}}),
            root,
        ];
        graph.extend(entities);
        json!({"@context": "https://w3id.org/ro/crate/1.1/context", "@graph": graph})
    }

    #[test]
    fn test_exported_document_is_valid() {
        let catalog = sample_catalog();
        let exported = export_to_document(&catalog, &sample_version(), None, &ExportOptions::default())
            .unwrap()
            .document;
        let report = validate_for_import(&exported.to_json(), Some(&exported), &catalog);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.is_valid());
        assert_eq!(report.document.unwrap(), exported);
    }

    #[test]
    fn test_single_valued_field_with_two_values() {
        let raw = crate_with(json!({"@id": "./", "@type": "Dataset", "title": ["a", "b"]}), vec![]);
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(
            report.errors,
            vec![ImportIssue::Multiplicity {
                field: "title".into(),
                count: 2
            }]
        );
        assert!(report.errors[0].to_string().contains("title"));
    }

    #[test]
    fn test_vocabulary_terms() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset", "subject": ["Law", "Alchemy"],
                   "keyword": {"@id": "#k1"}}),
            vec![json!({"@id": "#k1", "@type": "keyword", "keywordValue": "soil",
                        "keywordVocabulary": "AGROVOC"})],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(
            report.errors,
            vec![ImportIssue::UnknownVocabularyTerm {
                field: "subject".into(),
                value: "Alchemy".into()
            }]
        );
        assert_eq!(
            report.new_terms,
            vec![("keywordVocabulary".to_string(), "AGROVOC".to_string())]
        );
    }

    #[test]
    fn test_compound_checks() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset",
                   "author": [{"@id": "#a1"}, {"@id": "#a2"}, {"@id": "#a3"}],
                   "datasetContact": "Jane"}),
            vec![
                json!({"@id": "#a1", "@type": "Person", "authorName": "Doe"}),
                json!({"@id": "#a2", "@type": "author", "name": "empty"}),
                json!({"@id": "#a3", "@type": "author", "authorName": "Roe",
                       "keyword": {"@id": "#k"}, "conformsTo": {"@id": "not a url"}}),
                json!({"@id": "#k", "@type": "keyword", "keywordValue": "x"}),
            ],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(
            report.errors,
            vec![
                ImportIssue::CompoundTypeMismatch {
                    id: "#a1".into(),
                    expected: "author".into()
                },
                ImportIssue::CompoundNotReference {
                    field: "datasetContact".into(),
                    entity: "./".into()
                },
                ImportIssue::InvalidConformsTo {
                    id: "#a3".into(),
                    reason: "URL".into()
                },
                ImportIssue::NestingTooDeep("keyword".into()),
                ImportIssue::UnaccountedEntities(vec!["#k".into()]),
            ]
        );
    }

    #[test]
    fn test_primitive_values_and_normalization() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset",
                   "productionDate": "2021-06-30T12:00:00.000Z",
                   "numberOfSites": "many",
                   "alternativeURL": {"@id": "https://example.org/alt"},
                   "datasetContact": {"@id": "#c1"}}),
            vec![
                json!({"@id": "https://example.org/alt", "@type": "URL", "name": "https://example.org/alt"}),
                json!({"@id": "#c1", "@type": "datasetContact", "datasetContactEmail": "nobody"}),
            ],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(
            &report.errors[0],
            ImportIssue::InvalidValue { field, .. } if field == "numberOfSites"
        ));
        assert!(matches!(
            &report.errors[1],
            ImportIssue::InvalidValue { field, entity, .. }
                if field == "datasetContactEmail" && entity == "#c1"
        ));
        assert!(report.errors.iter().all(|e| e.kind() == IssueKind::Validation));

        let doc = report.document.unwrap();
        assert_eq!(doc.root().text("productionDate"), Some("2021-06-30"));
    }

    #[test]
    fn test_foreign_data_is_accounted() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset", "funder": {"@id": "#org"},
                   "citation": {"@id": "https://doi.org/10.1/x"}}),
            vec![
                json!({"@id": "#org", "@type": "Organization", "address": {"@id": "#addr"}}),
                json!({"@id": "#addr", "@type": "PostalAddress"}),
                json!({"@id": "#stray", "@type": "Thing"}),
            ],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(
            report.errors,
            vec![ImportIssue::UnaccountedEntities(vec!["#stray".into()])]
        );
    }

    #[test]
    fn test_foreign_property_on_compound_value_is_kept() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset", "title": "T", "author": {"@id": "#a1"}}),
            vec![json!({"@id": "#a1", "@type": "author", "authorName": "Doe, Jane",
                         "orcid": "0000-0002-1825-0097"})],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert!(report.is_valid());
        assert_eq!(
            report.warnings,
            vec![ReconciliationWarning::ForeignPropertyRetained {
                id: "#a1".to_string(),
                property: "orcid".to_string(),
            }]
        );
    }

    #[test]
    fn test_dangling_foreign_reference() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset", "funder": {"@id": "#gone"}}),
            vec![],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(
            report.errors,
            vec![ImportIssue::UnresolvedReference {
                parent: "./".into(),
                id: "#gone".into()
            }]
        );
    }

    #[test]
    fn test_required_field_of_conformed_block() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset", "conformsTo": {"@id": CITATION_SCHEMA},
                   "subject": "Law"}),
            vec![],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert_eq!(
            report.errors,
            vec![ImportIssue::MissingRequiredField("title".into())]
        );
    }

    #[test]
    fn test_missing_context_terms_are_added() {
        let raw = crate_with(json!({"@id": "./", "@type": "Dataset", "title": "T"}), vec![]);
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert!(report.is_valid());
        let doc = report.document.unwrap();
        assert_eq!(
            doc.context.term_uri("title"),
            Some("http://purl.org/dc/terms/title")
        );
    }

    #[test]
    fn test_precheck_failure_yields_no_document() {
        let raw = crate_with(
            json!({"@id": "./", "@type": "Dataset"}),
            vec![json!({"@id": "#1", "@type": "x"}), json!({"@id": "#1", "@type": "x"})],
        );
        let report = validate_for_import(&raw, None, &sample_catalog());
        assert!(report.document.is_none());
        assert!(!report.is_valid());
    }
}
