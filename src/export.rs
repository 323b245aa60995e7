//! Export: field tree -> graph document
//!
//! Works on a fresh copy of the previous document (or a new crate on first
//! export), so the caller never sees a half-updated document.

use tracing::{debug, info, warn};

use crate::catalog::{FieldType, FieldTypeCatalog, PrimitiveType};
use crate::conforms::update_conforms_to;
use crate::error::{ReconciliationWarning, SyncError};
use crate::folders::reconcile_files;
use crate::graph::{GraphDocument, GraphEntity, PropertyValue};
use crate::id::IdentityScheme;
use crate::tree::{CompoundRow, DatasetVersion, FieldNode, FieldValue};
use crate::vocab::{
    is_ignored_property, ARP_PID, DATE_PUBLISHED, LICENSE, NAME, ROCRATE_CONTEXT, URL_TYPE,
};

/// Options for export
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub scheme: IdentityScheme,
    /// Base `@context` of a newly created crate
    pub context_url: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            scheme: IdentityScheme::default(),
            context_url: ROCRATE_CONTEXT.to_string(),
        }
    }
}

/// Result of export
#[derive(Debug)]
pub struct ExportResult {
    pub document: GraphDocument,
    pub warnings: Vec<ReconciliationWarning>,
}

struct Exporter<'a> {
    catalog: &'a dyn FieldTypeCatalog,
    scheme: &'a IdentityScheme,
    pid: &'a str,
    document: GraphDocument,
    warnings: Vec<ReconciliationWarning>,
}

/// Translate a version's field tree and file list into a graph document
pub fn export_to_document(
    catalog: &dyn FieldTypeCatalog,
    version: &DatasetVersion,
    previous: Option<&GraphDocument>,
    options: &ExportOptions,
) -> Result<ExportResult, SyncError> {
    let is_creation = previous.is_none();
    info!(pid = %version.pid, is_creation, "exporting field tree");

    let document = previous
        .cloned()
        .unwrap_or_else(|| GraphDocument::new(&options.context_url));
    let mut exporter = Exporter {
        catalog,
        scheme: &options.scheme,
        pid: &version.pid,
        document,
        warnings: Vec::new(),
    };

    exporter.write_root_bookkeeping(version);
    if !is_creation {
        exporter.remove_deleted_fields(&version.fields);
    }
    for field in version.fields.iter().filter(|f| !f.is_empty()) {
        exporter.write_field(field)?;
    }
    exporter.remove_unreferenced_urls();

    let mut warnings = exporter.warnings;
    let mut document = exporter.document;
    warnings.extend(reconcile_files(
        &mut document,
        &version.files,
        &options.scheme,
        &version.pid,
    ));
    update_conforms_to(&mut document, &version.fields, catalog);

    info!(
        pid = %version.pid,
        entities = document.len(),
        warnings = warnings.len(),
        "export finished"
    );
    Ok(ExportResult { document, warnings })
}

/// Values of a primitive/vocabulary node, or of a compound row child
fn node_texts(node: &FieldNode) -> Vec<String> {
    match node.value {
        FieldValue::Compound(_) => Vec::new(),
        _ => node.texts(),
    }
}

/// Display name of a new compound entity
fn compound_display_name(field: &FieldType, row: &CompoundRow) -> Option<String> {
    if row.child(NAME).is_some() {
        return None;
    }
    if let Some(display_field) = &field.display_name_field {
        return row
            .child(display_field)
            .map(|c| node_texts(c).join("; "))
            .filter(|n| !n.is_empty());
    }
    let joined = row
        .children
        .iter()
        .flat_map(node_texts)
        .collect::<Vec<_>>()
        .join("; ");
    (!joined.is_empty()).then_some(joined)
}

impl<'a> Exporter<'a> {
    fn write_root_bookkeeping(&mut self, version: &DatasetVersion) {
        let root = self.document.root_mut();
        root.set(ARP_PID, PropertyValue::text(version.pid.clone()));
        if let Some(license) = &version.license {
            root.set(LICENSE, PropertyValue::reference(license.clone()));
        }
        if let Some(date) = &version.date_published {
            root.set(DATE_PUBLISHED, PropertyValue::text(date.clone()));
        }
    }

    /// Property key of a field, registering its term on first use
    ///
    /// A name already mapped to a different URI is left alone and the
    /// field's own URI becomes the key.
    fn property_key(&mut self, field: &FieldType) -> String {
        let Some(uri) = self.catalog.term_uri(&field.name) else {
            return field.name.clone();
        };
        match self.document.context.term_uri(&field.name) {
            Some(existing) if existing != uri => {
                debug!(field = %field.name, %existing, %uri, "term clash, keying by URI");
                uri
            }
            Some(_) => field.name.clone(),
            None => {
                self.document.context.set_term(field.name.clone(), uri);
                field.name.clone()
            }
        }
    }

    /// Key under which `field` currently lives on an entity, if any
    fn existing_key(&self, entity: &GraphEntity, field: &FieldType) -> Option<String> {
        if entity.contains(&field.name) {
            return Some(field.name.clone());
        }
        self.catalog
            .term_uri(&field.name)
            .filter(|uri| entity.contains(uri))
    }

    fn write_field(&mut self, node: &FieldNode) -> Result<(), SyncError> {
        let field = self
            .catalog
            .lookup_field(&node.name)
            .ok_or_else(|| SyncError::UnknownField(node.name.clone()))?
            .clone();
        let key = self.property_key(&field);
        match &node.value {
            FieldValue::Compound(_) => self.write_compound(&field, &key, node)?,
            _ => {
                let texts = node_texts(node);
                let value = if field.primitive == PrimitiveType::Url && !field.is_controlled_vocabulary()
                {
                    for url in &texts {
                        self.ensure_url_entity(url);
                    }
                    PropertyValue::from_references(texts)
                } else {
                    PropertyValue::from_texts(texts)
                };
                if let Some(value) = value {
                    self.document.root_mut().set(key, value);
                }
            }
        }
        Ok(())
    }

    fn ensure_url_entity(&mut self, url: &str) {
        if !self.document.contains(url) {
            let mut entity = GraphEntity::new(url, URL_TYPE);
            entity.set(NAME, PropertyValue::text(url));
            self.document.insert(entity);
        }
    }

    /// Row id of an entity id issued for `field` of this dataset
    fn row_of(&self, field: &str, id: &str) -> Option<u64> {
        self.scheme
            .is_field_id(id, self.pid, field)
            .then(|| IdentityScheme::row_id_from(id))
            .flatten()
    }

    fn write_compound(&mut self, field: &FieldType, key: &str, node: &FieldNode) -> Result<(), SyncError> {
        let rows = node.rows();
        let mut row_ids = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let row_id = row.id.ok_or_else(|| SyncError::MissingRowId {
                field: field.name.clone(),
                position,
            })?;
            row_ids.push(row_id);
        }

        let existing: Vec<String> = self
            .document
            .root()
            .get(key)
            .map(|v| v.reference_ids().into_iter().map(str::to_string).collect())
            .unwrap_or_default();

        for id in &existing {
            let still_present = self
                .row_of(&field.name, id)
                .is_some_and(|row_id| row_ids.contains(&row_id));
            if !still_present && self.strip_compound_entity(field, id) {
                self.document.root_mut().remove_reference_from(key, id);
            }
        }

        for (position, (row, row_id)) in rows.iter().zip(&row_ids).enumerate() {
            let canonical = self.scheme.id_for_field(self.pid, &field.name, *row_id);
            let matched = self
                .document
                .root()
                .get(key)
                .map(|v| v.reference_ids())
                .unwrap_or_default()
                .into_iter()
                .find(|id| *id == canonical || self.row_of(&field.name, id) == Some(*row_id))
                .map(str::to_string);

            match matched.filter(|id| self.document.contains(id)) {
                Some(entity_id) => self.update_compound_entity(field, &entity_id, row),
                None => self.insert_compound_entity(field, key, &canonical, row, position),
            }
        }
        Ok(())
    }

    /// Key and value of a row child; the term is only registered when the
    /// child has a value
    fn child_value(&mut self, child_type: &FieldType, row: &CompoundRow) -> Option<(String, PropertyValue)> {
        let value = row
            .child(&child_type.name)
            .and_then(|c| PropertyValue::from_texts(node_texts(c)))?;
        Some((self.property_key(child_type), value))
    }

    fn update_compound_entity(&mut self, field: &FieldType, entity_id: &str, row: &CompoundRow) {
        let children: Vec<FieldType> = self
            .catalog
            .child_fields(&field.name)
            .into_iter()
            .cloned()
            .collect();
        for child_type in &children {
            let present = row.child(&child_type.name).is_some_and(|c| !c.is_empty());
            if !present {
                if let Some(entity) = self.document.get(entity_id) {
                    if let Some(old_key) = self.existing_key(entity, child_type) {
                        if let Some(entity) = self.document.get_mut(entity_id) {
                            entity.remove(&old_key);
                        }
                    }
                }
                continue;
            }
            if let Some((key, value)) = self.child_value(child_type, row) {
                if let Some(entity) = self.document.get_mut(entity_id) {
                    entity.set(key, value);
                }
            }
        }
    }

    fn insert_compound_entity(
        &mut self,
        field: &FieldType,
        key: &str,
        entity_id: &str,
        row: &CompoundRow,
        position: usize,
    ) {
        let mut entity = GraphEntity::new(entity_id, field.name.clone());
        let children: Vec<FieldType> = self
            .catalog
            .child_fields(&field.name)
            .into_iter()
            .cloned()
            .collect();
        for child_type in &children {
            if let Some((child_key, value)) = self.child_value(child_type, row) {
                entity.set(child_key, value);
            }
        }
        if entity.is_bare() {
            return;
        }
        if let Some(name) = compound_display_name(field, row) {
            entity.set(NAME, PropertyValue::text(name));
        }

        let root = self.document.root_mut();
        match root.get_mut(key) {
            Some(value) => {
                value.insert_reference(position, entity_id);
            }
            None => root.set(key, PropertyValue::reference(entity_id)),
        }
        self.document.insert(entity);
        debug!(field = %field.name, entity = %entity_id, position, "added compound entity");
    }

    /// Drop the field-backed properties of a compound entity
    ///
    /// Returns true when the entity was removed, false when it was kept
    /// because of foreign properties.
    fn strip_compound_entity(&mut self, field: &FieldType, entity_id: &str) -> bool {
        let children: Vec<FieldType> = self
            .catalog
            .child_fields(&field.name)
            .into_iter()
            .cloned()
            .collect();
        let keys: Vec<String> = match self.document.get(entity_id) {
            Some(entity) => children
                .iter()
                .filter_map(|c| self.existing_key(entity, c))
                .collect(),
            None => return true,
        };
        let Some(entity) = self.document.get_mut(entity_id) else {
            return true;
        };
        for key in &keys {
            entity.remove(key);
        }
        if entity.is_bare() {
            self.document.remove(entity_id);
            debug!(entity = %entity_id, "removed compound entity");
            true
        } else {
            warn!(entity = %entity_id, "compound entity keeps foreign properties");
            self.warnings
                .push(ReconciliationWarning::ForeignEntityKept(entity_id.to_string()));
            false
        }
    }

    /// Remove root properties of fields that left the tree
    fn remove_deleted_fields(&mut self, fields: &[FieldNode]) {
        let keys: Vec<String> = self
            .document
            .root()
            .properties
            .keys()
            .filter(|k| !is_ignored_property(k))
            .cloned()
            .collect();

        for key in keys {
            let Some(field) = self.catalog.resolve_property(&key).cloned() else {
                continue;
            };
            if !field.is_top_level() {
                continue;
            }
            let in_tree = fields
                .iter()
                .any(|f| f.name == field.name && !f.is_empty());
            if in_tree {
                continue;
            }

            if field.is_compound() {
                let ids: Vec<String> = self
                    .document
                    .root()
                    .get(&key)
                    .map(|v| v.reference_ids().into_iter().map(str::to_string).collect())
                    .unwrap_or_default();
                for id in ids {
                    if self.strip_compound_entity(&field, &id) {
                        self.document.root_mut().remove_reference_from(&key, &id);
                    }
                }
                if self.document.root().contains(&key) {
                    continue;
                }
                let catalog = self.catalog;
                for child in catalog.child_fields(&field.name) {
                    self.forget_term(child);
                }
            } else {
                self.document.root_mut().remove(&key);
            }
            self.forget_term(&field);
            debug!(field = %field.name, "removed deleted field");
        }
    }

    /// Drop a field's context term, unless the name maps to another URI
    fn forget_term(&mut self, field: &FieldType) {
        let uri = self.catalog.term_uri(&field.name);
        if self.document.context.term_uri(&field.name) == uri.as_deref() {
            self.document.context.remove_term(&field.name);
        }
    }

    /// Remove URL entities nothing points at any more
    fn remove_unreferenced_urls(&mut self) {
        let orphans: Vec<String> = self
            .document
            .entities()
            .filter(|e| e.has_type(URL_TYPE) && e.is_bare())
            .map(|e| e.id.clone())
            .filter(|id| self.document.referrers_of(id).is_empty())
            .collect();
        for id in orphans {
            self.document.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{author, file, sample_catalog, sample_version, CITATION_SCHEMA, PID};
    use crate::vocab::{CONFORMS_TO, HAS_PART};
    use serde_json::json;

    fn export(version: &DatasetVersion, previous: Option<&GraphDocument>) -> GraphDocument {
        export_to_document(&sample_catalog(), version, previous, &ExportOptions::default())
            .unwrap()
            .document
    }

    fn author_id(row: u64) -> String {
        IdentityScheme::default().id_for_field(PID, "author", row)
    }

    #[test]
    fn test_first_export() {
        let doc = export(&sample_version(), None);
        let root = doc.root();

        assert_eq!(root.text(ARP_PID), Some(PID));
        assert_eq!(root.text("title"), Some("Soil samples"));
        assert_eq!(root.get("subject").unwrap().to_json(), json!(["Engineering", "Law"]));
        assert_eq!(
            root.get("author").unwrap().reference_ids(),
            vec![author_id(1).as_str(), author_id(2).as_str()]
        );
        assert_eq!(
            root.get(CONFORMS_TO).unwrap().to_json(),
            json!({"@id": CITATION_SCHEMA})
        );
        assert_eq!(root.get(HAS_PART).unwrap().count(), 2);

        let first = doc.get(&author_id(1)).unwrap();
        assert_eq!(first.types, vec!["author".to_string()]);
        assert_eq!(first.text("authorName"), Some("Doe, Jane"));
        assert_eq!(first.name(), Some("Doe, Jane"));

        assert_eq!(doc.context.term_uri("title"), Some("http://purl.org/dc/terms/title"));
        assert_eq!(
            doc.context.term_uri("authorAffiliation"),
            Some("https://dataverse.org/schema/citation/authorAffiliation")
        );
    }

    #[test]
    fn test_reexport_is_stable() {
        let version = sample_version();
        let first = export(&version, None);
        let second = export(&version, Some(&first));
        assert_eq!(
            first.to_json_string(true).unwrap(),
            second.to_json_string(true).unwrap()
        );
    }

    #[test]
    fn test_vocabulary_collapses_to_scalar() {
        let mut version = sample_version();
        let doc = export(&version, None);
        version.fields[1] = FieldNode::vocabulary("subject", ["Engineering"]);
        let doc = export(&version, Some(&doc));
        assert_eq!(doc.root().get("subject").unwrap().to_json(), json!("Engineering"));
    }

    #[test]
    fn test_new_row_inserted_at_position() {
        let mut version = sample_version();
        let doc = export(&version, None);
        version.fields[2] = FieldNode::compound(
            "author",
            vec![
                author(1, "Doe, Jane", "KIT"),
                author(3, "Poe, Edgar", "MIT"),
                author(2, "Roe, Rick", "SZTAKI"),
            ],
        );
        let doc = export(&version, Some(&doc));
        assert_eq!(
            doc.root().get("author").unwrap().reference_ids(),
            vec![author_id(1).as_str(), author_id(3).as_str(), author_id(2).as_str()]
        );
    }

    #[test]
    fn test_row_update_drops_missing_child() {
        let mut version = sample_version();
        let doc = export(&version, None);
        version.fields[2] = FieldNode::compound(
            "author",
            vec![
                CompoundRow::new(1, vec![FieldNode::primitive("authorName", ["Doe, J."])]),
                author(2, "Roe, Rick", "SZTAKI"),
            ],
        );
        let doc = export(&version, Some(&doc));
        let first = doc.get(&author_id(1)).unwrap();
        assert_eq!(first.text("authorName"), Some("Doe, J."));
        assert!(!first.contains("authorAffiliation"));
    }

    #[test]
    fn test_removed_row_with_foreign_data_is_kept() {
        let mut version = sample_version();
        let mut doc = export(&version, None);
        doc.get_mut(&author_id(2))
            .unwrap()
            .set("orcid", PropertyValue::text("0000-0001"));

        version.fields[2] = FieldNode::compound("author", vec![author(1, "Doe, Jane", "KIT")]);
        let result = export_to_document(&sample_catalog(), &version, Some(&doc), &ExportOptions::default()).unwrap();

        let kept = result.document.get(&author_id(2)).unwrap();
        assert!(!kept.contains("authorName"));
        assert_eq!(kept.text("orcid"), Some("0000-0001"));
        assert!(result
            .warnings
            .contains(&ReconciliationWarning::ForeignEntityKept(author_id(2))));
    }

    #[test]
    fn test_deleted_field_removed() {
        let mut version = sample_version();
        let doc = export(&version, None);
        version.fields.truncate(2);
        let doc = export(&version, Some(&doc));

        assert!(!doc.root().contains("author"));
        assert!(!doc.contains(&author_id(1)));
        assert!(!doc.contains(&author_id(2)));
        assert!(!doc.context.has_term("author"));
        assert!(!doc.context.has_term("authorName"));
    }

    #[test]
    fn test_term_clash_keys_by_uri() {
        let mut previous = GraphDocument::new(ROCRATE_CONTEXT);
        previous.context.set_term("title", "https://schema.org/name");
        let doc = export(&sample_version(), Some(&previous));
        assert!(!doc.root().contains("title"));
        assert_eq!(doc.root().text("http://purl.org/dc/terms/title"), Some("Soil samples"));
        assert_eq!(doc.context.term_uri("title"), Some("https://schema.org/name"));
    }

    #[test]
    fn test_url_fields_reference_url_entities() {
        let mut version = sample_version();
        version
            .fields
            .push(FieldNode::primitive("alternativeURL", ["https://example.org/data"]));
        let doc = export(&version, None);
        assert_eq!(
            doc.root().get("alternativeURL"),
            Some(&PropertyValue::reference("https://example.org/data"))
        );
        let url = doc.get("https://example.org/data").unwrap();
        assert!(url.has_type(URL_TYPE));

        version.fields.pop();
        let doc = export(&version, Some(&doc));
        assert!(!doc.contains("https://example.org/data"));
    }

    #[test]
    fn test_child_terms_registered_only_when_used() {
        let mut version = sample_version();
        version.fields.push(FieldNode::compound(
            "datasetContact",
            vec![CompoundRow::new(
                5,
                vec![FieldNode::primitive("datasetContactName", ["Doe, Jane"])],
            )],
        ));
        let doc = export(&version, None);
        assert_eq!(
            doc.context.term_uri("datasetContactName"),
            Some("https://dataverse.org/schema/citation/datasetContactName")
        );
        assert!(doc.context.term_uri("datasetContactEmail").is_none());
    }

    #[test]
    fn test_foreign_id_is_not_taken_for_a_row() {
        let foreign = "https://x.org/people/1";
        let mut previous = GraphDocument::new(ROCRATE_CONTEXT);
        let mut person = GraphEntity::new(foreign, "author");
        person.set("authorName", PropertyValue::text("Someone Else"));
        person.set("orcid", PropertyValue::text("0000-0002"));
        previous.insert(person);
        previous
            .root_mut()
            .set("author", PropertyValue::reference(foreign));

        let doc = export(&sample_version(), Some(&previous));

        assert_eq!(doc.get(&author_id(1)).unwrap().text("authorName"), Some("Doe, Jane"));
        let kept = doc.get(foreign).unwrap();
        assert!(!kept.contains("authorName"));
        assert_eq!(kept.text("orcid"), Some("0000-0002"));
        assert_eq!(doc.root().get("author").unwrap().reference_ids()[0], author_id(1));
    }

    #[test]
    fn test_missing_row_id_fails() {
        let mut version = sample_version();
        version.fields[2] = FieldNode::compound(
            "author",
            vec![CompoundRow::unsaved(vec![FieldNode::primitive("authorName", ["X"])])],
        );
        let result = export_to_document(&sample_catalog(), &version, None, &ExportOptions::default());
        assert!(matches!(result, Err(SyncError::MissingRowId { position: 0, .. })));
    }

    #[test]
    fn test_unknown_field_fails() {
        let mut version = sample_version();
        version.fields.push(FieldNode::primitive("nope", ["x"]));
        let result = export_to_document(&sample_catalog(), &version, None, &ExportOptions::default());
        assert!(matches!(result, Err(SyncError::UnknownField(name)) if name == "nope"));
    }

    #[test]
    fn test_files_exported() {
        let mut version = sample_version();
        version.files.push(file(12, "b.csv", "raw", "ghi"));
        let doc = export(&version, None);
        let raw = doc.get("raw/").unwrap();
        assert_eq!(raw.has_part().len(), 2);
    }
}
