//! Field-type catalog
//!
//! Read-only view of the metadata-block schema: per field name its kind,
//! multiplicity, children and vocabulary. Pipelines take the catalog as an
//! explicit `&dyn FieldTypeCatalog` parameter.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Primitive,
    Compound,
    Vocabulary,
}

/// Value type of a primitive field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrimitiveType {
    None,
    Date,
    Email,
    #[default]
    Text,
    Textbox,
    Url,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    pub name: String,
    /// Term URI; falls back to the block namespace plus the field name
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub primitive: PrimitiveType,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub required: bool,
    /// Child field types of a compound field
    #[serde(default)]
    pub children: Vec<FieldType>,
    /// Current vocabulary term set of a controlled-vocabulary field
    #[serde(default)]
    pub vocabulary: Vec<String>,
    /// Unseen values are accepted and registered as new terms
    #[serde(default)]
    pub open_vocabulary: bool,
    /// Child whose value names a compound row
    #[serde(default)]
    pub display_name_field: Option<String>,
    /// Owning metadata block; filled in when the catalog is indexed
    #[serde(default)]
    pub block: String,
    /// Parent compound field; filled in when the catalog is indexed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl FieldType {
    pub fn is_compound(&self) -> bool {
        self.kind == FieldKind::Compound
    }

    pub fn is_controlled_vocabulary(&self) -> bool {
        self.kind == FieldKind::Vocabulary
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataBlock {
    pub name: String,
    #[serde(default)]
    pub namespace_uri: Option<String>,
    /// Schema identifier listed in the crate's `conformsTo`
    #[serde(default)]
    pub conforms_to: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldType>,
}

/// Read-only view of the field-type schema
pub trait FieldTypeCatalog {
    /// Look up a top-level or child field by name
    fn lookup_field(&self, name: &str) -> Option<&FieldType>;

    /// Look up a field by its term URI
    fn field_by_uri(&self, uri: &str) -> Option<&FieldType>;

    fn child_fields(&self, name: &str) -> Vec<&FieldType>;

    fn block(&self, name: &str) -> Option<&MetadataBlock>;

    fn blocks(&self) -> Vec<&MetadataBlock>;

    /// Top-level and child fields defined by block `block`
    fn fields_in_block(&self, block: &str) -> Vec<&FieldType>;

    /// Add a term to an open vocabulary; returns false if nothing changed
    fn register_vocabulary_term(&mut self, field: &str, value: &str) -> bool;

    fn term_uri(&self, name: &str) -> Option<String> {
        let field = self.lookup_field(name)?;
        if let Some(uri) = &field.uri {
            return Some(uri.clone());
        }
        let namespace = self.block(&field.block)?.namespace_uri.as_ref()?;
        Some(format!("{}{}", namespace, field.name))
    }

    fn is_multiple(&self, name: &str) -> bool {
        self.lookup_field(name).is_some_and(|f| f.multiple)
    }

    fn is_compound(&self, name: &str) -> bool {
        self.lookup_field(name).is_some_and(FieldType::is_compound)
    }

    fn is_controlled_vocabulary(&self, name: &str) -> bool {
        self.lookup_field(name)
            .is_some_and(FieldType::is_controlled_vocabulary)
    }

    fn vocabulary_values(&self, name: &str) -> Vec<String> {
        self.lookup_field(name)
            .map(|f| f.vocabulary.clone())
            .unwrap_or_default()
    }

    /// Resolve a property key: a field name, or a term URI used as key
    fn resolve_property(&self, key: &str) -> Option<&FieldType> {
        self.lookup_field(key).or_else(|| self.field_by_uri(key))
    }

    /// Block whose schema identifier is `conforms_to`
    fn block_for_schema(&self, conforms_to: &str) -> Option<&MetadataBlock> {
        self.blocks()
            .into_iter()
            .find(|b| b.conforms_to.as_deref() == Some(conforms_to))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDefinition {
    blocks: Vec<MetadataBlock>,
}

/// Catalog held in memory, loadable from a JSON block definition
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    blocks: Vec<MetadataBlock>,
    fields: IndexMap<String, FieldType>,
    children: HashMap<String, Vec<String>>,
}

impl InMemoryCatalog {
    /// Index the (nested) field definitions of `blocks`
    pub fn new(blocks: Vec<MetadataBlock>) -> Self {
        let mut catalog = InMemoryCatalog::default();
        for mut block in blocks {
            let fields = std::mem::take(&mut block.fields);
            for field in fields {
                catalog.index_field(field, &block.name, None);
            }
            catalog.blocks.push(block);
        }
        catalog
    }

    fn index_field(&mut self, mut field: FieldType, block: &str, parent: Option<&str>) {
        field.block = block.to_string();
        field.parent = parent.map(str::to_string);
        let children = std::mem::take(&mut field.children);
        let name = field.name.clone();
        self.fields.insert(name.clone(), field);
        for child in children {
            self.children
                .entry(name.clone())
                .or_default()
                .push(child.name.clone());
            self.index_field(child, block, Some(&name));
        }
    }

    /// Parse `{"blocks": [...]}`
    pub fn from_json_str(text: &str) -> Result<Self, SyncError> {
        let definition: CatalogDefinition = serde_json::from_str(text)?;
        Ok(Self::new(definition.blocks))
    }

    pub fn from_path(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Top-level fields in definition order
    pub fn top_level_fields(&self) -> impl Iterator<Item = &FieldType> {
        self.fields.values().filter(|f| f.is_top_level())
    }
}

impl FieldTypeCatalog for InMemoryCatalog {
    fn lookup_field(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    fn field_by_uri(&self, uri: &str) -> Option<&FieldType> {
        self.fields
            .values()
            .find(|f| self.term_uri(&f.name).as_deref() == Some(uri))
    }

    fn child_fields(&self, name: &str) -> Vec<&FieldType> {
        self.children
            .get(name)
            .map(|names| names.iter().filter_map(|n| self.fields.get(n)).collect())
            .unwrap_or_default()
    }

    fn block(&self, name: &str) -> Option<&MetadataBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    fn blocks(&self) -> Vec<&MetadataBlock> {
        self.blocks.iter().collect()
    }

    fn fields_in_block(&self, block: &str) -> Vec<&FieldType> {
        self.fields.values().filter(|f| f.block == block).collect()
    }

    fn register_vocabulary_term(&mut self, field: &str, value: &str) -> bool {
        match self.fields.get_mut(field) {
            Some(f) if f.open_vocabulary && !f.vocabulary.iter().any(|v| v == value) => {
                f.vocabulary.push(value.to_string());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_catalog;

    #[test]
    fn test_lookup_nested_fields() {
        let catalog = sample_catalog();
        let author = catalog.lookup_field("author").unwrap();
        assert!(author.is_compound());
        assert!(author.multiple);

        let names: Vec<&str> = catalog
            .child_fields("author")
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["authorName", "authorAffiliation"]);

        let child = catalog.lookup_field("authorName").unwrap();
        assert_eq!(child.parent.as_deref(), Some("author"));
        assert_eq!(child.block, "citation");
        assert!(catalog.lookup_field("unknown").is_none());
    }

    #[test]
    fn test_term_uri_fallback() {
        let catalog = sample_catalog();
        assert_eq!(
            catalog.term_uri("title").as_deref(),
            Some("http://purl.org/dc/terms/title")
        );
        assert_eq!(
            catalog.term_uri("subject").as_deref(),
            Some("https://dataverse.org/schema/citation/subject")
        );
        assert_eq!(
            catalog.resolve_property("http://purl.org/dc/terms/title").map(|f| f.name.as_str()),
            Some("title")
        );
    }

    #[test]
    fn test_open_vocabulary_registration() {
        let mut catalog = sample_catalog();
        assert!(!catalog.register_vocabulary_term("subject", "Astrology"));
        assert!(catalog.register_vocabulary_term("keywordVocabulary", "LCSH"));
        assert!(!catalog.register_vocabulary_term("keywordVocabulary", "LCSH"));
        assert!(catalog
            .vocabulary_values("keywordVocabulary")
            .contains(&"LCSH".to_string()));
    }

    #[test]
    fn test_block_for_schema() {
        let catalog = sample_catalog();
        let block = catalog
            .block_for_schema("https://repo.example.org/schema/citation")
            .unwrap();
        assert_eq!(block.name, "citation");
        assert!(catalog.block_for_schema("https://other.org").is_none());
    }

    #[test]
    fn test_parse_definition() {
        let catalog = InMemoryCatalog::from_json_str(
            r#"{"blocks": [{"name": "geo", "fields": [
                {"name": "country", "kind": "vocabulary", "vocabulary": ["Hungary"]},
                {"name": "area", "kind": "compound", "children": [
                    {"name": "west", "primitive": "FLOAT"}
                ]}
            ]}]}"#,
        )
        .unwrap();
        assert!(catalog.is_controlled_vocabulary("country"));
        assert_eq!(
            catalog.lookup_field("west").map(|f| f.primitive),
            Some(PrimitiveType::Float)
        );
        assert_eq!(catalog.top_level_fields().count(), 2);
    }
}
