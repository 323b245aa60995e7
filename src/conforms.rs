//! `conformsTo` bookkeeping on the root entity
//!
//! The root lists the schema identifier of every metadata block that has
//! at least one non-empty field. Entries that no block claims were added by
//! someone else and are kept as they are.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::catalog::{FieldTypeCatalog, MetadataBlock};
use crate::graph::{GraphDocument, GraphEntity, PropertyValue};
use crate::tree::FieldNode;
use crate::vocab::CONFORMS_TO;

/// One `conformsTo` entry, keeping the shape it was written in
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Reference(String),
    Text(String),
}

impl Entry {
    fn id(&self) -> &str {
        match self {
            Entry::Reference(id) | Entry::Text(id) => id,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Entry::Reference(id) => json!({ "@id": id }),
            Entry::Text(id) => Value::String(id.clone()),
        }
    }
}

fn collect_entries(value: &Value, out: &mut Vec<Entry>) {
    match value {
        Value::String(s) => out.push(Entry::Text(s.clone())),
        Value::Object(obj) => {
            if let Some(id) = obj.get("@id").and_then(Value::as_str) {
                out.push(Entry::Reference(id.to_string()));
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_entries(item, out)),
        _ => {}
    }
}

fn entries(entity: &GraphEntity) -> Vec<Entry> {
    let mut out = Vec::new();
    if let Some(value) = entity.get(CONFORMS_TO) {
        collect_entries(&value.to_json(), &mut out);
    }
    out
}

/// Single references collapse, lists of references stay references, and
/// plain strings are written back as strings
fn entries_value(entries: Vec<Entry>) -> Option<PropertyValue> {
    if entries.iter().all(|e| matches!(e, Entry::Reference(_))) {
        return PropertyValue::from_references(entries.iter().map(|e| e.id().to_string()).collect());
    }
    match entries.as_slice() {
        [Entry::Text(id)] => Some(PropertyValue::text(id.clone())),
        _ => Some(PropertyValue::from_json(&Value::Array(
            entries.iter().map(Entry::to_json).collect(),
        ))),
    }
}

/// Ids listed in an entity's `conformsTo`, as references or plain strings
pub fn conforms_to_ids(entity: &GraphEntity) -> Vec<String> {
    entries(entity).iter().map(|e| e.id().to_string()).collect()
}

/// Schema ids of the blocks that have a non-empty field in `fields`
pub fn active_schema_ids(fields: &[FieldNode], catalog: &dyn FieldTypeCatalog) -> Vec<String> {
    let active_blocks: HashSet<&str> = fields
        .iter()
        .filter(|f| !f.is_empty())
        .filter_map(|f| catalog.lookup_field(&f.name))
        .map(|t| t.block.as_str())
        .collect();

    catalog
        .blocks()
        .into_iter()
        .filter(|b| active_blocks.contains(b.name.as_str()))
        .filter_map(|b| b.conforms_to.clone())
        .collect()
}

/// Rewrite the root's `conformsTo` for the given field tree
///
/// Existing entries keep their order; recognized schemas whose block went
/// empty are dropped and newly active ones appended.
pub fn update_conforms_to(
    document: &mut GraphDocument,
    fields: &[FieldNode],
    catalog: &dyn FieldTypeCatalog,
) {
    let active = active_schema_ids(fields, catalog);
    let mut kept: Vec<Entry> = Vec::new();
    for entry in entries(document.root()) {
        let wanted = catalog.block_for_schema(entry.id()).is_none() || active.iter().any(|a| a == entry.id());
        if wanted && !kept.iter().any(|k| k.id() == entry.id()) {
            kept.push(entry);
        }
    }
    for schema in active {
        if !kept.iter().any(|k| k.id() == schema) {
            kept.push(Entry::Reference(schema));
        }
    }

    let root = document.root_mut();
    match entries_value(kept) {
        Some(value) => root.set(CONFORMS_TO, value),
        None => {
            root.remove(CONFORMS_TO);
        }
    }
}

/// Blocks the document declares conformance to
pub fn conformed_blocks<'a>(
    document: &GraphDocument,
    catalog: &'a dyn FieldTypeCatalog,
) -> Vec<&'a MetadataBlock> {
    conforms_to_ids(document.root())
        .iter()
        .filter_map(|id| catalog.block_for_schema(id))
        .collect()
}
