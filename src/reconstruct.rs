//! Field-tree reconstruction from a validated graph document
//!
//! Only meaningful for a document that passed import validation; values
//! that validation would reject are skipped here, not reported.

use tracing::{debug, info};

use crate::catalog::{FieldType, FieldTypeCatalog, PrimitiveType};
use crate::graph::{GraphDocument, GraphEntity, PropertyValue};
use crate::id::IdentityScheme;
use crate::tree::{CompoundRow, FieldNode, FieldValue};
use crate::values::{is_partial_date, timestamp_to_date};
use crate::vocab::{is_ignored_property, ARP_PID};

/// Rebuild the version-level field tree held by `document`
///
/// Compound rows whose entity id carries the numeric id of a row in
/// `prior` keep that id; any other row comes back unsaved (`id: None`).
/// Fields of `prior` come first in their old order, fields new to the
/// tree follow in document order. Fields missing from the document are
/// left out, which clears them.
pub fn reconstruct_field_tree(
    document: &GraphDocument,
    catalog: &dyn FieldTypeCatalog,
    scheme: &IdentityScheme,
    prior: &[FieldNode],
) -> Vec<FieldNode> {
    let builder = TreeBuilder {
        document,
        catalog,
        scheme,
        pid: document.root().text(ARP_PID),
        prior,
    };

    let mut built: Vec<FieldNode> = Vec::new();
    for (key, value) in &document.root().properties {
        if is_ignored_property(key) {
            continue;
        }
        let Some(field) = catalog.resolve_property(key) else {
            continue;
        };
        if !field.is_top_level() || built.iter().any(|f| f.name == field.name) {
            continue;
        }
        let node = builder.field_node(field, value);
        if !node.is_empty() {
            built.push(node);
        }
    }

    let mut fields = Vec::with_capacity(built.len());
    for old in prior {
        if let Some(index) = built.iter().position(|f| f.name == old.name) {
            fields.push(built.remove(index));
        } else {
            debug!(field = %old.name, "field cleared");
        }
    }
    fields.extend(built);

    info!(fields = fields.len(), "field tree reconstructed");
    fields
}

struct TreeBuilder<'a> {
    document: &'a GraphDocument,
    catalog: &'a dyn FieldTypeCatalog,
    scheme: &'a IdentityScheme,
    pid: Option<&'a str>,
    prior: &'a [FieldNode],
}

impl<'a> TreeBuilder<'a> {
    fn field_node(&self, field: &FieldType, value: &PropertyValue) -> FieldNode {
        if field.is_compound() {
            let rows = value
                .reference_ids()
                .into_iter()
                .filter_map(|id| self.document.get(id))
                .filter(|entity| entity.has_type(&field.name) && !entity.is_bare())
                .map(|entity| self.compound_row(field, entity))
                .filter(|row| !row.is_empty())
                .collect();
            return FieldNode::compound(&field.name, rows);
        }

        let values = self.literal_values(field, value);
        if field.is_controlled_vocabulary() {
            FieldNode::vocabulary(&field.name, values)
        } else {
            FieldNode::primitive(&field.name, values)
        }
    }

    fn literal_values(&self, field: &FieldType, value: &PropertyValue) -> Vec<String> {
        let mut values: Vec<String> = value.scalars().into_iter().map(|s| s.lexical()).collect();
        if field.primitive == PrimitiveType::Url {
            values.extend(value.reference_ids().into_iter().map(|id| {
                self.document
                    .get(id)
                    .and_then(GraphEntity::name)
                    .unwrap_or(id)
                    .to_string()
            }));
        }
        if field.primitive == PrimitiveType::Date {
            for date in values.iter_mut() {
                if !is_partial_date(date) {
                    if let Some(normalized) = timestamp_to_date(date) {
                        *date = normalized;
                    }
                }
            }
        }
        values
    }

    fn compound_row(&self, field: &FieldType, entity: &GraphEntity) -> CompoundRow {
        let children = self
            .catalog
            .child_fields(&field.name)
            .into_iter()
            .filter_map(|child| {
                let value = entity.get(&child.name).or_else(|| {
                    self.catalog
                        .term_uri(&child.name)
                        .and_then(|uri| entity.get(&uri))
                })?;
                let node = self.field_node(child, value);
                (!node.is_empty()).then_some(node)
            })
            .collect();
        CompoundRow {
            id: self.prior_row_id(field, &entity.id),
            children,
        }
    }

    /// Numeric id of the prior row an entity id was generated for
    fn prior_row_id(&self, field: &FieldType, entity_id: &str) -> Option<u64> {
        if let Some(pid) = self.pid {
            if !self.scheme.is_field_id(entity_id, pid, &field.name) {
                return None;
            }
        }
        let row_id = IdentityScheme::row_id_from(entity_id)?;
        let known = self
            .prior
            .iter()
            .filter(|f| f.name == field.name)
            .any(|f| match &f.value {
                FieldValue::Compound(rows) => rows.iter().any(|r| r.id == Some(row_id)),
                _ => false,
            });
        known.then_some(row_id)
    }
}
