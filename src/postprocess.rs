//! Post-processing of a crate edited in the external editor
//!
//! Runs after the edited field tree was persisted, so every compound row
//! has its numeric id. Entity ids handed out by the editor are replaced by
//! canonical ones, folders that ended up twice under one parent are merged
//! and every data entity is classified as real or virtual.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::FieldTypeCatalog;
use crate::error::ReconciliationWarning;
use crate::graph::{GraphDocument, GraphEntity, PropertyValue};
use crate::id::IdentityScheme;
use crate::tree::{DatasetVersion, FileNode};
use crate::vocab::{
    is_ignored_property, ARP_PID, HASH, HAS_PART, REPOSITORY_DATASET_PROPERTIES,
    REPOSITORY_FILE_PROPERTIES, ROOT_ENTITY_ID,
};

/// Counts kept next to the crate for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessStats {
    pub virtual_dataset_added: usize,
    pub virtual_file_added: usize,
    pub dataset_with_metadata: usize,
    pub file_with_metadata: usize,
}

/// Whether a data entity is backed by the repository's own storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backing {
    Real,
    Virtual,
}

#[derive(Debug)]
pub struct PostProcessOutcome {
    pub document: GraphDocument,
    pub stats: PostProcessStats,
    /// Every data entity reachable from the root, children before parents
    pub classification: IndexMap<String, Backing>,
    pub warnings: Vec<ReconciliationWarning>,
}

impl PostProcessOutcome {
    pub fn is_virtual(&self, id: &str) -> Option<bool> {
        self.classification.get(id).map(|b| *b == Backing::Virtual)
    }
}

/// Normalize a crate that came back from the external editor
pub fn post_process_external_edits(
    document: &GraphDocument,
    version: &DatasetVersion,
    catalog: &dyn FieldTypeCatalog,
    scheme: &IdentityScheme,
) -> PostProcessOutcome {
    let mut document = document.clone();
    let mut warnings = Vec::new();

    drop_missing_root_parts(&mut document);
    canonicalize_compounds(&mut document, version, catalog, scheme, &mut warnings);
    canonicalize_folders(&mut document, &mut warnings);
    let (classification, stats) = classify_data_entities(&mut document, &version.files, scheme, &version.pid);

    for (id, backing) in &classification {
        if *backing == Backing::Virtual {
            warnings.push(ReconciliationWarning::VirtualEntity(id.clone()));
        }
    }
    info!(
        pid = %version.pid,
        virtual_datasets = stats.virtual_dataset_added,
        virtual_files = stats.virtual_file_added,
        datasets_with_metadata = stats.dataset_with_metadata,
        files_with_metadata = stats.file_with_metadata,
        "post-processing finished"
    );
    PostProcessOutcome {
        document,
        stats,
        classification,
        warnings,
    }
}

/// The editor may leave ids of deleted entities in the root's `hasPart`
fn drop_missing_root_parts(document: &mut GraphDocument) {
    let missing: Vec<String> = document
        .root()
        .has_part()
        .into_iter()
        .filter(|id| !document.contains(id))
        .map(str::to_string)
        .collect();
    for id in missing {
        debug!(entity = %id, "dropping dangling root hasPart entry");
        document.root_mut().remove_part(&id);
    }
}

/// Give compound entities the ids of the rows they were persisted as
///
/// The n-th referenced entity carrying a field of the row maps to the n-th
/// row; entities with foreign data only have no row and keep their id.
fn canonicalize_compounds(
    document: &mut GraphDocument,
    version: &DatasetVersion,
    catalog: &dyn FieldTypeCatalog,
    scheme: &IdentityScheme,
    warnings: &mut Vec<ReconciliationWarning>,
) {
    let compound_properties: Vec<(String, Vec<String>)> = document
        .root()
        .properties
        .iter()
        .filter(|(key, _)| !is_ignored_property(key))
        .filter_map(|(key, value)| {
            let field = catalog.resolve_property(key)?;
            (field.is_compound() && field.is_top_level()).then(|| {
                (
                    field.name.clone(),
                    value.reference_ids().into_iter().map(str::to_string).collect(),
                )
            })
        })
        .collect();

    let mut renames = HashMap::new();
    for (field_name, ids) in compound_properties {
        let Some(node) = version.field(&field_name) else {
            continue;
        };
        let rows = node.rows();
        let mut position = 0;
        for id in ids {
            let Some(row) = rows.get(position) else {
                break;
            };
            let Some(entity) = document.get(&id) else {
                continue;
            };
            let row_fields: HashSet<&str> = row
                .children
                .iter()
                .filter(|c| !c.is_empty())
                .map(|c| c.name.as_str())
                .collect();
            let field_backed = entity
                .payload_keys()
                .filter(|k| !is_ignored_property(k))
                .filter_map(|k| catalog.resolve_property(k))
                .any(|f| row_fields.contains(f.name.as_str()));
            if !field_backed {
                debug!(entity = %id, "compound entity with foreign data only keeps its id");
                continue;
            }
            position += 1;
            match row.id {
                Some(row_id) => {
                    let canonical = scheme.id_for_field(&version.pid, &field_name, row_id);
                    if canonical != id {
                        renames.insert(id, canonical);
                    }
                }
                None => warnings.push(ReconciliationWarning::UncanonicalizableEntity(id)),
            }
        }
    }

    let applied = document.rewrite_ids(&renames);
    for old in renames.keys().filter(|old| !applied.contains_key(*old)) {
        warn!(entity = %old, "canonical id already taken, keeping the editor's id");
        warnings.push(ReconciliationWarning::UncanonicalizableEntity(old.clone()));
    }
    debug!(renamed = applied.len(), "compound entities canonicalized");
}

/// Walk folders top-down, renaming each to its canonical id
///
/// A folder whose canonical id is held by another folder is merged into it.
fn canonicalize_folders(document: &mut GraphDocument, warnings: &mut Vec<ReconciliationWarning>) {
    let mut queue = VecDeque::from([ROOT_ENTITY_ID.to_string()]);
    let mut visited = HashSet::new();

    while let Some(parent_id) = queue.pop_front() {
        if !visited.insert(parent_id.clone()) {
            continue;
        }
        let children: Vec<String> = document
            .get(&parent_id)
            .map(|p| p.has_part().into_iter().map(str::to_string).collect())
            .unwrap_or_default();

        for child_id in children {
            let Some(child) = document.get(&child_id) else {
                continue;
            };
            if !child.is_dataset() {
                continue;
            }
            let Some(name) = child.name().map(str::to_string) else {
                queue.push_back(child_id);
                continue;
            };
            let canonical = IdentityScheme::id_for_folder(&parent_id, &name);
            if canonical == child_id {
                queue.push_back(child_id);
                continue;
            }

            if document.get(&canonical).is_some_and(GraphEntity::is_dataset) {
                merge_folder(document, &parent_id, &child_id, &canonical);
                visited.remove(&canonical);
            } else if document.contains(&canonical) {
                warn!(folder = %child_id, %canonical, "canonical folder id taken by a non-folder");
                warnings.push(ReconciliationWarning::UncanonicalizableEntity(child_id.clone()));
                queue.push_back(child_id);
                continue;
            } else {
                let renames = HashMap::from([(child_id.clone(), canonical.clone())]);
                document.rewrite_ids(&renames);
                debug!(from = %child_id, to = %canonical, "folder renamed");
            }
            queue.push_back(canonical);
        }
    }
}

/// Fold folder `from` into folder `into`
///
/// Parts are unioned; on conflicting properties the values of `from` win.
fn merge_folder(document: &mut GraphDocument, parent_id: &str, from: &str, into: &str) {
    let Some(source) = document.remove(from) else {
        return;
    };
    let parts: Vec<String> = source.has_part().into_iter().map(str::to_string).collect();
    if let Some(target) = document.get_mut(into) {
        for (key, value) in source.properties {
            if key != HAS_PART {
                target.set(key, value);
            }
        }
        for part in &parts {
            target.add_part(part);
        }
    }
    if let Some(parent) = document.get_mut(parent_id) {
        if parent.has_part().contains(&into) {
            parent.remove_part(from);
        }
    }
    document.redirect_references(&HashMap::from([(from.to_string(), into.to_string())]));
    debug!(%from, %into, "merged duplicate folders");
}

fn backing_file<'f>(
    entity: &GraphEntity,
    files: &'f [FileNode],
    scheme: &IdentityScheme,
    pid: &str,
) -> Option<&'f FileNode> {
    let hash = entity.text(HASH);
    files
        .iter()
        .find(|f| hash == Some(f.hash.as_str()) || scheme.id_for_file(pid, f.id) == entity.id)
}

fn has_extra_metadata(entity: &GraphEntity, repository_properties: &[&str]) -> bool {
    entity
        .properties
        .keys()
        .any(|k| !repository_properties.contains(&k.as_str()))
}

/// Classify data entities bottom-up and refresh `@arpPid` on real files
///
/// A file is real when a file of the version backs it; a folder is real
/// when at least one of its parts is.
fn classify_data_entities(
    document: &mut GraphDocument,
    files: &[FileNode],
    scheme: &IdentityScheme,
    pid: &str,
) -> (IndexMap<String, Backing>, PostProcessStats) {
    let mut classification: IndexMap<String, Backing> = IndexMap::new();
    let mut stats = PostProcessStats::default();
    let mut file_pids: Vec<(String, String)> = Vec::new();
    let mut expanding = HashSet::new();

    let mut stack: Vec<(String, bool)> = document
        .root()
        .has_part()
        .into_iter()
        .rev()
        .map(|id| (id.to_string(), false))
        .collect();

    while let Some((id, expanded)) = stack.pop() {
        if classification.contains_key(&id) {
            continue;
        }
        let Some(entity) = document.get(&id) else {
            continue;
        };

        if entity.is_file() {
            let backing = match backing_file(entity, files, scheme, pid) {
                Some(file) => {
                    file_pids.push((id.clone(), file.pid.clone().unwrap_or_default()));
                    Backing::Real
                }
                None => {
                    stats.virtual_file_added += 1;
                    Backing::Virtual
                }
            };
            if has_extra_metadata(entity, REPOSITORY_FILE_PROPERTIES) {
                stats.file_with_metadata += 1;
            }
            classification.insert(id, backing);
        } else if entity.is_dataset() {
            if !expanded {
                expanding.insert(id.clone());
                stack.push((id.clone(), true));
                for part in entity.has_part().into_iter().rev() {
                    if !classification.contains_key(part) && !expanding.contains(part) {
                        stack.push((part.to_string(), false));
                    }
                }
                continue;
            }
            let all_virtual = entity
                .has_part()
                .into_iter()
                .all(|part| classification.get(part) != Some(&Backing::Real));
            let backing = if all_virtual {
                stats.virtual_dataset_added += 1;
                Backing::Virtual
            } else {
                Backing::Real
            };
            if has_extra_metadata(entity, REPOSITORY_DATASET_PROPERTIES) {
                stats.dataset_with_metadata += 1;
            }
            classification.insert(id, backing);
        }
    }

    for (id, file_pid) in file_pids {
        if let Some(entity) = document.get_mut(&id) {
            entity.set(ARP_PID, PropertyValue::text(file_pid));
        }
    }
    (classification, stats)
}
