//! Folder/file reconciliation
//!
//! Keeps every real file entity under exactly one chain of Dataset
//! entities that mirrors the file's directory label. File entities without
//! `@arpPid` were added in the external editor; they are never moved or
//! removed here.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::ReconciliationWarning;
use crate::graph::{GraphDocument, GraphEntity, PropertyValue};
use crate::id::IdentityScheme;
use crate::tree::FileNode;
use crate::vocab::{
    ARP_PID, CONTENT_SIZE, CONFORMS_TO, DATASET_TYPE, DESCRIPTION, DIRECTORY_LABEL,
    ENCODING_FORMAT, FILE_TYPE, HASH, NAME, REPOSITORY_DATASET_PROPERTIES, ROOT_ENTITY_ID, TAGS,
};

/// Whether a File entity is backed by a repository file
pub fn is_real_file(entity: &GraphEntity) -> bool {
    entity.is_file() && entity.contains(ARP_PID)
}

/// Find the folder named `name` directly under `parent_id`
///
/// Matches on the folder's canonical id or on its `name`, so folders
/// created in the external editor under a different id are reused.
pub fn find_child_folder(document: &GraphDocument, parent_id: &str, name: &str) -> Option<String> {
    let canonical = IdentityScheme::id_for_folder(parent_id, name);
    let parent = document.get(parent_id)?;
    let mut by_name = None;
    for child_id in parent.has_part() {
        let Some(child) = document.get(child_id) else {
            continue;
        };
        if !child.is_dataset() {
            continue;
        }
        if child.id == canonical {
            return Some(child.id.clone());
        }
        if by_name.is_none() && child.name() == Some(name) {
            by_name = Some(child.id.clone());
        }
    }
    by_name
}

/// Resolve (creating where missing) the folder chain for `path`
///
/// Returns the id of the innermost folder, or the root for an empty path.
pub fn ensure_folder_chain(document: &mut GraphDocument, path: &str) -> String {
    let mut parent = ROOT_ENTITY_ID.to_string();
    for segment in path.split('/').filter(|s| !s.trim().is_empty()) {
        let folder_id = match find_child_folder(document, &parent, segment) {
            Some(existing) => existing,
            None => {
                let id = IdentityScheme::id_for_folder(&parent, segment);
                if !document.contains(&id) {
                    let mut folder = GraphEntity::new(id.clone(), DATASET_TYPE);
                    folder.set(NAME, PropertyValue::text(segment));
                    document.insert(folder);
                    debug!(folder = %id, "created folder entity");
                }
                if let Some(parent_entity) = document.get_mut(&parent) {
                    parent_entity.add_part(&id);
                }
                id
            }
        };
        parent = folder_id;
    }
    parent
}

/// Remove partless folders from `folder_id` upwards
///
/// A partless folder carrying foreign properties is kept and reported.
pub fn prune_empty_folders(
    document: &mut GraphDocument,
    folder_id: &str,
    warnings: &mut Vec<ReconciliationWarning>,
) {
    let mut current = folder_id.to_string();
    while current != ROOT_ENTITY_ID {
        let Some(folder) = document.get(&current) else {
            break;
        };
        if !folder.is_dataset() || !folder.has_part().is_empty() {
            break;
        }
        if folder
            .properties
            .keys()
            .any(|k| !REPOSITORY_DATASET_PROPERTIES.contains(&k.as_str()))
        {
            warn!(folder = %current, "empty folder carries foreign properties, keeping it");
            warnings.push(ReconciliationWarning::ForeignEntityKept(current.clone()));
            break;
        }
        let parent = document
            .parent_map()
            .get(&current)
            .cloned()
            .unwrap_or_else(|| ROOT_ENTITY_ID.to_string());
        document.remove(&current);
        document.detach(&current);
        debug!(folder = %current, "removed empty folder entity");
        current = parent;
    }
}

/// Remove an entity together with the contextual entities only it referenced
pub fn remove_with_orphans(document: &mut GraphDocument, id: &str) {
    let Some(entity) = document.remove(id) else {
        return;
    };
    document.detach(id);
    let mut pending: Vec<String> = entity
        .properties
        .iter()
        .filter(|(k, _)| k.as_str() != CONFORMS_TO)
        .flat_map(|(_, v)| v.referenced_ids())
        .collect();
    let mut seen = HashSet::new();
    while let Some(candidate) = pending.pop() {
        if !seen.insert(candidate.clone()) {
            continue;
        }
        let orphaned = document
            .get(&candidate)
            .is_some_and(|e| !e.is_data_entity() && candidate != ROOT_ENTITY_ID)
            && document.referrers_of(&candidate).is_empty();
        if orphaned {
            if let Some(removed) = document.remove(&candidate) {
                pending.extend(removed.referenced_ids());
            }
        }
    }
}

fn set_optional(entity: &mut GraphEntity, key: &str, value: Option<&str>) {
    match value {
        Some(v) if !v.is_empty() => entity.set(key, PropertyValue::text(v)),
        _ => {
            entity.remove(key);
        }
    }
}

/// Refresh a known file entity; its `hash` stays as first written
fn write_file_properties(entity: &mut GraphEntity, file: &FileNode) {
    entity.set(ARP_PID, PropertyValue::text(file.pid.clone().unwrap_or_default()));
    entity.set(NAME, PropertyValue::text(file.name.clone()));
    entity.set(CONTENT_SIZE, PropertyValue::text(file.size.to_string()));
    set_optional(entity, ENCODING_FORMAT, file.content_type.as_deref());
    set_optional(entity, DESCRIPTION, file.description.as_deref());
    let label = file.folder_path();
    set_optional(entity, DIRECTORY_LABEL, Some(label));
    match PropertyValue::from_texts(file.tags.clone()) {
        Some(tags) => entity.set(TAGS, tags),
        None => {
            entity.remove(TAGS);
        }
    }
}

fn new_file_entity(id: &str, file: &FileNode) -> GraphEntity {
    let mut entity = GraphEntity::new(id, FILE_TYPE);
    entity.set(ARP_PID, PropertyValue::text(file.pid.clone().unwrap_or_default()));
    entity.set(HASH, PropertyValue::text(file.hash.clone()));
    entity.set(NAME, PropertyValue::text(file.name.clone()));
    entity.set(CONTENT_SIZE, PropertyValue::text(file.size.to_string()));
    set_optional(&mut entity, ENCODING_FORMAT, file.content_type.as_deref());
    set_optional(&mut entity, DESCRIPTION, file.description.as_deref());
    set_optional(&mut entity, DIRECTORY_LABEL, Some(file.folder_path()));
    if let Some(tags) = PropertyValue::from_texts(file.tags.clone()) {
        entity.set(TAGS, tags);
    }
    entity
}

/// Bring the file/folder entities of `document` in line with `files`
pub fn reconcile_files(
    document: &mut GraphDocument,
    files: &[FileNode],
    scheme: &IdentityScheme,
    pid: &str,
) -> Vec<ReconciliationWarning> {
    let mut warnings = Vec::new();
    let current: HashMap<String, &FileNode> = files
        .iter()
        .map(|f| (scheme.id_for_file(pid, f.id), f))
        .collect();

    let removed: Vec<String> = document
        .entities()
        .filter(|e| is_real_file(e) && !current.contains_key(&e.id))
        .map(|e| e.id.clone())
        .collect();
    for id in removed {
        let parent = document.parent_map().get(&id).cloned();
        remove_with_orphans(document, &id);
        debug!(file = %id, "removed file entity");
        if let Some(parent) = parent {
            prune_empty_folders(document, &parent, &mut warnings);
        }
    }

    for file in files {
        let id = scheme.id_for_file(pid, file.id);
        let old_parent = document.parent_map().get(&id).cloned();
        match document.get_mut(&id) {
            Some(entity) => write_file_properties(entity, file),
            None => {
                document.insert(new_file_entity(&id, file));
                debug!(file = %id, "added file entity");
            }
        }

        let new_parent = ensure_folder_chain(document, file.folder_path());
        if old_parent.as_deref() == Some(new_parent.as_str()) {
            continue;
        }
        if let Some(parent) = document.get_mut(&new_parent) {
            parent.add_part(&id);
        }
        if let Some(old_parent) = old_parent {
            if let Some(parent) = document.get_mut(&old_parent) {
                parent.remove_part(&id);
            }
            debug!(file = %id, from = %old_parent, to = %new_parent, "moved file entity");
            prune_empty_folders(document, &old_parent, &mut warnings);
        }
    }
    warnings
}
