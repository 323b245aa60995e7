//! Stores the pipelines talk to
//!
//! The pipelines themselves never do I/O. These traits are the seams to
//! whatever persists field trees, file lists and crates; `MemoryStore`
//! backs all three in memory and `FolderDocumentStore` keeps crates on
//! disk. Crates can also be read from a directory, a JSON file or a zip.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use zip::ZipArchive;

use crate::error::SyncError;
use crate::graph::GraphDocument;
use crate::tree::{DatasetVersion, FieldNode, FieldValue, FileNode};
use crate::vocab::METADATA_DESCRIPTOR_ID;

/// Persistence of field trees, keyed by version label
pub trait FieldTreeStore {
    fn get_fields(&self, version: &str) -> Result<Vec<FieldNode>, SyncError>;

    /// Persist `fields`, returning them with row ids assigned
    fn set_fields(&mut self, version: &str, fields: Vec<FieldNode>) -> Result<Vec<FieldNode>, SyncError>;
}

/// Files of a version
pub trait FileLister {
    fn list_files(&self, version: &str) -> Result<Vec<FileNode>, SyncError>;
}

/// Persistence of graph documents
pub trait DocumentStore {
    fn load(&self, version: &str) -> Result<Option<GraphDocument>, SyncError>;

    fn save(&mut self, version: &str, document: &GraphDocument) -> Result<(), SyncError>;
}

fn row_ids(fields: &[FieldNode]) -> impl Iterator<Item = u64> + '_ {
    fields.iter().flat_map(|f| match &f.value {
        FieldValue::Compound(rows) => rows.iter().filter_map(|r| r.id).collect::<Vec<u64>>(),
        _ => Vec::new(),
    })
}

/// Give unsaved compound rows fresh ids, counting up from `next`
pub fn assign_row_ids(fields: &mut [FieldNode], next: &mut u64) {
    for field in fields.iter_mut() {
        if let FieldValue::Compound(rows) = &mut field.value {
            for row in rows.iter_mut().filter(|r| r.id.is_none()) {
                row.id = Some(*next);
                *next += 1;
            }
        }
    }
}

/// In-memory versions and documents
#[derive(Debug, Default)]
pub struct MemoryStore {
    versions: HashMap<String, DatasetVersion>,
    documents: HashMap<String, GraphDocument>,
    next_row_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_row_id: 1,
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: DatasetVersion) -> Self {
        self.insert_version(version);
        self
    }

    pub fn insert_version(&mut self, version: DatasetVersion) {
        let highest = row_ids(&version.fields).max().unwrap_or(0);
        self.next_row_id = self.next_row_id.max(highest + 1);
        self.versions.insert(version.label.clone(), version);
    }

    pub fn version(&self, label: &str) -> Option<&DatasetVersion> {
        self.versions.get(label)
    }

    fn version_or_err(&self, label: &str) -> Result<&DatasetVersion, SyncError> {
        self.versions
            .get(label)
            .ok_or_else(|| SyncError::UnknownVersion(label.to_string()))
    }
}

impl FieldTreeStore for MemoryStore {
    fn get_fields(&self, version: &str) -> Result<Vec<FieldNode>, SyncError> {
        Ok(self.version_or_err(version)?.fields.clone())
    }

    fn set_fields(&mut self, version: &str, mut fields: Vec<FieldNode>) -> Result<Vec<FieldNode>, SyncError> {
        let mut next = self.next_row_id.max(1);
        assign_row_ids(&mut fields, &mut next);
        let entry = self
            .versions
            .get_mut(version)
            .ok_or_else(|| SyncError::UnknownVersion(version.to_string()))?;
        entry.fields = fields.clone();
        self.next_row_id = next;
        Ok(fields)
    }
}

impl FileLister for MemoryStore {
    fn list_files(&self, version: &str) -> Result<Vec<FileNode>, SyncError> {
        Ok(self.version_or_err(version)?.files.clone())
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self, version: &str) -> Result<Option<GraphDocument>, SyncError> {
        Ok(self.documents.get(version).cloned())
    }

    fn save(&mut self, version: &str, document: &GraphDocument) -> Result<(), SyncError> {
        self.documents.insert(version.to_string(), document.clone());
        Ok(())
    }
}

/// Crates kept as `<root>/<version>/ro-crate-metadata.json`
#[derive(Debug, Clone)]
pub struct FolderDocumentStore {
    root: PathBuf,
}

impl FolderDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn version_dir(&self, version: &str) -> Result<PathBuf, SyncError> {
        if version.is_empty() || version.contains(|c: char| c == '/' || c == '\\') || version == ".." {
            return Err(SyncError::InvalidPath(PathBuf::from(version)));
        }
        Ok(self.root.join(version))
    }
}

impl DocumentStore for FolderDocumentStore {
    fn load(&self, version: &str) -> Result<Option<GraphDocument>, SyncError> {
        let path = self.version_dir(version)?.join(METADATA_DESCRIPTOR_ID);
        if !path.exists() {
            return Ok(None);
        }
        read_document(&path).map(Some)
    }

    fn save(&mut self, version: &str, document: &GraphDocument) -> Result<(), SyncError> {
        let dir = self.version_dir(version)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(METADATA_DESCRIPTOR_ID);
        fs::write(&path, document.to_json_string(true)?)?;
        debug!(path = %path.display(), "saved crate");
        Ok(())
    }
}

/// Find ro-crate-metadata.json (or a `*-ro-crate-metadata.json`) in a directory
pub fn find_metadata_file(dir: &Path) -> Result<PathBuf, SyncError> {
    let standard = dir.join(METADATA_DESCRIPTOR_ID);
    if standard.exists() {
        return Ok(standard);
    }

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with("-ro-crate-metadata.json") {
                    return Ok(entry.path());
                }
            }
        }
    }

    Err(SyncError::MissingMetadataFile(dir.to_path_buf()))
}

/// Locate the top-level metadata file of a zipped crate
///
/// Accepts the file at the archive root, or directly inside a single
/// top-level folder (an archive made by zipping the crate folder).
fn find_root_metadata_in_zip<R: Read + Seek>(archive: &ZipArchive<R>) -> Option<String> {
    let entries: Vec<String> = archive.file_names().map(str::to_string).collect();

    if let Some(entry) = entries
        .iter()
        .find(|e| !e.contains('/') && e.ends_with(METADATA_DESCRIPTOR_ID))
    {
        return Some(entry.clone());
    }

    let top_level: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.split('/').next())
        .filter(|s| !s.is_empty())
        .collect();
    if top_level.len() != 1 {
        return None;
    }
    let prefix = format!("{}/", top_level.into_iter().next()?);
    entries
        .iter()
        .find(|e| {
            e.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.contains('/') && rest.ends_with(METADATA_DESCRIPTOR_ID))
        })
        .cloned()
}

fn read_zip(path: &Path) -> Result<String, SyncError> {
    let load_error = |reason: String| SyncError::LoadError {
        path: path.display().to_string(),
        reason,
    };
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    let entry_name = find_root_metadata_in_zip(&archive)
        .ok_or_else(|| load_error("no root ro-crate-metadata.json in archive".to_string()))?;

    let mut entry = archive.by_name(&entry_name)?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| load_error(format!("failed to read {}: {}", entry_name, e)))?;
    Ok(content)
}

/// Raw crate JSON from a directory, a metadata file or a zip archive
pub fn read_crate_json(path: &Path) -> Result<Value, SyncError> {
    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

    let (content, source) = if path.is_dir() {
        let metadata_path = find_metadata_file(path)?;
        (fs::read_to_string(&metadata_path)?, metadata_path)
    } else if path.is_file() && is_zip {
        (read_zip(path)?, path.to_path_buf())
    } else if path.is_file() {
        (fs::read_to_string(path)?, path.to_path_buf())
    } else {
        return Err(SyncError::InvalidPath(path.to_path_buf()));
    };

    serde_json::from_str(&content).map_err(|e| SyncError::LoadError {
        path: source.display().to_string(),
        reason: format!("invalid JSON: {}", e),
    })
}

pub fn read_document(path: &Path) -> Result<GraphDocument, SyncError> {
    GraphDocument::from_json(&read_crate_json(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{author, sample_version};
    use crate::tree::CompoundRow;
    use crate::vocab::ROCRATE_CONTEXT;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const CRATE: &str = r#"{
        "@context": "https://w3id.org/ro/crate/1.1/context",
        "@graph": [
            {"@id": "ro-crate-metadata.json", "@type": "CreativeWork", "about": {"@id": "./"}},
            {"@id": "./", "@type": "Dataset", "name": "zipped"}
        ]
    }"#;

    #[test]
    fn test_row_ids_assigned_on_save() {
        let mut store = MemoryStore::new().with_version(sample_version());
        let fields = vec![FieldNode::compound(
            "author",
            vec![author(1, "Doe, Jane", "KIT"), CompoundRow::unsaved(vec![FieldNode::primitive("authorName", ["New"])])],
        )];
        let saved = store.set_fields("DRAFT", fields).unwrap();
        let FieldValue::Compound(rows) = &saved[0].value else {
            panic!("author is not compound");
        };
        assert_eq!(rows[0].id, Some(1));
        assert_eq!(rows[1].id, Some(3));
        assert_eq!(store.get_fields("DRAFT").unwrap(), saved);
        assert!(matches!(store.get_fields("1.0"), Err(SyncError::UnknownVersion(_))));
    }

    #[test]
    fn test_folder_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = FolderDocumentStore::new(dir.path());
        assert!(store.load("DRAFT").unwrap().is_none());

        let document = GraphDocument::new(ROCRATE_CONTEXT);
        store.save("DRAFT", &document).unwrap();
        assert!(dir.path().join("DRAFT").join(METADATA_DESCRIPTOR_ID).exists());
        assert_eq!(store.load("DRAFT").unwrap(), Some(document));
        assert!(matches!(
            store.save("../x", &GraphDocument::new(ROCRATE_CONTEXT)),
            Err(SyncError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_read_prefixed_metadata_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("v1-ro-crate-metadata.json"), CRATE).unwrap();
        let document = read_document(dir.path()).unwrap();
        assert_eq!(document.root().name(), Some("zipped"));

        let empty = TempDir::new().unwrap();
        assert!(matches!(
            read_document(empty.path()),
            Err(SyncError::MissingMetadataFile(_))
        ));
    }

    #[test]
    fn test_read_from_zip_with_top_level_folder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crate.zip");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("crate/ro-crate-metadata.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(CRATE.as_bytes()).unwrap();
        writer
            .start_file("crate/data/nested/ro-crate-metadata.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"{}").unwrap();
        writer.finish().unwrap();

        let document = read_document(&path).unwrap();
        assert_eq!(document.root().name(), Some("zipped"));
    }
}
