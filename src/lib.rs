//! RO-Crate Synchronization Library
//!
//! This library keeps two representations of a dataset version's metadata
//! in step: a typed field tree (primitive, controlled-vocabulary and
//! compound fields, plus the version's files) and an RO-Crate graph that an
//! external metadata editor may change freely.
//!
//! # Overview
//!
//! - **Export** writes the field tree and file list into a crate. The
//!   previous crate of the version is updated in place so entity ids stay
//!   stable and data added by the editor survives.
//! - **Import** checks an edited crate against the field-type catalog. The
//!   pre-check and the validation collect every problem found; only a
//!   crate without problems is turned back into a field tree.
//! - **Post-processing** gives entities created in the editor their
//!   canonical ids, merges folders that ended up twice under one parent and
//!   tells real files and folders from virtual (metadata-only) ones.
//!
//! The pipelines do no I/O. The [`store`] module defines the stores they
//! read from and write to, and [`sync`] runs whole export and import
//! cycles against them.
//!
//! # Identity
//!
//! Metadata entities get ids of the form
//! `{base}/{datasetPid}/{field}/{rowId}`, file entities use the role
//! `file` with the file id, and folder entities are named after their path
//! (`raw/2021/`). See [`id::IdentityScheme`].
//!
//! # Usage
//!
//! ## Export a version
//!
//! ```ignore
//! use rocrate_sync::{export_to_document, ExportOptions, InMemoryCatalog};
//!
//! let catalog = InMemoryCatalog::from_path(Path::new("blocks.json"))?;
//! let version: DatasetVersion = // load the version
//! let result = export_to_document(&catalog, &version, previous.as_ref(), &ExportOptions::default())?;
//!
//! println!("{}", result.document.to_json_string(true)?);
//! ```
//!
//! ## Import an edited crate
//!
//! ```ignore
//! use rocrate_sync::{import_version, ExportOptions, MemoryStore, SyncError};
//!
//! let mut repo = MemoryStore::new().with_version(version.clone());
//! let mut documents = MemoryStore::new();
//! match import_version(&raw, &mut catalog, &mut repo, &mut documents, &version, &ExportOptions::default()) {
//!     Ok(outcome) => println!("{} fields", outcome.fields.len()),
//!     Err(SyncError::ImportRejected(issues)) => {
//!         for issue in issues {
//!             eprintln!("{}", issue);
//!         }
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod conforms;
pub mod error;
pub mod export;
pub mod folders;
pub mod graph;
pub mod id;
pub mod logging;
pub mod postprocess;
pub mod precheck;
pub mod reconstruct;
pub mod store;
pub mod sync;
pub mod tree;
pub mod validate;
pub mod values;
pub mod vocab;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use crate::catalog::{FieldKind, FieldType, FieldTypeCatalog, InMemoryCatalog, MetadataBlock, PrimitiveType};
pub use crate::config::SyncConfig;
pub use crate::error::{ImportIssue, IssueKind, ReconciliationWarning, SyncError};
pub use crate::export::{export_to_document, ExportOptions, ExportResult};
pub use crate::graph::{Context, GraphDocument, GraphEntity, PropertyValue, Scalar};
pub use crate::id::IdentityScheme;
pub use crate::postprocess::{post_process_external_edits, Backing, PostProcessOutcome, PostProcessStats};
pub use crate::reconstruct::reconstruct_field_tree;
pub use crate::store::{
    read_crate_json, read_document, DocumentStore, FieldTreeStore, FileLister, FolderDocumentStore,
    MemoryStore,
};
pub use crate::sync::{export_version, import_version, ImportOutcome};
pub use crate::tree::{CompoundRow, DatasetVersion, FieldNode, FieldValue, FileNode};
pub use crate::validate::{validate_for_import, ImportReport};
