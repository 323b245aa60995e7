//! Export and import cycles against the stores
//!
//! Export reads the field tree and file list of a version, applies them to
//! the version's previous crate and saves the result. Import validates an
//! edited crate, persists the field tree rebuilt from it, then normalizes
//! the crate against the persisted rows and saves it. Nothing is written
//! when an import is rejected.

use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::FieldTypeCatalog;
use crate::error::{ReconciliationWarning, SyncError};
use crate::export::{export_to_document, ExportOptions, ExportResult};
use crate::postprocess::{post_process_external_edits, PostProcessOutcome};
use crate::reconstruct::reconstruct_field_tree;
use crate::store::{DocumentStore, FieldTreeStore, FileLister};
use crate::tree::{DatasetVersion, FieldNode};
use crate::validate::validate_for_import;

/// Result of a successful import
#[derive(Debug)]
pub struct ImportOutcome {
    /// Field tree as persisted, with row ids assigned
    pub fields: Vec<FieldNode>,
    /// The normalized crate that was saved, with its classification
    pub post: PostProcessOutcome,
    /// Open-vocabulary terms registered, as (field, value)
    pub new_terms: Vec<(String, String)>,
    pub warnings: Vec<ReconciliationWarning>,
}

/// `base` with its fields and files as currently held by `repo`
fn current_version<R>(repo: &R, base: &DatasetVersion) -> Result<DatasetVersion, SyncError>
where
    R: FieldTreeStore + FileLister + ?Sized,
{
    let mut version = base.clone();
    version.fields = repo.get_fields(&base.label)?;
    version.files = repo.list_files(&base.label)?;
    Ok(version)
}

/// Export a version and save the crate
///
/// `base` names the version (pid, label, license, publication date); its
/// fields and files are read from `repo`.
pub fn export_version<R, D>(
    catalog: &dyn FieldTypeCatalog,
    repo: &R,
    documents: &mut D,
    base: &DatasetVersion,
    options: &ExportOptions,
) -> Result<ExportResult, SyncError>
where
    R: FieldTreeStore + FileLister + ?Sized,
    D: DocumentStore + ?Sized,
{
    let version = current_version(repo, base)?;
    let previous = documents.load(&version.label)?;
    let result = export_to_document(catalog, &version, previous.as_ref(), options)?;
    documents.save(&version.label, &result.document)?;
    for warning in &result.warnings {
        warn!(version = %version.label, "{}", warning);
    }
    Ok(result)
}

/// Import an edited crate into a version
///
/// The stored crate of the version is the reference for the file hash
/// check. On rejection every issue found is returned and no store is
/// touched.
pub fn import_version<R, D>(
    raw: &Value,
    catalog: &mut dyn FieldTypeCatalog,
    repo: &mut R,
    documents: &mut D,
    base: &DatasetVersion,
    options: &ExportOptions,
) -> Result<ImportOutcome, SyncError>
where
    R: FieldTreeStore + FileLister + ?Sized,
    D: DocumentStore + ?Sized,
{
    let label = base.label.as_str();
    let previous = documents.load(label)?;
    let report = validate_for_import(raw, previous.as_ref(), &*catalog);
    let document = match report.document {
        Some(document) if report.errors.is_empty() => document,
        _ => {
            warn!(version = %label, errors = report.errors.len(), "import rejected");
            return Err(SyncError::ImportRejected(report.errors));
        }
    };

    for (field, value) in &report.new_terms {
        if catalog.register_vocabulary_term(field, value) {
            info!(%field, %value, "registered vocabulary term");
        }
    }

    let prior = repo.get_fields(label)?;
    let fields = reconstruct_field_tree(&document, &*catalog, &options.scheme, &prior);
    let fields = repo.set_fields(label, fields)?;

    let mut version = current_version(repo, base)?;
    version.fields = fields.clone();
    let post = post_process_external_edits(&document, &version, &*catalog, &options.scheme);
    documents.save(label, &post.document)?;

    let mut warnings = report.warnings;
    warnings.extend(post.warnings.iter().cloned());
    info!(
        version = %label,
        fields = fields.len(),
        warnings = warnings.len(),
        "import finished"
    );
    Ok(ImportOutcome {
        fields,
        post,
        new_terms: report.new_terms,
        warnings,
    })
}
