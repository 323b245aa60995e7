//! Field tree and file list of a dataset version
//!
//! These are the values the external stores hand to the pipelines and get
//! back from them.

use serde::{Deserialize, Serialize};

use crate::catalog::FieldKind;

/// One metadata field of a version or of a compound row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    #[serde(flatten)]
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum FieldValue {
    Primitive(Vec<String>),
    Vocabulary(Vec<String>),
    Compound(Vec<CompoundRow>),
}

/// A group of child fields with a stable numeric id
///
/// `id` is `None` for a row that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRow {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub children: Vec<FieldNode>,
}

impl FieldNode {
    pub fn primitive<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            value: FieldValue::Primitive(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn vocabulary<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            value: FieldValue::Vocabulary(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn compound(name: &str, rows: Vec<CompoundRow>) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Compound(rows),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self.value {
            FieldValue::Primitive(_) => FieldKind::Primitive,
            FieldValue::Vocabulary(_) => FieldKind::Vocabulary,
            FieldValue::Compound(_) => FieldKind::Compound,
        }
    }

    /// Non-blank literal values of a primitive or vocabulary field
    pub fn texts(&self) -> Vec<String> {
        match &self.value {
            FieldValue::Primitive(values) | FieldValue::Vocabulary(values) => values
                .iter()
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .collect(),
            FieldValue::Compound(_) => Vec::new(),
        }
    }

    /// Rows of a compound field that hold at least one value
    pub fn rows(&self) -> Vec<&CompoundRow> {
        match &self.value {
            FieldValue::Compound(rows) => rows.iter().filter(|r| !r.is_empty()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            FieldValue::Compound(_) => self.rows().is_empty(),
            _ => self.texts().is_empty(),
        }
    }
}

impl CompoundRow {
    pub fn new(id: u64, children: Vec<FieldNode>) -> Self {
        Self {
            id: Some(id),
            children,
        }
    }

    /// A row that has no persisted id yet
    pub fn unsaved(children: Vec<FieldNode>) -> Self {
        Self { id: None, children }
    }

    pub fn child(&self, name: &str) -> Option<&FieldNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.children.iter().all(FieldNode::is_empty)
    }
}

/// A file of the dataset version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: u64,
    pub name: String,
    /// Slash-separated folder path, empty or absent for top-level files
    #[serde(default)]
    pub directory_label: Option<String>,
    pub hash: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Persistent identifier of the file, if one was minted
    #[serde(default)]
    pub pid: Option<String>,
}

impl FileNode {
    pub fn folder_path(&self) -> &str {
        self.directory_label
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .unwrap_or("")
    }
}

/// A dataset version: persistent id, field tree and file list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub pid: String,
    /// Friendly version label ("1.0", "DRAFT")
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub date_published: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldNode>,
    #[serde(default)]
    pub files: Vec<FileNode>,
}

fn default_label() -> String {
    "DRAFT".to_string()
}

impl DatasetVersion {
    pub fn new(pid: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            label: default_label(),
            license: None,
            date_published: None,
            fields: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn file(&self, id: u64) -> Option<&FileNode> {
        self.files.iter().find(|f| f.id == id)
    }
}
