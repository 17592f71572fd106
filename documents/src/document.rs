//! Document model: categories, metadata, parsed documents and indices.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of document, derived from its storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    /// Coding or process guideline.
    Guideline,

    /// Design pattern.
    Pattern,

    /// Architecture decision record.
    Adr,

    /// Anything else.
    Unknown,
}

impl DocumentCategory {
    /// All categories, in display order.
    pub const ALL: [Self; 4] = [Self::Guideline, Self::Pattern, Self::Adr, Self::Unknown];

    /// Derive the category from a path.
    ///
    /// Case-insensitive substring match on the whole path, checked in order
    /// "guidelines", "patterns", "adr". A path such as `docs/quadrants` still
    /// matches "adr"; the match is deliberately naive.
    pub fn from_path(path: &Path) -> Self {
        let path = path.to_string_lossy().to_lowercase();
        if path.contains("guidelines") {
            Self::Guideline
        } else if path.contains("patterns") {
            Self::Pattern
        } else if path.contains("adr") {
            Self::Adr
        } else {
            Self::Unknown
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guideline => "guideline",
            Self::Pattern => "pattern",
            Self::Adr => "adr",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing a parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Title from the first level-1 heading, or the file stem.
    pub title: String,

    /// Category derived from `path`.
    pub category: DocumentCategory,

    /// Path the document was loaded from.
    pub path: PathBuf,

    /// Filesystem modification time.
    pub last_modified: DateTime<Utc>,

    /// Size in bytes.
    pub size: u64,

    /// Hex-encoded SHA-256 of the file bytes.
    pub checksum: String,
}

/// A heading and the headings nested beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Heading level, 1 through 6.
    pub level: u8,

    /// Heading text.
    pub title: String,

    /// Nested sections.
    pub children: Vec<Section>,
}

impl Section {
    /// Create a leaf section.
    pub fn new(level: u8, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            children: Vec::new(),
        }
    }

    /// Build a section tree from a flat heading outline.
    ///
    /// Each heading nests under the closest preceding heading with a
    /// smaller level.
    pub fn build_tree(outline: Vec<(u8, String)>) -> Vec<Section> {
        let mut roots: Vec<Section> = Vec::new();
        let mut stack: Vec<Section> = Vec::new();

        for (level, title) in outline {
            while stack.last().is_some_and(|open| open.level >= level) {
                close_section(&mut stack, &mut roots);
            }
            stack.push(Section::new(level, title));
        }
        while !stack.is_empty() {
            close_section(&mut stack, &mut roots);
        }

        roots
    }
}

fn close_section(stack: &mut Vec<Section>, roots: &mut Vec<Section>) {
    if let Some(section) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(section),
            None => roots.push(section),
        }
    }
}

/// A parsed document.
///
/// Documents are immutable once cached; updates replace them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document metadata.
    pub metadata: DocumentMetadata,

    /// Raw text.
    pub content: String,

    /// Heading tree.
    pub sections: Vec<Section>,
}

impl Document {
    /// Path the document was loaded from.
    pub fn path(&self) -> &Path {
        &self.metadata.path
    }

    /// Document category.
    pub fn category(&self) -> DocumentCategory {
        self.metadata.category
    }

    /// Content checksum.
    pub fn checksum(&self) -> &str {
        &self.metadata.checksum
    }
}

/// Per-category listing of documents, derived from cache state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIndex {
    /// Category this index covers.
    pub category: DocumentCategory,

    /// Document metadata ordered by path.
    pub documents: Vec<DocumentMetadata>,

    /// Number of documents; always equals `documents.len()`.
    pub count: usize,

    /// Per-file errors from the last build.
    pub errors: Vec<String>,

    /// When the index was built.
    pub last_updated: DateTime<Utc>,
}

impl DocumentIndex {
    /// Create an empty index.
    pub fn new(category: DocumentCategory) -> Self {
        Self::from_documents(category, Vec::new(), Vec::new())
    }

    /// Create an index from metadata, sorting it by path.
    pub fn from_documents(
        category: DocumentCategory,
        mut documents: Vec<DocumentMetadata>,
        errors: Vec<String>,
    ) -> Self {
        documents.sort_by(|a, b| a.path.as_path().cmp(b.path.as_path()));
        Self {
            category,
            count: documents.len(),
            documents,
            errors,
            last_updated: Utc::now(),
        }
    }

    /// Whether the index lists `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.documents.iter().any(|doc| doc.path == path)
    }

    /// Whether the index has no documents and no errors.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.errors.is_empty()
    }
}

/// Format a per-file error for an index error list.
pub fn file_error(path: &Path, error: &dyn fmt::Display) -> String {
    format!("{}: {error}", path.display())
}
