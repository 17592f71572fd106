//! Markdown file parsing.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::document::{Document, DocumentCategory, DocumentMetadata, Section};
use crate::error::{DocumentError, Result};

/// Heading, list item, bold text or code span.
static MARKDOWN_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?m)^ {0,3}#{1,6}\s+\S|^\s*[-*+]\s+\S|^\s*\d+[.)]\s+\S|\*\*[^*\n]+\*\*|`[^`\n]+`")
        .ok()
});

/// Minimum share of printable characters for plain text.
const PRINTABLE_RATIO: f64 = 0.9;

/// Read and parse a markdown file.
///
/// Rejects empty files, binary files and content that is neither markdown
/// nor mostly printable text.
pub async fn parse_markdown_file(path: &Path) -> Result<Document> {
    let bytes = fs::read(path)
        .await
        .map_err(|err| DocumentError::from_io(path, err))?;
    let metadata = fs::metadata(path)
        .await
        .map_err(|err| DocumentError::from_io(path, err))?;

    let checksum = checksum(&bytes);
    let content = decode(path, bytes)?;
    let outline = heading_outline(&content);
    let title = title_from_outline(&outline).unwrap_or_else(|| file_stem(path));

    let last_modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    debug!("Parsed {} ({} bytes)", path.display(), metadata.len());

    Ok(Document {
        metadata: DocumentMetadata {
            title,
            category: DocumentCategory::from_path(path),
            path: path.to_path_buf(),
            last_modified,
            size: metadata.len(),
            checksum,
        },
        content,
        sections: Section::build_tree(outline),
    })
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Whether `content` looks like markdown or plain text.
///
/// Any NUL byte rejects the content. Otherwise it is accepted when a common
/// markdown construct appears, or when at least 90% of its characters are
/// printable or whitespace.
pub fn looks_like_text(content: &str) -> bool {
    if content.contains('\0') {
        return false;
    }
    if MARKDOWN_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(content))
    {
        return true;
    }

    let mut total = 0usize;
    let mut printable = 0usize;
    for c in content.chars() {
        total += 1;
        if !c.is_control() || c.is_whitespace() {
            printable += 1;
        }
    }
    total > 0 && printable as f64 / total as f64 >= PRINTABLE_RATIO
}

/// Validate raw bytes and decode them as UTF-8 text.
fn decode(path: &Path, bytes: Vec<u8>) -> Result<String> {
    let display = path.display().to_string();

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DocumentError::EmptyContent(display));
    }
    if bytes.contains(&0) {
        return Err(DocumentError::Malformed {
            path: display,
            reason: "binary content (NUL byte)".to_string(),
        });
    }

    let content = String::from_utf8(bytes).map_err(|_| DocumentError::Encoding(display.clone()))?;
    if !looks_like_text(&content) {
        return Err(DocumentError::Malformed {
            path: display,
            reason: "content is neither markdown nor text".to_string(),
        });
    }
    Ok(content)
}

/// Collect `(level, text)` for every heading, in document order.
fn heading_outline(content: &str) -> Vec<(u8, String)> {
    let mut outline = Vec::new();
    let mut current: Option<(u8, String)> = None;

    for event in Parser::new(content) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some((level as u8, String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, text)) = current.take() {
                    outline.push((level, text.trim().to_string()));
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, heading)) = current.as_mut() {
                    heading.push_str(&text);
                }
            }
            _ => {}
        }
    }

    outline
}

fn title_from_outline(outline: &[(u8, String)]) -> Option<String> {
    outline
        .iter()
        .find(|(level, text)| *level == 1 && !text.is_empty())
        .map(|(_, text)| text.clone())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
