//! Document parsing seam.
//!
//! Parsing is a collaborator behind a trait: the engine only needs raw
//! text. The shipped implementation handles plain text and markdown;
//! binary formats belong to out-of-process converters that implement the
//! same trait.

use async_trait::async_trait;
use std::path::Path;

use crate::error::StageError;

/// Turns a document path into raw requirement text.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<String, StageError>;
}

/// Parser for plain-text and markdown documents.
pub struct TextParser;

#[async_trait]
impl DocumentParser for TextParser {
    async fn parse(&self, path: &Path) -> Result<String, StageError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !matches!(extension.as_str(), "txt" | "md" | "text" | "markdown") {
            return Err(StageError::UnsupportedFormat(format!(
                "{} (expected .txt or .md)",
                path.display()
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StageError::CorruptDocument(format!("{}: {}", path.display(), e)))?;

        String::from_utf8(bytes).map_err(|_| {
            StageError::CorruptDocument(format!("{}: not valid UTF-8", path.display()))
        })
    }
}
