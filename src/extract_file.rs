//! Local file extraction. One file, one unit.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{unavailable, Result};
use crate::extractor::Extract;
use crate::models::{ExtractedUnit, SourceKind, UnitProvenance};

/// Reads a single local text file.
pub struct FileExtractor;

#[async_trait]
impl Extract for FileExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::LocalFile
    }

    async fn extract(&self, origin: &str) -> Result<Vec<ExtractedUnit>> {
        let path = Path::new(origin);
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| unavailable(origin, format!("cannot read: {}", e)))?;
        if meta.is_dir() {
            return Err(unavailable(origin, "is a directory, not a file"));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| unavailable(origin, format!("cannot read: {}", e)))?;
        if bytes.contains(&0) {
            return Err(unavailable(origin, "binary file"));
        }
        let text = String::from_utf8(bytes).map_err(|_| unavailable(origin, "not valid utf-8"))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .unwrap_or_else(|| origin.to_string());

        Ok(vec![ExtractedUnit {
            text,
            title: Some(name.clone()),
            provenance: UnitProvenance::File { path: name },
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::fs;

    #[tokio::test]
    async fn test_reads_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Notes\n\nSome content here.\n").unwrap();

        let units = FileExtractor
            .extract(&path.to_string_lossy())
            .await
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].title.as_deref(), Some("notes.md"));
        assert!(units[0].text.contains("Some content"));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let err = FileExtractor
            .extract("/definitely/not/here.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileExtractor
            .extract(&dir.path().to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_binary_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, b"\x7fELF\x00\x01").unwrap();

        let err = FileExtractor
            .extract(&path.to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_blank_file_yields_no_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        fs::write(&path, "   \n\n").unwrap();

        let units = FileExtractor
            .extract(&path.to_string_lossy())
            .await
            .unwrap();
        assert!(units.is_empty());
    }
}
