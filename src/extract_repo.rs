//! Repository extraction: clone, select documentation files, read them.
//!
//! Remote references are shallow-cloned into a temp directory via the
//! `git` binary; a reference that is already a local directory is read in
//! place. File selection is glob-driven (README, docs, markdown, API
//! definitions by default) with the usual vendored/build directories
//! excluded, then capped and ordered so the most explanatory files
//! survive the cap:
//!
//! | Priority | Files |
//! |----------|-------|
//! | 0 | README at the repository root |
//! | 1 | README anywhere else |
//! | 2 | anything under `docs/` |
//! | 3 | other `.md` / `.mdx` / `.rst` |
//! | 4 | everything else selected |
//!
//! Binary and non-UTF-8 files are skipped even when a glob matches them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::RepositoryConfig;
use crate::error::{unavailable, EngineError, Result};
use crate::extractor::Extract;
use crate::models::{ExtractedUnit, SourceKind, UnitProvenance};

/// Directories never worth indexing, regardless of configuration.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/vendor/**",
    "**/.venv/**",
    "**/dist/**",
    "**/build/**",
];

/// Extracts documentation files from git repositories.
pub struct RepoExtractor {
    config: RepositoryConfig,
}

impl RepoExtractor {
    pub fn new(config: RepositoryConfig) -> Self {
        Self { config }
    }

    /// Read the selected files under a checkout root into units.
    async fn units_from(&self, root: &Path) -> Result<Vec<ExtractedUnit>> {
        let files = select_files(root, &self.config)?;
        let mut units = Vec::with_capacity(files.len());

        for rel in files {
            let abs = root.join(&rel);
            let bytes = match tokio::fs::read(&abs).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %abs.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            // NUL byte means binary, whatever the extension says.
            if bytes.contains(&0) {
                continue;
            }
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }

            let rel_name = rel.to_string_lossy().replace('\\', "/");
            units.push(ExtractedUnit {
                text,
                title: Some(rel_name.clone()),
                provenance: UnitProvenance::File { path: rel_name },
            });
        }

        Ok(units)
    }
}

#[async_trait]
impl Extract for RepoExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Repository
    }

    async fn extract(&self, origin: &str) -> Result<Vec<ExtractedUnit>> {
        let local = Path::new(origin);
        if local.is_dir() {
            return self.units_from(local).await;
        }

        let checkout = tempfile::tempdir()?;
        clone_shallow(origin, checkout.path()).await?;
        self.units_from(checkout.path()).await
    }
}

async fn clone_shallow(origin: &str, dest: &Path) -> Result<()> {
    debug!(%origin, "cloning repository");
    let output = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg("--single-branch")
        .arg(origin)
        .arg(dest)
        .output()
        .await
        .map_err(|e| unavailable(origin, format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().last().unwrap_or("git clone failed");
        return Err(unavailable(origin, format!("clone failed: {}", reason)));
    }
    Ok(())
}

/// Walk the checkout and pick files per the globs, ordered by priority
/// then path, capped at `max_files`.
fn select_files(root: &Path, config: &RepositoryConfig) -> Result<Vec<PathBuf>> {
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;
    let default_exclude = build_globset(DEFAULT_EXCLUDES)?;

    let mut selected: Vec<(u8, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => continue,
        };
        if default_exclude.is_match(&rel) || exclude.is_match(&rel) {
            continue;
        }
        if !include.is_match(&rel) {
            continue;
        }
        match entry.metadata() {
            Ok(m) if m.len() <= config.max_file_bytes => {}
            _ => continue,
        }
        selected.push((priority(&rel), rel));
    }

    selected.sort();
    selected.truncate(config.max_files);
    Ok(selected.into_iter().map(|(_, path)| path).collect())
}

fn build_globset<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.as_ref()).map_err(|e| {
            EngineError::Config(format!("invalid glob '{}': {}", pattern.as_ref(), e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::Config(format!("glob set: {}", e)))
}

fn priority(rel: &Path) -> u8 {
    let name = rel
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let at_root = rel.parent().map(|p| p.as_os_str().is_empty()).unwrap_or(true);

    if name.starts_with("readme") {
        return if at_root { 0 } else { 1 };
    }

    let top = rel
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_ascii_lowercase());
    if matches!(top.as_deref(), Some("docs") | Some("doc")) {
        return 2;
    }

    match rel
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("md") | Some("mdx") | Some("rst") => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_priority_ordering() {
        assert_eq!(priority(Path::new("README.md")), 0);
        assert_eq!(priority(Path::new("readme.rst")), 0);
        assert_eq!(priority(Path::new("crates/core/README.md")), 1);
        assert_eq!(priority(Path::new("docs/setup.md")), 2);
        assert_eq!(priority(Path::new("notes/design.md")), 3);
        assert_eq!(priority(Path::new("schema/api.proto")), 4);
    }

    fn fixture_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("README.md"), "# Project\n").unwrap();
        fs::write(root.join("docs/guide.md"), "# Guide\n").unwrap();
        fs::write(root.join("notes.txt"), "plain notes\n").unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join(".git/config"), "[core]\n").unwrap();
        fs::write(root.join("target/out.md"), "generated\n").unwrap();
        dir
    }

    #[test]
    fn test_select_files_globs_and_order() {
        let repo = fixture_repo();
        let config = RepositoryConfig::default();
        let files = select_files(repo.path(), &config).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["README.md", "docs/guide.md", "notes.txt"]);
    }

    #[test]
    fn test_select_files_respects_caps() {
        let repo = fixture_repo();
        let mut config = RepositoryConfig::default();
        config.max_files = 2;
        let files = select_files(repo.path(), &config).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], Path::new("README.md"));

        let mut tiny = RepositoryConfig::default();
        tiny.max_file_bytes = 8;
        let files = select_files(repo.path(), &tiny).unwrap();
        // Only files at or under 8 bytes survive.
        assert!(files.iter().all(|p| {
            fs::metadata(repo.path().join(p)).unwrap().len() <= 8
        }));
    }

    #[test]
    fn test_select_files_custom_excludes() {
        let repo = fixture_repo();
        let mut config = RepositoryConfig::default();
        config.exclude_globs = vec!["docs/**".to_string()];
        let files = select_files(repo.path(), &config).unwrap();
        assert!(!files.iter().any(|p| p.starts_with("docs")));
    }

    #[tokio::test]
    async fn test_units_skip_binary_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.md"), "real text\n").unwrap();
        fs::write(dir.path().join("bin.md"), b"ab\x00cd").unwrap();
        fs::write(dir.path().join("empty.md"), "  \n").unwrap();

        let extractor = RepoExtractor::new(RepositoryConfig::default());
        let units = extractor.units_from(dir.path()).await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].title.as_deref(), Some("good.md"));
        assert_eq!(units[0].text, "real text\n");
    }

    #[tokio::test]
    async fn test_extract_reads_local_directory_in_place() {
        let repo = fixture_repo();
        let extractor = RepoExtractor::new(RepositoryConfig::default());
        let units = extractor
            .extract(&repo.path().to_string_lossy())
            .await
            .unwrap();
        assert_eq!(units.len(), 3);
        assert!(matches!(
            &units[0].provenance,
            UnitProvenance::File { path } if path == "README.md"
        ));
    }
}
