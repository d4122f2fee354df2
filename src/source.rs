//! Byte-producing sources for a pass.
//!
//! A source first lists the documents it can provide, then reads them one at
//! a time, so a directory import never holds more than one file in memory.

use async_trait::async_trait;
use globset::GlobSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::ImportConfig;
use crate::error::{IngestError, Result};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable location, used in logs and errors.
    fn describe(&self) -> String;

    /// Lists the documents this source provides, in ingestion order.
    async fn locate(&self) -> Result<Vec<String>>;

    /// Reads one document returned by [`locate`](DocumentSource::locate).
    async fn read(&self, origin: &str) -> Result<Vec<u8>>;
}

/// A single document fetched over HTTP.
pub struct UrlSource {
    url: String,
    timeout: Duration,
}

impl UrlSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DocumentSource for UrlSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn locate(&self) -> Result<Vec<String>> {
        Ok(vec![self.url.clone()])
    }

    async fn read(&self, origin: &str) -> Result<Vec<u8>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| IngestError::unavailable(origin, e))?;

        let response = client
            .get(origin)
            .send()
            .await
            .map_err(|e| IngestError::unavailable(origin, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::unavailable(origin, format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::unavailable(origin, e))?;
        log::debug!("fetched {} bytes from {}", body.len(), origin);
        Ok(body.to_vec())
    }
}

/// A local file, or every matching file below a directory.
pub struct PathSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl PathSource {
    pub fn new(root: impl Into<PathBuf>, import: &ImportConfig) -> anyhow::Result<Self> {
        Ok(Self {
            root: root.into(),
            include: import.include_set()?,
            exclude: import.exclude_set()?,
            follow_symlinks: import.follow_symlinks,
        })
    }

    fn walk(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("skipping unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            if self.exclude.is_match(relative) || !self.include.is_match(relative) {
                continue;
            }
            paths.push(path.to_path_buf());
        }

        // Sort for deterministic ordering
        paths.sort();
        paths
    }
}

#[async_trait]
impl DocumentSource for PathSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn locate(&self) -> Result<Vec<String>> {
        let paths = if self.root.is_file() {
            vec![self.root.clone()]
        } else if self.root.is_dir() {
            self.walk()
        } else {
            Vec::new()
        };
        Ok(paths
            .into_iter()
            .map(|p| p.display().to_string())
            .collect())
    }

    async fn read(&self, origin: &str) -> Result<Vec<u8>> {
        tokio::fs::read(Path::new(origin))
            .await
            .map_err(|e| IngestError::unavailable(origin, e))
    }
}

/// Documents held in memory, keyed by a made-up origin.
#[derive(Default)]
pub struct MemorySource {
    documents: Vec<(String, Vec<u8>)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, origin: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.documents.push((origin.into(), bytes.into()));
        self
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn locate(&self) -> Result<Vec<String>> {
        Ok(self.documents.iter().map(|(o, _)| o.clone()).collect())
    }

    async fn read(&self, origin: &str) -> Result<Vec<u8>> {
        self.documents
            .iter()
            .find(|(o, _)| o == origin)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| IngestError::unavailable(origin, "no such document"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("2020/01")).unwrap();
        fs::create_dir_all(root.join("tmp")).unwrap();
        fs::write(root.join("2020/01/b.xml"), "<b/>").unwrap();
        fs::write(root.join("2020/01/a.xml"), "<a/>").unwrap();
        fs::write(root.join("2020/notes.txt"), "notes").unwrap();
        fs::write(root.join("tmp/partial.xml"), "<p").unwrap();
        tmp
    }

    fn names(origins: &[String], root: &Path) -> Vec<String> {
        origins
            .iter()
            .map(|o| {
                Path::new(o)
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[tokio::test]
    async fn test_directory_walk_is_recursive_and_sorted() {
        let tmp = tree();
        let source = PathSource::new(tmp.path(), &ImportConfig::default()).unwrap();
        let origins = source.locate().await.unwrap();
        assert_eq!(
            names(&origins, tmp.path()),
            vec![
                "2020/01/a.xml",
                "2020/01/b.xml",
                "2020/notes.txt",
                "tmp/partial.xml"
            ]
        );
    }

    #[tokio::test]
    async fn test_globs_filter_the_walk() {
        let tmp = tree();
        let import = ImportConfig {
            include_globs: vec!["**/*.xml".to_string()],
            exclude_globs: vec!["tmp/**".to_string()],
            ..ImportConfig::default()
        };
        let source = PathSource::new(tmp.path(), &import).unwrap();
        let origins = source.locate().await.unwrap();
        assert_eq!(
            names(&origins, tmp.path()),
            vec!["2020/01/a.xml", "2020/01/b.xml"]
        );
    }

    #[tokio::test]
    async fn test_single_file_ignores_globs() {
        let tmp = tree();
        let file = tmp.path().join("2020/notes.txt");
        let import = ImportConfig {
            include_globs: vec!["**/*.xml".to_string()],
            ..ImportConfig::default()
        };
        let source = PathSource::new(&file, &import).unwrap();
        let origins = source.locate().await.unwrap();
        assert_eq!(origins, vec![file.display().to_string()]);
        assert_eq!(source.read(&origins[0]).await.unwrap(), b"notes");
    }

    #[tokio::test]
    async fn test_missing_and_empty_paths_locate_nothing() {
        let tmp = TempDir::new().unwrap();
        let empty = PathSource::new(tmp.path(), &ImportConfig::default()).unwrap();
        assert!(empty.locate().await.unwrap().is_empty());

        let missing =
            PathSource::new(tmp.path().join("nope"), &ImportConfig::default()).unwrap();
        assert!(missing.locate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_source_unavailable() {
        let tmp = TempDir::new().unwrap();
        let source = PathSource::new(tmp.path(), &ImportConfig::default()).unwrap();
        let origin = tmp.path().join("gone.xml").display().to_string();
        assert!(matches!(
            source.read(&origin).await,
            Err(IngestError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_url_is_source_unavailable() {
        let source = UrlSource::new("http://127.0.0.1:9/speedmap.xml", Duration::from_secs(2));
        let origins = source.locate().await.unwrap();
        assert!(matches!(
            source.read(&origins[0]).await,
            Err(IngestError::SourceUnavailable { .. })
        ));
    }
}
