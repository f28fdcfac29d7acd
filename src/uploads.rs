use anyhow::Context;
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::models::UserId;

/// Local directory holding uploaded bytes, one subdirectory per owner.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes `bytes` and returns the locator relative to the upload root.
    pub async fn save(
        &self,
        owner_id: UserId,
        filename: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        let owner_dir = self.root.join(owner_id.to_string());
        fs::create_dir_all(&owner_dir)
            .await
            .with_context(|| format!("Failed to create {}", owner_dir.display()))?;

        let unique = format!(
            "{}_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8],
            filename
        );
        let path = owner_dir.join(&unique);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(format!("{}/{}", owner_id, unique))
    }

    pub async fn remove(&self, locator: &str) {
        let path = self.path_of(locator);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No stored bytes at {}", path.display());
            }
            Err(err) => {
                tracing::warn!("Could not remove stored upload {}: {}", path.display(), err);
            }
        }
    }

    pub fn path_of(&self, locator: &str) -> PathBuf {
        self.root.join(locator)
    }
}

/// Reduces a client-supplied filename to a safe basename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let ascii: String = base.chars().filter(char::is_ascii).collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '.' | '-' | '_'))
        .collect();
    cleaned.trim_matches(|c: char| c == '.' || c == '_').to_string()
}

pub fn extension_allowed(name: &str, allowed: &BTreeSet<String>) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| allowed.contains(&e.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\my trip.jpg"), "my_trip.jpg");
        assert_eq!(sanitize_filename("..hidden.txt"), "hidden.txt");
        assert_eq!(sanitize_filename("报告 2024.pdf"), "2024.pdf");
        assert_eq!(sanitize_filename("  spaced   out  .txt"), "spaced_out_.txt");
        assert_eq!(sanitize_filename("_draft_.txt"), "draft_.txt");
        assert_eq!(sanitize_filename("notes.txt."), "notes.txt");
        assert_eq!(sanitize_filename("///"), "");
    }

    #[test]
    fn extensions_are_checked_case_insensitively() {
        let allowed: BTreeSet<String> = ["jpg".to_string(), "pdf".to_string()].into();
        assert!(extension_allowed("beach.JPG", &allowed));
        assert!(extension_allowed("scan.pdf", &allowed));
        assert!(!extension_allowed("script.sh", &allowed));
        assert!(!extension_allowed("README", &allowed));
    }

    #[tokio::test]
    async fn save_and_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path());

        let locator = store.save(3, "notes.txt", b"hello").await.unwrap();
        assert!(locator.starts_with("3/"));
        assert!(locator.ends_with("_notes.txt"));
        let path = store.path_of(&locator);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        store.remove(&locator).await;
        assert!(!path.exists());
    }
}
