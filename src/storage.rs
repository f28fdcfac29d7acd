use crate::error::{ArchiveError, Result};
use crate::models::{
    ArchivedFile, AssignmentId, Dimension, DimensionId, FileId, FileTagAssignment, Tag, TagId,
    UserId,
};
use crate::user_models::User;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sequences {
    user: u64,
    dimension: u64,
    tag: u64,
    file: u64,
    assignment: u64,
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

/// Every table of the archive. Operations on it live next to the component
/// that owns them (tag store, file store, association index).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveTables {
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) dimensions: BTreeMap<DimensionId, Dimension>,
    pub(crate) tags: BTreeMap<TagId, Tag>,
    pub(crate) files: BTreeMap<FileId, ArchivedFile>,
    pub(crate) file_tags: BTreeMap<AssignmentId, FileTagAssignment>,
    #[serde(default)]
    sequences: Sequences,
    #[serde(skip)]
    pub(crate) pair_index: HashMap<(FileId, TagId), AssignmentId>,
}

impl ArchiveTables {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.dimensions.is_empty() && self.files.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn next_user_id(&mut self) -> UserId {
        bump(&mut self.sequences.user)
    }

    pub(crate) fn next_dimension_id(&mut self) -> DimensionId {
        bump(&mut self.sequences.dimension)
    }

    pub(crate) fn next_tag_id(&mut self) -> TagId {
        bump(&mut self.sequences.tag)
    }

    pub(crate) fn next_file_id(&mut self) -> FileId {
        bump(&mut self.sequences.file)
    }

    pub(crate) fn next_assignment_id(&mut self) -> AssignmentId {
        bump(&mut self.sequences.assignment)
    }

    /// Rebuilds the `(file, tag)` index after loading a snapshot. Sequences
    /// never trail the highest stored id, even when the snapshot lacks them.
    fn reindex(&mut self) {
        self.pair_index = self
            .file_tags
            .values()
            .map(|a| ((a.file_id, a.tag_id), a.id))
            .collect();

        let max_key = |last: Option<&u64>| last.copied().unwrap_or(0);
        let seq = &mut self.sequences;
        seq.user = seq.user.max(max_key(self.users.keys().next_back()));
        seq.dimension = seq.dimension.max(max_key(self.dimensions.keys().next_back()));
        seq.tag = seq.tag.max(max_key(self.tags.keys().next_back()));
        seq.file = seq.file.max(max_key(self.files.keys().next_back()));
        seq.assignment = seq.assignment.max(max_key(self.file_tags.keys().next_back()));
    }

    /// Drops every assignment matching `predicate`, keeping the index in sync.
    pub(crate) fn remove_assignments_where(
        &mut self,
        predicate: impl Fn(&FileTagAssignment) -> bool,
    ) -> usize {
        let doomed: Vec<AssignmentId> = self
            .file_tags
            .values()
            .filter(|a| predicate(a))
            .map(|a| a.id)
            .collect();

        for id in &doomed {
            if let Some(a) = self.file_tags.remove(id) {
                self.pair_index.remove(&(a.file_id, a.tag_id));
            }
        }
        doomed.len()
    }

    pub(crate) fn dimension(&self, id: DimensionId) -> Result<&Dimension> {
        self.dimensions
            .get(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("dimension {}", id)))
    }

    pub(crate) fn dimension_by_code(&self, code: &str) -> Option<&Dimension> {
        self.dimensions
            .values()
            .find(|d| d.code.eq_ignore_ascii_case(code))
    }

    pub(crate) fn tag(&self, id: TagId) -> Result<&Tag> {
        self.tags
            .get(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("tag {}", id)))
    }

    pub(crate) fn file(&self, id: FileId) -> Result<&ArchivedFile> {
        self.files
            .get(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("file {}", id)))
    }

    pub(crate) fn user(&self, id: UserId) -> Result<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("user {}", id)))
    }
}

/// The single backing store. Reads share the lock; each mutation is one
/// transaction that either commits completely or leaves the tables untouched.
pub struct ArchiveStorage {
    tables: RwLock<ArchiveTables>,
    data_file: Option<PathBuf>,
}

impl ArchiveStorage {
    /// Opens (or starts) a store persisted to `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read archive file {}", path.display()))?;
            let mut tables: ArchiveTables = serde_json::from_str(&data)
                .with_context(|| format!("Failed to parse archive file {}", path.display()))?;
            tables.reindex();
            tables
        } else {
            ArchiveTables::default()
        };

        Ok(Self {
            tables: RwLock::new(tables),
            data_file: Some(path),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::from_tables(ArchiveTables::default())
    }

    pub fn from_tables(mut tables: ArchiveTables) -> Self {
        tables.reindex();
        Self {
            tables: RwLock::new(tables),
            data_file: None,
        }
    }

    pub async fn read<T>(&self, f: impl FnOnce(&ArchiveTables) -> T) -> T {
        let tables = self.tables.read().await;
        f(&tables)
    }

    /// Applies `f` to a copy of the tables, persists the copy, then swaps it in.
    pub async fn transact<T>(
        &self,
        f: impl FnOnce(&mut ArchiveTables) -> Result<T>,
    ) -> Result<T> {
        let mut tables = self.tables.write().await;
        let mut draft = tables.clone();
        let out = f(&mut draft)?;

        if let Some(path) = &self.data_file {
            save_to_disk(path, &draft).await?;
        }

        *tables = draft;
        Ok(out)
    }
}

async fn save_to_disk(path: &Path, tables: &ArchiveTables) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(tables).context("Failed to serialize archive")?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write archive file {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace archive file {}", path.display()))?;
    Ok(())
}
