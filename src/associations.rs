use crate::error::{ArchiveError, Result};
use crate::models::{FileId, FileTagAssignment, Tag, TagId, TagSummary, UserId};
use crate::storage::ArchiveTables;
use chrono::Utc;
use std::collections::BTreeSet;

impl ArchiveTables {
    /// Assigns one tag. A pair that already exists is a `Conflict`.
    pub fn assign_tag(
        &mut self,
        file_id: FileId,
        tag_id: TagId,
        assigned_by: Option<UserId>,
    ) -> Result<FileTagAssignment> {
        self.file(file_id)?;
        self.tag(tag_id)?;
        if let Some(user_id) = assigned_by {
            self.user(user_id)?;
        }
        if self.pair_index.contains_key(&(file_id, tag_id)) {
            return Err(ArchiveError::conflict(format!(
                "file {} already carries tag {}",
                file_id, tag_id
            )));
        }

        let assignment = FileTagAssignment {
            id: self.next_assignment_id(),
            file_id,
            tag_id,
            assigned_at: Utc::now(),
            assigned_by,
        };
        self.pair_index.insert((file_id, tag_id), assignment.id);
        self.file_tags.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    /// Batch assignment. Ids repeated in the request count once; with
    /// `replace` the file's previous tags are dropped first.
    pub fn assign_tags(
        &mut self,
        file_id: FileId,
        tag_ids: &[TagId],
        assigned_by: Option<UserId>,
        replace: bool,
    ) -> Result<Vec<Tag>> {
        self.file(file_id)?;
        if replace {
            self.remove_assignments_where(|a| a.file_id == file_id);
        }

        let unique: BTreeSet<TagId> = tag_ids.iter().copied().collect();
        for tag_id in unique {
            self.assign_tag(file_id, tag_id, assigned_by)?;
        }
        self.tags_for_file(file_id)
    }

    /// Removing a pair that is not assigned is a no-op.
    pub fn remove_tag(&mut self, file_id: FileId, tag_id: TagId) -> Result<bool> {
        self.file(file_id)?;
        self.tag(tag_id)?;

        match self.pair_index.remove(&(file_id, tag_id)) {
            Some(assignment_id) => {
                self.file_tags.remove(&assignment_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tags of a file, ordered by dimension and then by tag order.
    pub fn tags_for_file(&self, file_id: FileId) -> Result<Vec<Tag>> {
        self.file(file_id)?;

        let mut tags: Vec<Tag> = self
            .file_tags
            .values()
            .filter(|a| a.file_id == file_id)
            .filter_map(|a| self.tags.get(&a.tag_id))
            .cloned()
            .collect();
        tags.sort_by_key(|t| {
            let dimension_order = self.dimensions.get(&t.dimension_id).map(|d| d.display_order);
            (dimension_order, t.dimension_id, t.display_order, t.level, t.id)
        });
        Ok(tags)
    }

    pub fn tag_summaries_for_file(&self, file_id: FileId) -> Result<Vec<TagSummary>> {
        Ok(self
            .tags_for_file(file_id)?
            .into_iter()
            .map(|t| TagSummary {
                dimension_code: self
                    .dimensions
                    .get(&t.dimension_id)
                    .map(|d| d.code.clone())
                    .unwrap_or_default(),
                id: t.id,
                name: t.name,
                dimension_id: t.dimension_id,
            })
            .collect())
    }

    pub fn files_for_tag(&self, tag_id: TagId) -> Result<BTreeSet<FileId>> {
        self.tag(tag_id)?;
        Ok(self
            .file_tags
            .values()
            .filter(|a| a.tag_id == tag_id)
            .map(|a| a.file_id)
            .collect())
    }
}
