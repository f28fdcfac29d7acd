use crate::error::{ArchiveError, Result};
use crate::models::{ArchivedFile, FileId, FileUpdate, NewFile, TagId, UserId};
use crate::storage::ArchiveTables;
use crate::user_models::{NewUser, User, UserStats};
use chrono::Utc;
use std::collections::HashSet;

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ArchiveError::validation(format!("invalid email address: {}", email))),
    }
}

/// Newest first, ties broken by id so equal timestamps stay stable.
pub(crate) fn newest_first(files: &mut [ArchivedFile]) {
    files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

impl ArchiveTables {
    pub fn create_user(&mut self, new: NewUser) -> Result<User> {
        let email = new.email.trim().to_string();
        if new.name.en.trim().is_empty() {
            return Err(ArchiveError::validation("user name must not be empty"));
        }
        validate_email(&email)?;
        if self.users.values().any(|u| u.email.eq_ignore_ascii_case(&email)) {
            return Err(ArchiveError::conflict(format!("email {} is already registered", email)));
        }

        let user = User {
            id: self.next_user_id(),
            name: new.name,
            email,
            created_at: Utc::now(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.user(id).cloned()
    }

    pub fn list_users(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    /// Deletes a user with all of their files. Assignments the user made on
    /// other files keep existing without an author.
    pub fn delete_user(&mut self, id: UserId) -> Result<Vec<ArchivedFile>> {
        self.user(id)?;

        let owned: Vec<FileId> = self
            .files
            .values()
            .filter(|f| f.owner_id == id)
            .map(|f| f.id)
            .collect();
        let mut removed = Vec::with_capacity(owned.len());
        for file_id in owned {
            removed.push(self.delete_file(file_id)?);
        }

        for assignment in self.file_tags.values_mut() {
            if assignment.assigned_by == Some(id) {
                assignment.assigned_by = None;
            }
        }
        self.users.remove(&id);
        Ok(removed)
    }

    pub fn user_stats(&self, owner_id: UserId) -> Result<UserStats> {
        self.user(owner_id)?;

        let owned: HashSet<FileId> = self
            .files
            .values()
            .filter(|f| f.owner_id == owner_id)
            .map(|f| f.id)
            .collect();
        let total_size = self
            .files
            .values()
            .filter(|f| owned.contains(&f.id))
            .map(|f| f.size_bytes)
            .sum();
        let unique_tags: HashSet<TagId> = self
            .file_tags
            .values()
            .filter(|a| owned.contains(&a.file_id))
            .map(|a| a.tag_id)
            .collect();

        Ok(UserStats {
            total_files: owned.len(),
            total_size,
            unique_tags: unique_tags.len(),
        })
    }

    pub fn create_file(&mut self, owner_id: UserId, new: NewFile) -> Result<ArchivedFile> {
        self.user(owner_id)?;
        if new.name.trim().is_empty() {
            return Err(ArchiveError::validation("file name must not be empty"));
        }

        let file = ArchivedFile {
            id: self.next_file_id(),
            owner_id,
            name: new.name,
            storage_locator: new.storage_locator,
            content_type: new.content_type,
            size_bytes: new.size_bytes,
            description: new.description,
            created_at: Utc::now(),
        };
        self.files.insert(file.id, file.clone());
        Ok(file)
    }

    /// Creates a file together with its initial tags. An unknown tag rejects
    /// the whole upload.
    pub fn create_file_with_tags(
        &mut self,
        owner_id: UserId,
        new: NewFile,
        tag_ids: &[TagId],
        assigned_by: Option<UserId>,
    ) -> Result<ArchivedFile> {
        if let Some(unknown) = tag_ids.iter().find(|id| !self.tags.contains_key(*id)) {
            return Err(ArchiveError::validation(format!("tag {} does not exist", unknown)));
        }

        let file = self.create_file(owner_id, new)?;
        if !tag_ids.is_empty() {
            self.assign_tags(file.id, tag_ids, assigned_by, false)?;
        }
        Ok(file)
    }

    pub fn get_file(&self, id: FileId) -> Result<ArchivedFile> {
        self.file(id).cloned()
    }

    pub fn update_file(&mut self, id: FileId, update: FileUpdate) -> Result<ArchivedFile> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ArchiveError::validation("file name must not be empty"));
        }

        let file = self
            .files
            .get_mut(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("file {}", id)))?;
        if let Some(name) = update.name {
            file.name = name;
        }
        if let Some(description) = update.description {
            file.description = description;
        }
        Ok(file.clone())
    }

    /// Removes a file and every assignment that references it.
    pub fn delete_file(&mut self, id: FileId) -> Result<ArchivedFile> {
        let file = self
            .files
            .remove(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("file {}", id)))?;
        self.remove_assignments_where(|a| a.file_id == id);
        Ok(file)
    }

    pub fn list_files_by_owner(&self, owner_id: UserId) -> Result<Vec<ArchivedFile>> {
        self.user(owner_id)?;

        let mut files: Vec<ArchivedFile> = self
            .files
            .values()
            .filter(|f| f.owner_id == owner_id)
            .cloned()
            .collect();
        newest_first(&mut files);
        Ok(files)
    }
}
