use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{LocalizedName, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: LocalizedName,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: LocalizedName,
    pub email: String,
}

impl NewUser {
    pub fn new(name: LocalizedName, email: impl Into<String>) -> Self {
        Self {
            name,
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_files: usize,
    pub total_size: u64,
    pub unique_tags: usize,
}
