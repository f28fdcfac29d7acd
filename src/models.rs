use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DimensionId = u64;
pub type TagId = u64;
pub type FileId = u64;
pub type AssignmentId = u64;
pub type UserId = u64;

/// Bilingual display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedName {
    pub en: String,
    #[serde(default)]
    pub zh: String,
}

impl LocalizedName {
    pub fn new(en: impl Into<String>, zh: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            zh: zh.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub id: DimensionId,
    pub code: String,
    pub name: LocalizedName,
    pub display_order: i32,
    pub icon_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub dimension_id: DimensionId,
    pub name: LocalizedName,
    pub parent_id: Option<TagId>,
    pub level: u32,
    pub display_order: i32,
    pub icon_url: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedFile {
    pub id: FileId,
    pub owner_id: UserId,
    pub name: String,
    pub storage_locator: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTagAssignment {
    pub id: AssignmentId,
    pub file_id: FileId,
    pub tag_id: TagId,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDimension {
    pub code: String,
    pub name: LocalizedName,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub icon_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTag {
    pub dimension_id: DimensionId,
    pub name: LocalizedName,
    #[serde(default)]
    pub parent_id: Option<TagId>,
    /// Derived from the parent when omitted.
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewTag {
    pub fn root(dimension_id: DimensionId, name: LocalizedName, display_order: i32) -> Self {
        Self {
            dimension_id,
            name,
            parent_id: None,
            level: None,
            display_order,
            icon_url: None,
            is_active: true,
        }
    }

    pub fn child(
        dimension_id: DimensionId,
        parent_id: TagId,
        name: LocalizedName,
        display_order: i32,
    ) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::root(dimension_id, name, display_order)
        }
    }
}

/// Partial update for a tag. `parent_id: Some(None)` detaches the tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagUpdate {
    #[serde(default)]
    pub name: Option<LocalizedName>,
    #[serde(default, with = "double_option")]
    pub parent_id: Option<Option<TagId>>,
    #[serde(default)]
    pub display_order: Option<i32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFile {
    pub name: String,
    pub storage_locator: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Tag as shown next to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSummary {
    pub id: TagId,
    pub name: LocalizedName,
    pub dimension_id: DimensionId,
    pub dimension_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWithTags {
    #[serde(flatten)]
    pub file: ArchivedFile,
    pub tags: Vec<TagSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub dimension_code: String,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagNode {
    #[serde(flatten)]
    pub tag: Tag,
    pub children: Vec<TagNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionTree {
    pub dimension: Dimension,
    pub tags: Vec<TagNode>,
}

// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
