//! Sample archive used for demos and tests: two users, the five classic
//! dimensions and eight tagged files owned by the first user.

use crate::error::Result;
use crate::models::{LocalizedName, NewDimension, NewFile, NewTag, TagId};
use crate::storage::ArchiveTables;
use crate::user_models::NewUser;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;

const DIMENSIONS: &[(&str, &str, &str, &str)] = &[
    ("WHO", "Who", "人物", "users"),
    ("WHEN", "When", "时间", "calendar"),
    ("WHAT", "What", "内容", "folder"),
    ("WHERE", "Where", "地点", "map-pin"),
    ("HOW", "How", "方式", "tool"),
];

// (dimension, parent, en, zh)
const TAGS: &[(&str, Option<&str>, &str, &str)] = &[
    ("WHO", None, "Family", "家人"),
    ("WHO", Some("Family"), "Parents", "父母"),
    ("WHO", None, "Friends", "朋友"),
    ("WHO", None, "Colleagues", "同事"),
    ("WHO", None, "Self", "自己"),
    ("WHEN", None, "2023", "2023年"),
    ("WHEN", Some("2023"), "Summer 2023", "2023年夏"),
    ("WHEN", None, "2024", "2024年"),
    ("WHAT", None, "Photos", "照片"),
    ("WHAT", None, "Documents", "文档"),
    ("WHAT", Some("Documents"), "Receipts", "收据"),
    ("WHAT", None, "Videos", "视频"),
    ("WHERE", None, "Europe", "欧洲"),
    ("WHERE", Some("Europe"), "Paris", "巴黎"),
    ("WHERE", None, "Home", "家"),
    ("WHERE", None, "Office", "办公室"),
    ("HOW", None, "Phone", "手机"),
    ("HOW", None, "Scanner", "扫描仪"),
    ("HOW", None, "Email", "邮件"),
];

struct SampleFile {
    name: &'static str,
    content_type: &'static str,
    size_bytes: u64,
    description: &'static str,
    created: (i32, u32, u32),
    tags: &'static [&'static str],
}

const FILES: &[SampleFile] = &[
    SampleFile {
        name: "family_vacation_paris.jpg",
        content_type: "image/jpeg",
        size_bytes: 2_457_600,
        description: "Family trip to Paris",
        created: (2023, 7, 14),
        tags: &["Family", "2023", "Summer 2023", "Photos", "Paris", "Phone"],
    },
    SampleFile {
        name: "birthday_party_2023.jpg",
        content_type: "image/jpeg",
        size_bytes: 1_843_200,
        description: "Birthday party at home",
        created: (2023, 9, 2),
        tags: &["Family", "2023", "Photos", "Home", "Phone"],
    },
    SampleFile {
        name: "tax_return_2023.pdf",
        content_type: "application/pdf",
        size_bytes: 524_288,
        description: "Annual tax return",
        created: (2024, 4, 10),
        tags: &["Self", "2023", "Documents", "Home", "Scanner"],
    },
    SampleFile {
        name: "project_proposal.docx",
        content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        size_bytes: 98_304,
        description: "Q3 project proposal",
        created: (2024, 5, 6),
        tags: &["Colleagues", "2024", "Documents", "Office", "Email"],
    },
    SampleFile {
        name: "graduation_ceremony.mp4",
        content_type: "video/mp4",
        size_bytes: 52_428_800,
        description: "Graduation ceremony recording",
        created: (2024, 6, 15),
        tags: &["Friends", "2024", "Videos", "Phone"],
    },
    SampleFile {
        name: "grocery_receipt.jpg",
        content_type: "image/jpeg",
        size_bytes: 204_800,
        description: "Scanned grocery receipt",
        created: (2024, 8, 1),
        tags: &["Self", "2024", "Receipts", "Home", "Scanner"],
    },
    SampleFile {
        name: "team_offsite_2024.jpg",
        content_type: "image/jpeg",
        size_bytes: 3_145_728,
        description: "Team offsite group photo",
        created: (2024, 9, 20),
        tags: &["Colleagues", "2024", "Photos", "Office", "Phone"],
    },
    SampleFile {
        name: "meeting_notes.txt",
        content_type: "text/plain",
        size_bytes: 4_096,
        description: "Weekly sync notes",
        created: (2024, 10, 3),
        tags: &["Colleagues", "2024", "Documents", "Office", "Email"],
    },
];

pub fn seed_sample(tables: &mut ArchiveTables) -> Result<()> {
    let alice = tables.create_user(NewUser::new(
        LocalizedName::new("Alice Chen", "陈爱丽"),
        "alice@example.com",
    ))?;
    tables.create_user(NewUser::new(
        LocalizedName::new("Bob Wang", "王博"),
        "bob@example.com",
    ))?;

    let mut dimension_ids = HashMap::new();
    for (order, (code, en, zh, icon)) in DIMENSIONS.iter().enumerate() {
        let dimension = tables.create_dimension(NewDimension {
            code: code.to_string(),
            name: LocalizedName::new(*en, *zh),
            display_order: order as i32 + 1,
            icon_name: Some(icon.to_string()),
        })?;
        dimension_ids.insert(*code, dimension.id);
    }

    let mut tag_ids: HashMap<&str, TagId> = HashMap::new();
    for (order, (code, parent, en, zh)) in TAGS.iter().enumerate() {
        let dimension_id = dimension_ids[code];
        let name = LocalizedName::new(*en, *zh);
        let order = order as i32 + 1;
        let new = match parent {
            Some(parent) => NewTag::child(dimension_id, tag_ids[parent], name, order),
            None => NewTag::root(dimension_id, name, order),
        };
        let tag = tables.insert_tag(new)?;
        tag_ids.insert(*en, tag.id);
    }

    for sample in FILES {
        let file = tables.create_file(
            alice.id,
            NewFile {
                name: sample.name.to_string(),
                storage_locator: format!("{}/{}", alice.id, sample.name),
                content_type: sample.content_type.to_string(),
                size_bytes: sample.size_bytes,
                description: sample.description.to_string(),
            },
        )?;

        let (y, m, d) = sample.created;
        if let (Some(created_at), Some(stored)) = (
            Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single(),
            tables.files.get_mut(&file.id),
        ) {
            stored.created_at = created_at;
        }

        for tag in sample.tags {
            tables.assign_tag(file.id, tag_ids[tag], Some(alice.id))?;
        }
    }

    tracing::info!(
        files = FILES.len(),
        tags = TAGS.len(),
        "Seeded sample archive"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) fn tag_by_name(tables: &ArchiveTables, en: &str) -> TagId {
    tables
        .tags
        .values()
        .find(|t| t.name.en == en)
        .map(|t| t.id)
        .unwrap_or_else(|| panic!("no sample tag {}", en))
}

#[cfg(test)]
pub(crate) fn file_by_name(tables: &ArchiveTables, name: &str) -> crate::models::FileId {
    tables
        .files
        .values()
        .find(|f| f.name == name)
        .map(|f| f.id)
        .unwrap_or_else(|| panic!("no sample file {}", name))
}

#[cfg(test)]
pub(crate) fn user_by_email(tables: &ArchiveTables, email: &str) -> crate::models::UserId {
    tables
        .users
        .values()
        .find(|u| u.email == email)
        .map(|u| u.id)
        .unwrap_or_else(|| panic!("no sample user {}", email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_respects_hierarchy_and_ids() {
        let mut tables = ArchiveTables::default();
        seed_sample(&mut tables).unwrap();

        assert_eq!(tables.dimensions.len(), 5);
        assert_eq!(tables.files.len(), 8);
        // files are numbered 1..=8 in seed order
        assert_eq!(file_by_name(&tables, "family_vacation_paris.jpg"), 1);
        assert_eq!(file_by_name(&tables, "meeting_notes.txt"), 8);

        let receipts = &tables.tags[&tag_by_name(&tables, "Receipts")];
        assert_eq!(receipts.level, 2);
        assert_eq!(receipts.parent_id, Some(tag_by_name(&tables, "Documents")));
    }
}
