use crate::error::{ArchiveError, Result};
use crate::models::{
    Dimension, DimensionId, DimensionTree, NewDimension, NewTag, Tag, TagId, TagNode, TagUpdate,
    TagWithCount,
};
use crate::storage::ArchiveTables;
use std::collections::{HashMap, VecDeque};

/// Parent constraint for tag listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    Roots,
    Of(TagId),
}

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub dimension_id: Option<DimensionId>,
    pub parent: ParentFilter,
    pub level: Option<u32>,
    pub include_inactive: bool,
}

fn tag_order(a: &Tag, b: &Tag) -> std::cmp::Ordering {
    (a.display_order, a.level, a.id).cmp(&(b.display_order, b.level, b.id))
}

impl ArchiveTables {
    pub fn create_dimension(&mut self, new: NewDimension) -> Result<Dimension> {
        let code = new.code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(ArchiveError::validation("dimension code must not be empty"));
        }
        if self.dimension_by_code(&code).is_some() {
            return Err(ArchiveError::conflict(format!(
                "dimension code {} already exists",
                code
            )));
        }

        let dimension = Dimension {
            id: self.next_dimension_id(),
            code,
            name: new.name,
            display_order: new.display_order,
            icon_name: new.icon_name,
        };
        self.dimensions.insert(dimension.id, dimension.clone());
        Ok(dimension)
    }

    pub fn list_dimensions(&self) -> Vec<Dimension> {
        let mut dimensions: Vec<Dimension> = self.dimensions.values().cloned().collect();
        dimensions.sort_by_key(|d| (d.display_order, d.id));
        dimensions
    }

    pub fn list_tags(&self, dimension_id: DimensionId, active_only: bool) -> Result<Vec<Tag>> {
        self.dimension(dimension_id)?;

        let mut tags: Vec<Tag> = self
            .tags
            .values()
            .filter(|t| t.dimension_id == dimension_id && (t.is_active || !active_only))
            .cloned()
            .collect();
        tags.sort_by(tag_order);
        Ok(tags)
    }

    /// Tag listing with direct file counts, optionally narrowed by
    /// dimension, parent and level.
    pub fn filter_tags(&self, filter: &TagFilter) -> Result<Vec<TagWithCount>> {
        if let Some(dimension_id) = filter.dimension_id {
            self.dimension(dimension_id)?;
        }

        let mut counts: HashMap<TagId, usize> = HashMap::new();
        for assignment in self.file_tags.values() {
            *counts.entry(assignment.tag_id).or_default() += 1;
        }

        let mut tags: Vec<&Tag> = self
            .tags
            .values()
            .filter(|t| filter.include_inactive || t.is_active)
            .filter(|t| filter.dimension_id.map_or(true, |d| t.dimension_id == d))
            .filter(|t| match filter.parent {
                ParentFilter::Any => true,
                ParentFilter::Roots => t.parent_id.is_none(),
                ParentFilter::Of(parent) => t.parent_id == Some(parent),
            })
            .filter(|t| filter.level.map_or(true, |l| t.level == l))
            .collect();
        tags.sort_by(|a, b| {
            let da = self.dimensions.get(&a.dimension_id).map(|d| d.display_order);
            let db = self.dimensions.get(&b.dimension_id).map(|d| d.display_order);
            da.cmp(&db).then_with(|| tag_order(a, b))
        });

        Ok(tags
            .into_iter()
            .map(|t| TagWithCount {
                tag: t.clone(),
                dimension_code: self
                    .dimensions
                    .get(&t.dimension_id)
                    .map(|d| d.code.clone())
                    .unwrap_or_default(),
                file_count: counts.get(&t.id).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Active tags of one dimension as a forest. Tags below an inactive tag
    /// are hidden together with it.
    pub fn get_tag_tree(&self, dimension_id: DimensionId) -> Result<Vec<TagNode>> {
        let tags = self.list_tags(dimension_id, true)?;

        let mut children: HashMap<Option<TagId>, Vec<Tag>> = HashMap::new();
        for tag in tags {
            children.entry(tag.parent_id).or_default().push(tag);
        }
        Ok(build_forest(&mut children, None))
    }

    pub fn full_tag_tree(&self) -> Vec<DimensionTree> {
        self.list_dimensions()
            .into_iter()
            .map(|dimension| DimensionTree {
                tags: self.get_tag_tree(dimension.id).unwrap_or_default(),
                dimension,
            })
            .collect()
    }

    pub fn insert_tag(&mut self, new: NewTag) -> Result<Tag> {
        if new.name.en.trim().is_empty() {
            return Err(ArchiveError::validation("tag name must not be empty"));
        }
        if !self.dimensions.contains_key(&new.dimension_id) {
            return Err(ArchiveError::validation(format!(
                "dimension {} does not exist",
                new.dimension_id
            )));
        }

        let level = match new.parent_id {
            None => match new.level {
                None | Some(1) => 1,
                Some(other) => {
                    return Err(ArchiveError::validation(format!(
                        "root tag must have level 1, got {}",
                        other
                    )))
                }
            },
            Some(parent_id) => {
                let parent = self.tags.get(&parent_id).ok_or_else(|| {
                    ArchiveError::validation(format!("parent tag {} does not exist", parent_id))
                })?;
                if parent.dimension_id != new.dimension_id {
                    return Err(ArchiveError::validation(format!(
                        "parent tag {} belongs to another dimension",
                        parent_id
                    )));
                }
                let expected = parent.level + 1;
                match new.level {
                    Some(level) if level != expected => {
                        return Err(ArchiveError::validation(format!(
                            "tag level {} does not follow parent level {}",
                            level, parent.level
                        )))
                    }
                    _ => expected,
                }
            }
        };

        let tag = Tag {
            id: self.next_tag_id(),
            dimension_id: new.dimension_id,
            name: new.name,
            parent_id: new.parent_id,
            level,
            display_order: new.display_order,
            icon_url: new.icon_url,
            is_active: new.is_active,
        };
        self.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    pub fn update_tag(&mut self, id: TagId, update: TagUpdate) -> Result<Tag> {
        let current = self.tag(id)?.clone();
        if update.name.as_ref().is_some_and(|n| n.en.trim().is_empty()) {
            return Err(ArchiveError::validation("tag name must not be empty"));
        }

        if let Some(new_parent) = update.parent_id {
            let level = match new_parent {
                None => 1,
                Some(parent_id) => {
                    let parent = self.tags.get(&parent_id).ok_or_else(|| {
                        ArchiveError::validation(format!("parent tag {} does not exist", parent_id))
                    })?;
                    if parent.dimension_id != current.dimension_id {
                        return Err(ArchiveError::validation(format!(
                            "parent tag {} belongs to another dimension",
                            parent_id
                        )));
                    }
                    if self.is_ancestor_or_self(id, parent_id) {
                        return Err(ArchiveError::validation(format!(
                            "tag {} cannot be moved below itself",
                            id
                        )));
                    }
                    parent.level + 1
                }
            };

            if let Some(tag) = self.tags.get_mut(&id) {
                tag.parent_id = new_parent;
            }
            self.relevel_subtree(id, level);
        }

        let tag = self
            .tags
            .get_mut(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("tag {}", id)))?;
        if let Some(name) = update.name {
            tag.name = name;
        }
        if let Some(order) = update.display_order {
            tag.display_order = order;
        }
        if let Some(active) = update.is_active {
            tag.is_active = active;
        }
        Ok(tag.clone())
    }

    /// Removes a tag and its assignments. Direct children are detached and
    /// become roots.
    pub fn delete_tag(&mut self, id: TagId) -> Result<Tag> {
        self.tag(id)?;

        self.remove_assignments_where(|a| a.tag_id == id);

        let orphans: Vec<TagId> = self
            .tags
            .values()
            .filter(|t| t.parent_id == Some(id))
            .map(|t| t.id)
            .collect();
        for orphan in orphans {
            if let Some(tag) = self.tags.get_mut(&orphan) {
                tag.parent_id = None;
            }
            self.relevel_subtree(orphan, 1);
        }

        self.tags
            .remove(&id)
            .ok_or_else(|| ArchiveError::not_found(format!("tag {}", id)))
    }

    /// True when `ancestor` is `tag` itself or lies on its parent chain.
    fn is_ancestor_or_self(&self, ancestor: TagId, tag: TagId) -> bool {
        let mut cursor = Some(tag);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            // the chain can never be longer than the tag count
            steps += 1;
            if steps > self.tags.len() {
                return false;
            }
            cursor = self.tags.get(&current).and_then(|t| t.parent_id);
        }
        false
    }

    fn relevel_subtree(&mut self, root: TagId, level: u32) {
        let mut queue = VecDeque::from([(root, level)]);
        while let Some((id, level)) = queue.pop_front() {
            if let Some(tag) = self.tags.get_mut(&id) {
                tag.level = level;
            }
            queue.extend(
                self.tags
                    .values()
                    .filter(|t| t.parent_id == Some(id))
                    .map(|t| (t.id, level + 1)),
            );
        }
    }
}

fn build_forest(
    children: &mut HashMap<Option<TagId>, Vec<Tag>>,
    parent: Option<TagId>,
) -> Vec<TagNode> {
    let Some(mut level) = children.remove(&parent) else {
        return Vec::new();
    };
    level.sort_by(tag_order);
    level
        .into_iter()
        .map(|tag| {
            let nested = build_forest(children, Some(tag.id));
            TagNode {
                tag,
                children: nested,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocalizedName;

    fn setup() -> (ArchiveTables, DimensionId, DimensionId) {
        let mut tables = ArchiveTables::default();
        let what = tables
            .create_dimension(NewDimension {
                code: "what".to_string(),
                name: LocalizedName::new("What", "内容"),
                display_order: 2,
                icon_name: None,
            })
            .unwrap();
        let who = tables
            .create_dimension(NewDimension {
                code: "WHO".to_string(),
                name: LocalizedName::new("Who", "人物"),
                display_order: 1,
                icon_name: None,
            })
            .unwrap();
        (tables, what.id, who.id)
    }

    fn name(en: &str) -> LocalizedName {
        LocalizedName::new(en, "")
    }

    fn assert_levels_consistent(tables: &ArchiveTables) {
        for tag in tables.tags.values() {
            match tag.parent_id {
                None => assert_eq!(tag.level, 1, "root {} has level {}", tag.id, tag.level),
                Some(parent) => {
                    let parent = &tables.tags[&parent];
                    assert_eq!(parent.level + 1, tag.level);
                    assert_eq!(parent.dimension_id, tag.dimension_id);
                }
            }
        }
    }

    #[test]
    fn dimensions_are_listed_by_display_order() {
        let (tables, _, _) = setup();
        let codes: Vec<String> = tables.list_dimensions().into_iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["WHO", "WHAT"]);
    }

    #[test]
    fn duplicate_dimension_code_conflicts() {
        let (mut tables, _, _) = setup();
        let err = tables
            .create_dimension(NewDimension {
                code: "Who".to_string(),
                name: name("Again"),
                display_order: 9,
                icon_name: None,
            })
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Conflict(_)));
    }

    #[test]
    fn child_level_is_derived_from_parent() {
        let (mut tables, what, _) = setup();
        let documents = tables.insert_tag(NewTag::root(what, name("Documents"), 2)).unwrap();
        let receipts = tables
            .insert_tag(NewTag::child(what, documents.id, name("Receipts"), 1))
            .unwrap();

        assert_eq!(documents.level, 1);
        assert_eq!(receipts.level, 2);
        assert_levels_consistent(&tables);
    }

    #[test]
    fn insert_rejects_bad_hierarchy() {
        let (mut tables, what, who) = setup();
        let photos = tables.insert_tag(NewTag::root(what, name("Photos"), 1)).unwrap();

        let cross = tables.insert_tag(NewTag::child(who, photos.id, name("Family"), 1));
        assert!(matches!(cross, Err(ArchiveError::Validation(_))));

        let mut skipped = NewTag::child(what, photos.id, name("Albums"), 1);
        skipped.level = Some(3);
        assert!(matches!(tables.insert_tag(skipped), Err(ArchiveError::Validation(_))));

        let mut deep_root = NewTag::root(what, name("Loose"), 1);
        deep_root.level = Some(2);
        assert!(matches!(tables.insert_tag(deep_root), Err(ArchiveError::Validation(_))));

        let dangling = tables.insert_tag(NewTag::child(what, 999, name("Ghost"), 1));
        assert!(matches!(dangling, Err(ArchiveError::Validation(_))));

        let unknown_dimension = tables.insert_tag(NewTag::root(77, name("Nowhere"), 1));
        assert!(matches!(unknown_dimension, Err(ArchiveError::Validation(_))));

        let blank = tables.insert_tag(NewTag::root(what, name("  "), 1));
        assert!(matches!(blank, Err(ArchiveError::Validation(_))));

        assert_eq!(tables.tags.len(), 1);
    }

    #[test]
    fn tree_nests_children_and_hides_inactive() {
        let (mut tables, what, _) = setup();
        let documents = tables.insert_tag(NewTag::root(what, name("Documents"), 2)).unwrap();
        let photos = tables.insert_tag(NewTag::root(what, name("Photos"), 1)).unwrap();
        tables
            .insert_tag(NewTag::child(what, documents.id, name("Receipts"), 1))
            .unwrap();
        let mut archived = NewTag::root(what, name("Archived"), 3);
        archived.is_active = false;
        tables.insert_tag(archived).unwrap();

        let tree = tables.get_tag_tree(what).unwrap();
        let roots: Vec<&str> = tree.iter().map(|n| n.tag.name.en.as_str()).collect();
        assert_eq!(roots, vec!["Photos", "Documents"]);
        assert_eq!(tree[0].tag.id, photos.id);
        assert!(tree[0].children.is_empty());
        assert_eq!(tree[1].children.len(), 1);
        assert_eq!(tree[1].children[0].tag.name.en, "Receipts");

        assert_eq!(tables.list_tags(what, false).unwrap().len(), 4);
        assert_eq!(tables.list_tags(what, true).unwrap().len(), 3);
    }

    #[test]
    fn unknown_dimension_tree_is_not_found() {
        let (tables, _, _) = setup();
        assert!(matches!(tables.get_tag_tree(42), Err(ArchiveError::NotFound(_))));
        assert!(matches!(tables.list_tags(42, true), Err(ArchiveError::NotFound(_))));
    }

    #[test]
    fn reparent_rejects_cycles_and_relevels() {
        let (mut tables, what, _) = setup();
        let a = tables.insert_tag(NewTag::root(what, name("A"), 1)).unwrap();
        let b = tables.insert_tag(NewTag::child(what, a.id, name("B"), 1)).unwrap();
        let c = tables.insert_tag(NewTag::child(what, b.id, name("C"), 1)).unwrap();
        let d = tables.insert_tag(NewTag::root(what, name("D"), 2)).unwrap();

        for target in [a.id, b.id, c.id] {
            let update = TagUpdate {
                parent_id: Some(Some(target)),
                ..TagUpdate::default()
            };
            let err = tables.update_tag(a.id, update).unwrap_err();
            assert!(matches!(err, ArchiveError::Validation(_)));
        }

        let moved = tables
            .update_tag(
                a.id,
                TagUpdate {
                    parent_id: Some(Some(d.id)),
                    ..TagUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(moved.level, 2);
        assert_eq!(tables.tags[&c.id].level, 4);
        assert_levels_consistent(&tables);

        let detached = tables
            .update_tag(
                b.id,
                TagUpdate {
                    parent_id: Some(None),
                    ..TagUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(detached.level, 1);
        assert_eq!(tables.tags[&c.id].level, 2);
        assert_levels_consistent(&tables);
    }

    #[test]
    fn update_changes_metadata_only_when_given() {
        let (mut tables, what, _) = setup();
        let photos = tables.insert_tag(NewTag::root(what, name("Photos"), 1)).unwrap();

        let updated = tables
            .update_tag(
                photos.id,
                TagUpdate {
                    is_active: Some(false),
                    display_order: Some(5),
                    ..TagUpdate::default()
                },
            )
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.display_order, 5);
        assert_eq!(updated.name.en, "Photos");
        assert_eq!(updated.parent_id, None);
    }

    #[test]
    fn filter_tags_by_parent_and_level() {
        let (mut tables, what, who) = setup();
        let documents = tables.insert_tag(NewTag::root(what, name("Documents"), 1)).unwrap();
        tables
            .insert_tag(NewTag::child(what, documents.id, name("Receipts"), 1))
            .unwrap();
        tables.insert_tag(NewTag::root(who, name("Family"), 1)).unwrap();

        let roots = tables
            .filter_tags(&TagFilter {
                parent: ParentFilter::Roots,
                ..TagFilter::default()
            })
            .unwrap();
        let names: Vec<&str> = roots.iter().map(|t| t.tag.name.en.as_str()).collect();
        assert_eq!(names, vec!["Family", "Documents"]);
        assert_eq!(roots[0].dimension_code, "WHO");

        let children = tables
            .filter_tags(&TagFilter {
                parent: ParentFilter::Of(documents.id),
                ..TagFilter::default()
            })
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].tag.name.en, "Receipts");

        let level_two = tables
            .filter_tags(&TagFilter {
                dimension_id: Some(what),
                level: Some(2),
                ..TagFilter::default()
            })
            .unwrap();
        assert_eq!(level_two.len(), 1);

        let missing = tables.filter_tags(&TagFilter {
            dimension_id: Some(99),
            ..TagFilter::default()
        });
        assert!(matches!(missing, Err(ArchiveError::NotFound(_))));
    }
}
