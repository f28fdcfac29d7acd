//! C-Grid navigation: narrowing the archive by tag selections across
//! dimensions.
//!
//! Selected tags of one dimension are OR-combined, dimensions are
//! AND-combined. Tags count direct memberships only; picking a parent tag
//! does not pull in files tagged with its descendants.

use crate::error::{ArchiveError, Result};
use crate::models::{Dimension, FileId, Tag, TagId, UserId};
use crate::storage::ArchiveTables;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

type Selections = BTreeMap<String, BTreeSet<TagId>>;

/// Dimension code -> selected tag ids. Codes are kept upper case, so
/// `{"who": [1], "WHO": [3]}` is one WHO selection of two tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Selections", into = "Selections")]
pub struct FilterState(Selections);

impl From<Selections> for FilterState {
    fn from(raw: Selections) -> Self {
        let mut merged = Selections::new();
        for (code, tags) in raw {
            merged
                .entry(code.to_ascii_uppercase())
                .or_default()
                .extend(tags);
        }
        Self(merged)
    }
}

impl From<FilterState> for Selections {
    fn from(state: FilterState) -> Self {
        state.0
    }
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, dimension_code: &str, tag_id: TagId) -> Self {
        self.0
            .entry(dimension_code.to_ascii_uppercase())
            .or_default()
            .insert(tag_id);
        self
    }

    /// Groups a flat list of tag ids by the dimension each tag belongs to.
    pub fn from_tag_ids(tables: &ArchiveTables, tag_ids: &[TagId]) -> Result<Self> {
        let mut state = Self::new();
        for &tag_id in tag_ids {
            let tag = tables
                .tags
                .get(&tag_id)
                .ok_or_else(|| ArchiveError::validation(format!("unknown tag id {}", tag_id)))?;
            let dimension = tables.dimension(tag.dimension_id)?;
            state = state.select(&dimension.code, tag_id);
        }
        Ok(state)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    pub fn selected(&self, dimension_code: &str) -> Option<&BTreeSet<TagId>> {
        self.0
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(dimension_code))
            .map(|(_, tags)| tags)
    }

    pub fn tag_ids(&self) -> BTreeSet<TagId> {
        self.0.values().flatten().copied().collect()
    }

    fn without(&self, dimension_code: &str) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(code, _)| !code.eq_ignore_ascii_case(dimension_code))
                .map(|(code, tags)| (code.clone(), tags.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub file_count: usize,
    pub is_selected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionCounts {
    pub dimension: Dimension,
    pub tags: Vec<TagCount>,
    pub selected_tag_ids: Vec<TagId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Navigation {
    pub total_matching_files: usize,
    pub matching_file_ids: Vec<FileId>,
    pub selected_tag_ids: Vec<TagId>,
    pub dimensions: Vec<DimensionCounts>,
}

/// Query engine over one consistent snapshot of the tables. The tag -> files
/// index is built once per engine in O(assignments).
pub struct NavigationEngine<'a> {
    tables: &'a ArchiveTables,
    universe: HashSet<FileId>,
    files_by_tag: HashMap<TagId, HashSet<FileId>>,
}

impl<'a> NavigationEngine<'a> {
    /// Engine over every file, or only the files of `owner`.
    pub fn new(tables: &'a ArchiveTables, owner: Option<UserId>) -> Result<Self> {
        if let Some(owner) = owner {
            tables.user(owner)?;
        }

        let universe: HashSet<FileId> = tables
            .files
            .values()
            .filter(|f| owner.map_or(true, |o| f.owner_id == o))
            .map(|f| f.id)
            .collect();

        let mut files_by_tag: HashMap<TagId, HashSet<FileId>> = HashMap::new();
        for assignment in tables.file_tags.values() {
            if universe.contains(&assignment.file_id) {
                files_by_tag
                    .entry(assignment.tag_id)
                    .or_default()
                    .insert(assignment.file_id);
            }
        }

        Ok(Self {
            tables,
            universe,
            files_by_tag,
        })
    }

    /// Files carrying at least one selected tag in every dimension that has
    /// a selection. An empty filter matches the whole universe.
    pub fn match_files(&self, filter: &FilterState) -> Result<BTreeSet<FileId>> {
        self.validate(filter)?;
        Ok(self.intersect(filter))
    }

    /// How many files would remain for each active tag of `dimension_code`
    /// if that tag were the dimension's selection. The dimension's own
    /// current selection is ignored.
    pub fn tag_counts(
        &self,
        filter: &FilterState,
        dimension_code: &str,
    ) -> Result<BTreeMap<TagId, usize>> {
        self.validate(filter)?;
        let dimension = self.dimension_by_code(dimension_code)?;
        Ok(self
            .counts_for(filter, dimension)?
            .into_iter()
            .map(|(tag, count)| (tag.id, count))
            .collect())
    }

    /// Files carrying every one of `tag_ids`.
    pub fn match_all_tags(&self, tag_ids: &[TagId]) -> Result<BTreeSet<FileId>> {
        if let Some(unknown) = tag_ids.iter().find(|id| !self.tables.tags.contains_key(*id)) {
            return Err(ArchiveError::validation(format!("unknown tag id {}", unknown)));
        }

        let mut matched = self.universe.clone();
        for tag_id in tag_ids {
            match self.files_by_tag.get(tag_id) {
                Some(files) => matched.retain(|f| files.contains(f)),
                None => matched.clear(),
            }
        }
        Ok(matched.into_iter().collect())
    }

    /// Total matches plus next-step counts for every dimension.
    pub fn navigate(&self, filter: &FilterState) -> Result<Navigation> {
        let matched = self.match_files(filter)?;

        let mut dimensions = Vec::new();
        for dimension in self.tables.list_dimensions() {
            let selected = filter.selected(&dimension.code).cloned().unwrap_or_default();
            let tags = self
                .counts_for(filter, &dimension)?
                .into_iter()
                .map(|(tag, file_count)| TagCount {
                    is_selected: selected.contains(&tag.id),
                    tag,
                    file_count,
                })
                .collect();
            dimensions.push(DimensionCounts {
                dimension,
                tags,
                selected_tag_ids: selected.into_iter().collect(),
            });
        }

        Ok(Navigation {
            total_matching_files: matched.len(),
            matching_file_ids: matched.into_iter().collect(),
            selected_tag_ids: filter.tag_ids().into_iter().collect(),
            dimensions,
        })
    }

    fn counts_for(&self, filter: &FilterState, dimension: &Dimension) -> Result<Vec<(Tag, usize)>> {
        let base = self.intersect(&filter.without(&dimension.code));
        Ok(self
            .tables
            .list_tags(dimension.id, true)?
            .into_iter()
            .map(|tag| {
                let count = self
                    .files_by_tag
                    .get(&tag.id)
                    .map_or(0, |files| files.iter().filter(|f| base.contains(f)).count());
                (tag, count)
            })
            .collect())
    }

    fn intersect(&self, filter: &FilterState) -> BTreeSet<FileId> {
        if filter.is_empty() {
            return self.universe.iter().copied().collect();
        }
        let mut matched = self.universe.clone();
        for tags in filter.0.values().filter(|tags| !tags.is_empty()) {
            let mut any_of: HashSet<FileId> = HashSet::new();
            for tag_id in tags {
                if let Some(files) = self.files_by_tag.get(tag_id) {
                    any_of.extend(files);
                }
            }
            matched.retain(|f| any_of.contains(f));
        }
        matched.into_iter().collect()
    }

    fn dimension_by_code(&self, code: &str) -> Result<&'a Dimension> {
        self.tables
            .dimension_by_code(code)
            .ok_or_else(|| ArchiveError::validation(format!("unknown dimension code {}", code)))
    }

    /// Unknown codes, unknown tag ids and tags filed under the wrong
    /// dimension are all rejected.
    fn validate(&self, filter: &FilterState) -> Result<()> {
        for (code, tags) in &filter.0 {
            let dimension = self.dimension_by_code(code)?;
            for tag_id in tags {
                let tag = self.tables.tags.get(tag_id).ok_or_else(|| {
                    ArchiveError::validation(format!("unknown tag id {}", tag_id))
                })?;
                if tag.dimension_id != dimension.id {
                    return Err(ArchiveError::validation(format!(
                        "tag {} does not belong to dimension {}",
                        tag_id, dimension.code
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{file_by_name, seed_sample, tag_by_name, user_by_email};
    use crate::user_models::NewUser;
    use crate::models::LocalizedName;

    fn sample() -> ArchiveTables {
        let mut tables = ArchiveTables::default();
        seed_sample(&mut tables).unwrap();
        tables
    }

    fn names(tables: &ArchiveTables, ids: &BTreeSet<FileId>) -> BTreeSet<String> {
        ids.iter().map(|id| tables.files[id].name.clone()).collect()
    }

    fn count_by_name(
        tables: &ArchiveTables,
        counts: &BTreeMap<TagId, usize>,
    ) -> BTreeMap<String, usize> {
        counts
            .iter()
            .map(|(id, count)| (tables.tags[id].name.en.clone(), *count))
            .collect()
    }

    #[test]
    fn family_photos_from_2023() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let filter = FilterState::new()
            .select("WHO", tag_by_name(&tables, "Family"))
            .select("WHEN", tag_by_name(&tables, "2023"))
            .select("WHAT", tag_by_name(&tables, "Photos"));

        let matched = engine.match_files(&filter).unwrap();
        let expected: BTreeSet<String> = ["family_vacation_paris.jpg", "birthday_party_2023.jpg"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names(&tables, &matched), expected);
    }

    #[test]
    fn empty_filter_matches_universe() {
        let mut tables = sample();
        let bob = user_by_email(&tables, "bob@example.com");
        tables
            .create_file(
                bob,
                crate::models::NewFile {
                    name: "bobs_scan.pdf".to_string(),
                    storage_locator: "2/bobs_scan.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    size_bytes: 10,
                    description: String::new(),
                },
            )
            .unwrap();
        let alice = user_by_email(&tables, "alice@example.com");

        let global = NavigationEngine::new(&tables, None).unwrap();
        assert_eq!(global.match_files(&FilterState::new()).unwrap().len(), 9);

        let scoped = NavigationEngine::new(&tables, Some(alice)).unwrap();
        let alices = scoped.match_files(&FilterState::new()).unwrap();
        assert_eq!(alices, (1..=8).collect::<BTreeSet<FileId>>());

        let bobs = NavigationEngine::new(&tables, Some(bob)).unwrap();
        assert_eq!(bobs.match_files(&FilterState::new()).unwrap().len(), 1);

        assert!(matches!(
            NavigationEngine::new(&tables, Some(999)),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn what_counts_on_empty_filter() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let counts = engine.tag_counts(&FilterState::new(), "WHAT").unwrap();

        let expected: BTreeMap<String, usize> = [
            ("Photos", 3),
            ("Documents", 3),
            ("Receipts", 1),
            ("Videos", 1),
        ]
        .into_iter()
        .map(|(n, c)| (n.to_string(), c))
        .collect();
        assert_eq!(count_by_name(&tables, &counts), expected);

        let photos = tag_by_name(&tables, "Photos");
        let photo_files = engine
            .match_files(&FilterState::new().select("WHAT", photos))
            .unwrap();
        assert_eq!(photo_files, BTreeSet::from([1, 2, 7]));
        let documents = tag_by_name(&tables, "Documents");
        let document_files = engine
            .match_files(&FilterState::new().select("WHAT", documents))
            .unwrap();
        assert_eq!(document_files, BTreeSet::from([3, 4, 8]));
    }

    #[test]
    fn counts_ignore_the_inspected_dimensions_own_selection() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let photos = tag_by_name(&tables, "Photos");
        let filter = FilterState::new().select("WHAT", photos);

        let what = engine.tag_counts(&filter, "what").unwrap();
        assert_eq!(what[&photos], 3);
        assert_eq!(what[&tag_by_name(&tables, "Documents")], 3);

        let when = count_by_name(&tables, &engine.tag_counts(&filter, "WHEN").unwrap());
        assert_eq!(when["2023"], 2);
        assert_eq!(when["Summer 2023"], 1);
        assert_eq!(when["2024"], 1);
    }

    #[test]
    fn counts_narrow_with_other_dimensions() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let filter = FilterState::new().select("WHO", tag_by_name(&tables, "Family"));

        let what = count_by_name(&tables, &engine.tag_counts(&filter, "WHAT").unwrap());
        assert_eq!(what["Photos"], 2);
        assert_eq!(what["Documents"], 0);
        assert_eq!(what["Videos"], 0);
    }

    #[test]
    fn parent_tags_do_not_roll_up_children() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let documents = tag_by_name(&tables, "Documents");
        let receipt = file_by_name(&tables, "grocery_receipt.jpg");

        let matched = engine
            .match_files(&FilterState::new().select("WHAT", documents))
            .unwrap();
        assert!(!matched.contains(&receipt));
    }

    #[test]
    fn tags_within_a_dimension_are_or_combined() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let filter = FilterState::new()
            .select("WHAT", tag_by_name(&tables, "Videos"))
            .select("WHAT", tag_by_name(&tables, "Receipts"));

        let matched = engine.match_files(&filter).unwrap();
        assert_eq!(matched, BTreeSet::from([5, 6]));

        let narrowed = engine
            .match_files(&filter.clone().select("WHO", tag_by_name(&tables, "Self")))
            .unwrap();
        assert_eq!(narrowed, BTreeSet::from([6]));
    }

    #[test]
    fn flat_tag_list_requires_every_tag() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let colleagues = tag_by_name(&tables, "Colleagues");
        let documents = tag_by_name(&tables, "Documents");
        let photos = tag_by_name(&tables, "Photos");

        assert_eq!(
            engine.match_all_tags(&[colleagues, documents]).unwrap(),
            BTreeSet::from([4, 8])
        );
        assert!(engine.match_all_tags(&[documents, photos]).unwrap().is_empty());
        assert_eq!(engine.match_all_tags(&[]).unwrap().len(), 8);
        assert!(matches!(
            engine.match_all_tags(&[documents, 4040]),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[test]
    fn unrecognized_selections_are_rejected() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let photos = tag_by_name(&tables, "Photos");

        let unknown_code = FilterState::new().select("WHY", photos);
        assert!(matches!(engine.match_files(&unknown_code), Err(ArchiveError::Validation(_))));

        let unknown_tag = FilterState::new().select("WHAT", 4040);
        assert!(matches!(engine.match_files(&unknown_tag), Err(ArchiveError::Validation(_))));

        let misfiled = FilterState::new().select("WHO", photos);
        assert!(matches!(engine.navigate(&misfiled), Err(ArchiveError::Validation(_))));

        assert!(matches!(
            engine.tag_counts(&FilterState::new(), "WHY"),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[test]
    fn navigate_reports_every_dimension_in_order() {
        let tables = sample();
        let engine = NavigationEngine::new(&tables, None).unwrap();
        let family = tag_by_name(&tables, "Family");
        let nav = engine.navigate(&FilterState::new().select("WHO", family)).unwrap();

        assert_eq!(nav.total_matching_files, 2);
        assert_eq!(nav.matching_file_ids, vec![1, 2]);
        assert_eq!(nav.selected_tag_ids, vec![family]);
        let codes: Vec<&str> = nav.dimensions.iter().map(|d| d.dimension.code.as_str()).collect();
        assert_eq!(codes, vec!["WHO", "WHEN", "WHAT", "WHERE", "HOW"]);

        let who = &nav.dimensions[0];
        assert_eq!(who.selected_tag_ids, vec![family]);
        let family_entry = who.tags.iter().find(|t| t.tag.id == family).unwrap();
        assert!(family_entry.is_selected);
        assert_eq!(family_entry.file_count, 2);
        let colleagues = who.tags.iter().find(|t| t.tag.name.en == "Colleagues").unwrap();
        assert!(!colleagues.is_selected);
        assert_eq!(colleagues.file_count, 3);
    }

    #[test]
    fn deserialized_codes_merge_case_insensitively() {
        let tables = sample();
        let family = tag_by_name(&tables, "Family");
        let friends = tag_by_name(&tables, "Friends");

        let json = format!(r#"{{"who": [{}], "WHO": [{}]}}"#, family, friends);
        let parsed: FilterState = serde_json::from_str(&json).unwrap();
        let built = FilterState::new().select("WHO", family).select("WHO", friends);
        assert_eq!(parsed, built);

        let engine = NavigationEngine::new(&tables, None).unwrap();
        assert_eq!(
            engine.match_files(&parsed).unwrap(),
            BTreeSet::from([1, 2, 5])
        );

        let nav = engine.navigate(&parsed).unwrap();
        assert_eq!(nav.dimensions[0].selected_tag_ids, vec![family, friends]);
        assert!(nav.dimensions[0]
            .tags
            .iter()
            .filter(|t| t.tag.id == family || t.tag.id == friends)
            .all(|t| t.is_selected));

        let round_trip = serde_json::to_value(&parsed).unwrap();
        assert_eq!(round_trip, serde_json::json!({ "WHO": [family, friends] }));
    }

    #[test]
    fn flat_ids_group_by_dimension() {
        let tables = sample();
        let family = tag_by_name(&tables, "Family");
        let friends = tag_by_name(&tables, "Friends");
        let videos = tag_by_name(&tables, "Videos");

        let state = FilterState::from_tag_ids(&tables, &[family, friends, videos]).unwrap();
        assert_eq!(state.selected("WHO").unwrap().len(), 2);
        assert_eq!(state.selected("what").unwrap().len(), 1);
        assert!(matches!(
            FilterState::from_tag_ids(&tables, &[4040]),
            Err(ArchiveError::Validation(_))
        ));

        let engine = NavigationEngine::new(&tables, None).unwrap();
        assert_eq!(engine.match_files(&state).unwrap(), BTreeSet::from([5]));
    }

    #[test]
    fn counts_stay_consistent_with_matches() {
        let mut tables = sample();
        let alice = user_by_email(&tables, "alice@example.com");
        let carol = tables
            .create_user(NewUser::new(LocalizedName::new("Carol", ""), "carol@example.com"))
            .unwrap();
        let engine = NavigationEngine::new(&tables, Some(carol.id)).unwrap();
        assert!(engine.match_files(&FilterState::new()).unwrap().is_empty());

        let engine = NavigationEngine::new(&tables, Some(alice)).unwrap();
        let filter = FilterState::new().select("WHEN", tag_by_name(&tables, "2024"));
        for (tag_id, count) in engine.tag_counts(&filter, "WHERE").unwrap() {
            let with_tag = filter.clone().select("WHERE", tag_id);
            assert_eq!(engine.match_files(&with_tag).unwrap().len(), count);
        }
    }
}
