use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::file_store::newest_first;
use crate::models::{
    ArchivedFile, Dimension, DimensionId, DimensionTree, FileId, FileUpdate, FileWithTags,
    NewDimension, NewFile, NewTag, Tag, TagId, TagNode, TagSummary, TagUpdate, TagWithCount,
    UserId,
};
use crate::navigation::{FilterState, Navigation, NavigationEngine};
use crate::storage::{ArchiveStorage, ArchiveTables};
use crate::tag_store::{ParentFilter, TagFilter};
use crate::uploads::{extension_allowed, sanitize_filename, UploadStore};
use crate::user_models::{NewUser, User, UserStats};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<ArchiveStorage>,
    pub uploads: Arc<UploadStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(storage: ArchiveStorage, config: Config) -> Self {
        Self {
            storage: Arc::new(storage),
            uploads: Arc::new(UploadStore::new(config.upload_dir.clone())),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_content_length;

    Router::new()
        .route("/api/health", get(health))
        .route("/api/dimensions", get(list_dimensions).post(create_dimension))
        .route("/api/dimensions/:dimension_id/tree", get(dimension_tree))
        .route("/api/tags", get(list_tags).post(create_tag))
        .route("/api/tags/tree", get(tag_tree))
        .route("/api/tags/:tag_id", patch(update_tag).delete(delete_tag))
        .route("/api/tags/:tag_id/files", get(files_for_tag))
        .route("/api/files", get(list_files).post(upload_file))
        .route(
            "/api/files/:file_id",
            get(get_file).patch(update_file).delete(delete_file),
        )
        .route("/api/files/:file_id/tags", get(file_tags).post(assign_tags))
        .route("/api/files/:file_id/tags/:tag_id", delete(remove_file_tag))
        .route("/api/navigate", post(navigate))
        .route("/api/cgrid/navigate", get(navigate_by_tags))
        .route("/api/cgrid/counts", get(dimension_counts))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/:user_id", get(get_user).delete(delete_user))
        .route("/api/users/:user_id/files", get(user_files))
        .route("/api/users/:user_id/stats", get(user_stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub files: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DimensionListResponse {
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagListResponse {
    pub tags: Vec<TagWithCount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagTreeResponse {
    pub dimensions: Vec<DimensionTree>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DimensionTreeResponse {
    pub dimension_id: DimensionId,
    pub tags: Vec<TagNode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagFilesResponse {
    pub tag_id: TagId,
    pub file_ids: Vec<FileId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileWithTags>,
    pub count: usize,
    pub total: usize,
    pub tag_ids: Vec<TagId>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileTagsResponse {
    pub file_id: FileId,
    pub tags: Vec<TagSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagCountsResponse {
    pub dimension: String,
    pub counts: BTreeMap<TagId, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserFilesResponse {
    pub user_id: UserId,
    pub files: Vec<ArchivedFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignTagsRequest {
    pub tag_ids: Vec<TagId>,
    #[serde(default)]
    pub assigned_by: Option<UserId>,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NavigateRequest {
    #[serde(default)]
    pub filter: FilterState,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct TagsQuery {
    dimension_id: Option<DimensionId>,
    parent_id: Option<String>,
    level: Option<u32>,
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Debug, Deserialize)]
struct FilesQuery {
    tags: Option<String>,
    user_id: Option<UserId>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TagSelectionQuery {
    tags: Option<String>,
    user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct CountsQuery {
    dimension: String,
    tags: Option<String>,
    user_id: Option<UserId>,
}

/// Parses `"3,7, 12"` into tag ids. Blank entries are skipped.
fn parse_tag_list(raw: Option<&str>) -> Result<Vec<TagId>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ArchiveError::validation(format!("invalid tag id {:?}", s)))
        })
        .collect()
}

fn parse_parent(raw: Option<&str>) -> Result<ParentFilter> {
    match raw.map(str::trim) {
        None | Some("") => Ok(ParentFilter::Any),
        Some(s) if s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none") => {
            Ok(ParentFilter::Roots)
        }
        Some(s) => s
            .parse()
            .map(ParentFilter::Of)
            .map_err(|_| ArchiveError::validation(format!("invalid parent_id {:?}", s))),
    }
}

fn with_tags(tables: &ArchiveTables, file: ArchivedFile) -> Result<FileWithTags> {
    let tags = tables.tag_summaries_for_file(file.id)?;
    Ok(FileWithTags { file, tags })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let files = state.storage.read(|t| t.file_count()).await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        storage: "ok".to_string(),
        files,
    })
}

async fn list_dimensions(State(state): State<AppState>) -> Json<DimensionListResponse> {
    let dimensions = state.storage.read(|t| t.list_dimensions()).await;
    Json(DimensionListResponse { dimensions })
}

async fn create_dimension(
    State(state): State<AppState>,
    Json(payload): Json<NewDimension>,
) -> Result<(StatusCode, Json<Dimension>)> {
    let dimension = state
        .storage
        .transact(|t| t.create_dimension(payload))
        .await?;
    tracing::info!(id = dimension.id, code = %dimension.code, "Created dimension");
    Ok((StatusCode::CREATED, Json(dimension)))
}

async fn dimension_tree(
    State(state): State<AppState>,
    Path(dimension_id): Path<DimensionId>,
) -> Result<Json<DimensionTreeResponse>> {
    let tags = state
        .storage
        .read(|t| t.get_tag_tree(dimension_id))
        .await?;
    Ok(Json(DimensionTreeResponse { dimension_id, tags }))
}

async fn list_tags(
    State(state): State<AppState>,
    Query(query): Query<TagsQuery>,
) -> Result<Json<TagListResponse>> {
    let filter = TagFilter {
        dimension_id: query.dimension_id,
        parent: parse_parent(query.parent_id.as_deref())?,
        level: query.level,
        include_inactive: query.include_inactive,
    };
    let tags = state.storage.read(|t| t.filter_tags(&filter)).await?;
    Ok(Json(TagListResponse { tags }))
}

async fn tag_tree(State(state): State<AppState>) -> Json<TagTreeResponse> {
    let dimensions = state.storage.read(|t| t.full_tag_tree()).await;
    Json(TagTreeResponse { dimensions })
}

async fn create_tag(
    State(state): State<AppState>,
    Json(payload): Json<NewTag>,
) -> Result<(StatusCode, Json<Tag>)> {
    let tag = state.storage.transact(|t| t.insert_tag(payload)).await?;
    tracing::info!(id = tag.id, level = tag.level, "Created tag {}", tag.name.en);
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn update_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<TagId>,
    Json(payload): Json<TagUpdate>,
) -> Result<Json<Tag>> {
    let tag = state
        .storage
        .transact(|t| t.update_tag(tag_id, payload))
        .await?;
    tracing::info!(id = tag.id, "Updated tag");
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<TagId>,
) -> Result<StatusCode> {
    let removed = state.storage.transact(|t| t.delete_tag(tag_id)).await?;
    tracing::info!(id = removed.id, "Deleted tag {}", removed.name.en);
    Ok(StatusCode::NO_CONTENT)
}

async fn files_for_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<TagId>,
) -> Result<Json<TagFilesResponse>> {
    let file_ids = state.storage.read(|t| t.files_for_tag(tag_id)).await?;
    Ok(Json(TagFilesResponse {
        tag_id,
        file_ids: file_ids.into_iter().collect(),
    }))
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<FileListResponse>> {
    let tag_ids = parse_tag_list(query.tags.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let (files, total) = state
        .storage
        .read(|t| -> Result<(Vec<FileWithTags>, usize)> {
            let engine = NavigationEngine::new(t, query.user_id)?;
            let matched = engine.match_all_tags(&tag_ids)?;

            let mut files: Vec<ArchivedFile> = matched
                .iter()
                .filter_map(|id| t.files.get(id).cloned())
                .collect();
            newest_first(&mut files);
            let total = files.len();

            let page = files
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|f| with_tags(t, f))
                .collect::<Result<Vec<_>>>()?;
            Ok((page, total))
        })
        .await?;

    Ok(Json(FileListResponse {
        count: files.len(),
        files,
        total,
        tag_ids,
        user_id: query.user_id,
    }))
}

async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
) -> Result<Json<FileWithTags>> {
    let file = state
        .storage
        .read(|t| t.get_file(file_id).and_then(|f| with_tags(t, f)))
        .await?;
    Ok(Json(file))
}

async fn update_file(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
    Json(payload): Json<FileUpdate>,
) -> Result<Json<FileWithTags>> {
    let file = state
        .storage
        .transact(|t| {
            let file = t.update_file(file_id, payload)?;
            with_tags(t, file)
        })
        .await?;
    Ok(Json(file))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
) -> Result<StatusCode> {
    let removed = state.storage.transact(|t| t.delete_file(file_id)).await?;
    state.uploads.remove(&removed.storage_locator).await;
    tracing::info!(id = removed.id, "Deleted file {}", removed.name);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Default)]
struct UploadForm {
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Option<Vec<u8>>,
    owner_id: Option<UserId>,
    description: String,
    tag_ids: Vec<TagId>,
    assigned_by: Option<UserId>,
}

fn multipart_error(err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::validation(format!("malformed upload: {}", err))
}

fn parse_id(field: &str, raw: &str) -> Result<UserId> {
    raw.trim()
        .parse()
        .map_err(|_| ArchiveError::validation(format!("invalid {} {:?}", field, raw)))
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                form.filename = field.file_name().map(str::to_owned);
                form.content_type = field.content_type().map(str::to_owned);
                form.bytes = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
            }
            "owner_id" => {
                let text = field.text().await.map_err(multipart_error)?;
                form.owner_id = Some(parse_id("owner_id", &text)?);
            }
            "assigned_by" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    form.assigned_by = Some(parse_id("assigned_by", &text)?);
                }
            }
            "description" => {
                form.description = field.text().await.map_err(multipart_error)?;
            }
            "tag_ids" => {
                let text = field.text().await.map_err(multipart_error)?;
                form.tag_ids.extend(parse_tag_list(Some(&text))?);
            }
            other => tracing::debug!("Ignoring upload field {}", other),
        }
    }

    Ok(form)
}

async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileWithTags>)> {
    let form = read_upload_form(multipart).await?;

    let (Some(original_name), Some(bytes)) = (form.filename, form.bytes) else {
        return Err(ArchiveError::validation("no file provided"));
    };
    let filename = sanitize_filename(&original_name);
    if filename.is_empty() {
        return Err(ArchiveError::validation("no file selected"));
    }
    if !extension_allowed(&filename, &state.config.allowed_extensions) {
        return Err(ArchiveError::validation(format!(
            "file type not allowed: {}",
            filename
        )));
    }
    let owner_id = form
        .owner_id
        .ok_or_else(|| ArchiveError::validation("owner_id is required"))?;
    state.storage.read(|t| t.user(owner_id).map(|_| ())).await?;

    let locator = state.uploads.save(owner_id, &filename, &bytes).await?;
    // Generic or missing types are refined from the extension.
    let content_type = form
        .content_type
        .filter(|t| t != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
    let new = NewFile {
        name: filename,
        storage_locator: locator.clone(),
        content_type,
        size_bytes: bytes.len() as u64,
        description: form.description,
    };
    let tag_ids = form.tag_ids;
    let assigned_by = form.assigned_by.or(Some(owner_id));

    let created = state
        .storage
        .transact(|t| {
            let file = t.create_file_with_tags(owner_id, new, &tag_ids, assigned_by)?;
            with_tags(t, file)
        })
        .await;

    match created {
        Ok(file) => {
            tracing::info!(
                id = file.file.id,
                owner = owner_id,
                size = file.file.size_bytes,
                tags = file.tags.len(),
                "Uploaded {}",
                file.file.name
            );
            Ok((StatusCode::CREATED, Json(file)))
        }
        Err(err) => {
            state.uploads.remove(&locator).await;
            Err(err)
        }
    }
}

async fn file_tags(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
) -> Result<Json<FileTagsResponse>> {
    let tags = state
        .storage
        .read(|t| t.tag_summaries_for_file(file_id))
        .await?;
    Ok(Json(FileTagsResponse { file_id, tags }))
}

async fn assign_tags(
    State(state): State<AppState>,
    Path(file_id): Path<FileId>,
    Json(payload): Json<AssignTagsRequest>,
) -> Result<Json<FileTagsResponse>> {
    let tags = state
        .storage
        .transact(|t| {
            t.assign_tags(file_id, &payload.tag_ids, payload.assigned_by, payload.replace)?;
            t.tag_summaries_for_file(file_id)
        })
        .await?;
    tracing::info!(
        file = file_id,
        tags = tags.len(),
        replace = payload.replace,
        "Assigned tags"
    );
    Ok(Json(FileTagsResponse { file_id, tags }))
}

async fn remove_file_tag(
    State(state): State<AppState>,
    Path((file_id, tag_id)): Path<(FileId, TagId)>,
) -> Result<StatusCode> {
    let removed = state
        .storage
        .transact(|t| t.remove_tag(file_id, tag_id))
        .await?;
    if removed {
        tracing::info!(file = file_id, tag = tag_id, "Removed tag from file");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn navigate(
    State(state): State<AppState>,
    Json(payload): Json<NavigateRequest>,
) -> Result<Json<Navigation>> {
    let navigation = state
        .storage
        .read(|t| NavigationEngine::new(t, payload.user_id)?.navigate(&payload.filter))
        .await?;
    Ok(Json(navigation))
}

/// Navigation from a flat tag list; tags are grouped by their dimension.
async fn navigate_by_tags(
    State(state): State<AppState>,
    Query(query): Query<TagSelectionQuery>,
) -> Result<Json<Navigation>> {
    let tag_ids = parse_tag_list(query.tags.as_deref())?;
    let navigation = state
        .storage
        .read(|t| {
            let filter = FilterState::from_tag_ids(t, &tag_ids)?;
            NavigationEngine::new(t, query.user_id)?.navigate(&filter)
        })
        .await?;
    Ok(Json(navigation))
}

/// Next-step counts for a single dimension.
async fn dimension_counts(
    State(state): State<AppState>,
    Query(query): Query<CountsQuery>,
) -> Result<Json<TagCountsResponse>> {
    let tag_ids = parse_tag_list(query.tags.as_deref())?;
    let counts = state
        .storage
        .read(|t| {
            let filter = FilterState::from_tag_ids(t, &tag_ids)?;
            NavigationEngine::new(t, query.user_id)?.tag_counts(&filter, &query.dimension)
        })
        .await?;
    Ok(Json(TagCountsResponse {
        dimension: query.dimension.to_ascii_uppercase(),
        counts,
    }))
}

async fn list_users(State(state): State<AppState>) -> Json<UserListResponse> {
    let users = state.storage.read(|t| t.list_users()).await;
    Json(UserListResponse { users })
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.storage.transact(|t| t.create_user(payload)).await?;
    tracing::info!(id = user.id, "Created user {}", user.email);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>> {
    let user = state.storage.read(|t| t.get_user(user_id)).await?;
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<StatusCode> {
    let removed = state.storage.transact(|t| t.delete_user(user_id)).await?;
    for file in &removed {
        state.uploads.remove(&file.storage_locator).await;
    }
    tracing::info!(id = user_id, files = removed.len(), "Deleted user");
    Ok(StatusCode::NO_CONTENT)
}

async fn user_files(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserFilesResponse>> {
    let files = state
        .storage
        .read(|t| t.list_files_by_owner(user_id))
        .await?;
    Ok(Json(UserFilesResponse { user_id, files }))
}

async fn user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserStats>> {
    let stats = state.storage.read(|t| t.user_stats(user_id)).await?;
    Ok(Json(stats))
}
