use anyhow::{bail, Context};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const API_URL: &str = "http://localhost:3000";

#[derive(Parser)]
#[command(name = "cgrid")]
#[command(about = "Browse and tag files in a C-Grid archive", long_about = None)]
struct Cli {
    #[arg(long, default_value = API_URL, help = "Base URL of the archive API")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Check that the archive is up")]
    Health,

    #[command(about = "List dimensions")]
    Dimensions,

    #[command(about = "List tags with file counts")]
    Tags {
        #[arg(short, long, help = "Only tags of this dimension id")]
        dimension: Option<u64>,
    },

    #[command(about = "Show the tag hierarchy of every dimension")]
    Tree,

    #[command(about = "List files carrying all of the given tags")]
    Files {
        #[arg(short, long, help = "Comma-separated tag ids")]
        tags: Option<String>,

        #[arg(short, long, help = "Only files owned by this user id")]
        user: Option<u64>,
    },

    #[command(about = "Show matches and next-step counts for a tag selection")]
    Navigate {
        #[arg(short, long, help = "Comma-separated tag ids")]
        tags: Option<String>,

        #[arg(short, long, help = "Only files owned by this user id")]
        user: Option<u64>,
    },

    #[command(about = "Assign tags to a file")]
    Assign {
        #[arg(short, long, help = "File id")]
        file: u64,

        #[arg(short, long, help = "Comma-separated tag ids")]
        tags: String,

        #[arg(long, help = "Drop the file's current tags first")]
        replace: bool,

        #[arg(long, help = "User id recorded as the assigner")]
        by: Option<u64>,
    },

    #[command(about = "Upload a file")]
    Upload {
        #[arg(short, long, help = "Path of the file to upload")]
        path: PathBuf,

        #[arg(short, long, help = "Owner user id")]
        owner: u64,

        #[arg(short, long, help = "Comma-separated tag ids")]
        tags: Option<String>,

        #[arg(short, long, help = "Optional description")]
        description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Name {
    en: String,
    #[serde(default)]
    zh: String,
}

impl Name {
    fn display(&self) -> String {
        if self.zh.is_empty() {
            self.en.clone()
        } else {
            format!("{} / {}", self.en, self.zh)
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    files: usize,
}

#[derive(Debug, Deserialize)]
struct Dimension {
    id: u64,
    code: String,
    name: Name,
    display_order: i32,
}

#[derive(Debug, Deserialize)]
struct DimensionListResponse {
    dimensions: Vec<Dimension>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    id: u64,
    name: Name,
    level: u32,
    #[serde(default)]
    dimension_code: String,
    #[serde(default)]
    file_count: usize,
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct TagNode {
    id: u64,
    name: Name,
    children: Vec<TagNode>,
}

#[derive(Debug, Deserialize)]
struct DimensionTree {
    dimension: Dimension,
    tags: Vec<TagNode>,
}

#[derive(Debug, Deserialize)]
struct TagTreeResponse {
    dimensions: Vec<DimensionTree>,
}

#[derive(Debug, Deserialize)]
struct TagSummary {
    id: u64,
    name: Name,
    dimension_code: String,
}

#[derive(Debug, Deserialize)]
struct FileWithTags {
    id: u64,
    owner_id: u64,
    name: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    tags: Vec<TagSummary>,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    files: Vec<FileWithTags>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct TagCount {
    id: u64,
    name: Name,
    file_count: usize,
    is_selected: bool,
}

#[derive(Debug, Deserialize)]
struct DimensionCounts {
    dimension: Dimension,
    tags: Vec<TagCount>,
}

#[derive(Debug, Deserialize)]
struct Navigation {
    total_matching_files: usize,
    matching_file_ids: Vec<u64>,
    dimensions: Vec<DimensionCounts>,
}

#[derive(Debug, Serialize)]
struct AssignTagsRequest {
    tag_ids: Vec<u64>,
    assigned_by: Option<u64>,
    replace: bool,
}

#[derive(Debug, Deserialize)]
struct FileTagsResponse {
    file_id: u64,
    tags: Vec<TagSummary>,
}

struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> anyhow::Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Request failed ({}): {}", status, error_text);
        }
        response.json().await.context("Unexpected response body")
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let response = self.http.get(self.url(path)).query(query).send().await?;
        Self::parse(response).await
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url);

    let result = match cli.command {
        Commands::Health => health(&client).await,
        Commands::Dimensions => list_dimensions(&client).await,
        Commands::Tags { dimension } => list_tags(&client, dimension).await,
        Commands::Tree => show_tree(&client).await,
        Commands::Files { tags, user } => list_files(&client, tags, user).await,
        Commands::Navigate { tags, user } => navigate(&client, tags, user).await,
        Commands::Assign {
            file,
            tags,
            replace,
            by,
        } => assign(&client, file, &tags, replace, by).await,
        Commands::Upload {
            path,
            owner,
            tags,
            description,
        } => upload(&client, path, owner, tags, description).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn parse_ids(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("Invalid tag id {:?}", s)))
        .collect()
}

fn tag_query(tags: Option<String>, user: Option<u64>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(tags) = tags {
        query.push(("tags", tags));
    }
    if let Some(user) = user {
        query.push(("user_id", user.to_string()));
    }
    query
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

async fn health(client: &ApiClient) -> anyhow::Result<()> {
    let result: HealthResponse = client.get("/api/health", &[]).await?;
    println!("✅ Archive is {} ({} files)", result.status, result.files);
    Ok(())
}

async fn list_dimensions(client: &ApiClient) -> anyhow::Result<()> {
    let result: DimensionListResponse = client.get("/api/dimensions", &[]).await?;

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Code"),
        Cell::new("Name"),
        Cell::new("Order"),
    ]));
    for dimension in result.dimensions {
        table.add_row(Row::new(vec![
            Cell::new(&dimension.id.to_string()),
            Cell::new(&dimension.code),
            Cell::new(&dimension.name.display()),
            Cell::new(&dimension.display_order.to_string()),
        ]));
    }
    table.printstd();
    Ok(())
}

async fn list_tags(client: &ApiClient, dimension: Option<u64>) -> anyhow::Result<()> {
    let query: Vec<(&str, String)> = dimension
        .map(|d| vec![("dimension_id", d.to_string())])
        .unwrap_or_default();
    let result: TagListResponse = client.get("/api/tags", &query).await?;

    if result.tags.is_empty() {
        println!("📭 No tags found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Dimension"),
        Cell::new("Name"),
        Cell::new("Level"),
        Cell::new("Files"),
    ]));
    for tag in result.tags {
        table.add_row(Row::new(vec![
            Cell::new(&tag.id.to_string()),
            Cell::new(&tag.dimension_code),
            Cell::new(&tag.name.display()),
            Cell::new(&tag.level.to_string()),
            Cell::new(&tag.file_count.to_string()),
        ]));
    }
    table.printstd();
    Ok(())
}

fn print_nodes(nodes: &[TagNode], depth: usize) {
    for node in nodes {
        println!("{}- [{}] {}", "  ".repeat(depth + 1), node.id, node.name.display());
        print_nodes(&node.children, depth + 1);
    }
}

async fn show_tree(client: &ApiClient) -> anyhow::Result<()> {
    let result: TagTreeResponse = client.get("/api/tags/tree", &[]).await?;
    for tree in result.dimensions {
        println!("\n{} ({})", tree.dimension.code, tree.dimension.name.display());
        print_nodes(&tree.tags, 0);
    }
    println!();
    Ok(())
}

async fn list_files(
    client: &ApiClient,
    tags: Option<String>,
    user: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(tags) = &tags {
        parse_ids(tags)?;
    }
    let result: FileListResponse = client.get("/api/files", &tag_query(tags, user)).await?;

    if result.files.is_empty() {
        println!("📭 No matching files.");
        return Ok(());
    }

    println!("\n📁 Files ({} of {})\n", result.files.len(), result.total);

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Name"),
        Cell::new("Owner"),
        Cell::new("Size"),
        Cell::new("Created"),
        Cell::new("Tags"),
    ]));
    for file in result.files {
        let tags = file
            .tags
            .iter()
            .map(|t| format!("{}:{}", t.dimension_code, t.name.en))
            .collect::<Vec<_>>()
            .join(", ");
        let created = file.created_at.with_timezone(&Local);
        table.add_row(Row::new(vec![
            Cell::new(&file.id.to_string()),
            Cell::new(&file.name),
            Cell::new(&file.owner_id.to_string()),
            Cell::new(&format_size(file.size_bytes)),
            Cell::new(&created.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(&tags),
        ]));
    }
    table.printstd();
    println!();
    Ok(())
}

async fn navigate(
    client: &ApiClient,
    tags: Option<String>,
    user: Option<u64>,
) -> anyhow::Result<()> {
    if let Some(tags) = &tags {
        parse_ids(tags)?;
    }
    let result: Navigation = client
        .get("/api/cgrid/navigate", &tag_query(tags, user))
        .await?;

    println!(
        "\n🔎 {} matching files: {:?}\n",
        result.total_matching_files, result.matching_file_ids
    );

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Dimension"),
        Cell::new("Tag ID"),
        Cell::new("Tag"),
        Cell::new("Files"),
        Cell::new("Selected"),
    ]));
    for dimension in result.dimensions {
        for tag in dimension.tags {
            table.add_row(Row::new(vec![
                Cell::new(&dimension.dimension.code),
                Cell::new(&tag.id.to_string()),
                Cell::new(&tag.name.display()),
                Cell::new(&tag.file_count.to_string()),
                Cell::new(if tag.is_selected { "✓" } else { "" }),
            ]));
        }
    }
    table.printstd();
    println!();
    Ok(())
}

async fn assign(
    client: &ApiClient,
    file: u64,
    tags: &str,
    replace: bool,
    by: Option<u64>,
) -> anyhow::Result<()> {
    let payload = AssignTagsRequest {
        tag_ids: parse_ids(tags)?,
        assigned_by: by,
        replace,
    };

    let response = client
        .http
        .post(client.url(&format!("/api/files/{}/tags", file)))
        .json(&payload)
        .send()
        .await?;
    let result: FileTagsResponse = ApiClient::parse(response).await?;

    println!("✅ File {} now carries {} tags", result.file_id, result.tags.len());
    for tag in result.tags {
        println!("   [{}] {}: {}", tag.id, tag.dimension_code, tag.name.display());
    }
    Ok(())
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

async fn upload(
    client: &ApiClient,
    path: PathBuf,
    owner: u64,
    tags: Option<String>,
    description: Option<String>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .with_context(|| format!("{} has no usable file name", path.display()))?;

    let mut form = Form::new()
        .text("owner_id", owner.to_string())
        .part(
            "file",
            Part::bytes(bytes)
                .file_name(filename)
                .mime_str(&content_type_for(&path))?,
        );
    if let Some(tags) = tags {
        parse_ids(&tags)?;
        form = form.text("tag_ids", tags);
    }
    if let Some(description) = description {
        form = form.text("description", description);
    }

    let response = client
        .http
        .post(client.url("/api/files"))
        .multipart(form)
        .send()
        .await?;
    let result: FileWithTags = ApiClient::parse(response).await?;

    println!("✅ Uploaded {} as file {}", result.name, result.id);
    println!("   Size: {}", format_size(result.size_bytes));
    if !result.tags.is_empty() {
        let names: Vec<&str> = result.tags.iter().map(|t| t.name.en.as_str()).collect();
        println!("   Tags: {}", names.join(", "));
    }
    Ok(())
}
