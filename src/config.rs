use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_MAX_CONTENT_LENGTH: usize = 50 * 1024 * 1024;
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "mp4",
    "mp3",
];
const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {var}: {reason}")]
pub struct ConfigError {
    var: &'static str,
    value: String,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `None` keeps the archive in memory only.
    pub data_file: Option<PathBuf>,
    pub upload_dir: PathBuf,
    pub max_content_length: usize,
    pub allowed_extensions: BTreeSet<String>,
    pub seed_sample_data: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            data_file: Some(PathBuf::from("archive.json")),
            upload_dir: PathBuf::from("./uploads"),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            seed_sample_data: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(host) = lookup("ARCHIVE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", &port)?;
        }
        if let Some(path) = lookup("ARCHIVE_DATA_FILE") {
            config.data_file = (path != IN_MEMORY).then(|| PathBuf::from(path));
        }
        if let Some(dir) = lookup("UPLOAD_FOLDER") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(limit) = lookup("MAX_CONTENT_LENGTH") {
            config.max_content_length = parse("MAX_CONTENT_LENGTH", &limit)?;
        }
        if let Some(list) = lookup("ALLOWED_EXTENSIONS") {
            let extensions: BTreeSet<String> = list
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
            if extensions.is_empty() {
                return Err(ConfigError {
                    var: "ALLOWED_EXTENSIONS",
                    value: list,
                    reason: "at least one extension is required".to_string(),
                });
            }
            config.allowed_extensions = extensions;
        }
        if let Some(flag) = lookup("SEED_SAMPLE_DATA") {
            config.seed_sample_data = parse_bool("SEED_SAMPLE_DATA", &flag)?;
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
