//! Initial task seeding.
//!
//! A seeder is awaited exactly once at startup. Whatever happens, the
//! caller ends up with a task list: either the seeded one, or the bundled
//! mock dataset plus a message for the user.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, expand_tilde};
use crate::task::{Category, EstimatedDuration, SeedRecord};

pub const SEED_FAILURE_MESSAGE: &str = "Unable to load tasks, please try again later.";

const MOCK_TASKS_TOML: &str = include_str!("../data/mock_tasks.toml");

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("seeding is not configured: {0}")]
    NotConfigured(String),
    #[error("seeding request failed: {0}")]
    Transport(String),
    #[error("seeding service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("seeding response was malformed: {0}")]
    Malformed(String),
    #[error("failed to read seed file {path}: {message}")]
    File { path: PathBuf, message: String },
}

#[async_trait]
pub trait TaskSeeder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<Vec<SeedRecord>, SeedError>;
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    tasks: Vec<SeedRecord>,
}

fn parse_seed_toml(raw: &str) -> Result<Vec<SeedRecord>, String> {
    toml::from_str::<SeedFile>(raw)
        .map(|file| file.tasks)
        .map_err(|e| e.to_string())
}

/// Rejects the whole batch when any record fails [`SeedRecord::validate`].
fn validate_records(records: &[SeedRecord]) -> Result<(), String> {
    for (index, record) in records.iter().enumerate() {
        record
            .validate()
            .map_err(|e| format!("task {index}: {e}"))?;
    }
    Ok(())
}

/// The bundled offline dataset.
pub fn mock_records() -> anyhow::Result<Vec<SeedRecord>> {
    parse_seed_toml(MOCK_TASKS_TOML)
        .map_err(|e| anyhow::anyhow!("bundled mock tasks are invalid: {e}"))
}

#[derive(Debug, Default)]
pub struct MockSeeder;

#[async_trait]
impl TaskSeeder for MockSeeder {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch(&self) -> Result<Vec<SeedRecord>, SeedError> {
        mock_records().map_err(|e| SeedError::Malformed(e.to_string()))
    }
}

/// Reads `[[tasks]]` records from a TOML file.
#[derive(Debug)]
pub struct FileSeeder {
    path: PathBuf,
}

impl FileSeeder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: expand_tilde(path.as_ref()),
        }
    }
}

#[async_trait]
impl TaskSeeder for FileSeeder {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self) -> Result<Vec<SeedRecord>, SeedError> {
        let file_error = |message: String| SeedError::File {
            path: self.path.clone(),
            message,
        };
        let raw = fs::read_to_string(&self.path).map_err(|e| file_error(e.to_string()))?;
        let records = parse_seed_toml(&raw).map_err(file_error)?;
        validate_records(&records).map_err(file_error)?;
        Ok(records)
    }
}

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl GeminiSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let key_env = cfg
            .get("gemini.api_key_env")
            .unwrap_or_else(|| "API_KEY".to_string());
        let api_key = std::env::var(&key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let timeout_secs = cfg.get_u64("gemini.timeout")?.unwrap_or(30);

        Ok(Self {
            endpoint: cfg.get("gemini.endpoint").unwrap_or_default(),
            model: cfg.get("gemini.model").unwrap_or_default(),
            api_key,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        })
    }
}

pub struct GeminiSeeder {
    client: reqwest::Client,
    settings: GeminiSettings,
}

impl GeminiSeeder {
    pub fn new(settings: GeminiSettings) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("failed building HTTP client for task seeding")?;
        Ok(Self { client, settings })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }
}

#[async_trait]
impl TaskSeeder for GeminiSeeder {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip_all)]
    async fn fetch(&self) -> Result<Vec<SeedRecord>, SeedError> {
        debug!(model = %self.settings.model, "requesting sample tasks");
        let api_key = self.settings.api_key.as_deref().ok_or_else(|| {
            SeedError::NotConfigured("no API key in the configured environment variable".into())
        })?;

        let body = generate_content_request().to_string();
        let response = self
            .client
            .post(self.url())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", api_key)
            .body(body)
            .send()
            .await
            .map_err(|e| SeedError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SeedError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(SeedError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let records = parse_generate_content_response(&text)?;
        debug!(count = records.len(), "gemini returned sample tasks");
        Ok(records)
    }
}

fn seed_prompt() -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join("、");
    let durations = EstimatedDuration::ALL
        .iter()
        .map(|d| format!("'{}'", d.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Generate 10 varied sample tasks for a neighbourhood mutual-help platform. \
         Spread them over these categories, using the labels exactly: {categories}. \
         Each task needs a title, a detailed description, the category, a reward in \
         New Taiwan dollars, a random Taiwanese address as location, a random poster \
         name, the poster's trust score (integer 1-5), whether the poster is a \
         certified helper, whether the task requires social-welfare certification, and \
         an estimated duration chosen from {durations}. When the poster is certified, \
         also invent the certifying organisation (posterCertificationOrg). Give some \
         tasks an optional deadline formatted 'YYYY-MM-DDTHH:mm'. Write all text in \
         Traditional Chinese."
    )
}

fn response_schema() -> Value {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
    let durations: Vec<&str> = EstimatedDuration::ALL.iter().map(|d| d.label()).collect();

    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "description": { "type": "STRING" },
                "category": { "type": "STRING", "enum": categories },
                "reward": { "type": "INTEGER" },
                "location": { "type": "STRING" },
                "posterName": { "type": "STRING" },
                "posterTrustScore": { "type": "INTEGER" },
                "requiresCertification": { "type": "BOOLEAN" },
                "posterIsCertified": { "type": "BOOLEAN" },
                "posterCertificationOrg": { "type": "STRING" },
                "estimatedDuration": { "type": "STRING", "enum": durations },
                "deadline": { "type": "STRING" }
            },
            "required": [
                "title",
                "description",
                "category",
                "reward",
                "location",
                "posterName",
                "posterTrustScore",
                "requiresCertification",
                "posterIsCertified",
                "estimatedDuration"
            ]
        }
    })
}

fn generate_content_request() -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": seed_prompt() }]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema()
        }
    })
}

/// Pulls the JSON task array out of a `generateContent` response body.
pub fn parse_generate_content_response(body: &str) -> Result<Vec<SeedRecord>, SeedError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| SeedError::Malformed(e.to_string()))?;

    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| SeedError::Malformed("response has no candidate content".into()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    let payload = strip_code_fence(text.trim());
    if payload.is_empty() {
        return Err(SeedError::Malformed("candidate text is empty".into()));
    }

    let records = serde_json::from_str::<Vec<SeedRecord>>(payload)
        .map_err(|e| SeedError::Malformed(format!("task array: {e}")))?;
    validate_records(&records).map_err(SeedError::Malformed)?;
    Ok(records)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Builds the seeder selected by `seed.source`. `None` means "use the mock
/// dataset without complaint", which is what `auto` does without an API key.
pub fn seeder_from_config(cfg: &Config) -> anyhow::Result<Option<Box<dyn TaskSeeder>>> {
    let source = cfg
        .get("seed.source")
        .unwrap_or_else(|| "auto".to_string())
        .to_ascii_lowercase();

    match source.as_str() {
        "mock" => Ok(None),
        "file" => {
            let path = cfg
                .get("seed.file")
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("seed.source = file requires seed.file"))?;
            Ok(Some(Box::new(FileSeeder::new(path))))
        }
        "gemini" => {
            let settings = GeminiSettings::from_config(cfg)?;
            Ok(Some(Box::new(GeminiSeeder::new(settings)?)))
        }
        "auto" => {
            let settings = GeminiSettings::from_config(cfg)?;
            if settings.api_key.is_none() {
                warn!("API key not found; using mock data");
                return Ok(None);
            }
            Ok(Some(Box::new(GeminiSeeder::new(settings)?)))
        }
        other => Err(anyhow::anyhow!("unknown seed.source: {other}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedSource {
    Seeder(&'static str),
    Mock,
}

impl fmt::Display for SeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedSource::Seeder(name) => f.write_str(name),
            SeedSource::Mock => f.write_str("mock"),
        }
    }
}

#[derive(Debug)]
pub struct SeedOutcome {
    pub records: Vec<SeedRecord>,
    pub source: SeedSource,
    /// User-facing message when seeding failed and mock data was used.
    pub error: Option<String>,
}

#[instrument(skip_all, fields(seeder = seeder.map(|s| s.name()).unwrap_or("none")))]
pub async fn load_initial_tasks(seeder: Option<&dyn TaskSeeder>) -> SeedOutcome {
    let Some(seeder) = seeder else {
        return mock_outcome(None);
    };

    match seeder.fetch().await {
        Ok(records) => {
            info!(count = records.len(), "seeded tasks loaded");
            SeedOutcome {
                records,
                source: SeedSource::Seeder(seeder.name()),
                error: None,
            }
        }
        Err(err) => {
            warn!(error = %err, "seeding failed; falling back to mock data");
            mock_outcome(Some(SEED_FAILURE_MESSAGE.to_string()))
        }
    }
}

fn mock_outcome(error: Option<String>) -> SeedOutcome {
    match mock_records() {
        Ok(records) => SeedOutcome {
            records,
            source: SeedSource::Mock,
            error,
        },
        Err(err) => {
            warn!(error = %err, "mock dataset unavailable; starting empty");
            SeedOutcome {
                records: vec![],
                source: SeedSource::Mock,
                error: Some(SEED_FAILURE_MESSAGE.to_string()),
            }
        }
    }
}
