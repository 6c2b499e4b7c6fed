use std::collections::BTreeMap;
use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Reporter table used when `REPORTER_KEYS` is unset or malformed.
pub const DEFAULT_REPORTER_KEYS: &str = "WA=1,OH=2,NY=3,FL=4,MI=5";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub aws: AwsConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
    pub pipeline: PipelineConfig,
    pub reporters: ReporterTable,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VOTEFILE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VOTEFILE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            aws: AwsConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            batch: BatchConfig::from_env_profiled(p),
            pipeline: PipelineConfig::from_env_profiled(p),
            reporters: ReporterTable::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  aws:       region={}, static_credentials={}",
            self.aws.region,
            self.aws.has_static_credentials()
        );
        tracing::info!(
            "  queue:     url={}",
            self.queue.queue_url.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  batch:     queue={}, definitions={}/{}/{}",
            self.batch.job_queue,
            self.batch.copy_job_definition,
            self.batch.decompress_job_definition,
            self.batch.etl_job_definition
        );
        tracing::info!(
            "  pipeline:  work_dir={}, etl_config={}, tag={}",
            self.pipeline.work_dir,
            self.pipeline.etl_config,
            self.pipeline.jurisdiction_tag
        );
        tracing::info!("  reporters: {}", self.reporters);
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }

    /// Both halves of a static key pair are present; otherwise the SDK's
    /// default provider chain (instance role, SSO, ...) is used.
    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }

    /// Endpoint override normalised to carry a scheme.
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint_url.as_ref().map(|endpoint| {
            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{endpoint}")
            }
        })
    }
}

// ── Queue (storage notifications) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_url: Option<String>,
    pub dlq_url: Option<String>,
    pub max_batch_size: u32,
    pub visibility_timeout_secs: u32,
    pub wait_time_secs: u32,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            queue_url: profiled_env_opt(p, "QUEUE_URL"),
            dlq_url: profiled_env_opt(p, "QUEUE_DLQ_URL"),
            max_batch_size: profiled_env_u32(p, "QUEUE_MAX_BATCH_SIZE", 10),
            visibility_timeout_secs: profiled_env_u32(p, "QUEUE_VISIBILITY_TIMEOUT_SECS", 300),
            wait_time_secs: profiled_env_u32(p, "QUEUE_WAIT_TIME_SECS", 20),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.queue_url.is_some()
    }
}

// ── Batch backend ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub job_queue: String,
    pub copy_job_definition: String,
    pub decompress_job_definition: String,
    /// Shared by transform, precinct-load and final-load.
    pub etl_job_definition: String,
}

impl BatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            job_queue: profiled_env_or(p, "BATCH_JOB_QUEUE", "National-Voter-File-Job-Queue"),
            copy_job_definition: profiled_env_or(p, "BATCH_COPY_JOB_DEFINITION", "S3Ops"),
            decompress_job_definition: profiled_env_or(
                p,
                "BATCH_DECOMPRESS_JOB_DEFINITION",
                "BusyBox",
            ),
            etl_job_definition: profiled_env_or(p, "BATCH_ETL_JOB_DEFINITION", "ETL"),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            job_queue: "National-Voter-File-Job-Queue".to_string(),
            copy_job_definition: "S3Ops".to_string(),
            decompress_job_definition: "BusyBox".to_string(),
            etl_job_definition: "ETL".to_string(),
        }
    }
}

// ── Pipeline layout ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Shared mount the copy stage writes into and later stages read from.
    pub work_dir: String,
    /// Config file handed to every ETL stage via `--configfile`.
    pub etl_config: String,
    /// Bucket tag holding the jurisdiction code.
    pub jurisdiction_tag: String,
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            work_dir: profiled_env_or(p, "PIPELINE_WORK_DIR", "/work"),
            etl_config: profiled_env_or(p, "PIPELINE_ETL_CONFIG", "/work/load_conf.json"),
            jurisdiction_tag: profiled_env_or(p, "PIPELINE_JURISDICTION_TAG", "state_name"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: "/work".to_string(),
            etl_config: "/work/load_conf.json".to_string(),
            jurisdiction_tag: "state_name".to_string(),
        }
    }
}

// ── Reporter table ────────────────────────────────────────────

/// Jurisdiction code → reporter key. Fixed at startup; a missing entry is
/// an error for the caller, never a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterTable(BTreeMap<String, u32>);

impl ReporterTable {
    pub fn new(entries: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Parse `CODE=KEY` pairs separated by commas. Whitespace around
    /// entries is ignored; empty entries are skipped.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (code, key) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidReporterEntry(entry.to_string()))?;
            let code = code.trim();
            if code.is_empty() {
                return Err(ConfigError::InvalidReporterEntry(entry.to_string()));
            }
            let key = key.trim().parse::<u32>().map_err(|_| ConfigError::InvalidReporterKey {
                jurisdiction: code.to_string(),
                value: key.trim().to_string(),
            })?;
            entries.insert(code.to_string(), key);
        }
        Ok(Self(entries))
    }

    pub fn get(&self, jurisdiction: &str) -> Option<u32> {
        self.0.get(jurisdiction).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn from_env_profiled(p: &str) -> Self {
        let raw = profiled_env_or(p, "REPORTER_KEYS", DEFAULT_REPORTER_KEYS);
        match Self::parse(&raw) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "REPORTER_KEYS is malformed, using built-in table");
                Self::default()
            }
        }
    }
}

impl Default for ReporterTable {
    fn default() -> Self {
        Self::new(
            [("WA", 1), ("OH", 2), ("NY", 3), ("FL", 4), ("MI", 5)]
                .into_iter()
                .map(|(code, key)| (code.to_string(), key)),
        )
    }
}

impl fmt::Display for ReporterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", rendered.join(","))
    }
}
