use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub pdf_dir: Option<String>,
    pub log_retention_days: Option<u64>,

    // Sections
    pub koban: Option<KobanConfig>,
    pub workflow: Option<WorkflowConfig>,
    pub serializer: Option<SerializerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct KobanConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub user_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub request_max_attempts: Option<u32>,
    pub backoff_base_secs: Option<f64>,
    pub max_backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub duplicate_window_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SerializerConfig {
    pub invoice_prefix: Option<String>,
    pub payment_prefix: Option<String>,
    pub product_prefix: Option<String>,
    pub payment_mode_code: Option<String>,
    pub third_status_code: Option<String>,
    /// Koban user that new thirds and invoices are assigned to
    pub assigned_to: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
