mod file_config;

pub use file_config::{FileConfig, KobanConfig, SerializerConfig, WorkflowConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub pdf_dir: Option<PathBuf>,
    pub koban_api_url: Option<String>,
    pub koban_api_key: Option<String>,
    pub koban_user_key: Option<String>,
    pub koban_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// Where downloaded invoice PDFs are written
    pub pdf_dir: PathBuf,
    pub log_retention_days: u64,

    pub koban: KobanSettings,
    pub workflow: WorkflowSettings,
    pub serializer: SerializerSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let pdf_dir = file
            .pdf_dir
            .map(PathBuf::from)
            .or_else(|| cli.pdf_dir.clone())
            .unwrap_or_else(|| db_dir.join("invoices"));

        let log_retention_days = file.log_retention_days.unwrap_or(90);

        let koban_defaults = KobanSettings::default();
        let koban_file = file.koban.unwrap_or_default();
        let koban = KobanSettings {
            api_url: koban_file
                .api_url
                .or_else(|| cli.koban_api_url.clone())
                .unwrap_or(koban_defaults.api_url),
            api_key: koban_file
                .api_key
                .or_else(|| cli.koban_api_key.clone())
                .unwrap_or(koban_defaults.api_key),
            user_key: koban_file
                .user_key
                .or_else(|| cli.koban_user_key.clone())
                .unwrap_or(koban_defaults.user_key),
            timeout_secs: koban_file
                .timeout_secs
                .or(cli.koban_timeout_secs)
                .unwrap_or(koban_defaults.timeout_secs),
            request_max_attempts: koban_file
                .request_max_attempts
                .unwrap_or(koban_defaults.request_max_attempts),
            backoff_base_secs: koban_file
                .backoff_base_secs
                .unwrap_or(koban_defaults.backoff_base_secs),
            max_backoff_secs: koban_file
                .max_backoff_secs
                .unwrap_or(koban_defaults.max_backoff_secs),
        };
        if koban.timeout_secs == 0 {
            bail!("koban.timeout_secs must be greater than 0");
        }

        let workflow_defaults = WorkflowSettings::default();
        let workflow_file = file.workflow.unwrap_or_default();
        let workflow = WorkflowSettings {
            max_retries: workflow_file
                .max_retries
                .unwrap_or(workflow_defaults.max_retries),
            retry_delay_secs: workflow_file
                .retry_delay_secs
                .unwrap_or(workflow_defaults.retry_delay_secs),
            duplicate_window_secs: workflow_file
                .duplicate_window_secs
                .unwrap_or(workflow_defaults.duplicate_window_secs),
            poll_interval_secs: workflow_file
                .poll_interval_secs
                .or(cli.poll_interval_secs)
                .unwrap_or(workflow_defaults.poll_interval_secs),
            concurrency: workflow_file
                .concurrency
                .or(cli.concurrency)
                .unwrap_or(workflow_defaults.concurrency),
        };
        if workflow.concurrency == 0 {
            bail!("workflow.concurrency must be at least 1");
        }

        let serializer_defaults = SerializerSettings::default();
        let serializer_file = file.serializer.unwrap_or_default();
        let serializer = SerializerSettings {
            invoice_prefix: serializer_file
                .invoice_prefix
                .unwrap_or(serializer_defaults.invoice_prefix),
            payment_prefix: serializer_file
                .payment_prefix
                .unwrap_or(serializer_defaults.payment_prefix),
            product_prefix: serializer_file
                .product_prefix
                .unwrap_or(serializer_defaults.product_prefix),
            payment_mode_code: serializer_file
                .payment_mode_code
                .unwrap_or(serializer_defaults.payment_mode_code),
            third_status_code: serializer_file
                .third_status_code
                .unwrap_or(serializer_defaults.third_status_code),
            assigned_to: serializer_file.assigned_to,
        };

        Ok(Self {
            db_dir,
            pdf_dir,
            log_retention_days,
            koban,
            workflow,
            serializer,
        })
    }

    pub fn sync_db_path(&self) -> PathBuf {
        self.db_dir.join("koban_sync.db")
    }

    pub fn shop_db_path(&self) -> PathBuf {
        self.db_dir.join("shop.db")
    }
}

#[derive(Debug, Clone)]
pub struct KobanSettings {
    pub api_url: String,
    pub api_key: String,
    pub user_key: String,
    pub timeout_secs: u64,
    /// Attempts per request, the first one included
    pub request_max_attempts: u32,
    pub backoff_base_secs: f64,
    pub max_backoff_secs: u64,
}

impl KobanSettings {
    /// Check that the API can actually be called with these settings.
    pub fn ensure_usable(&self) -> Result<()> {
        if self.api_url.is_empty() {
            bail!("Koban API url must be set via --koban-api-url or [koban] api_url");
        }
        if self.api_key.is_empty() || self.user_key.is_empty() {
            bail!("Both Koban api_key and user_key must be set");
        }
        Ok(())
    }
}

impl Default for KobanSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            user_key: String::new(),
            timeout_secs: 15,
            request_max_attempts: 3,
            backoff_base_secs: 2.0,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Rescheduled runs after the first one
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub duplicate_window_secs: u64,
    pub poll_interval_secs: u64,
    pub concurrency: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_secs: 60,
            duplicate_window_secs: 3,
            poll_interval_secs: 5,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerializerSettings {
    pub invoice_prefix: String,
    pub payment_prefix: String,
    pub product_prefix: String,
    pub payment_mode_code: String,
    pub third_status_code: String,
    pub assigned_to: Option<String>,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            invoice_prefix: String::new(),
            payment_prefix: String::new(),
            product_prefix: "WKS-".to_string(),
            payment_mode_code: "CB".to_string(),
            third_status_code: "PTC".to_string(),
            assigned_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            pdf_dir: Some(PathBuf::from("/pdf")),
            koban_api_url: Some("https://koban.test/api/v1".to_string()),
            koban_api_key: Some("api".to_string()),
            koban_user_key: Some("user".to_string()),
            koban_timeout_secs: Some(20),
            poll_interval_secs: Some(1),
            concurrency: Some(2),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.pdf_dir, PathBuf::from("/pdf"));
        assert_eq!(config.koban.api_url, "https://koban.test/api/v1");
        assert_eq!(config.koban.timeout_secs, 20);
        assert_eq!(config.workflow.poll_interval_secs, 1);
        assert_eq!(config.workflow.concurrency, 2);
        assert!(config.koban.ensure_usable().is_ok());
    }

    #[test]
    fn test_resolve_defaults() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.pdf_dir, temp_dir.path().join("invoices"));
        assert_eq!(config.koban.timeout_secs, 15);
        assert_eq!(config.koban.request_max_attempts, 3);
        assert_eq!(config.koban.backoff_base_secs, 2.0);
        assert_eq!(config.workflow.max_retries, 2);
        assert_eq!(config.workflow.retry_delay_secs, 60);
        assert_eq!(config.workflow.duplicate_window_secs, 3);
        assert_eq!(config.serializer.product_prefix, "WKS-");
        assert_eq!(config.serializer.payment_mode_code, "CB");
        assert_eq!(config.serializer.third_status_code, "PTC");
        assert!(config.serializer.assigned_to.is_none());
        assert_eq!(config.log_retention_days, 90);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            koban_api_url: Some("https://cli.test".to_string()),
            koban_timeout_secs: Some(20),
            concurrency: Some(8),
            ..Default::default()
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            koban: Some(KobanConfig {
                api_url: Some("https://toml.test".to_string()),
                ..Default::default()
            }),
            workflow: Some(WorkflowConfig {
                max_retries: Some(5),
                ..Default::default()
            }),
            serializer: Some(SerializerConfig {
                invoice_prefix: Some("WC-".to_string()),
                assigned_to: Some("Sales Team".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.koban.api_url, "https://toml.test");
        assert_eq!(config.workflow.max_retries, 5);
        assert_eq!(config.serializer.invoice_prefix, "WC-");
        assert_eq!(config.serializer.assigned_to.as_deref(), Some("Sales Team"));
        // CLI value used when TOML doesn't specify
        assert_eq!(config.koban.timeout_secs, 20);
        assert_eq!(config.workflow.concurrency, 8);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_resolve_zero_concurrency_error() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_ensure_usable_requires_credentials() {
        let settings = KobanSettings {
            api_url: "https://koban.test".to_string(),
            api_key: "api".to_string(),
            ..Default::default()
        };
        assert!(settings.ensure_usable().is_err());
        assert!(KobanSettings::default().ensure_usable().is_err());
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.sync_db_path(), temp_dir.path().join("koban_sync.db"));
        assert_eq!(config.shop_db_path(), temp_dir.path().join("shop.db"));
    }
}
