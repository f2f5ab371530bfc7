use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use koban_sync::config::{AppConfig, CliConfig, FileConfig};
use koban_sync::drivers::{AuditLogger, SyncContext, SyncDrivers};
use koban_sync::jobs::SyncWorker;
use koban_sync::koban::{KobanTransport, ReqwestTransport};
use koban_sync::shop::{AddressType, ShopSnapshot, ShopStore, SqliteShopStore};
use koban_sync::store::{
    Checkpoints, EntityKind, EntityMetaStore, JobQueue, JobStatus, SqliteSyncStore,
    TransientLockStore, WorkflowLogFilter, WorkflowLogStore,
};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

fn parse_address_type(s: &str) -> Result<AddressType, String> {
    AddressType::from_str(s).ok_or_else(|| format!("Unknown address type: {}", s))
}

fn parse_entity_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::from_str(s).ok_or_else(|| format!("Unknown entity kind: {}", s))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the database files (koban_sync.db, shop.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Where invoice PDFs are stored. Defaults to <db_dir>/invoices.
    #[clap(long, value_parser = parse_path)]
    pub pdf_dir: Option<PathBuf>,

    /// Base URL of the Koban API.
    #[clap(long)]
    pub koban_api_url: Option<String>,

    /// Koban API key (x-ncapi header).
    #[clap(long)]
    pub koban_api_key: Option<String>,

    /// Koban user key (x-ncuser header).
    #[clap(long)]
    pub koban_user_key: Option<String>,

    /// Timeout in seconds for Koban requests.
    #[clap(long)]
    pub koban_timeout_secs: Option<u64>,

    /// Seconds between two polls of the job queue.
    #[clap(long)]
    pub poll_interval_secs: Option<u64>,

    /// Maximum number of jobs run at the same time.
    #[clap(long)]
    pub concurrency: Option<usize>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the worker until interrupted.
    Run,

    /// Schedules a sync as the shop would on one of its events.
    Trigger {
        #[clap(subcommand)]
        event: TriggerEvent,
    },

    /// Shows the sync meta stored for an entity.
    Status {
        #[clap(value_parser = parse_entity_kind)]
        kind: EntityKind,
        id: i64,
    },

    /// Imports a JSON shop snapshot into shop.db.
    Import {
        #[clap(value_parser = parse_path)]
        snapshot: PathBuf,
    },

    /// Prints the workflow log, most recent first.
    Log {
        /// Only entries of this workflow.
        #[clap(long)]
        workflow_id: Option<String>,

        /// Only entries of this entity kind.
        #[clap(long, value_parser = parse_entity_kind)]
        kind: Option<EntityKind>,

        /// Only entries of this entity id.
        #[clap(long)]
        id: Option<i64>,

        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum TriggerEvent {
    /// An order has been paid.
    PaymentComplete { order_id: i64 },

    /// A customer saved one of their addresses.
    AddressSaved {
        customer_id: i64,
        #[clap(value_parser = parse_address_type, default_value = "billing")]
        address_type: AddressType,
    },

    /// A product has been saved.
    ProductUpdated { product_id: i64 },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            db_dir: args.db_dir.clone(),
            pdf_dir: args.pdf_dir.clone(),
            koban_api_url: args.koban_api_url.clone(),
            koban_api_key: args.koban_api_key.clone(),
            koban_user_key: args.koban_user_key.clone(),
            koban_timeout_secs: args.koban_timeout_secs,
            poll_interval_secs: args.poll_interval_secs,
            concurrency: args.concurrency,
        }
    }
}

/// Stores opened from the configured db_dir.
struct Stores {
    sync: Arc<SqliteSyncStore>,
    shop: Arc<SqliteShopStore>,
}

impl Stores {
    fn open(app_config: &AppConfig) -> Result<Self> {
        if !app_config.sync_db_path().exists() {
            info!(
                "Creating new sync database at {:?}",
                app_config.sync_db_path()
            );
        }
        let sync = Arc::new(SqliteSyncStore::new(app_config.sync_db_path())?);
        let shop = Arc::new(SqliteShopStore::new(app_config.shop_db_path())?);
        Ok(Self { sync, shop })
    }

    fn sync_context(&self, app_config: &AppConfig) -> Result<SyncContext> {
        let transport: Arc<dyn KobanTransport> = Arc::new(ReqwestTransport::new(&app_config.koban)?);
        Ok(SyncContext {
            shop: self.shop.clone() as Arc<dyn ShopStore>,
            checkpoints: Checkpoints::new(self.sync.clone() as Arc<dyn EntityMetaStore>),
            job_queue: self.sync.clone() as Arc<dyn JobQueue>,
            locks: self.sync.clone() as Arc<dyn TransientLockStore>,
            audit: AuditLogger::new(self.sync.clone() as Arc<dyn WorkflowLogStore>),
            transport,
            koban: app_config.koban.clone(),
            serializer: app_config.serializer.clone(),
            workflow: app_config.workflow.clone(),
            pdf_dir: app_config.pdf_dir.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;
    let stores = Stores::open(&app_config)?;

    match cli_args.command {
        Command::Run => run(&app_config, &stores).await,
        Command::Trigger { event } => trigger(&app_config, &stores, event).await,
        Command::Status { kind, id } => status(&stores, kind, id),
        Command::Import { snapshot } => import(&stores, &snapshot),
        Command::Log {
            workflow_id,
            kind,
            id,
            limit,
        } => print_log(
            &stores,
            WorkflowLogFilter {
                workflow_id,
                entity_kind: kind,
                entity_id: id,
                limit: Some(limit),
                ..Default::default()
            },
        ),
    }
}

async fn run(app_config: &AppConfig, stores: &Stores) -> Result<()> {
    app_config.koban.ensure_usable()?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  pdf_dir: {:?}", app_config.pdf_dir);
    info!("  koban api: {}", app_config.koban.api_url);

    let ctx = stores.sync_context(app_config)?;
    let drivers = Arc::new(SyncDrivers::new(ctx));
    let shutdown_token = CancellationToken::new();

    // Spawn background task for workflow log pruning if enabled
    if app_config.log_retention_days > 0 {
        let retention_days = app_config.log_retention_days;
        let log_store = stores.sync.clone();
        let prune_token = shutdown_token.child_token();

        info!(
            "Workflow log pruning enabled: retaining {} days",
            retention_days
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = prune_token.cancelled() => break,
                }

                let cutoff = chrono::Utc::now().timestamp() - (retention_days as i64 * 24 * 60 * 60);
                match log_store.cleanup_older_than(cutoff) {
                    Ok(count) => {
                        if count > 0 {
                            info!("Pruned {} old workflow log entries", count);
                        }
                    }
                    Err(e) => {
                        error!("Failed to prune workflow log: {:#}", e);
                    }
                }
            }
        });
    }

    let worker = SyncWorker::new(
        drivers,
        stores.sync.clone() as Arc<dyn JobQueue>,
        Duration::from_secs(app_config.workflow.poll_interval_secs),
        app_config.workflow.concurrency,
        shutdown_token.child_token(),
    );

    tokio::select! {
        _ = worker.run() => {
            info!("Worker stopped");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Give running jobs a moment to record their outcome
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(())
}

async fn trigger(app_config: &AppConfig, stores: &Stores, event: TriggerEvent) -> Result<()> {
    let drivers = SyncDrivers::new(stores.sync_context(app_config)?);

    let scheduled = match event {
        TriggerEvent::PaymentComplete { order_id } => drivers.payment.schedule(order_id)?,
        TriggerEvent::AddressSaved {
            customer_id,
            address_type,
        } => drivers.address.schedule(customer_id, address_type)?,
        TriggerEvent::ProductUpdated { product_id } => {
            drivers.product.schedule(product_id).await?
        }
    };

    match scheduled {
        Some(workflow_id) => println!("Scheduled workflow {}", workflow_id),
        None => println!("Nothing scheduled"),
    }
    Ok(())
}

fn status(stores: &Stores, kind: EntityKind, id: i64) -> Result<()> {
    let mut meta: Vec<(String, String)> = stores.sync.get_all_meta(kind, id)?.into_iter().collect();
    if meta.is_empty() {
        println!("No sync data for {} {}", kind, id);
        return Ok(());
    }

    meta.sort();
    println!("{} {}", kind, id);
    for (key, value) in meta {
        println!("  {}: {}", key, value);
    }

    let pending = stores.sync.list_jobs(Some(JobStatus::Pending), 100)?;
    let field = format!("{}_id", if kind == EntityKind::User { "customer" } else { kind.as_str() });
    for job in pending
        .iter()
        .filter(|job| job.payload.get(&field).and_then(|v| v.as_i64()) == Some(id))
    {
        println!("  pending job {} ({}) at {}", job.id, job.name, job.scheduled_at);
    }
    Ok(())
}

fn import(stores: &Stores, snapshot_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(snapshot_path)
        .with_context(|| format!("Failed to read snapshot {:?}", snapshot_path))?;
    let snapshot: ShopSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot {:?}", snapshot_path))?;
    if snapshot.orders.is_empty()
        && snapshot.customers.is_empty()
        && snapshot.products.is_empty()
        && snapshot.categories.is_empty()
    {
        bail!("Snapshot {:?} is empty", snapshot_path);
    }

    for order in &snapshot.orders {
        stores.shop.upsert_order(order)?;
    }
    for customer in &snapshot.customers {
        stores.shop.upsert_customer(customer)?;
    }
    for product in &snapshot.products {
        stores.shop.upsert_product(product)?;
    }
    let checkpoints = Checkpoints::new(stores.sync.clone() as Arc<dyn EntityMetaStore>);
    for category in &snapshot.categories {
        checkpoints.set_category_code(category.id, &category.koban_code)?;
    }

    info!(
        "Imported {} orders, {} customers, {} products and {} category codes",
        snapshot.orders.len(),
        snapshot.customers.len(),
        snapshot.products.len(),
        snapshot.categories.len()
    );
    Ok(())
}

fn print_log(stores: &Stores, filter: WorkflowLogFilter) -> Result<()> {
    for entry in stores.sync.get_events(filter)? {
        let time = chrono::DateTime::from_timestamp(entry.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| entry.timestamp.to_string());
        let entity = match (entry.entity_kind, entry.entity_id) {
            (Some(kind), Some(id)) => format!("{} {}", kind, id),
            _ => "-".to_string(),
        };
        println!(
            "{} {} {} {} {}",
            time,
            entry.event_type.as_str(),
            entry.workflow_id.as_deref().unwrap_or("-"),
            entity,
            entry
                .details
                .map(|d| d.to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}
