use ploy_scheduler::adapters::{InMemoryStore, PostgresStore};
use ploy_scheduler::config::{LoggingConfig, SchedulerConfig};
use ploy_scheduler::coordination::CoordinationStore;
use ploy_scheduler::error::{Result, SchedulerError};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Load and validate configuration. `--in-memory` runs need no database URL.
pub(crate) fn load_config(path: &str, in_memory: bool) -> Result<SchedulerConfig> {
    let config = if in_memory && std::env::var("DATABASE_URL").is_err() {
        match SchedulerConfig::load_from(path) {
            Ok(config) => config,
            Err(_) => SchedulerConfig::with_database_url("memory://"),
        }
    } else {
        SchedulerConfig::load_from(path)?
    };

    config
        .validate()
        .map_err(|errors| SchedulerError::Validation(errors.join("; ")))?;
    Ok(config)
}

pub(crate) async fn open_store(
    config: &SchedulerConfig,
    in_memory: bool,
) -> Result<Arc<dyn CoordinationStore>> {
    if in_memory {
        warn!("Using in-memory coordination store: locks and flags are local to this process");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    Ok(Arc::new(store))
}

pub(crate) async fn open_postgres(config: &SchedulerConfig) -> Result<PostgresStore> {
    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    info!("Connected to coordination store");
    Ok(store)
}

/// Full logging for the supervision loop: console, optional JSON, and a
/// daily rolling file when the log directory is writable.
pub(crate) fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},ploy_scheduler=debug,sqlx=warn",
            logging.level
        ))
    });

    // Prefer PLOY_LOG_DIR, fall back to LOG_DIR, then /var/log/ploy
    let log_dir = std::env::var("PLOY_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/ploy".to_string());

    // `rolling::daily` panics if it cannot create the first file, so check
    // writability up front.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".ploy_scheduler_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender =
                    tracing_appender::rolling::daily(&log_dir, "ploy-scheduler.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Flushes on drop; the process lives until exit
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    } else {
        eprintln!(
            "Warning: Could not create log directory {}, file logging disabled",
            log_dir
        );
        None
    };

    let (json_layer, console_layer) = if logging.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("Logging to: {}/ploy-scheduler.log", log_dir);
    }
}

/// Minimal logging for one-shot operator commands
pub(crate) fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
