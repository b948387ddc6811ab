use crate::coordination::{CoordinationStore, LockHandle};
use crate::domain::{
    ComponentDefinition, ComponentKind, ErrorEvent, HeartbeatRecord, HeartbeatStatus,
    HeartbeatUpdate, NewErrorEvent,
};
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Row};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// PostgreSQL coordination store
///
/// Ordinary reads and writes share the pool. Each lock gets its own
/// dedicated connection that is never used for anything else.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    connect_options: PgConnectOptions,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let connect_options = PgConnectOptions::from_str(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options.clone().application_name("ploy-scheduler"))
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self {
            pool,
            connect_options,
        })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn heartbeat_from_row(r: &PgRow) -> Result<HeartbeatRecord> {
    let status: String = r.try_get("status")?;
    Ok(HeartbeatRecord {
        component_id: r.try_get("component_id")?,
        instance_id: r.try_get("instance_id")?,
        host: r.try_get("host")?,
        pid: r.try_get("pid")?,
        started_at: r.try_get("started_at")?,
        last_heartbeat_at: r.try_get("last_heartbeat_at")?,
        status: HeartbeatStatus::from_str(&status).map_err(SchedulerError::Validation)?,
        last_error_at: r.try_get("last_error_at")?,
        last_error_message: r.try_get("last_error_message")?,
    })
}

#[async_trait]
impl CoordinationStore for PostgresStore {
    #[instrument(skip(self, defs), fields(count = defs.len()))]
    async fn register_components(&self, defs: &[ComponentDefinition]) -> Result<()> {
        for def in defs {
            sqlx::query(
                r#"
                INSERT INTO scheduler_components
                    (component_id, kind, group_name, description, expected_interval_ms,
                     default_enabled, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                ON CONFLICT (component_id) DO UPDATE SET
                    kind = EXCLUDED.kind,
                    group_name = EXCLUDED.group_name,
                    description = EXCLUDED.description,
                    expected_interval_ms = EXCLUDED.expected_interval_ms,
                    default_enabled = EXCLUDED.default_enabled,
                    updated_at = NOW()
                "#,
            )
            .bind(&def.id)
            .bind(def.kind.as_str())
            .bind(&def.group)
            .bind(&def.description)
            .bind(def.expected_interval_ms)
            .bind(def.default_enabled)
            .execute(&self.pool)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO scheduler_component_settings (component_id, enabled, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (component_id) DO NOTHING
                "#,
            )
            .bind(&def.id)
            .bind(def.default_enabled)
            .execute(&self.pool)
            .await?;
        }

        debug!("Upserted {} component definitions", defs.len());
        Ok(())
    }

    async fn list_components(&self) -> Result<Vec<ComponentDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT component_id, kind, group_name, description, expected_interval_ms,
                   default_enabled
            FROM scheduler_components
            ORDER BY component_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<ComponentDefinition> {
                let kind: String = r.try_get("kind")?;
                Ok(ComponentDefinition {
                    id: r.try_get("component_id")?,
                    kind: ComponentKind::from_str(&kind).map_err(SchedulerError::Validation)?,
                    group: r.try_get("group_name")?,
                    description: r.try_get("description")?,
                    expected_interval_ms: r.try_get("expected_interval_ms")?,
                    default_enabled: r.try_get("default_enabled")?,
                })
            })
            .collect()
    }

    async fn get_enabled(&self, component_id: &str) -> Result<Option<bool>> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(s.enabled, c.default_enabled) AS enabled
            FROM scheduler_components c
            LEFT JOIN scheduler_component_settings s ON s.component_id = c.component_id
            WHERE c.component_id = $1
            "#,
        )
        .bind(component_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("enabled")))
    }

    #[instrument(skip(self))]
    async fn set_enabled(
        &self,
        component_id: &str,
        enabled: bool,
        updated_by: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool> {
        // The SELECT guard makes unknown ids a no-op instead of an FK error
        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_component_settings
                (component_id, enabled, updated_at, updated_by, note)
            SELECT component_id, $2, NOW(), $3, $4
            FROM scheduler_components
            WHERE component_id = $1
            ON CONFLICT (component_id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                updated_at = EXCLUDED.updated_at,
                updated_by = EXCLUDED.updated_by,
                note = EXCLUDED.note
            "#,
        )
        .bind(component_id)
        .bind(enabled)
        .bind(updated_by)
        .bind(note)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_heartbeat(&self, update: &HeartbeatUpdate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_component_heartbeats
                (component_id, instance_id, host, pid, started_at, last_heartbeat_at,
                 status, last_error_at, last_error_message)
            VALUES ($1, $2, $3, $4, COALESCE($5, $6), $6, $7, $8, $9)
            ON CONFLICT (component_id, instance_id) DO UPDATE SET
                host = EXCLUDED.host,
                pid = EXCLUDED.pid,
                last_heartbeat_at = EXCLUDED.last_heartbeat_at,
                status = EXCLUDED.status,
                last_error_at = EXCLUDED.last_error_at,
                last_error_message = EXCLUDED.last_error_message
            "#,
        )
        .bind(&update.component_id)
        .bind(&update.instance_id)
        .bind(&update.host)
        .bind(update.pid)
        .bind(update.started_at)
        .bind(update.heartbeat_at)
        .bind(update.status.as_str())
        .bind(update.last_error_at)
        .bind(&update.last_error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_heartbeats(&self, component_id: Option<&str>) -> Result<Vec<HeartbeatRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT component_id, instance_id, host, pid, started_at, last_heartbeat_at,
                   status, last_error_at, last_error_message
            FROM scheduler_component_heartbeats
            WHERE $1::text IS NULL OR component_id = $1
            ORDER BY component_id, last_heartbeat_at DESC
            "#,
        )
        .bind(component_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(heartbeat_from_row).collect()
    }

    #[instrument(skip(self, event), fields(component = %event.component_id))]
    async fn record_error(&self, event: &NewErrorEvent) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO scheduler_error_events
                (component_id, occurred_at, host, pid, instance_id, message, traceback, context)
            VALUES ($1, NOW(), $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&event.component_id)
        .bind(&event.host)
        .bind(event.pid)
        .bind(&event.instance_id)
        .bind(&event.message)
        .bind(&event.traceback)
        .bind(&event.context)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn list_error_events(&self, component_id: &str, limit: i64) -> Result<Vec<ErrorEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, component_id, occurred_at, host, pid, instance_id, message,
                   traceback, context
            FROM scheduler_error_events
            WHERE component_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(component_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<ErrorEvent> {
                Ok(ErrorEvent {
                    id: r.try_get("id")?,
                    component_id: r.try_get("component_id")?,
                    occurred_at: r.try_get("occurred_at")?,
                    host: r.try_get("host")?,
                    pid: r.try_get("pid")?,
                    instance_id: r.try_get("instance_id")?,
                    message: r.try_get("message")?,
                    traceback: r.try_get("traceback")?,
                    context: r.try_get("context")?,
                })
            })
            .collect()
    }

    async fn try_lock(&self, key: i64, tag: &str) -> Result<Option<Box<dyn LockHandle>>> {
        let options = self.connect_options.clone().application_name(tag);
        let mut conn = PgConnection::connect_with(&options).await?;

        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1::bigint)")
            .bind(key)
            .fetch_one(&mut conn)
            .await;

        match acquired {
            Ok(true) => Ok(Some(Box::new(PgAdvisoryLock {
                key,
                conn: Mutex::new(Some(conn)),
                held: AtomicBool::new(true),
            }))),
            Ok(false) => {
                close_quietly(conn).await;
                Ok(None)
            }
            Err(e) => {
                close_quietly(conn).await;
                Err(e.into())
            }
        }
    }
}

async fn close_quietly(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close lock connection cleanly: {}", e);
    }
}

/// Session-scoped advisory lock tied to one dedicated connection.
///
/// Postgres drops the lock when the session ends, so a crash or a dropped
/// handle releases it as well.
struct PgAdvisoryLock {
    key: i64,
    conn: Mutex<Option<PgConnection>>,
    held: AtomicBool,
}

#[async_trait]
impl LockHandle for PgAdvisoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.held.store(false, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().await.take() {
            close_quietly(conn).await;
        }
    }
}
