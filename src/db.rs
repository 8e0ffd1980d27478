//! Backing-store pools and the store registry.
//!
//! A [`StoreRegistry`] is built once at startup from the `[database.*]` sections,
//! handed by reference to every store, and closed explicitly at shutdown.

use log::{info, warn};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{ConnectOptions, FromRow};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{AppConfig, DatabaseBackend, DatabaseConfig};
use crate::constants::{DEFAULT_STORE_NAME, KEY_TABLE, SEGMENT_TABLE};
use crate::credentials::{postgres_password, Credentials};
use crate::error::StoreError;
use crate::queries::{ddl, Backend};
use crate::shard;

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Statements slower than this are logged at warn level
const SLOW_STATEMENT_THRESHOLD: Duration = Duration::from_millis(200);

/// Connection pool of one backing store
#[derive(Debug, Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl DbPool {
    pub fn backend(&self) -> Backend {
        match self {
            DbPool::Sqlite(_) => Backend::Sqlite,
            DbPool::Postgres(_) => Backend::Postgres,
        }
    }

    /// Run one statement, returning the affected row count
    pub async fn execute(&self, sql: &str) -> Result<u64, sqlx::Error> {
        let result = match self {
            DbPool::Sqlite(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            DbPool::Postgres(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
        };
        Ok(result)
    }

    pub async fn fetch_all<T>(&self, sql: &str) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        match self {
            DbPool::Sqlite(pool) => sqlx::query_as::<_, T>(sql).fetch_all(pool).await,
            DbPool::Postgres(pool) => sqlx::query_as::<_, T>(sql).fetch_all(pool).await,
        }
    }

    pub async fn fetch_optional<T>(&self, sql: &str) -> Result<Option<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        match self {
            DbPool::Sqlite(pool) => sqlx::query_as::<_, T>(sql).fetch_optional(pool).await,
            DbPool::Postgres(pool) => sqlx::query_as::<_, T>(sql).fetch_optional(pool).await,
        }
    }

    /// Run a `SELECT COUNT(..)` statement
    pub async fn fetch_count(&self, sql: &str) -> Result<i64, sqlx::Error> {
        match self {
            DbPool::Sqlite(pool) => sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await,
            DbPool::Postgres(pool) => sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await,
        }
    }

    /// Run statements in order inside one transaction. Any failure rolls back all of them.
    pub async fn execute_in_transaction(&self, statements: &[String]) -> Result<u64, sqlx::Error> {
        let mut affected = 0;
        match self {
            DbPool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for sql in statements {
                    affected += sqlx::query(sql).execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
            DbPool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for sql in statements {
                    affected += sqlx::query(sql).execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
        }
        Ok(affected)
    }

    pub async fn close(&self) {
        match self {
            DbPool::Sqlite(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
        }
    }
}

/// True when the error is a unique constraint violation on either backend
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

/// One named backing store: its pool, table prefix and shard counts
#[derive(Debug, Clone)]
pub struct StoreHandle {
    name: String,
    pool: DbPool,
    table_prefix: String,
    shard_counts: HashMap<String, u32>,
}

impl StoreHandle {
    pub fn new(name: impl Into<String>, pool: DbPool, table_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool,
            table_prefix: table_prefix.into(),
            shard_counts: HashMap::new(),
        }
    }

    pub fn with_shard_count(mut self, table: &str, count: u32) -> Self {
        self.shard_counts.insert(table.to_string(), count);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn backend(&self) -> Backend {
        self.pool.backend()
    }

    /// Logical table name with the store's prefix, before sharding
    pub fn table_name(&self, logical: &str) -> String {
        format!("{}{}", self.table_prefix, logical)
    }

    /// Configured shard count of a logical table, 0 when unsharded
    pub fn shard_count(&self, logical: &str) -> u32 {
        self.shard_counts.get(logical).copied().unwrap_or(0)
    }

    /// Physical table holding rows of `shard_key`
    pub fn routed_table(&self, logical: &str, shard_key: &str) -> String {
        shard::route(shard_key, self.shard_count(logical), &self.table_name(logical))
    }

    /// Create the key table and every segment shard table, with their indexes
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let backend = self.backend();
        let key_table = self.table_name(KEY_TABLE);
        self.pool
            .execute(&ddl::create_keys_table(backend, &key_table))
            .await?;
        self.pool
            .execute(&ddl::create_keys_video_index(backend, &key_table))
            .await?;

        let segment_tables =
            shard::all_tables(self.shard_count(SEGMENT_TABLE), &self.table_name(SEGMENT_TABLE));
        for table in &segment_tables {
            self.pool
                .execute(&ddl::create_segments_table(backend, table))
                .await?;
            self.pool
                .execute(&ddl::create_segments_video_index(backend, table))
                .await?;
        }
        info!(
            "[StoreHandle.init_schema] store '{}': {} and {} segment table(s) ready",
            self.name,
            key_table,
            segment_tables.len()
        );
        Ok(())
    }
}

/// Name → store map, constructed once and passed by reference
#[derive(Debug, Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, StoreHandle>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: StoreHandle) {
        self.stores.insert(handle.name.clone(), handle);
    }

    pub fn get(&self, name: &str) -> Option<&StoreHandle> {
        self.stores.get(name)
    }

    pub fn store_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Store for an application: `stream_{app}` when registered, else `stream`
    pub fn resolve(&self, app: Option<&str>) -> Result<&StoreHandle, StoreError> {
        if let Some(app) = app.filter(|a| !a.is_empty()) {
            let app_store = format!("{}_{}", DEFAULT_STORE_NAME, app);
            if let Some(handle) = self.stores.get(&app_store) {
                return Ok(handle);
            }
        }
        self.stores
            .get(DEFAULT_STORE_NAME)
            .ok_or_else(|| StoreError::StoreUnavailable(DEFAULT_STORE_NAME.to_string()))
    }

    /// Open a pool for every configured store
    pub async fn open(
        config: &AppConfig,
        credentials: &Option<Credentials>,
    ) -> Result<Self, StoreError> {
        let default_counts = config
            .database
            .get(DEFAULT_STORE_NAME)
            .map(|db| db.table_config.clone())
            .unwrap_or_default();

        let mut registry = Self::new();
        for (name, db) in &config.database {
            let pool = open_pool(name, db, credentials).await?;
            let mut handle = StoreHandle::new(name.clone(), pool, db.table_prefix.clone());
            // Shard counts missing on an application store fall back to the default store
            for table in &default_counts {
                handle = handle.with_shard_count(&table.table_name, table.sharding_num);
            }
            for table in db.table_config.iter().filter(|t| t.sharding_num > 0) {
                handle = handle.with_shard_count(&table.table_name, table.sharding_num);
            }
            info!(
                "[StoreRegistry.open] store '{}' ({:?}) opened, {} shard(s) for {}",
                name,
                db.backend,
                handle.shard_count(SEGMENT_TABLE).max(1),
                SEGMENT_TABLE
            );
            registry.register(handle);
        }
        Ok(registry)
    }

    /// Create tables for one store, or all of them
    pub async fn init_schema(&self, only: Option<&str>) -> Result<(), StoreError> {
        match only {
            Some(name) => {
                let handle = self
                    .get(name)
                    .ok_or_else(|| StoreError::StoreUnavailable(name.to_string()))?;
                handle.init_schema().await
            }
            None => {
                for name in self.store_names() {
                    if let Some(handle) = self.get(name) {
                        handle.init_schema().await?;
                    }
                }
                Ok(())
            }
        }
    }

    pub async fn close(&self) {
        for handle in self.stores.values() {
            handle.pool.close().await;
            info!("[StoreRegistry.close] store '{}' closed", handle.name);
        }
    }
}

async fn open_pool(
    name: &str,
    db: &DatabaseConfig,
    credentials: &Option<Credentials>,
) -> Result<DbPool, StoreError> {
    let statement_level = if db.log_sql {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Debug
    };

    match db.backend {
        DatabaseBackend::Sqlite => {
            let path = db
                .path
                .as_ref()
                .ok_or_else(|| StoreError::Connect(format!("{}: sqlite path missing", name)))?;
            let in_memory = path.as_os_str() == ":memory:";
            let options = (if in_memory {
                SqliteConnectOptions::from_str("sqlite::memory:")?
            } else {
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
            })
            .log_statements(statement_level)
            .log_slow_statements(log::LevelFilter::Warn, SLOW_STATEMENT_THRESHOLD);

            let mut pool_options = SqlitePoolOptions::new();
            if in_memory {
                // Every connection to :memory: is a distinct database
                pool_options = pool_options
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None);
            } else {
                pool_options = pool_options.max_connections(db.max_connections);
                if db.max_lifetime_secs > 0 {
                    pool_options =
                        pool_options.max_lifetime(Duration::from_secs(db.max_lifetime_secs));
                }
            }
            let pool = pool_options
                .connect_with(options)
                .await
                .map_err(|e| StoreError::Connect(format!("{}: {}", name, e)))?;
            Ok(DbPool::Sqlite(pool))
        }
        DatabaseBackend::Postgres => {
            let (Some(base_url), Some(database)) = (db.url.as_deref(), db.database.as_deref())
            else {
                return Err(StoreError::Connect(format!(
                    "{}: postgres url and database are required",
                    name
                )));
            };
            let password = match db.credential_profile.as_deref() {
                Some(profile) => postgres_password(credentials, profile)
                    .map_err(|e| StoreError::Connect(format!("{}: {}", name, e)))?,
                None => String::new(),
            };
            create_database_if_not_exists(base_url, &password, database)
                .await
                .map_err(|e| StoreError::Connect(format!("{}: {}", name, e)))?;

            let full_url = build_postgres_url(base_url, &password, database)
                .map_err(|e| StoreError::Connect(format!("{}: {}", name, e)))?;
            let options = PgConnectOptions::from_str(&full_url)?
                .log_statements(statement_level)
                .log_slow_statements(log::LevelFilter::Warn, SLOW_STATEMENT_THRESHOLD);
            let mut pool_options = PgPoolOptions::new().max_connections(db.max_connections);
            if db.max_lifetime_secs > 0 {
                pool_options = pool_options.max_lifetime(Duration::from_secs(db.max_lifetime_secs));
            }
            let pool = pool_options
                .connect_with(options)
                .await
                .map_err(|e| StoreError::Connect(format!("{}: {}", name, e)))?;
            Ok(DbPool::Postgres(pool))
        }
    }
}

/// Single-connection in-memory SQLite pool, for tests and throwaway runs
pub async fn open_sqlite_in_memory() -> Result<DbPool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Connect(e.to_string()))?;
    Ok(DbPool::Sqlite(pool))
}

/// Build a full PostgreSQL connection URL with password and database
///
/// Takes a base URL like `postgres://user@host:5432` and inserts the password
/// and appends the database name.
pub fn build_postgres_url(base_url: &str, password: &str, database: &str) -> Result<String, DynError> {
    let url = url::Url::parse(base_url)?;

    let user = url.username();
    let host = url.host_str().ok_or("Missing host in postgres url")?;
    let port = url.port().unwrap_or(5432);

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        user,
        urlencoding::encode(password),
        host,
        port,
        database
    ))
}

/// Create a PostgreSQL database if it doesn't exist
pub async fn create_database_if_not_exists(
    base_url: &str,
    password: &str,
    database: &str,
) -> Result<(), DynError> {
    let admin_url = build_postgres_url(base_url, password, "postgres")?;
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(PgConnectOptions::from_str(&admin_url)?)
        .await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(database)
            .fetch_one(&admin_pool)
            .await?;

    if !exists {
        // CREATE DATABASE cannot be a prepared statement with binds
        let create_sql = format!("CREATE DATABASE \"{}\"", database.replace('"', "\"\""));
        if let Err(e) = sqlx::query(&create_sql).execute(&admin_pool).await {
            // 42P04 duplicate_database: another process won the race
            let err_str = e.to_string();
            if !err_str.contains("already exists") && !err_str.contains("42P04") {
                admin_pool.close().await;
                return Err(e.into());
            }
            warn!("Database {} was created concurrently", database);
        } else {
            info!("Created PostgreSQL database {}", database);
        }
    }
    admin_pool.close().await;
    Ok(())
}
