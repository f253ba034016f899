use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
///
/// This is the single source of truth for the database schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // WAL lets the scheduler read while the registry writes
    conn.query("PRAGMA journal_mode = WAL", ()).await?;

    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Services table").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Users table for per-tenant quota").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description.to_string()],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitored services keyed by (tenant_id, host, port)
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS services (
            tenant_id TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
            alias TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'init',
            last_check_time INTEGER NOT NULL,
            next_check_time INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, host, port)
        )",
        (),
    )
    .await?;

    // Alias is the tenant-scoped human identity; the unique index backs up the registry check
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_services_tenant_alias ON services(tenant_id, alias)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_services_next_check ON services(next_check_time)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: per-tenant quota bookkeeping
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            tenant_id TEXT PRIMARY KEY,
            host_cnt INTEGER NOT NULL DEFAULT 0 CHECK (host_cnt >= 0),
            user_type TEXT NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}
