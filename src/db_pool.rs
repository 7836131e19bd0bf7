use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::confidence_store::StoreError;
use crate::db_schema::initialize_schema;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn create_db_pool(database_path: &str) -> Result<DbPool, StoreError> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = std::path::Path::new(database_path).parent() {
        std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
    }

    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::new(manager)?;

    // Set WAL mode, reasonable sync, keep temp tables in memory, and a busy
    // timeout so transient locks are waited on instead of failing immediately.
    {
        let conn = pool.get()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        initialize_schema(&conn)?;
    }

    Ok(pool)
}

/// Single-connection in-memory pool for tests. One connection is mandatory:
/// each in-memory connection gets its own private database.
pub fn create_in_memory_pool() -> Result<DbPool, StoreError> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager)?;

    {
        let conn = pool.get()?;
        initialize_schema(&conn)?;
    }

    Ok(pool)
}
