use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if needed) the database at `path` and brings the schema up
/// to date. A single connection serializes writers, which SQLite wants anyway.
pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS residents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        full_name TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS statement_imports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bank_account_ref TEXT NOT NULL,
        format TEXT NOT NULL,
        period_start TEXT NOT NULL,
        period_end TEXT NOT NULL,
        file_name TEXT NOT NULL,
        file_hash TEXT NOT NULL UNIQUE,
        layout_profile TEXT,
        account_hint TEXT,
        transaction_filter TEXT NOT NULL,
        stage TEXT NOT NULL,
        uploaded_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        approved_by TEXT,
        approved_at TEXT,
        processed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS statement_rows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        import_id INTEGER NOT NULL,
        row_index INTEGER NOT NULL,
        transaction_date TEXT NOT NULL,
        narration TEXT NOT NULL,
        normalized_narration TEXT,
        reference TEXT,
        amount_cents INTEGER NOT NULL,
        balance_cents INTEGER,
        status TEXT NOT NULL,
        resident_id INTEGER,
        expense_category TEXT,
        confidence TEXT,
        method TEXT,
        score REAL,
        match_note TEXT,
        duplicate_tier TEXT,
        duplicate_kind TEXT,
        duplicate_id INTEGER,
        duplicate_acknowledged INTEGER NOT NULL DEFAULT 0,
        tag TEXT,
        posted_kind TEXT,
        posted_id INTEGER,
        processing_error TEXT,
        processed_at TEXT,
        UNIQUE (import_id, row_index),
        CHECK (amount_cents <> 0),
        FOREIGN KEY (import_id) REFERENCES statement_imports(id),
        FOREIGN KEY (resident_id) REFERENCES residents(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_statement_rows_date ON statement_rows(transaction_date)",
    r#"
    CREATE TABLE IF NOT EXISTS resident_payment_aliases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fragment TEXT NOT NULL UNIQUE,
        resident_id INTEGER NOT NULL,
        hit_count INTEGER NOT NULL DEFAULT 1,
        last_used_at TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 1,
        created_by TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (resident_id) REFERENCES residents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS approval_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        import_id INTEGER NOT NULL,
        requested_by TEXT NOT NULL,
        requested_at TEXT NOT NULL,
        decision TEXT NOT NULL,
        decided_by TEXT,
        decided_at TEXT,
        reason TEXT,
        FOREIGN KEY (import_id) REFERENCES statement_imports(id)
    )
    "#,
    // At most one open request per import, whoever asks.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_one_pending_approval
        ON approval_requests(import_id) WHERE decision = 'pending'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_row_id INTEGER NOT NULL UNIQUE,
        import_id INTEGER NOT NULL,
        resident_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        narration TEXT NOT NULL,
        reference TEXT,
        recorded_by TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        FOREIGN KEY (resident_id) REFERENCES residents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expense_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_row_id INTEGER NOT NULL UNIQUE,
        import_id INTEGER NOT NULL,
        category TEXT NOT NULL,
        date TEXT NOT NULL,
        amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
        narration TEXT NOT NULL,
        reference TEXT,
        recorded_by TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resident_ledger (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resident_id INTEGER NOT NULL,
        payment_id INTEGER NOT NULL UNIQUE,
        date TEXT NOT NULL,
        amount_cents INTEGER NOT NULL,
        FOREIGN KEY (payment_id) REFERENCES payment_records(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expense_ledger (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT NOT NULL,
        expense_id INTEGER NOT NULL UNIQUE,
        date TEXT NOT NULL,
        amount_cents INTEGER NOT NULL,
        FOREIGN KEY (expense_id) REFERENCES expense_records(id)
    )
    "#,
];

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::test_db;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (dir, pool) = test_db().await;
        pool.close().await;
        let reopened = super::create_db(&dir.path().join("test.db")).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .fetch_all(&reopened)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(names.contains(&"statement_rows"));
        assert!(names.contains(&"approval_requests"));
        assert_eq!(names.len(), 9);
    }
}
