//! SQLite schema and additive migrations for the pipeline store.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL keeps long listing reads from blocking writers
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    // Older databases predate some columns; additions only, never drops
    apply_column_migrations(conn)?;

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_key TEXT NOT NULL UNIQUE,
            url_hash TEXT,
            title TEXT NOT NULL DEFAULT '',
            source_platform TEXT NOT NULL DEFAULT '',
            creation_type TEXT NOT NULL DEFAULT 'url_import',
            content_original TEXT NOT NULL DEFAULT '',
            content_translated TEXT NOT NULL DEFAULT '',
            content_optimized TEXT NOT NULL DEFAULT '',
            content_final TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending',
            ai_probability REAL,
            category TEXT NOT NULL DEFAULT '',
            word_count INTEGER,
            estimated_reading_time INTEGER,
            tags TEXT,
            target_length TEXT NOT NULL DEFAULT 'mini',
            writing_style TEXT NOT NULL DEFAULT '',
            topic TEXT NOT NULL DEFAULT '',
            keywords TEXT,
            selected_prompt_id INTEGER,
            selected_model_id INTEGER,
            creation_requirements TEXT NOT NULL DEFAULT '',
            processing_attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            published_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prompt_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            template TEXT NOT NULL,
            variables TEXT,
            version TEXT NOT NULL DEFAULT '1.0',
            language TEXT NOT NULL DEFAULT 'zh-CN',
            content_type TEXT NOT NULL DEFAULT 'general',
            priority INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_default INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0.0,
            usage_count INTEGER NOT NULL DEFAULT 0,
            average_quality_score REAL NOT NULL DEFAULT 0.0,
            parameters TEXT,
            test_group TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            last_used_at TEXT,
            created_by TEXT NOT NULL DEFAULT 'system'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL UNIQUE,
            article_id INTEGER NOT NULL,
            type TEXT NOT NULL DEFAULT 'article_processing',
            status TEXT NOT NULL DEFAULT 'pending',
            progress REAL NOT NULL DEFAULT 0.0,
            current_step TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            started_at TEXT,
            completed_at TEXT,
            FOREIGN KEY (article_id) REFERENCES articles(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS detection_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            article_id INTEGER NOT NULL,
            detection_type TEXT NOT NULL DEFAULT 'ai_probability',
            platform TEXT NOT NULL DEFAULT '',
            score REAL NOT NULL,
            threshold REAL NOT NULL,
            is_passed INTEGER NOT NULL,
            detected_at TEXT NOT NULL DEFAULT (datetime('now')),
            diagnostic TEXT,
            FOREIGN KEY (article_id) REFERENCES articles(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_url_hash ON articles(url_hash)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_created ON articles(created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_templates_type ON prompt_templates(type, is_active)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_article ON tasks(article_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_detections_article ON detection_results(article_id)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Columns added after the first release, with their defaults. Databases
/// created by older builds gain them here; nothing is ever dropped.
const COLUMN_MIGRATIONS: &[(&str, &str, &str)] = &[
    ("articles", "url_hash", "TEXT"),
    ("articles", "word_count", "INTEGER"),
    ("articles", "estimated_reading_time", "INTEGER"),
    ("articles", "last_error", "TEXT"),
    ("articles", "published_at", "TEXT"),
    ("tasks", "progress", "REAL NOT NULL DEFAULT 0.0"),
    ("tasks", "current_step", "TEXT NOT NULL DEFAULT 'pending'"),
    ("tasks", "last_error", "TEXT"),
    ("tasks", "started_at", "TEXT"),
    ("tasks", "completed_at", "TEXT"),
    ("detection_results", "detected_at", "TEXT"),
    ("detection_results", "diagnostic", "TEXT"),
    ("prompt_templates", "display_name", "TEXT NOT NULL DEFAULT ''"),
    ("prompt_templates", "variables", "TEXT"),
    ("prompt_templates", "priority", "INTEGER NOT NULL DEFAULT 0"),
    ("prompt_templates", "is_default", "INTEGER NOT NULL DEFAULT 0"),
    ("prompt_templates", "success_rate", "REAL NOT NULL DEFAULT 0.0"),
    ("prompt_templates", "usage_count", "INTEGER NOT NULL DEFAULT 0"),
    (
        "prompt_templates",
        "average_quality_score",
        "REAL NOT NULL DEFAULT 0.0",
    ),
    ("prompt_templates", "parameters", "TEXT"),
    ("prompt_templates", "test_group", "TEXT"),
    ("prompt_templates", "last_used_at", "TEXT"),
    (
        "prompt_templates",
        "created_by",
        "TEXT NOT NULL DEFAULT 'system'",
    ),
];

fn apply_column_migrations(conn: &Connection) -> SqliteResult<()> {
    for (table, column, decl) in COLUMN_MIGRATIONS {
        if !column_exists(conn, table, column)? {
            info!("Adding {column} column to {table} table");
            conn.execute(
                &format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"),
                [],
            )?;
        }
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> SqliteResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(names.into_iter().any(|n| n == column))
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='articles'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_migration_adds_missing_column() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        // Simulate an older database missing a later column
        conn.execute("ALTER TABLE articles DROP COLUMN word_count", [])
            .unwrap();
        assert!(!column_exists(&conn, "articles", "word_count").unwrap());

        initialize_schema(&conn).unwrap();
        assert!(column_exists(&conn, "articles", "word_count").unwrap());
    }

    #[test]
    fn test_migration_preserves_rows() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO articles (source_key, title) VALUES ('https://example.com/x', 'kept')",
            [],
        )
        .unwrap();
        conn.execute("ALTER TABLE tasks DROP COLUMN progress", [])
            .unwrap();

        initialize_schema(&conn).unwrap();

        let title: String = conn
            .query_row(
                "SELECT title FROM articles WHERE source_key = 'https://example.com/x'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(title, "kept");
        assert!(column_exists(&conn, "tasks", "progress").unwrap());
    }
}
