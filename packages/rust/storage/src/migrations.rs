//! SQL migration definitions for the legora metadata database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: decisions_raw, decisions_transformed",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Crawler output, one row per decision per partition
CREATE TABLE IF NOT EXISTS decisions_raw (
    id             TEXT NOT NULL,
    partition_date TEXT NOT NULL,
    link           TEXT NOT NULL,
    date           TEXT NOT NULL,
    ref_no         TEXT,
    parties        TEXT,
    files_json     TEXT NOT NULL DEFAULT '[]',
    inserted_at    TEXT NOT NULL,
    PRIMARY KEY (id, partition_date)
);

CREATE INDEX IF NOT EXISTS idx_decisions_raw_partition ON decisions_raw(partition_date);

-- Canonical records, upserted by the transform stage
CREATE TABLE IF NOT EXISTS decisions_transformed (
    id             TEXT NOT NULL,
    partition_date TEXT NOT NULL,
    link           TEXT NOT NULL,
    date           TEXT NOT NULL,
    ref_no         TEXT,
    parties        TEXT,
    file_path      TEXT NOT NULL,
    file_hash      TEXT NOT NULL,
    file_ext       TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    PRIMARY KEY (id, partition_date)
);

CREATE INDEX IF NOT EXISTS idx_decisions_transformed_hash ON decisions_transformed(file_hash);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Partition run ledger",
            sql: r#"
CREATE TABLE IF NOT EXISTS partition_runs (
    partition_date TEXT PRIMARY KEY,
    state          TEXT NOT NULL,
    started_at     TEXT NOT NULL,
    finished_at    TEXT,
    detail         TEXT
);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
