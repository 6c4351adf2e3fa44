use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::db::models::*;
use crate::systems::SystemId;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Committed library records; parent/child rows model multi-part sets
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_entries (
                id TEXT PRIMARY KEY,
                system_id TEXT NOT NULL,
                title TEXT NOT NULL,
                region TEXT,
                crc32 TEXT NOT NULL,
                crc32_headerless TEXT,
                md5 TEXT NOT NULL,
                sha1 TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                primary_file TEXT NOT NULL,
                parent_group_id TEXT,
                child_order INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (parent_group_id) REFERENCES catalog_entries (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The uniqueness invariant: one committed entry per (system, digest)
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_identity
            ON catalog_entries (system_id, md5)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Persisted package envelopes (save states, config)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload BLOB NOT NULL,
                metadata_json TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Audit trail of commits, rollbacks, and duplicate detections
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                subject_id TEXT,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Begin a write transaction. The committer scopes one transaction per
    /// commit plan.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Insert a catalog entry inside an open transaction
    pub async fn insert_entry_tx(
        tx: &mut Transaction<'_, Sqlite>,
        entry: &DbCatalogEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO catalog_entries (
                id, system_id, title, region, crc32, crc32_headerless, md5, sha1,
                size_bytes, primary_file, parent_group_id, child_order, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.system_id.as_str())
        .bind(&entry.title)
        .bind(&entry.region)
        .bind(&entry.crc32)
        .bind(&entry.crc32_headerless)
        .bind(&entry.md5)
        .bind(&entry.sha1)
        .bind(entry.size_bytes)
        .bind(&entry.primary_file)
        .bind(&entry.parent_group_id)
        .bind(entry.child_order)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Insert an audit row inside an open transaction
    pub async fn insert_audit_tx(
        tx: &mut Transaction<'_, Sqlite>,
        audit: &DbAuditEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, action, subject_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit.id)
        .bind(audit.action.as_str())
        .bind(&audit.subject_id)
        .bind(&audit.detail)
        .bind(audit.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Insert a package row inside an open transaction
    pub async fn insert_package_tx(
        tx: &mut Transaction<'_, Sqlite>,
        package: &DbPackage,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO packages (id, kind, payload, metadata_json, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&package.id)
        .bind(package.kind.as_str())
        .bind(&package.payload)
        .bind(&package.metadata_json)
        .bind(&package.content_hash)
        .bind(package.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Insert an audit row outside any transaction (rollbacks are recorded
    /// even though the failed transaction itself never lands)
    pub async fn insert_audit(&self, audit: &DbAuditEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, action, subject_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit.id)
        .bind(audit.action.as_str())
        .bind(&audit.subject_id)
        .bind(&audit.detail)
        .bind(audit.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a committed entry by its identity pair. Read-only duplicate
    /// checks run concurrently with commits under sqlite snapshot reads.
    pub async fn find_entry_by_identity(
        &self,
        system_id: SystemId,
        md5: &str,
    ) -> Result<Option<DbCatalogEntry>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM catalog_entries WHERE system_id = ? AND md5 = ?",
        )
        .bind(system_id.as_str())
        .bind(md5)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| entry_from_row(&r)))
    }

    /// Get a single entry by id
    pub async fn get_entry(&self, id: &str) -> Result<Option<DbCatalogEntry>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM catalog_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| entry_from_row(&r)))
    }

    /// Get all committed entries, newest first
    pub async fn get_entries(&self) -> Result<Vec<DbCatalogEntry>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM catalog_entries ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    /// Get the ordered children of a multi-part parent entry
    pub async fn get_children(
        &self,
        parent_group_id: &str,
    ) -> Result<Vec<DbCatalogEntry>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM catalog_entries WHERE parent_group_id = ? ORDER BY child_order ASC",
        )
        .bind(parent_group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    /// Get a package by id
    pub async fn get_package(&self, id: &str) -> Result<Option<DbPackage>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM packages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| DbPackage {
            id: r.get("id"),
            kind: r.get("kind"),
            payload: r.get("payload"),
            metadata_json: r.get("metadata_json"),
            content_hash: r.get("content_hash"),
            created_at: parse_timestamp(&r, "created_at"),
        }))
    }

    /// Get audit rows for a subject, oldest first
    pub async fn get_audit_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Vec<DbAuditEntry>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE subject_id = ? ORDER BY created_at ASC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DbAuditEntry {
                id: r.get("id"),
                action: r.get("action"),
                subject_id: r.get("subject_id"),
                detail: r.get("detail"),
                created_at: parse_timestamp(r, "created_at"),
            })
            .collect())
    }

    /// Count all committed entries (used by tests and the CLI summary)
    pub async fn count_entries(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM catalog_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn entry_from_row(row: &SqliteRow) -> DbCatalogEntry {
    let system: String = row.get("system_id");
    DbCatalogEntry {
        id: row.get("id"),
        // Rows are only ever written through SystemId::as_str, so an
        // unparseable value is database corruption
        system_id: SystemId::from_str(&system)
            .unwrap_or_else(|| panic!("corrupt system_id in catalog: {}", system)),
        title: row.get("title"),
        region: row.get("region"),
        crc32: row.get("crc32"),
        crc32_headerless: row.get("crc32_headerless"),
        md5: row.get("md5"),
        sha1: row.get("sha1"),
        size_bytes: row.get("size_bytes"),
        primary_file: row.get("primary_file"),
        parent_group_id: row.get("parent_group_id"),
        child_order: row.get("child_order"),
        created_at: parse_timestamp(row, "created_at"),
    }
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> DateTime<Utc> {
    let raw: String = row.get(column);
    // Rows are only ever written with to_rfc3339, so an unparseable value
    // is database corruption
    DateTime::parse_from_rfc3339(&raw)
        .unwrap_or_else(|err| panic!("corrupt {} timestamp in catalog: {} ({})", column, raw, err))
        .with_timezone(&Utc)
}
