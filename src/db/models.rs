use crate::hashing::DigestSet;
use crate::systems::SystemId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database models for the romshelf catalog
///
/// - Catalog entries are committed, immutable library records
/// - Multi-part sets are a parent row plus ordered child rows
/// - Packages are the common persisted envelope for save states and config
/// - Every commit and rollback leaves an audit row

/// Kind of a persisted package envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    Content,
    SaveState,
    Config,
}

impl PackageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::Content => "content",
            PackageKind::SaveState => "save_state",
            PackageKind::Config => "config",
        }
    }
}

/// A committed, persisted library record.
///
/// `(system_id, md5)` is unique among committed entries; a second item
/// producing the same pair never creates a second row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbCatalogEntry {
    pub id: String,
    pub system_id: SystemId,
    pub title: String,
    pub region: Option<String>,
    pub crc32: String,
    pub crc32_headerless: Option<String>,
    pub md5: String,
    pub sha1: String,
    pub size_bytes: i64,
    /// Managed storage path, relative to the storage root.
    pub primary_file: String,
    /// Parent entry id for members of a multi-part set.
    pub parent_group_id: Option<String>,
    /// Ordinal within the group (1-based), `None` for singletons/parents.
    pub child_order: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl DbCatalogEntry {
    pub fn new(
        system_id: SystemId,
        title: &str,
        region: Option<String>,
        digests: &DigestSet,
        primary_file: &str,
    ) -> Self {
        DbCatalogEntry {
            id: Uuid::new_v4().to_string(),
            system_id,
            title: title.to_string(),
            region,
            crc32: digests.crc32.clone(),
            crc32_headerless: digests.crc32_headerless.clone(),
            md5: digests.md5.clone(),
            sha1: digests.sha1.clone(),
            size_bytes: digests.size as i64,
            primary_file: primary_file.to_string(),
            parent_group_id: None,
            child_order: None,
            created_at: Utc::now(),
        }
    }
}

/// Audit actions recorded by the committer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Commit,
    Rollback,
    Duplicate,
    PackageCommit,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Commit => "commit",
            AuditAction::Rollback => "rollback",
            AuditAction::Duplicate => "duplicate",
            AuditAction::PackageCommit => "package_commit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAuditEntry {
    pub id: String,
    pub action: AuditAction,
    /// Catalog entry or package id the action refers to, when one exists.
    pub subject_id: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl DbAuditEntry {
    pub fn new(action: AuditAction, subject_id: Option<String>, detail: &str) -> Self {
        DbAuditEntry {
            id: Uuid::new_v4().to_string(),
            action,
            subject_id,
            detail: detail.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Persisted package envelope row (`save_state` and `config` kinds; a
/// `content` package is a catalog entry plus its managed file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPackage {
    pub id: String,
    pub kind: PackageKind,
    pub payload: Vec<u8>,
    pub metadata_json: String,
    /// SHA-256 of the payload, recomputed at commit time, never trusted
    /// from the caller.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}
