// OpenVGDB-style local sqlite catalog backend.
//
// Read-only. The database carries one row per known dump in `ROMs`
// (digests + original file name) joined to `RELEASES` for title/region,
// with integer system ids mapped through the classifier tables.

use crate::hashing::DigestSet;
use crate::lookup::backend::{LookupError, MatchKind, MetadataBackend, MetadataCandidate};
use crate::lookup::normalize;
use crate::systems::{self, ExternalCatalog, SystemId};
use sqlx::{Row, SqlitePool};
use tracing::info;

pub struct OpenVgdbBackend {
    pool: SqlitePool,
    priority: u32,
}

impl OpenVgdbBackend {
    pub const ID: &'static str = "openvgdb";

    /// Open an existing catalog database read-only.
    pub async fn open(database_path: &str, priority: u32) -> Result<Self, LookupError> {
        let database_url = format!("sqlite://{}?mode=ro", database_path);
        info!("Opening OpenVGDB catalog at {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;
        Ok(OpenVgdbBackend { pool, priority })
    }

    #[doc(hidden)]
    pub fn from_pool(pool: SqlitePool, priority: u32) -> Self {
        OpenVgdbBackend { pool, priority }
    }

    fn candidate_from_row(
        &self,
        row: &sqlx::sqlite::SqliteRow,
        kind: MatchKind,
    ) -> MetadataCandidate {
        let rom_id: i64 = row.get("romID");
        let system_id: i64 = row.get("systemID");
        let title: Option<String> = row.get("releaseTitleName");
        let file_name: String = row.get("romFileName");
        let region: Option<String> = row.get("regionName");

        MetadataCandidate {
            backend_id: Self::ID.to_string(),
            match_kind: kind,
            external_record_id: rom_id.to_string(),
            proposed_title: title.unwrap_or(file_name),
            proposed_system: systems::canonical_from_external(ExternalCatalog::OpenVgdb, system_id),
            region,
            rank: 0,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT rom.romID, rom.systemID, rom.romFileName,
           release.releaseTitleName, release.regionName
    FROM ROMs rom
    LEFT JOIN RELEASES release ON release.romID = rom.romID
"#;

#[async_trait::async_trait]
impl MetadataBackend for OpenVgdbBackend {
    fn id(&self) -> &str {
        Self::ID
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn query_by_digest(
        &self,
        digests: &DigestSet,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        let rows = sqlx::query(&format!(
            "{} WHERE rom.romHashMD5 = ? OR rom.romHashSHA1 = ?",
            SELECT_COLUMNS
        ))
        .bind(&digests.md5)
        .bind(&digests.sha1)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| self.candidate_from_row(row, MatchKind::ExactDigest))
            .collect())
    }

    async fn query_by_partial_digest(
        &self,
        digests: &DigestSet,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        let Some(headerless) = &digests.crc32_headerless else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(&format!(
            "{} WHERE rom.romHeaderlessHashCRC = ?",
            SELECT_COLUMNS
        ))
        .bind(headerless)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| self.candidate_from_row(row, MatchKind::PartialDigest))
            .collect())
    }

    async fn query_by_filename(
        &self,
        normalized_name: &str,
        system: SystemId,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        let Some(system_external) = systems::external_id_for(system, ExternalCatalog::OpenVgdb)
        else {
            return Ok(Vec::new());
        };

        // Prefilter in SQL on the first word, then apply the normalized
        // matching rules in Rust where they are actually defined.
        let first_word = normalized_name.split_whitespace().next().unwrap_or("");
        if first_word.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "{} WHERE rom.systemID = ? AND (rom.romFileName LIKE ? OR release.releaseTitleName LIKE ?)",
            SELECT_COLUMNS
        ))
        .bind(system_external)
        .bind(format!("%{}%", first_word))
        .bind(format!("%{}%", first_word))
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<MetadataCandidate> = rows
            .iter()
            .map(|row| self.candidate_from_row(row, MatchKind::FuzzyFilename))
            .collect();

        // Equality matches beat containment-only matches: when any name
        // normalizes to the same string we return just those.
        let exact: Vec<MetadataCandidate> = candidates
            .iter()
            .filter(|c| normalize::exact_match(&c.proposed_title, normalized_name))
            .cloned()
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }

        Ok(candidates
            .into_iter()
            .filter(|c| normalize::contains_match(&c.proposed_title, normalized_name))
            .collect())
    }
}
