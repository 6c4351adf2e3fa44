// Test support utilities for both unit and integration tests

use crate::config::ImporterConfig;
use crate::context::ImporterContext;
use crate::db::Database;
use crate::hashing::DigestSet;
use crate::lookup::{
    BackendRegistry, LookupError, MatchKind, MetadataBackend, MetadataCandidate,
};
use crate::storage::{LocalRomStorage, RomStorage, StorageError, StorageManager};
use crate::systems::SystemId;
use md5::{Digest, Md5};
use sha1::Sha1;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock metadata backend with scripted responses.
///
/// Digest hits are keyed by MD5; filename hits by the normalized name.
/// `fail_times` makes the next N digest queries fail as unavailable, for
/// retry-path testing.
pub struct MockBackend {
    id: &'static str,
    priority: u32,
    digest_hits: Mutex<HashMap<String, Vec<MetadataCandidate>>>,
    filename_hits: Mutex<HashMap<String, Vec<MetadataCandidate>>>,
    fail_times: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub fn new(id: &'static str, priority: u32) -> Self {
        MockBackend {
            id,
            priority,
            digest_hits: Mutex::new(HashMap::new()),
            filename_hits: Mutex::new(HashMap::new()),
            fail_times: AtomicU32::new(0),
            delay: Mutex::new(None),
        }
    }

    /// Script an exact-digest hit for content with the given MD5.
    pub fn add_digest_hit(&self, md5: &str, candidate: MetadataCandidate) {
        self.digest_hits
            .lock()
            .unwrap()
            .entry(md5.to_string())
            .or_default()
            .push(candidate);
    }

    /// Script a fuzzy hit for a normalized filename.
    pub fn add_filename_hit(&self, normalized_name: &str, candidate: MetadataCandidate) {
        self.filename_hits
            .lock()
            .unwrap()
            .entry(normalized_name.to_string())
            .or_default()
            .push(candidate);
    }

    /// Make the next `n` digest queries fail as unavailable.
    pub fn fail_next(&self, n: u32) {
        self.fail_times.store(n, Ordering::SeqCst);
    }

    /// Delay every digest query, holding items in the identifying stage
    /// long enough for a test to act on them.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn take_failure(&self) -> bool {
        self.fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl MetadataBackend for MockBackend {
    fn id(&self) -> &str {
        self.id
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn query_by_digest(
        &self,
        digests: &DigestSet,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_failure() {
            return Err(LookupError::Unavailable("scripted outage".to_string()));
        }
        Ok(self
            .digest_hits
            .lock()
            .unwrap()
            .get(&digests.md5)
            .cloned()
            .unwrap_or_default())
    }

    async fn query_by_filename(
        &self,
        normalized_name: &str,
        _system: SystemId,
    ) -> Result<Vec<MetadataCandidate>, LookupError> {
        Ok(self
            .filename_hits
            .lock()
            .unwrap()
            .get(normalized_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Build a scripted candidate for `MockBackend` responses.
pub fn make_candidate(
    backend_id: &str,
    title: &str,
    system: SystemId,
    record_id: &str,
) -> MetadataCandidate {
    MetadataCandidate {
        backend_id: backend_id.to_string(),
        match_kind: MatchKind::ExactDigest,
        external_record_id: record_id.to_string(),
        proposed_title: title.to_string(),
        proposed_system: Some(system),
        region: Some("USA".to_string()),
        rank: 0,
    }
}

/// Local storage wrapper that injects placement failures.
///
/// Any destination whose path contains `fail_substring` fails with an IO
/// error; `fail_times` additionally fails the next N placements outright.
pub struct FaultyStorage {
    inner: LocalRomStorage,
    fail_substring: Mutex<Option<String>>,
    fail_times: AtomicU32,
}

impl FaultyStorage {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        Ok(FaultyStorage {
            inner: LocalRomStorage::new(root)?,
            fail_substring: Mutex::new(None),
            fail_times: AtomicU32::new(0),
        })
    }

    /// Fail every placement whose destination contains `needle`.
    pub fn fail_on(&self, needle: &str) {
        *self.fail_substring.lock().unwrap() = Some(needle.to_string());
    }

    /// Fail the next `n` placements regardless of destination.
    pub fn fail_next(&self, n: u32) {
        self.fail_times.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl RomStorage for FaultyStorage {
    async fn place(&self, source: &Path, relative_dest: &Path) -> Result<PathBuf, StorageError> {
        let scripted = self
            .fail_substring
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|needle| relative_dest.to_string_lossy().contains(needle.as_str()));
        let counted = self
            .fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted || counted {
            return Err(StorageError::Io(std::io::Error::other(
                "scripted placement failure",
            )));
        }
        self.inner.place(source, relative_dest).await
    }

    async fn remove(&self, relative_dest: &Path) -> Result<(), StorageError> {
        self.inner.remove(relative_dest).await
    }

    fn available_space(&self) -> Result<u64, StorageError> {
        self.inner.available_space()
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }
}

/// Write a fixture file and return its path.
pub fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Uppercase-hex MD5 of a byte slice, matching the pipeline's digests.
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode_upper(hasher.finalize())
}

/// Uppercase-hex SHA1 of a byte slice.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode_upper(hasher.finalize())
}

/// Pipeline configuration tuned for tests: one worker, tight timeouts,
/// fast retries.
pub fn test_config(data_dir: &Path) -> ImporterConfig {
    ImporterConfig {
        worker_count: 1,
        max_attempts: 3,
        retry_base_delay: Duration::from_millis(10),
        backend_timeout: Duration::from_millis(500),
        commit_timeout: Duration::from_secs(5),
        hash_chunk_size: 8192,
        storage_root: data_dir.join("library"),
        database_path: data_dir.join("catalog.db"),
        openvgdb_path: None,
        gamesdb_url: None,
        gamesdb_api_key: None,
    }
}

/// Assemble a context with a fresh database, the given storage, and the
/// given backends.
pub async fn test_context(
    config: ImporterConfig,
    storage: StorageManager,
    backends: Vec<Arc<dyn MetadataBackend>>,
) -> ImporterContext {
    let db = Database::new(&config.database_path.to_string_lossy())
        .await
        .unwrap();
    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(backend);
    }
    ImporterContext::new(config, db, storage, Arc::new(registry)).unwrap()
}

/// One scripted row for an OpenVGDB fixture database.
pub struct FixtureRom {
    pub rom_id: i64,
    /// External (OpenVGDB) system id, not the canonical one.
    pub system_id: i64,
    pub file_name: String,
    pub md5: String,
    pub sha1: String,
    pub headerless_crc: Option<String>,
    pub title: Option<String>,
    pub region: Option<String>,
}

/// Create an OpenVGDB-shaped sqlite fixture at `path`.
pub async fn create_openvgdb_fixture(path: &Path, roms: &[FixtureRom]) -> sqlx::SqlitePool {
    let url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();

    sqlx::query(
        r#"
        CREATE TABLE ROMs (
            romID INTEGER PRIMARY KEY,
            systemID INTEGER NOT NULL,
            romFileName TEXT NOT NULL,
            romHashMD5 TEXT,
            romHashSHA1 TEXT,
            romHeaderlessHashCRC TEXT
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        r#"
        CREATE TABLE RELEASES (
            releaseID INTEGER PRIMARY KEY,
            romID INTEGER NOT NULL,
            releaseTitleName TEXT,
            regionName TEXT
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    for rom in roms {
        sqlx::query(
            "INSERT INTO ROMs (romID, systemID, romFileName, romHashMD5, romHashSHA1, romHeaderlessHashCRC) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(rom.rom_id)
        .bind(rom.system_id)
        .bind(&rom.file_name)
        .bind(&rom.md5)
        .bind(&rom.sha1)
        .bind(&rom.headerless_crc)
        .execute(&pool)
        .await
        .unwrap();

        if rom.title.is_some() || rom.region.is_some() {
            sqlx::query(
                "INSERT INTO RELEASES (romID, releaseTitleName, regionName) VALUES (?, ?, ?)",
            )
            .bind(rom.rom_id)
            .bind(&rom.title)
            .bind(&rom.region)
            .execute(&pool)
            .await
            .unwrap();
        }
    }

    pool
}
