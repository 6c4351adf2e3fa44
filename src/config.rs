use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Importer configuration
/// Loads from environment variables (and a .env file when present)
#[derive(Clone, Debug)]
pub struct ImporterConfig {
    /// Number of concurrent pipeline workers
    pub worker_count: usize,
    /// Total attempts per item before it fails permanently
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff
    pub retry_base_delay: Duration,
    /// Deadline for a single metadata backend call
    pub backend_timeout: Duration,
    /// Deadline for a single commit
    pub commit_timeout: Duration,
    /// Read chunk size for streaming digest computation
    pub hash_chunk_size: usize,
    /// Managed storage root for committed files
    pub storage_root: PathBuf,
    /// Catalog database file
    pub database_path: PathBuf,
    /// Local OpenVGDB sqlite file, when available
    pub openvgdb_path: Option<PathBuf>,
    /// Remote games database endpoint, when configured
    pub gamesdb_url: Option<String>,
    pub gamesdb_api_key: Option<String>,
}

impl ImporterConfig {
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded .env file");
        }
        Self::from_env()
    }

    fn from_env() -> Self {
        let data_dir = std::env::var("ROMSHELF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("romshelf")
            });

        let worker_count = env_parse("ROMSHELF_WORKERS").unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        });

        ImporterConfig {
            worker_count: worker_count.max(1),
            max_attempts: env_parse("ROMSHELF_MAX_ATTEMPTS").unwrap_or(3),
            retry_base_delay: Duration::from_millis(
                env_parse("ROMSHELF_RETRY_BASE_DELAY_MS").unwrap_or(500),
            ),
            backend_timeout: Duration::from_millis(
                env_parse("ROMSHELF_BACKEND_TIMEOUT_MS").unwrap_or(10_000),
            ),
            commit_timeout: Duration::from_millis(
                env_parse("ROMSHELF_COMMIT_TIMEOUT_MS").unwrap_or(30_000),
            ),
            hash_chunk_size: env_parse("ROMSHELF_HASH_CHUNK_SIZE").unwrap_or(1024 * 1024),
            storage_root: std::env::var("ROMSHELF_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("library")),
            database_path: std::env::var("ROMSHELF_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("catalog.db")),
            openvgdb_path: std::env::var("ROMSHELF_OPENVGDB_PATH")
                .ok()
                .map(PathBuf::from),
            gamesdb_url: std::env::var("ROMSHELF_GAMESDB_URL").ok(),
            gamesdb_api_key: std::env::var("ROMSHELF_GAMESDB_API_KEY").ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
