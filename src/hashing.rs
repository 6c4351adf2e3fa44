// # Identity Extractor
//
// Streaming multi-digest hashing of a source file. All digests are computed
// in a single pass over fixed-size chunks so large files are never re-read
// and memory stays bounded regardless of file size.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hashing cancelled")]
    Cancelled,
}

/// Content digests of one source file.
///
/// MD5 is the identity component of the catalog's `(system, digest)`
/// uniqueness key; CRC32 and SHA1 are carried for catalog matching and
/// verification. All values are uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSet {
    pub crc32: String,
    /// CRC32 computed with the per-system header skipped (e.g. the 16-byte
    /// iNES header). Only present when the extension has a known header.
    pub crc32_headerless: Option<String>,
    pub md5: String,
    pub sha1: String,
    pub size: u64,
}

/// Incremental progress callback: (bytes_hashed, total_bytes).
/// Consumed only by external observers, never by pipeline logic.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// Compute all digests for `path` in a single streaming pass.
///
/// The cancellation flag is checked at every chunk boundary; a cancelled
/// computation returns `HashError::Cancelled` and never a partial digest.
pub async fn compute_digests(
    path: &Path,
    chunk_size: usize,
    header_skip: Option<u64>,
    cancel: &AtomicBool,
    mut progress: Option<ProgressFn>,
) -> Result<DigestSet, HashError> {
    let mut file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();

    let mut crc = crc32fast::Hasher::new();
    let mut crc_headerless = header_skip.map(|_| crc32fast::Hasher::new());
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();

    let skip = header_skip.unwrap_or(0);
    let mut buffer = vec![0u8; chunk_size];
    let mut consumed = 0u64;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(HashError::Cancelled);
        }

        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];

        crc.update(chunk);
        md5.update(chunk);
        sha1.update(chunk);

        if let Some(hasher) = crc_headerless.as_mut() {
            // Feed only the bytes past the header into the headerless CRC
            let chunk_start = consumed;
            let chunk_end = consumed + bytes_read as u64;
            if chunk_end > skip {
                let offset = skip.saturating_sub(chunk_start) as usize;
                hasher.update(&chunk[offset..]);
            }
        }

        consumed += bytes_read as u64;
        if let Some(report) = progress.as_mut() {
            report(consumed, total);
        }
    }

    let digests = DigestSet {
        crc32: format!("{:08X}", crc.finalize()),
        crc32_headerless: crc_headerless
            .filter(|_| consumed > skip)
            .map(|h| format!("{:08X}", h.finalize())),
        md5: hex::encode_upper(md5.finalize()),
        sha1: hex::encode_upper(sha1.finalize()),
        size: consumed,
    };

    debug!(
        "Hashed {} ({} bytes): crc32={} md5={}",
        path.display(),
        digests.size,
        digests.crc32,
        digests.md5
    );

    Ok(digests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    async fn hash_bytes(bytes: &[u8], header_skip: Option<u64>) -> DigestSet {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.bin");
        std::fs::write(&path, bytes).unwrap();
        let cancel = AtomicBool::new(false);
        compute_digests(&path, 8192, header_skip, &cancel, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn digests_are_deterministic() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let first = hash_bytes(&data, None).await;
        let second = hash_bytes(&data, None).await;
        assert_eq!(first, second);
        assert_eq!(first.size, data.len() as u64);
        assert_eq!(first.crc32.len(), 8);
        assert_eq!(first.md5.len(), 32);
        assert_eq!(first.sha1.len(), 40);
    }

    #[tokio::test]
    async fn empty_file_digests_match_known_values() {
        let digests = hash_bytes(&[], None).await;
        assert_eq!(digests.crc32, "00000000");
        assert_eq!(digests.md5, "D41D8CD98F00B204E9800998ECF8427E");
        assert_eq!(digests.sha1, "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709");
    }

    #[tokio::test]
    async fn headerless_crc_skips_the_header() {
        let mut with_header = vec![0xAAu8; 16];
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 199) as u8).collect();
        with_header.extend_from_slice(&body);

        let skipped = hash_bytes(&with_header, Some(16)).await;
        let bare = hash_bytes(&body, None).await;

        assert_eq!(skipped.crc32_headerless.as_deref(), Some(bare.crc32.as_str()));
        // Full-file CRC still covers the header
        assert_ne!(skipped.crc32, bare.crc32);
    }

    #[tokio::test]
    async fn headerless_crc_spans_chunk_boundaries() {
        // Header skip crosses the first read chunk when chunk_size < skip
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.bin");
        let mut data = vec![0x11u8; 64];
        data.extend_from_slice(&[0x22u8; 1000]);
        std::fs::write(&path, &data).unwrap();

        let cancel = AtomicBool::new(false);
        let small_chunks = compute_digests(&path, 16, Some(64), &cancel, None)
            .await
            .unwrap();
        let one_chunk = compute_digests(&path, 65536, Some(64), &cancel, None)
            .await
            .unwrap();
        assert_eq!(small_chunks.crc32_headerless, one_chunk.crc32_headerless);
    }

    #[tokio::test]
    async fn cancellation_yields_no_partial_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.bin");
        std::fs::write(&path, vec![0u8; 100_000]).unwrap();

        let cancel = AtomicBool::new(true);
        let result = compute_digests(&path, 8192, None, &cancel, None).await;
        assert!(matches!(result, Err(HashError::Cancelled)));
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let cancel = AtomicBool::new(false);
        let result = compute_digests(
            Path::new("/nonexistent/rom.bin"),
            8192,
            None,
            &cancel,
            None,
        )
        .await;
        assert!(matches!(result, Err(HashError::Io(_))));
    }

    #[tokio::test]
    async fn progress_reports_consumed_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.bin");
        std::fs::write(&path, vec![7u8; 20_000]).unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let cancel = AtomicBool::new(false);
        compute_digests(
            &path,
            8192,
            None,
            &cancel,
            Some(Box::new(move |done, total| {
                seen_clone.lock().unwrap().push((done, total));
            })),
        )
        .await
        .unwrap();

        let reports = seen.lock().unwrap();
        assert!(!reports.is_empty());
        assert_eq!(reports.last().unwrap(), &(20_000, 20_000));
    }
}
