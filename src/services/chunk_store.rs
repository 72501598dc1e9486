//! src/services/chunk_store.rs
//!
//! On-disk staging area for chunked uploads. There is no session table: an
//! upload session *is* the directory `root/{upload_id}`, and each received
//! chunk is a file `chunk_NNNNNN` inside it.
//!
//! Finalization first claims a session by renaming its directory to a private
//! `.finalizing-*` name. Rename is atomic, so only one finalizer can win; a
//! concurrent one sees the session as missing.

use bytes::{Bytes, BytesMut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CHUNK_PREFIX: &str = "chunk_";

/// Zero-padding width of chunk file names. Wide enough for every index below
/// [`MAX_TOTAL_CHUNKS`].
const CHUNK_INDEX_WIDTH: usize = 6;

/// Largest accepted `totalChunks`.
pub const MAX_TOTAL_CHUNKS: u32 = 999_999;

const MAX_UPLOAD_ID_LEN: usize = 128;
const CLAIM_PREFIX: &str = ".finalizing-";

/// File name for the chunk at `index`.
pub fn chunk_file_name(index: u32) -> String {
    format!("{CHUNK_PREFIX}{index:0width$}", width = CHUNK_INDEX_WIDTH)
}

/// Numeric index embedded in a chunk file name, if it is one.
pub fn parse_chunk_index(file_name: &str) -> Option<u32> {
    let digits = file_name.strip_prefix(CHUNK_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Upload ids become directory names, so only `[A-Za-z0-9_-]` is allowed.
pub fn is_valid_upload_id(upload_id: &str) -> bool {
    !upload_id.is_empty()
        && upload_id.len() <= MAX_UPLOAD_ID_LEN
        && upload_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// A chunk file found in a session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub index: u32,
    pub path: PathBuf,
}

/// Root directory holding one subdirectory per upload session.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of an open session. Callers validate `upload_id` first.
    pub fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }

    /// Persist one chunk.
    ///
    /// The bytes land in a hidden temporary file that is then renamed onto
    /// the chunk's slot, so a resent chunk replaces the previous copy and a
    /// listing never observes a half-written chunk.
    pub async fn write_chunk(&self, upload_id: &str, index: u32, bytes: &[u8]) -> io::Result<()> {
        let dir = self.session_dir(upload_id);
        let name = chunk_file_name(index);
        let target = dir.join(&name);
        let tmp = dir.join(format!(".{}.tmp-{}", name, Uuid::new_v4()));

        // A finalizer may prune the (empty) root between our mkdir and write.
        let mut attempts = 0;
        loop {
            attempts += 1;
            fs::create_dir_all(&dir).await?;
            match fs::write(&tmp, bytes).await {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::NotFound && attempts < 2 => continue,
                Err(err) => return Err(err),
            }
        }

        if let Err(err) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }
        debug!(upload_id, index, bytes = bytes.len(), "chunk written");
        Ok(())
    }

    /// Take exclusive ownership of a session for finalization.
    ///
    /// Returns `Ok(None)` when no session directory exists for `upload_id`.
    pub async fn claim(&self, upload_id: &str) -> io::Result<Option<ClaimedSession>> {
        let original = self.session_dir(upload_id);
        let claimed = self
            .root
            .join(format!("{CLAIM_PREFIX}{upload_id}-{}", Uuid::new_v4().simple()));

        match fs::rename(&original, &claimed).await {
            Ok(()) => Ok(Some(ClaimedSession {
                upload_id: upload_id.to_string(),
                root: self.root.clone(),
                original,
                dir: claimed,
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Remove sessions (open or abandoned claims) untouched for longer than
    /// `ttl`. Returns how many were removed.
    pub async fn sweep_expired(&self, ttl: Duration) -> io::Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_older_than(cutoff).await
    }

    async fn sweep_older_than(&self, cutoff: SystemTime) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    debug!("skipping {}: {}", entry.path().display(), err);
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified()?;
            if modified >= cutoff {
                continue;
            }

            let path = entry.path();
            match fs::remove_dir_all(&path).await {
                Ok(()) => {
                    removed += 1;
                    debug!("swept expired upload session {}", path.display());
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("failed to sweep {}: {}", path.display(), err),
            }
        }
        Ok(removed)
    }

    /// Write/read/delete probe used by readiness checks.
    pub async fn ping(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(io::Error::new(ErrorKind::InvalidData, "file content mismatch"));
        }
        Ok(())
    }
}

/// A session directory owned by one finalizer.
///
/// Consume it with [`ClaimedSession::cleanup`] after a successful commit, or
/// [`ClaimedSession::release`] to hand it back after a failure.
#[derive(Debug)]
pub struct ClaimedSession {
    upload_id: String,
    root: PathBuf,
    original: PathBuf,
    dir: PathBuf,
}

impl ClaimedSession {
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Chunk files sorted by their parsed numeric index. Other entries
    /// (temporary files, strays) are ignored.
    pub async fn list_chunks(&self) -> io::Result<Vec<ChunkFile>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(index) = file_name.to_str().and_then(parse_chunk_index) else {
                continue;
            };
            if entry.file_type().await?.is_file() {
                chunks.push(ChunkFile {
                    index,
                    path: entry.path(),
                });
            }
        }
        chunks.sort_by_key(|chunk| chunk.index);
        Ok(chunks)
    }

    /// Total bytes held by `chunks` on disk, without reading them.
    pub async fn stored_size(&self, chunks: &[ChunkFile]) -> io::Result<u64> {
        let mut total = 0u64;
        for chunk in chunks {
            total += fs::metadata(&chunk.path).await?.len();
        }
        Ok(total)
    }

    /// Read `chunks` in order into one contiguous buffer.
    pub async fn assemble(&self, chunks: &[ChunkFile]) -> io::Result<Bytes> {
        let mut buffer = BytesMut::new();
        for chunk in chunks {
            let data = fs::read(&chunk.path).await?;
            buffer.extend_from_slice(&data);
        }
        Ok(buffer.freeze())
    }

    /// Put the session back under its original name so it can be retried or
    /// swept. Failures are logged only.
    pub async fn release(self) {
        if let Err(err) = fs::rename(&self.dir, &self.original).await {
            warn!(
                upload_id = %self.upload_id,
                "failed to release claimed upload session: {}", err
            );
        }
    }

    /// Delete the chunk files, the session directory, then the root if it is
    /// empty. Best effort: every failure is logged and swallowed.
    pub async fn cleanup(self, chunks: &[ChunkFile]) {
        for chunk in chunks {
            if let Err(err) = fs::remove_file(&chunk.path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!(
                        upload_id = %self.upload_id,
                        chunk = chunk.index,
                        "failed to remove chunk file: {}", err
                    );
                }
            }
        }

        if let Err(err) = fs::remove_dir(&self.dir).await {
            warn!(
                upload_id = %self.upload_id,
                "failed to remove upload session directory: {}", err
            );
            return;
        }

        match fs::remove_dir(&self.root).await {
            Ok(()) => debug!("removed empty chunk root {}", self.root.display()),
            Err(err) => debug!("kept chunk root {}: {}", self.root.display(), err),
        }
    }
}

/// Indices in `0..total` with no chunk file.
pub fn missing_indices(chunks: &[ChunkFile], total: u32) -> Vec<u32> {
    let mut present = chunks.iter().map(|c| c.index).peekable();
    let mut missing = Vec::new();
    for expected in 0..total {
        while present.next_if(|&index| index < expected).is_some() {}
        if present.next_if_eq(&expected).is_none() {
            missing.push(expected);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ChunkStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("chunks"));
        (store, dir)
    }

    #[test]
    fn chunk_names_are_padded_and_parse_back() {
        assert_eq!(chunk_file_name(0), "chunk_000000");
        assert_eq!(chunk_file_name(42), "chunk_000042");
        assert_eq!(chunk_file_name(MAX_TOTAL_CHUNKS - 1), "chunk_999998");
        assert_eq!(parse_chunk_index("chunk_000042"), Some(42));
        assert_eq!(parse_chunk_index("chunk_10"), Some(10));
        assert_eq!(parse_chunk_index("chunk_"), None);
        assert_eq!(parse_chunk_index("chunk_1a"), None);
        assert_eq!(parse_chunk_index(".chunk_000001.tmp-x"), None);
    }

    #[test]
    fn upload_ids_must_be_path_safe() {
        assert!(is_valid_upload_id("upload_1700000000000_k3j2h1g0f"));
        assert!(!is_valid_upload_id(""));
        assert!(!is_valid_upload_id("../etc"));
        assert!(!is_valid_upload_id("a/b"));
        assert!(!is_valid_upload_id(&"x".repeat(129)));
    }

    #[test]
    fn missing_indices_reports_gaps() {
        let chunks = |indices: &[u32]| {
            indices
                .iter()
                .map(|&index| ChunkFile {
                    index,
                    path: PathBuf::new(),
                })
                .collect::<Vec<_>>()
        };
        assert!(missing_indices(&chunks(&[0, 1, 2]), 3).is_empty());
        assert_eq!(missing_indices(&chunks(&[0, 2]), 4), vec![1, 3]);
        assert_eq!(missing_indices(&chunks(&[]), 2), vec![0, 1]);
    }

    #[tokio::test]
    async fn chunks_are_listed_in_numeric_order() {
        let (store, _dir) = store();
        for index in [2u32, 0, 1] {
            store
                .write_chunk("up-1", index, format!("part{index}").as_bytes())
                .await
                .unwrap();
        }
        // Names written by a narrower padding scheme must still sort numerically.
        let session = store.session_dir("up-1");
        std::fs::write(session.join("chunk_10"), b"ten").unwrap();
        std::fs::write(session.join("chunk_9"), b"nine").unwrap();
        std::fs::write(session.join("notes.txt"), b"ignored").unwrap();

        let claimed = store.claim("up-1").await.unwrap().unwrap();
        let chunks = claimed.list_chunks().await.unwrap();
        let indices: Vec<u32> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 9, 10]);

        let assembled = claimed.assemble(&chunks).await.unwrap();
        assert_eq!(&assembled[..], b"part0part1part2nineten");
    }

    #[tokio::test]
    async fn resent_chunk_overwrites_its_slot() {
        let (store, _dir) = store();
        store.write_chunk("up-2", 0, b"first").await.unwrap();
        store.write_chunk("up-2", 0, b"second").await.unwrap();

        let claimed = store.claim("up-2").await.unwrap().unwrap();
        let chunks = claimed.list_chunks().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&claimed.assemble(&chunks).await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (store, _dir) = store();
        assert!(store.claim("nope").await.unwrap().is_none());

        store.write_chunk("up-3", 0, b"x").await.unwrap();
        let first = store.claim("up-3").await.unwrap();
        assert!(first.is_some());
        assert!(store.claim("up-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_restores_the_session() {
        let (store, _dir) = store();
        store.write_chunk("up-4", 0, b"x").await.unwrap();
        let claimed = store.claim("up-4").await.unwrap().unwrap();
        assert!(!store.session_dir("up-4").exists());

        claimed.release().await;
        assert!(store.session_dir("up-4").join(chunk_file_name(0)).exists());
    }

    #[tokio::test]
    async fn cleanup_removes_session_and_empty_root() {
        let (store, _dir) = store();
        store.write_chunk("up-5", 0, b"a").await.unwrap();
        store.write_chunk("up-5", 1, b"b").await.unwrap();

        let claimed = store.claim("up-5").await.unwrap().unwrap();
        let chunks = claimed.list_chunks().await.unwrap();
        claimed.cleanup(&chunks).await;

        assert!(!store.root().exists());
    }

    #[tokio::test]
    async fn cleanup_keeps_root_with_other_sessions() {
        let (store, _dir) = store();
        store.write_chunk("up-6", 0, b"a").await.unwrap();
        store.write_chunk("other", 0, b"b").await.unwrap();

        let claimed = store.claim("up-6").await.unwrap().unwrap();
        let chunks = claimed.list_chunks().await.unwrap();
        claimed.cleanup(&chunks).await;

        assert!(store.root().exists());
        assert!(store.session_dir("other").exists());
    }

    #[tokio::test]
    async fn sweep_removes_only_sessions_older_than_cutoff() {
        let (store, _dir) = store();
        store.write_chunk("old", 0, b"a").await.unwrap();
        store.write_chunk("fresh", 0, b"b").await.unwrap();

        let hour = Duration::from_secs(3600);
        let past = SystemTime::now() - hour;
        assert_eq!(store.sweep_older_than(past).await.unwrap(), 0);

        let future = SystemTime::now() + hour;
        assert_eq!(store.sweep_older_than(future).await.unwrap(), 2);
        assert!(!store.session_dir("old").exists());
        assert!(!store.session_dir("fresh").exists());
    }

    #[tokio::test]
    async fn sweep_on_missing_root_is_a_no_op() {
        let (store, _dir) = store();
        assert_eq!(store.sweep_expired(Duration::from_secs(1)).await.unwrap(), 0);
    }
}
