//! Chunk discovery and ordering.
//!
//! Uploaded videos arrive as a directory of fragments named with an embedded
//! sequence number (`0.chunk`, `1.chunk`, ...). The sequence number is the
//! first run of ASCII digits in the file name.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Extension (without dot) of chunk files.
pub const DEFAULT_CHUNK_EXTENSION: &str = "chunk";

static SEQUENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());

/// What to do with a chunk whose name carries no sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnnumberedChunks {
    /// Fail the merge.
    #[default]
    Reject,
    /// Treat it as sequence `-1` so it sorts before every numbered chunk.
    SortFirst,
}

impl UnnumberedChunks {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnnumberedChunks::Reject => "reject",
            UnnumberedChunks::SortFirst => "sort_first",
        }
    }
}

impl fmt::Display for UnnumberedChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UnnumberedChunks {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(UnnumberedChunks::Reject),
            "sort_first" | "sort-first" => Ok(UnnumberedChunks::SortFirst),
            other => Err(format!("unknown unnumbered chunk policy: {other}")),
        }
    }
}

/// One uploaded fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// Sequence number extracted from the file name (`-1` when unnumbered)
    pub sequence: i64,
    /// File location
    pub path: PathBuf,
}

impl ChunkFile {
    fn file_name(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or_default()
    }
}

impl Ord for ChunkFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.file_name().cmp(other.file_name()))
    }
}

impl PartialOrd for ChunkFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Extract the sequence number from a chunk path.
///
/// Returns `None` when the base name has no digits or the digit run does not
/// fit in an `i64`.
pub fn extract_sequence(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_string_lossy();
    SEQUENCE_PATTERN.find(&name)?.as_str().parse().ok()
}

/// List the chunks of `dir` in merge order.
pub async fn discover_chunks(
    dir: &Path,
    extension: &str,
    unnumbered: UnnumberedChunks,
) -> MediaResult<Vec<ChunkFile>> {
    let directory_error = |source| MediaError::ChunkDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(directory_error)?;
    let mut chunks = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(directory_error)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if !entry.file_type().await.map_err(directory_error)?.is_file() {
            continue;
        }

        let sequence = match (extract_sequence(&path), unnumbered) {
            (Some(n), _) => n,
            (None, UnnumberedChunks::SortFirst) => {
                warn!("Chunk {} has no sequence number, ordering it first", path.display());
                -1
            }
            (None, UnnumberedChunks::Reject) => return Err(MediaError::UnnumberedChunk(path)),
        };

        chunks.push(ChunkFile { sequence, path });
    }

    chunks.sort();

    for pair in chunks.windows(2) {
        if pair[0].sequence == pair[1].sequence {
            warn!(
                "Duplicate chunk sequence {}: {} and {}",
                pair[0].sequence,
                pair[0].path.display(),
                pair[1].path.display()
            );
        }
    }

    debug!("Discovered {} chunks in {}", chunks.len(), dir.display());
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_sequence() {
        assert_eq!(extract_sequence(Path::new("/up/0.chunk")), Some(0));
        assert_eq!(extract_sequence(Path::new("/up/17.chunk")), Some(17));
        assert_eq!(extract_sequence(Path::new("/up/part_0042.chunk")), Some(42));
        assert_eq!(extract_sequence(Path::new("/up/a12b34.chunk")), Some(12));
        // Only ASCII digits count
        assert_eq!(extract_sequence(Path::new("/up/\u{0663}5.chunk")), Some(5));
        assert_eq!(extract_sequence(Path::new("/up/\u{0663}.chunk")), None);
        // Digits in parent directories are ignored
        assert_eq!(extract_sequence(Path::new("/up/99/part.chunk")), None);
        assert_eq!(
            extract_sequence(Path::new("/up/99999999999999999999999.chunk")),
            None
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("reject".parse::<UnnumberedChunks>().unwrap(), UnnumberedChunks::Reject);
        assert_eq!(
            "SORT_FIRST".parse::<UnnumberedChunks>().unwrap(),
            UnnumberedChunks::SortFirst
        );
        assert!("skip".parse::<UnnumberedChunks>().is_err());
    }

    #[tokio::test]
    async fn test_discover_orders_numerically() {
        let dir = TempDir::new().unwrap();
        for name in ["10.chunk", "2.chunk", "1.chunk", "notes.txt", "0.chunk"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let chunks = discover_chunks(dir.path(), "chunk", UnnumberedChunks::Reject)
            .await
            .unwrap();
        let order: Vec<i64> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(order, vec![0, 1, 2, 10]);
    }

    #[tokio::test]
    async fn test_unnumbered_chunk_policies() {
        let dir = TempDir::new().unwrap();
        for name in ["1.chunk", "head.chunk", "0.chunk"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let err = discover_chunks(dir.path(), "chunk", UnnumberedChunks::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnnumberedChunk(_)));

        let chunks = discover_chunks(dir.path(), "chunk", UnnumberedChunks::SortFirst)
            .await
            .unwrap();
        assert_eq!(chunks[0].sequence, -1);
        assert!(chunks[0].path.ends_with("head.chunk"));
        assert_eq!(chunks[1].sequence, 0);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_order_is_deterministic() {
        let dir = TempDir::new().unwrap();
        for name in ["b1.chunk", "a1.chunk", "0.chunk"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let chunks = discover_chunks(dir.path(), "chunk", UnnumberedChunks::Reject)
            .await
            .unwrap();
        let names: Vec<_> = chunks
            .iter()
            .map(|c| c.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["0.chunk", "a1.chunk", "b1.chunk"]);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let err = discover_chunks(Path::new("/nonexistent/vconv"), "chunk", UnnumberedChunks::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ChunkDirectory { .. }));
    }
}
