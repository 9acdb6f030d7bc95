//! Chunk merging.
//!
//! Concatenates the chunks of an upload directory into a single file, one
//! chunk at a time through a buffered writer.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::chunks::{discover_chunks, UnnumberedChunks, DEFAULT_CHUNK_EXTENSION};
use crate::error::{MediaError, MediaResult};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Options controlling chunk discovery.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Chunk file extension, without the dot
    pub extension: String,
    /// Handling of chunks without a sequence number
    pub unnumbered: UnnumberedChunks,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            extension: DEFAULT_CHUNK_EXTENSION.to_string(),
            unnumbered: UnnumberedChunks::default(),
        }
    }
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub chunks: usize,
    pub bytes: u64,
}

/// Merge the chunks of `dir` into `output`.
///
/// On failure a partially written `output` may remain; removing it is up to
/// the caller.
pub async fn merge_chunks(
    dir: &Path,
    output: &Path,
    options: &MergeOptions,
) -> MediaResult<MergeSummary> {
    let chunks = discover_chunks(dir, &options.extension, options.unnumbered).await?;
    if chunks.is_empty() {
        return Err(MediaError::NoChunks(dir.to_path_buf()));
    }

    let write_error = |source| MediaError::MergeWrite {
        path: output.to_path_buf(),
        source,
    };
    let read_error = |path: &Path, source| MediaError::ChunkRead {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(output).await.map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    let mut bytes = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    for chunk in &chunks {
        let mut input = File::open(&chunk.path)
            .await
            .map_err(|e| read_error(&chunk.path, e))?;

        let mut copied = 0u64;
        loop {
            let n = input
                .read(&mut buf)
                .await
                .map_err(|e| read_error(&chunk.path, e))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await.map_err(write_error)?;
            copied += n as u64;
        }

        debug!("Appended chunk {} ({} bytes)", chunk.path.display(), copied);
        bytes += copied;
    }

    writer.flush().await.map_err(write_error)?;
    writer.into_inner().sync_all().await.map_err(write_error)?;

    info!(
        "Merged {} chunks ({} bytes) into {}",
        chunks.len(),
        bytes,
        output.display()
    );

    Ok(MergeSummary {
        output: output.to_path_buf(),
        chunks: chunks.len(),
        bytes,
    })
}
