//! DASH packaging of a merged upload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use vconv_models::MANIFEST_FILE;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Result of a successful transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutput {
    /// Manifest written into the output directory
    pub manifest: PathBuf,
    /// Whether the merged intermediate file was deleted
    pub merged_removed: bool,
}

/// Converts a merged upload into segmented streaming output.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Package `merged` into `output_dir`, then delete `merged`.
    async fn transcode(&self, merged: &Path, output_dir: &Path) -> MediaResult<TranscodeOutput>;
}

/// [`Transcoder`] backed by an `ffmpeg` subprocess.
///
/// Streams are remuxed, not re-encoded.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    runner: FfmpegRunner,
    threads: usize,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            runner: FfmpegRunner::new(program).with_timeout(timeout),
            threads,
        }
    }

    /// Override the thread count hint.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Build the packaging command.
    pub fn command(&self, merged: &Path, output_dir: &Path) -> FfmpegCommand {
        FfmpegCommand::new(merged, output_dir.join(MANIFEST_FILE))
            .stream_copy()
            .movflags("+faststart")
            .threads(self.threads)
            .format("dash")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, merged: &Path, output_dir: &Path) -> MediaResult<TranscodeOutput> {
        tokio::fs::create_dir_all(output_dir).await?;

        let cmd = self.command(merged, output_dir);
        info!("Packaging {} into {}", merged.display(), output_dir.display());

        let run = self.runner.run(&cmd).await?;
        if !run.success {
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg exited with status {:?}", run.exit_code),
                Some(run.output),
                run.exit_code,
            ));
        }

        let merged_removed = match tokio::fs::remove_file(merged).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove merged file {}: {}", merged.display(), e);
                false
            }
        };

        Ok(TranscodeOutput {
            manifest: cmd.output().to_path_buf(),
            merged_removed,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_command_shape() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", Duration::from_secs(1)).with_threads(4);
        let args = transcoder
            .command(Path::new("/up/1/merged.mp4"), Path::new("/up/1/mpeg-dash"))
            .build_args();

        assert!(args.windows(2).any(|w| w == ["-threads", "4"]));
        assert!(args.windows(2).any(|w| w == ["-f", "dash"]));
        assert_eq!(args.last().unwrap(), "/up/1/mpeg-dash/output.mpd");
    }

    #[tokio::test]
    async fn test_success_removes_merged_file() {
        let dir = TempDir::new().unwrap();
        let merged = dir.path().join("merged.mp4");
        std::fs::write(&merged, b"data").unwrap();
        let program = fake_ffmpeg(dir.path(), r#"for last; do :; done; echo manifest > "$last""#);

        let output_dir = dir.path().join("mpeg-dash");
        let out = FfmpegTranscoder::new(program, Duration::from_secs(10))
            .transcode(&merged, &output_dir)
            .await
            .unwrap();

        assert!(out.merged_removed);
        assert!(!merged.exists());
        assert!(output_dir.join("output.mpd").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_output() {
        let dir = TempDir::new().unwrap();
        let merged = dir.path().join("merged.mp4");
        std::fs::write(&merged, b"data").unwrap();
        let program = fake_ffmpeg(
            dir.path(),
            "echo 'Invalid data found when processing input' >&2\nexit 1",
        );

        let err = FfmpegTranscoder::new(program, Duration::from_secs(10))
            .transcode(&merged, &dir.path().join("mpeg-dash"))
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::FfmpegFailed { exit_code: Some(1), .. }));
        assert!(err.captured_output().unwrap().contains("Invalid data"));
        assert!(merged.exists(), "merged file is kept on failure");
    }

    #[tokio::test]
    async fn test_deadline_kills_process() {
        let dir = TempDir::new().unwrap();
        let merged = dir.path().join("merged.mp4");
        std::fs::write(&merged, b"data").unwrap();
        let program = fake_ffmpeg(dir.path(), "echo started\nexec sleep 30");

        let started = std::time::Instant::now();
        let err = FfmpegTranscoder::new(program, Duration::from_millis(300))
            .transcode(&merged, &dir.path().join("mpeg-dash"))
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::TranscodeTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
