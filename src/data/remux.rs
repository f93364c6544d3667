use std::{
    path::Path,
    process::{Command, Stdio},
};

use async_trait::async_trait;
use tempfile::TempPath;

use crate::{data::spawn_blocking, error::Error};

/// Rewrites a media container so its index and metadata precede the sample data, allowing
/// playback to start before the full file is downloaded.
///
/// The returned temp path is owned by the caller and removed when dropped. The source file is
/// never modified.
#[async_trait]
pub trait MediaRemuxer: Send + Sync {
    async fn remux_fast_start(&self, source: &Path) -> Result<TempPath, Error>;
}

/// [`MediaRemuxer`] that shells out to ffmpeg, copying the encoded streams into a faststart
/// mp4 container without re-encoding.
pub struct FfmpegRemuxer;

#[async_trait]
impl MediaRemuxer for FfmpegRemuxer {
    async fn remux_fast_start(&self, source: &Path) -> Result<TempPath, Error> {
        let output_path = tempfile::Builder::new()
            .prefix("faststart")
            .suffix(".mp4")
            .tempfile()
            .map_err(|e| Error::IoError(format!("Failed to create temporary file: {e}")))?
            .into_temp_path();

        let remux_process = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-i"])
            .arg(source)
            .args(["-c", "copy", "-movflags", "faststart", "-f", "mp4"])
            .arg(&*output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::RemuxProcessError(format!("Failed to spawn ffmpeg process: {e}"))
            })?;

        let process_output = spawn_blocking(|| {
            remux_process.wait_with_output().map_err(|e| {
                Error::RemuxProcessError(format!("Failed to get ffmpeg process output: {e}"))
            })
        })
        .await?;

        if !process_output.status.success() {
            let error_msg = String::from_utf8_lossy(&process_output.stderr);
            return Err(Error::RemuxProcessError(format!(
                "ffmpeg remux of {} failed with status {}: {}",
                source.display(),
                process_output.status,
                error_msg
            )));
        }

        let output_size = std::fs::metadata(&output_path)
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        if output_size == 0 {
            return Err(Error::RemuxProcessError(format!(
                "ffmpeg remux of {} produced no output",
                source.display()
            )));
        }

        Ok(output_path)
    }
}
