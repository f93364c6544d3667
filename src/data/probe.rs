use std::{
    path::Path,
    process::{Command, Stdio},
};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{data::spawn_blocking, error::Error};

/// Pixel dimensions of the first video stream of a probed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaDimensions {
    pub width: u32,
    pub height: u32,
}

/// Coarse aspect ratio bucket used as the directory prefix of video object keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectCategory {
    Landscape,
    Portrait,
    Other,
}

impl AspectCategory {
    /// Buckets the given dimensions by their width / height ratio rounded to two decimals.
    ///
    /// The exact match on the rounded value makes the 1.77 / 1.78 and 0.56 / 0.57 boundaries
    /// sensitive to single pixel differences, e.g. 1774x1000 does not count as landscape while
    /// 1778x1000 does.
    pub fn from_dimensions(dimensions: MediaDimensions) -> AspectCategory {
        let ratio = f64::from(dimensions.width) / f64::from(dimensions.height);
        match format!("{ratio:.2}").as_str() {
            "1.78" => AspectCategory::Landscape,
            "0.56" => AspectCategory::Portrait,
            _ => AspectCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectCategory::Landscape => "landscape",
            AspectCategory::Portrait => "portrait",
            AspectCategory::Other => "other",
        }
    }
}

/// Extracts stream metadata from a locally staged media file without decoding it.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe_dimensions(&self, path: &Path) -> Result<MediaDimensions, Error>;
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// [`MediaProber`] that shells out to ffprobe for structured stream metadata.
pub struct FfprobeProber;

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe_dimensions(&self, path: &Path) -> Result<MediaDimensions, Error> {
        let probe_process = Command::new("ffprobe")
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ProbeProcessError(format!("Failed to spawn ffprobe process: {e}"))
            })?;

        let process_output = spawn_blocking(|| {
            probe_process.wait_with_output().map_err(|e| {
                Error::ProbeProcessError(format!("Failed to get ffprobe process output: {e}"))
            })
        })
        .await?;

        if !process_output.status.success() {
            let error_msg = String::from_utf8_lossy(&process_output.stderr);
            return Err(Error::ProbeProcessError(format!(
                "ffprobe failed with status {}: {}",
                process_output.status, error_msg
            )));
        }

        parse_probe_output(&process_output.stdout)
    }
}

/// Extracts the dimensions of the first video stream from ffprobe json output.
fn parse_probe_output(output: &[u8]) -> Result<MediaDimensions, Error> {
    let probe_output = serde_json::from_slice::<ProbeOutput>(output)
        .map_err(|e| Error::ProbeProcessError(format!("Failed to parse ffprobe output: {e}")))?;

    probe_output
        .streams
        .iter()
        .find_map(|stream| match stream {
            ProbeStream {
                codec_type: Some(codec_type),
                width: Some(width),
                height: Some(height),
            } if codec_type == "video" => Some(MediaDimensions {
                width: *width,
                height: *height,
            }),
            _ => None,
        })
        .ok_or_else(|| {
            Error::ProbeProcessError(String::from("ffprobe output contains no video stream"))
        })
}
