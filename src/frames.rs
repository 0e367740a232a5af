//! Video frame sampling
//!
//! Seeks a video to each configured offset in turn and captures the frame
//! shown there as a full-resolution JPEG. A video handle has a single playhead,
//! so the sampler holds it by exclusive borrow and never has more than one
//! seek outstanding.

use bytes::Bytes;
use image::ImageReader;
use std::future::Future;
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::models::{Frame, SampleOffsets};

#[derive(Debug, thiserror::Error)]
pub enum FrameExtractionError {
    #[error("video unreadable: {0}")]
    Unreadable(String),
    #[error("seek to {position_secs:.3}s did not complete within {timeout:?}")]
    SeekTimeout {
        position_secs: f64,
        timeout: Duration,
    },
    #[error("frame capture at {position_secs:.3}s failed: {reason}")]
    Capture { position_secs: f64, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoder positioned on one video, with a single playhead.
pub trait VideoHandle: Send {
    fn duration_secs(&self) -> f64;

    /// Move the playhead to `position_secs`, resolving once the frame there is
    /// ready to be captured.
    fn seek(
        &mut self,
        position_secs: f64,
    ) -> impl Future<Output = Result<(), FrameExtractionError>> + Send;

    /// Render the frame at the current playhead as a JPEG.
    fn capture(&mut self) -> Result<Bytes, FrameExtractionError>;
}

/// Opens video payloads into handles the sampler can drive.
pub trait VideoSource: Send + Sync {
    type Video: VideoHandle;

    fn open(&self, data: Bytes) -> impl Future<Output = Result<Self::Video, FrameExtractionError>> + Send;
}

/// Lazy, finite sequence of frames, one per offset, in offset order.
///
/// Not restartable: once an offset has been consumed, or a seek has failed,
/// it is never revisited.
pub struct FrameSampler<'v, V: VideoHandle> {
    video: &'v mut V,
    offsets: std::vec::IntoIter<f64>,
    seek_timeout: Duration,
    failed: bool,
}

impl<'v, V: VideoHandle> FrameSampler<'v, V> {
    pub fn new(video: &'v mut V, offsets: &SampleOffsets, seek_timeout: Duration) -> Self {
        Self {
            video,
            offsets: offsets.as_slice().to_vec().into_iter(),
            seek_timeout,
            failed: false,
        }
    }

    /// Offsets not yet sampled
    pub fn remaining(&self) -> usize {
        if self.failed { 0 } else { self.offsets.len() }
    }

    pub async fn next_frame(&mut self) -> Option<Result<Frame, FrameExtractionError>> {
        if self.failed {
            return None;
        }
        let offset = self.offsets.next()?;

        let result = self.sample_at(offset).await;
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    /// Drain every remaining offset, stopping at the first failure.
    pub async fn collect_all(mut self) -> Result<Vec<Frame>, FrameExtractionError> {
        let mut frames = Vec::with_capacity(self.remaining());
        while let Some(frame) = self.next_frame().await {
            frames.push(frame?);
        }
        Ok(frames)
    }

    async fn sample_at(&mut self, offset: f64) -> Result<Frame, FrameExtractionError> {
        let position_secs = self.video.duration_secs() * offset;

        match tokio::time::timeout(self.seek_timeout, self.video.seek(position_secs)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FrameExtractionError::SeekTimeout {
                    position_secs,
                    timeout: self.seek_timeout,
                });
            }
        }

        let jpeg = self.video.capture()?;
        let (width, height) = probe_dimensions(&jpeg).map_err(|reason| {
            FrameExtractionError::Capture {
                position_secs,
                reason,
            }
        })?;

        log::debug!(
            "[frames] Captured frame at {:.2}s (offset {}, {}x{}, {} bytes)",
            position_secs,
            offset,
            width,
            height,
            jpeg.len()
        );

        Ok(Frame {
            offset,
            timestamp_secs: position_secs,
            width,
            height,
            jpeg,
        })
    }
}

fn probe_dimensions(data: &[u8]) -> Result<(u32, u32), String> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}

/// Video handle backed by the `ffmpeg`/`ffprobe` binaries.
///
/// The payload is spilled to a temp file that is removed on drop. Each seek
/// decodes exactly one frame at the target timestamp.
pub struct FfmpegVideo {
    path: PathBuf,
    duration_secs: f64,
    ffmpeg_threads: usize,
    current: Option<(f64, Bytes)>,
    position_secs: f64,
}

impl FfmpegVideo {
    pub async fn open(data: &[u8], ffmpeg_threads: usize) -> Result<Self, FrameExtractionError> {
        let path = std::env::temp_dir().join(format!(
            "synthguard_video_{}.tmp",
            rand::random::<u64>()
        ));
        Self::open_at(path, data, ffmpeg_threads).await
    }

    /// Spill `data` to `path` and probe it. `path` is owned by the handle
    /// from here on and removed when it drops.
    async fn open_at(
        path: PathBuf,
        data: &[u8],
        ffmpeg_threads: usize,
    ) -> Result<Self, FrameExtractionError> {
        tokio::fs::write(&path, data).await?;

        // Construct before probing so the temp file is cleaned up on failure
        let mut video = Self {
            path,
            duration_secs: 0.0,
            ffmpeg_threads: ffmpeg_threads.max(1),
            current: None,
            position_secs: 0.0,
        };
        video.duration_secs = video.probe_duration().await?;

        log::debug!(
            "[frames] Opened video {:?} ({:.2}s)",
            video.path,
            video.duration_secs
        );
        Ok(video)
    }

    async fn probe_duration(&self) -> Result<f64, FrameExtractionError> {
        let output = Command::new("ffprobe")
            .args(["-v", "error"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(&self.path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FrameExtractionError::Unreadable(format!("failed to spawn ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FrameExtractionError::Unreadable(format!(
                "ffprobe failed: {}",
                stderr.trim()
            )));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            FrameExtractionError::Unreadable("video has no usable duration".to_string())
        })
    }
}

/// ffprobe prints `N/A` for streams without a container duration
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

impl VideoHandle for FfmpegVideo {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    async fn seek(&mut self, position_secs: f64) -> Result<(), FrameExtractionError> {
        let position_secs = position_secs.clamp(0.0, self.duration_secs);
        self.current = None;
        let threads = self.ffmpeg_threads.to_string();
        let timestamp = format!("{:.3}", position_secs);

        let output = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-threads", &threads])
            .args(["-ss", &timestamp])
            .arg("-i")
            .arg(&self.path)
            .args(["-an", "-sn"])
            .args(["-frames:v", "1"])
            .args(["-q:v", "2"])
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FrameExtractionError::Capture {
                position_secs,
                reason: format!("failed to spawn ffmpeg: {}", e),
            })?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FrameExtractionError::Capture {
                position_secs,
                reason: format!("ffmpeg produced no frame: {}", stderr.trim()),
            });
        }

        self.position_secs = position_secs;
        self.current = Some((position_secs, Bytes::from(output.stdout)));
        Ok(())
    }

    fn capture(&mut self) -> Result<Bytes, FrameExtractionError> {
        match &self.current {
            Some((at, jpeg)) if *at == self.position_secs => Ok(jpeg.clone()),
            _ => Err(FrameExtractionError::Capture {
                position_secs: self.position_secs,
                reason: "no frame decoded at playhead".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffmpeg_threads: usize,
}

impl FfmpegSource {
    pub fn new(ffmpeg_threads: usize) -> Self {
        Self { ffmpeg_threads }
    }
}

impl VideoSource for FfmpegSource {
    type Video = FfmpegVideo;

    async fn open(&self, data: Bytes) -> Result<FfmpegVideo, FrameExtractionError> {
        FfmpegVideo::open(&data, self.ffmpeg_threads).await
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("[frames] Failed to cleanup temp file {:?}: {}", self.path, e);
        }
    }
}
