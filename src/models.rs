//! Shared data models used across modules

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::DEFAULT_SAMPLE_OFFSETS;

/// Declared kind of a user-selected asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Work out the media kind from the declared content type, falling back to
    /// the file extension and finally to sniffing the payload for image magic.
    pub fn detect(content_type: Option<&str>, file_name: &str, data: &[u8]) -> Option<Self> {
        if let Some(content_type) = content_type {
            if content_type.starts_with("image/") {
                return Some(MediaKind::Image);
            }
            if content_type.starts_with("video/") {
                return Some(MediaKind::Video);
            }
        }

        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" => Some(MediaKind::Image),
            "mp4" | "mov" | "webm" | "mkv" | "avi" => Some(MediaKind::Video),
            _ => image::guess_format(data).ok().map(|_| MediaKind::Image),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// The asset selected for one analysis run
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub name: String,
    pub kind: MediaKind,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl MediaInput {
    pub fn new(name: impl Into<String>, kind: MediaKind, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            kind,
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// MIME type used when the payload goes to the classifier as-is
    pub fn mime_type(&self) -> &str {
        match (&self.content_type, self.kind) {
            (Some(content_type), _) => content_type.as_str(),
            (None, MediaKind::Image) => image::guess_format(&self.data)
                .map(|f| f.to_mime_type())
                .unwrap_or("application/octet-stream"),
            (None, MediaKind::Video) => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidSampleOffsets {
    #[error("at least one sample offset is required")]
    Empty,
    #[error("offset {0} is outside (0, 1)")]
    OutOfRange(f64),
    #[error("offsets must be strictly increasing ({prev} then {next})")]
    NotIncreasing { prev: f64, next: f64 },
    #[error("could not parse offset {0:?}")]
    Parse(String),
}

/// Ordered relative positions in `(0, 1)` at which video frames are captured.
///
/// Defines both how many classifier calls a video costs and how they are
/// spread over its duration.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOffsets(Vec<f64>);

impl SampleOffsets {
    pub fn new(offsets: Vec<f64>) -> Result<Self, InvalidSampleOffsets> {
        if offsets.is_empty() {
            return Err(InvalidSampleOffsets::Empty);
        }
        for &p in &offsets {
            if !(p > 0.0 && p < 1.0) {
                return Err(InvalidSampleOffsets::OutOfRange(p));
            }
        }
        for pair in offsets.windows(2) {
            if pair[1] <= pair[0] {
                return Err(InvalidSampleOffsets::NotIncreasing {
                    prev: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(Self(offsets))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SampleOffsets {
    fn default() -> Self {
        Self(DEFAULT_SAMPLE_OFFSETS.to_vec())
    }
}

impl FromStr for SampleOffsets {
    type Err = InvalidSampleOffsets;

    /// Parse a comma-separated list such as `0.1,0.5,0.9`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let offsets = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|_| InvalidSampleOffsets::Parse(p.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(offsets)
    }
}

/// A still image rendered from a video at one sample offset
#[derive(Debug, Clone)]
pub struct Frame {
    pub offset: f64,
    pub timestamp_secs: f64,
    pub width: u32,
    pub height: u32,
    /// JPEG-encoded payload at the video's native resolution
    pub jpeg: Bytes,
}

/// Normalized result of one classifier call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameClassification {
    /// Integer percentage 0-100
    pub confidence: u8,
    /// The remote service's own fake/real call
    pub flagged_synthetic: bool,
    pub algorithm: Option<String>,
}

impl FrameClassification {
    pub fn new(confidence: u8, flagged_synthetic: bool, algorithm: Option<String>) -> Self {
        Self {
            confidence: confidence.min(100),
            flagged_synthetic,
            algorithm,
        }
    }

    /// Stand-in reported when the classifier could not be reached.
    ///
    /// Indistinguishable from a confident "real" call at confidence 0; callers
    /// that substitute it accept that ambiguity.
    pub fn inconclusive() -> Self {
        Self {
            confidence: 0,
            flagged_synthetic: false,
            algorithm: None,
        }
    }
}

/// Final decision of one analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_synthetic: bool,
    #[serde(rename = "confidence_score")]
    pub confidence: u8,
    pub label: String,
    #[serde(rename = "reasoning_summary")]
    pub reasoning: String,
}

/// Persisted projection of a verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub file_name: String,
    pub label: String,
    pub confidence: u8,
    pub is_synthetic: bool,
    pub created_at: DateTime<Utc>,
}

/// A history entry before the store assigns its id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryRecord {
    pub file_name: String,
    pub label: String,
    pub confidence: u8,
    pub is_synthetic: bool,
}

impl NewHistoryRecord {
    pub fn from_verdict(file_name: impl Into<String>, verdict: &Verdict) -> Self {
        Self {
            file_name: file_name.into(),
            label: verdict.label.clone(),
            confidence: verdict.confidence,
            is_synthetic: verdict.is_synthetic,
        }
    }
}
