//! Scripted collaborators for unit tests

use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;

use crate::analysis::{Analyzer, AnalyzerOptions};
use crate::classifier::{Classifier, ClassifierError, ImagePayload};
use crate::frames::{FrameExtractionError, VideoHandle, VideoSource};
use crate::models::{FrameClassification, HistoryRecord, NewHistoryRecord};
use crate::constants::MAX_ANALYZE_UPLOAD_SIZE;
use crate::services::history::{HistoryStore, MemoryHistoryStore, PersistenceError};
use crate::{AppState, build_app};

pub fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 64, 200]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

pub struct ScriptedVideo {
    duration_secs: f64,
    frame: Bytes,
    seeks: Vec<f64>,
    hang_at: Option<usize>,
    fail_at: Option<usize>,
}

impl ScriptedVideo {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            frame: Bytes::from(tiny_jpeg(8, 4)),
            seeks: Vec::new(),
            hang_at: None,
            fail_at: None,
        }
    }

    /// The nth seek (0-based) never completes
    pub fn hang_on_seek(mut self, n: usize) -> Self {
        self.hang_at = Some(n);
        self
    }

    pub fn fail_on_seek(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn with_frame(mut self, frame: Bytes) -> Self {
        self.frame = frame;
        self
    }

    pub fn seeks(&self) -> &[f64] {
        &self.seeks
    }
}

impl VideoHandle for ScriptedVideo {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    async fn seek(&mut self, position_secs: f64) -> Result<(), FrameExtractionError> {
        let n = self.seeks.len();
        self.seeks.push(position_secs);
        if self.hang_at == Some(n) {
            std::future::pending::<()>().await;
        }
        if self.fail_at == Some(n) {
            return Err(FrameExtractionError::Unreadable("scripted seek failure".into()));
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<Bytes, FrameExtractionError> {
        Ok(self.frame.clone())
    }
}

pub struct ScriptedVideoSource {
    duration_secs: f64,
    fail_open: bool,
    opened: AtomicUsize,
}

impl ScriptedVideoSource {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            fail_open: false,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn unreadable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(0.0)
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl VideoSource for ScriptedVideoSource {
    type Video = ScriptedVideo;

    async fn open(&self, _data: Bytes) -> Result<ScriptedVideo, FrameExtractionError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(FrameExtractionError::Unreadable("scripted unreadable video".into()));
        }
        Ok(ScriptedVideo::new(self.duration_secs))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Score(u8),
    Fail,
}

/// Hands out scripted results in call order; score 0 once the script runs dry.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedClassifier {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn scores(scores: &[u8]) -> Self {
        Self::new(scores.iter().map(|&s| Scripted::Score(s)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for ScriptedClassifier {
    async fn classify(&self, _image: ImagePayload) -> Result<FrameClassification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Score(0));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match next {
            Scripted::Score(c) => Ok(FrameClassification::new(c, c > 50, Some("scripted".into()))),
            Scripted::Fail => Err(ClassifierError::Decode("scripted failure".into())),
        }
    }
}

/// History store whose every call fails
pub struct FailingHistoryStore;

impl HistoryStore for FailingHistoryStore {
    async fn append(&self, _record: NewHistoryRecord) -> Result<HistoryRecord, PersistenceError> {
        Err(PersistenceError::Unavailable("scripted outage".into()))
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<HistoryRecord>, PersistenceError> {
        Err(PersistenceError::Unavailable("scripted outage".into()))
    }
}

pub type TestState = AppState<ScriptedClassifier, MemoryHistoryStore, ScriptedVideoSource>;

/// The full HTTP app over scripted collaborators and an in-memory history
pub fn test_app(classifier: ScriptedClassifier) -> (Router, Arc<TestState>) {
    let analyzer = Analyzer::new(
        classifier,
        MemoryHistoryStore::new(),
        ScriptedVideoSource::new(12.0),
        AnalyzerOptions::default(),
    );
    let state = Arc::new(AppState {
        analyzer: Arc::new(analyzer),
        max_upload_bytes: MAX_ANALYZE_UPLOAD_SIZE,
    });
    (build_app(Arc::clone(&state)), state)
}

const BOUNDARY: &str = "synthguard-test-boundary";

/// A `POST /analyze` request carrying one multipart field
pub fn upload(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
