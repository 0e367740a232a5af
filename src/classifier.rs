//! Remote classifier client
//!
//! One call per image: POST the payload as multipart form data, read back the
//! service's fake/real call and confidence, and normalize them into a
//! [`FrameClassification`]. No retries happen here; the caller decides what a
//! failure means for the run.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::{Client, multipart};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::constants::FILE_FIELD;
use crate::models::FrameClassification;

/// Errors that make the classifier unavailable for one call.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("malformed classifier response: {0}")]
    Decode(String),
}

/// One image ready to be sent for classification
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Bytes,
    pub mime_type: String,
    pub file_name: String,
}

impl ImagePayload {
    pub fn new(data: Bytes, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn jpeg(data: Bytes, file_name: impl Into<String>) -> Self {
        Self::new(data, "image/jpeg", file_name)
    }
}

/// Pluggable synthetic-content classifier
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        image: ImagePayload,
    ) -> impl Future<Output = Result<FrameClassification, ClassifierError>> + Send;

    /// Classify, substituting the inconclusive fallback on failure.
    ///
    /// The error is handed back alongside so it can still be surfaced; the
    /// fallback's zero confidence cannot be told apart from a genuine "real".
    fn classify_or_inconclusive(
        &self,
        image: ImagePayload,
    ) -> impl Future<Output = (FrameClassification, Option<ClassifierError>)> + Send {
        async move {
            match self.classify(image).await {
                Ok(classification) => (classification, None),
                Err(e) => (FrameClassification::inconclusive(), Some(e)),
            }
        }
    }
}

/// Response body of the classification endpoint
#[derive(Debug, Clone, Deserialize)]
struct PredictResponse {
    #[serde(rename = "veredicto", alias = "verdict")]
    verdict: String,
    #[serde(rename = "confianza", alias = "confidence")]
    confidence: f64,
    #[serde(rename = "algoritmo", alias = "algorithm", default)]
    algorithm: Option<String>,
}

impl PredictResponse {
    fn normalize(self) -> Result<FrameClassification, ClassifierError> {
        let flagged_synthetic = match self.verdict.trim().to_lowercase().as_str() {
            "fake" => true,
            "real" => false,
            other => {
                return Err(ClassifierError::Decode(format!(
                    "unknown verdict label {:?}",
                    other
                )));
            }
        };

        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ClassifierError::Decode(format!(
                "confidence {} is not a fraction in [0, 1]",
                self.confidence
            )));
        }
        let percentage = (self.confidence * 100.0).round() as u8;

        Ok(FrameClassification::new(
            percentage,
            flagged_synthetic,
            self.algorithm.filter(|a| !a.is_empty()),
        ))
    }
}

/// Classifier reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    endpoint: String,
    http: Client,
}

impl HttpClassifier {
    /// Create a client posting to the full `endpoint` URL. Every request is
    /// bounded by `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Classifier for HttpClassifier {
    async fn classify(&self, image: ImagePayload) -> Result<FrameClassification, ClassifierError> {
        let size = image.data.len();
        let part = multipart::Part::bytes(image.data.to_vec())
            .file_name(image.file_name)
            .mime_str(&image.mime_type)?;
        let form = multipart::Form::new().part(FILE_FIELD, part);

        let response = self.http.post(&self.endpoint).multipart(form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::UnexpectedStatus { status, body });
        }

        let body = response.bytes().await?;
        let parsed: PredictResponse =
            serde_json::from_slice(&body).map_err(|e| ClassifierError::Decode(e.to_string()))?;
        let classification = parsed.normalize()?;

        log::debug!(
            "[classifier] {} bytes -> {}% (flagged={}, algorithm={:?})",
            size,
            classification.confidence,
            classification.flagged_synthetic,
            classification.algorithm
        );
        Ok(classification)
    }
}
