//! Analysis orchestrator
//!
//! Drives one run from a selected asset to a persisted verdict:
//! sample frames (video only), classify, aggregate, append to history and
//! refresh the recent view. Runs are exclusive per [`Analyzer`]; progress is
//! published on a watch channel and every step can be cancelled.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::classifier::{Classifier, ClassifierError, ImagePayload};
use crate::constants::{FRAME_FILE_NAME, RECENT_HISTORY_LIMIT};
use crate::frames::{FrameExtractionError, FrameSampler, VideoSource};
use crate::models::{
    FrameClassification, HistoryRecord, MediaInput, MediaKind, NewHistoryRecord, SampleOffsets,
    Verdict,
};
use crate::services::history::{HistoryStore, PersistenceError};
use crate::verdict::{AggregationPolicy, InsufficientSamplesError, VerdictAggregator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisState {
    Idle,
    Sampling,
    Classifying,
    Aggregating,
    Persisting,
    Error,
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisState::Idle => "idle",
            AnalysisState::Sampling => "sampling",
            AnalysisState::Classifying => "classifying",
            AnalysisState::Aggregating => "aggregating",
            AnalysisState::Persisting => "persisting",
            AnalysisState::Error => "error",
        };
        f.write_str(name)
    }
}

/// How sampled frames are sent to the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyMode {
    /// One frame at a time, interleaved with sampling
    #[default]
    Sequential,
    /// Sample every frame first, then classify all of them at once
    Concurrent,
}

impl FromStr for ClassifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(ClassifyMode::Sequential),
            "concurrent" => Ok(ClassifyMode::Concurrent),
            other => Err(format!("unknown classify mode {:?}", other)),
        }
    }
}

/// What a failed classifier call means for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Abort,
    /// Substitute the zero-confidence fallback and keep going
    Inconclusive,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "inconclusive" => Ok(FailurePolicy::Inconclusive),
            other => Err(format!("unknown classifier failure policy {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    pub offsets: SampleOffsets,
    pub seek_timeout: Duration,
    pub classify_mode: ClassifyMode,
    pub failure_policy: FailurePolicy,
    pub policy: AggregationPolicy,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            offsets: SampleOffsets::default(),
            seek_timeout: Duration::from_secs(15),
            classify_mode: ClassifyMode::default(),
            failure_policy: FailurePolicy::default(),
            policy: AggregationPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("no media selected")]
    NoInput,
    #[error("an analysis is already in progress")]
    Busy,
    #[error("analysis cancelled")]
    Cancelled,
    #[error(transparent)]
    FrameExtraction(#[from] FrameExtractionError),
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(#[from] ClassifierError),
    #[error(transparent)]
    InsufficientSamples(#[from] InsufficientSamplesError),
    #[error("analysis task failed: {0}")]
    Task(String),
}

/// Cooperative cancellation flag shared between a run and its handle
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancelToken,
    fut: F,
) -> Result<F::Output, AnalysisError> {
    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AnalysisError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<HistoryRecord>,
    /// Set when the verdict could not be saved or history could not be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_error: Option<String>,
    pub recent: Vec<HistoryRecord>,
}

/// Marks the analyzer busy for the lifetime of one run and puts it back to
/// idle however the run ends, including when its future is dropped.
struct RunGuard<'a> {
    busy: &'a AtomicBool,
    state: &'a watch::Sender<AnalysisState>,
}

impl<'a> RunGuard<'a> {
    fn acquire(busy: &'a AtomicBool, state: &'a watch::Sender<AnalysisState>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { busy, state })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(AnalysisState::Idle);
        log::debug!("[analysis] -> idle");
        self.busy.store(false, Ordering::Release);
    }
}

pub struct Analyzer<C, H, S> {
    classifier: C,
    history: H,
    videos: S,
    aggregator: VerdictAggregator,
    options: AnalyzerOptions,
    state: watch::Sender<AnalysisState>,
    busy: AtomicBool,
}

impl<C, H, S> Analyzer<C, H, S>
where
    C: Classifier,
    H: HistoryStore,
    S: VideoSource,
{
    pub fn new(classifier: C, history: H, videos: S, options: AnalyzerOptions) -> Self {
        Self {
            classifier,
            history,
            videos,
            aggregator: VerdictAggregator::new(options.policy),
            options,
            state: watch::Sender::new(AnalysisState::Idle),
            busy: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn current_state(&self) -> AnalysisState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AnalysisState> {
        self.state.subscribe()
    }

    /// The capped, newest-first recent-history view
    pub async fn recent_history(&self) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let mut records = self.history.recent(RECENT_HISTORY_LIMIT).await?;
        records.truncate(RECENT_HISTORY_LIMIT);
        Ok(records)
    }

    /// Run one analysis to completion.
    ///
    /// Fails with [`AnalysisError::Busy`] if another run holds this analyzer.
    /// Once a verdict exists the run always returns it; history failures are
    /// reported in [`AnalysisOutcome::history_error`].
    pub async fn analyze(
        &self,
        input: MediaInput,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        if input.is_empty() {
            return Err(AnalysisError::NoInput);
        }
        let _guard = RunGuard::acquire(&self.busy, &self.state).ok_or(AnalysisError::Busy)?;

        log::info!(
            "[analysis] Analyzing {} {:?} ({} bytes)",
            input.kind,
            input.name,
            input.data.len()
        );

        let verdict = match self.decide(&input, cancel).await {
            Ok(verdict) => verdict,
            Err(e) => {
                log::warn!("[analysis] Run for {:?} aborted: {}", input.name, e);
                self.transition(AnalysisState::Error);
                // Watchers get a turn to see the error before the guard resets to idle
                tokio::task::yield_now().await;
                return Err(e);
            }
        };

        log::info!(
            "[analysis] {:?}: {} ({}%)",
            input.name,
            verdict.label,
            verdict.confidence
        );

        Ok(self.persist(&input.name, verdict).await)
    }

    /// Run in the background, returning a handle that can observe progress,
    /// cancel, and await the outcome.
    pub fn spawn(self: &Arc<Self>, input: MediaInput) -> AnalysisHandle
    where
        C: 'static,
        H: 'static,
        S: 'static,
    {
        let cancel = CancelToken::new();
        let analyzer = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { analyzer.analyze(input, &token).await });

        AnalysisHandle {
            cancel,
            state: self.subscribe_state(),
            task,
        }
    }

    fn transition(&self, next: AnalysisState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            log::debug!("[analysis] {} -> {}", prev, next);
        }
    }

    async fn decide(
        &self,
        input: &MediaInput,
        cancel: &CancelToken,
    ) -> Result<Verdict, AnalysisError> {
        match input.kind {
            MediaKind::Image => {
                self.transition(AnalysisState::Classifying);
                let payload =
                    ImagePayload::new(input.data.clone(), input.mime_type(), input.name.clone());
                let sample = self.classify_one(payload, cancel).await?;

                self.transition(AnalysisState::Aggregating);
                Ok(self.aggregator.single(&sample))
            }
            MediaKind::Video => {
                let samples = self.sample_and_classify(input, cancel).await?;

                self.transition(AnalysisState::Aggregating);
                Ok(self.aggregator.multi(&samples)?)
            }
        }
    }

    async fn sample_and_classify(
        &self,
        input: &MediaInput,
        cancel: &CancelToken,
    ) -> Result<Vec<FrameClassification>, AnalysisError> {
        self.transition(AnalysisState::Sampling);
        let mut video = until_cancelled(cancel, self.videos.open(input.data.clone())).await??;
        let mut sampler =
            FrameSampler::new(&mut video, &self.options.offsets, self.options.seek_timeout);

        match self.options.classify_mode {
            ClassifyMode::Sequential => {
                let mut samples = Vec::with_capacity(sampler.remaining());
                loop {
                    self.transition(AnalysisState::Sampling);
                    let Some(frame) = until_cancelled(cancel, sampler.next_frame()).await? else {
                        break;
                    };
                    let frame = frame?;

                    self.transition(AnalysisState::Classifying);
                    let payload = ImagePayload::jpeg(frame.jpeg, FRAME_FILE_NAME);
                    samples.push(self.classify_one(payload, cancel).await?);
                }
                Ok(samples)
            }
            ClassifyMode::Concurrent => {
                let frames = until_cancelled(cancel, sampler.collect_all()).await??;

                self.transition(AnalysisState::Classifying);
                let calls = frames.into_iter().map(|frame| {
                    self.classify_one(ImagePayload::jpeg(frame.jpeg, FRAME_FILE_NAME), cancel)
                });
                futures::future::try_join_all(calls).await
            }
        }
    }

    async fn classify_one(
        &self,
        payload: ImagePayload,
        cancel: &CancelToken,
    ) -> Result<FrameClassification, AnalysisError> {
        match self.options.failure_policy {
            FailurePolicy::Abort => {
                Ok(until_cancelled(cancel, self.classifier.classify(payload)).await??)
            }
            FailurePolicy::Inconclusive => {
                let (sample, err) =
                    until_cancelled(cancel, self.classifier.classify_or_inconclusive(payload))
                        .await?;
                if let Some(e) = err {
                    log::warn!("[analysis] Classifier call failed, counting as inconclusive: {}", e);
                }
                Ok(sample)
            }
        }
    }

    async fn persist(&self, file_name: &str, verdict: Verdict) -> AnalysisOutcome {
        self.transition(AnalysisState::Persisting);

        let mut history_error = None;
        let record = match self
            .history
            .append(NewHistoryRecord::from_verdict(file_name, &verdict))
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                log::error!("[history] Failed to save verdict for {:?}: {}", file_name, e);
                history_error = Some(e.to_string());
                None
            }
        };

        let recent = match self.recent_history().await {
            Ok(recent) => recent,
            Err(e) => {
                log::error!("[history] Failed to refresh recent history: {}", e);
                history_error.get_or_insert_with(|| e.to_string());
                Vec::new()
            }
        };

        AnalysisOutcome {
            verdict,
            record,
            history_error,
            recent,
        }
    }
}

/// A run started with [`Analyzer::spawn`]
pub struct AnalysisHandle {
    cancel: CancelToken,
    state: watch::Receiver<AnalysisState>,
    task: JoinHandle<Result<AnalysisOutcome, AnalysisError>>,
}

impl AnalysisHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> AnalysisState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AnalysisState> {
        self.state.clone()
    }

    pub async fn join(self) -> Result<AnalysisOutcome, AnalysisError> {
        self.task
            .await
            .map_err(|e| AnalysisError::Task(e.to_string()))?
    }
}
