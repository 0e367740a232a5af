//! Service configuration loaded from the environment

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::analysis::{AnalyzerOptions, ClassifyMode, FailurePolicy};
use crate::constants::MAX_ANALYZE_UPLOAD_SIZE;
use crate::models::SampleOffsets;
use crate::verdict::AggregationPolicy;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:8000/predict";
const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SEEK_TIMEOUT_SECS: u64 = 15;
const DEFAULT_FFMPEG_THREADS: usize = 1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {key}={value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub classifier_url: String,
    pub classifier_timeout: Duration,
    pub classify_mode: ClassifyMode,
    pub failure_policy: FailurePolicy,
    pub sample_offsets: SampleOffsets,
    pub seek_timeout: Duration,
    pub ffmpeg_threads: usize,
    pub database_url: Option<String>,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys take their default;
    /// values that are present but invalid are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            classifier_url: get("CLASSIFIER_URL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
            classifier_timeout: Duration::from_secs(positive_or(
                &get,
                "CLASSIFIER_TIMEOUT_SECS",
                DEFAULT_CLASSIFIER_TIMEOUT_SECS,
            )?),
            classify_mode: parse_or(&get, "CLASSIFY_MODE", ClassifyMode::default())?,
            failure_policy: parse_or(&get, "CLASSIFIER_FAILURE_POLICY", FailurePolicy::default())?,
            sample_offsets: parse_or(&get, "SAMPLE_OFFSETS", SampleOffsets::default())?,
            seek_timeout: Duration::from_secs(positive_or(
                &get,
                "SEEK_TIMEOUT_SECS",
                DEFAULT_SEEK_TIMEOUT_SECS,
            )?),
            ffmpeg_threads: positive_or(&get, "FFMPEG_THREADS", DEFAULT_FFMPEG_THREADS)?,
            database_url: get("DATABASE_URL"),
            max_upload_bytes: positive_or(&get, "MAX_UPLOAD_BYTES", MAX_ANALYZE_UPLOAD_SIZE)?,
        })
    }

    pub fn analyzer_options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            offsets: self.sample_offsets.clone(),
            seek_timeout: self.seek_timeout,
            classify_mode: self.classify_mode,
            failure_policy: self.failure_policy,
            policy: AggregationPolicy::default(),
        }
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn positive_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: Display,
{
    let value = parse_or(get, key, default)?;
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError {
            key,
            value: get(key).unwrap_or_default(),
            reason: "must be greater than zero".to_string(),
        })
    }
}
