//! Verdict aggregation
//!
//! Turns one classification (still image) or an ordered run of per-frame
//! classifications (video) into a single verdict.
//!
//! Video policy: a clip is synthetic when the rounded mean confidence exceeds
//! the average threshold, or when any single frame exceeds the peak threshold.
//! Artifacts from generators are often confined to a handful of frames, so one
//! strong spike is enough; a moderately elevated mean catches artifacts spread
//! thinly across the whole clip.

use crate::constants::{AVERAGE_THRESHOLD, LABEL_AUTHENTIC, LABEL_SYNTHETIC, PEAK_THRESHOLD};
use crate::models::{FrameClassification, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no usable samples to aggregate")]
pub struct InsufficientSamplesError;

/// Thresholds for the multi-sample decision rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationPolicy {
    /// Synthetic when the rounded mean is strictly above this
    pub average_threshold: u8,
    /// Synthetic when any single sample is strictly above this
    pub peak_threshold: u8,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            average_threshold: AVERAGE_THRESHOLD,
            peak_threshold: PEAK_THRESHOLD,
        }
    }
}

/// Summary statistics over a run of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleStats {
    pub count: usize,
    /// Mean confidence, rounded half-up
    pub average: u8,
    pub peak: u8,
}

impl SampleStats {
    pub fn compute(samples: &[FrameClassification]) -> Result<Self, InsufficientSamplesError> {
        if samples.is_empty() {
            return Err(InsufficientSamplesError);
        }

        let count = samples.len();
        let sum: u64 = samples.iter().map(|s| u64::from(s.confidence)).sum();
        let peak = samples.iter().map(|s| s.confidence).max().unwrap_or(0);

        Ok(Self {
            count,
            average: round_half_up(sum, count as u64),
            peak,
        })
    }
}

/// Integer division rounded half-up: `floor(sum / n + 0.5)`
fn round_half_up(sum: u64, n: u64) -> u8 {
    let rounded = (2 * sum + n) / (2 * n);
    rounded.min(100) as u8
}

#[derive(Debug, Clone, Default)]
pub struct VerdictAggregator {
    policy: AggregationPolicy,
}

impl VerdictAggregator {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Still image: the one classification passes straight through, trusting
    /// the remote service's own fake/real call.
    pub fn single(&self, sample: &FrameClassification) -> Verdict {
        let label = if sample.flagged_synthetic {
            LABEL_SYNTHETIC
        } else {
            LABEL_AUTHENTIC
        };
        let algorithm = sample.algorithm.as_deref().unwrap_or("unknown algorithm");

        Verdict {
            is_synthetic: sample.flagged_synthetic,
            confidence: sample.confidence,
            label: label.to_string(),
            reasoning: format!(
                "Server analysis: {}% probability ({}).",
                sample.confidence, algorithm
            ),
        }
    }

    /// Video: combine every sampled frame into one verdict.
    ///
    /// Callers must pass the complete set of samples; partial aggregation is
    /// not meaningful because the mean depends on every frame.
    pub fn multi(&self, samples: &[FrameClassification]) -> Result<Verdict, InsufficientSamplesError> {
        let stats = SampleStats::compute(samples)?;
        Ok(self.decide(stats))
    }

    pub fn decide(&self, stats: SampleStats) -> Verdict {
        let is_synthetic = stats.average > self.policy.average_threshold
            || stats.peak > self.policy.peak_threshold;

        let (confidence, label) = if is_synthetic {
            (stats.average.max(stats.peak), LABEL_SYNTHETIC)
        } else {
            (stats.average, LABEL_AUTHENTIC)
        };

        Verdict {
            is_synthetic,
            confidence,
            label: label.to_string(),
            reasoning: format!(
                "Multi-layer analysis complete. Peak suspicion: {}%.",
                stats.peak
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(scores: &[u8]) -> Vec<FrameClassification> {
        scores
            .iter()
            .map(|&c| FrameClassification::new(c, c > 50, Some("test".into())))
            .collect()
    }

    #[test]
    fn single_is_identity_on_confidence() {
        let aggregator = VerdictAggregator::default();
        for confidence in [0u8, 1, 49, 50, 51, 75, 76, 99, 100] {
            for flagged in [true, false] {
                let sample = FrameClassification::new(confidence, flagged, None);
                let verdict = aggregator.single(&sample);
                assert_eq!(verdict.confidence, confidence);
                assert_eq!(verdict.is_synthetic, flagged);
            }
        }
    }

    #[test]
    fn single_trusts_remote_label_over_score() {
        let aggregator = VerdictAggregator::default();
        let verdict = aggregator.single(&FrameClassification::new(
            97,
            false,
            Some("ViT".into()),
        ));
        assert!(!verdict.is_synthetic);
        assert_eq!(verdict.label, LABEL_AUTHENTIC);
        assert_eq!(verdict.reasoning, "Server analysis: 97% probability (ViT).");
    }

    #[test]
    fn uniform_low_scores_are_authentic() {
        let verdict = VerdictAggregator::default()
            .multi(&samples(&[10, 10, 10, 10, 10]))
            .unwrap();
        assert!(!verdict.is_synthetic);
        assert_eq!(verdict.confidence, 10);
        assert_eq!(verdict.label, LABEL_AUTHENTIC);
    }

    #[test]
    fn single_spike_triggers_on_peak() {
        let verdict = VerdictAggregator::default()
            .multi(&samples(&[90, 10, 10, 10, 10]))
            .unwrap();
        assert!(verdict.is_synthetic);
        assert_eq!(verdict.confidence, 90);
        assert_eq!(verdict.label, LABEL_SYNTHETIC);
        assert_eq!(
            verdict.reasoning,
            "Multi-layer analysis complete. Peak suspicion: 90%."
        );
    }

    #[test]
    fn elevated_mean_triggers_on_average() {
        let verdict = VerdictAggregator::default()
            .multi(&samples(&[55, 55, 55, 55, 55]))
            .unwrap();
        assert!(verdict.is_synthetic);
        assert_eq!(verdict.confidence, 55);
    }

    #[test]
    fn thresholds_are_strict() {
        let aggregator = VerdictAggregator::default();
        // mean exactly 50, peak exactly 75
        let verdict = aggregator.multi(&samples(&[75, 25, 50, 50, 50])).unwrap();
        assert!(!verdict.is_synthetic);
        assert_eq!(verdict.confidence, 50);

        let verdict = aggregator.multi(&samples(&[76, 0, 0, 0, 0])).unwrap();
        assert!(verdict.is_synthetic);
        assert_eq!(verdict.confidence, 76);
    }

    #[test]
    fn average_rounds_half_up() {
        // 52 / 5 = 10.4
        assert_eq!(SampleStats::compute(&samples(&[12, 10, 10, 10, 10])).unwrap().average, 10);
        // 53 / 5 = 10.6
        assert_eq!(SampleStats::compute(&samples(&[13, 10, 10, 10, 10])).unwrap().average, 11);
        // 21 / 2 = 10.5
        assert_eq!(SampleStats::compute(&samples(&[11, 10])).unwrap().average, 11);
        // 5 / 2 = 2.5
        assert_eq!(SampleStats::compute(&samples(&[0, 5])).unwrap().average, 3);
    }

    #[test]
    fn mean_of_100s_stays_in_range() {
        let stats = SampleStats::compute(&samples(&[100, 100, 100, 100, 100])).unwrap();
        assert_eq!(stats.average, 100);
        assert_eq!(stats.peak, 100);
    }

    #[test]
    fn decision_rule_holds_across_score_grid() {
        let aggregator = VerdictAggregator::default();
        let grid = [0u8, 20, 49, 50, 51, 60, 75, 76, 100];
        for &a in &grid {
            for &b in &grid {
                let scores = [a, b, b, a, b];
                let stats = SampleStats::compute(&samples(&scores)).unwrap();
                let verdict = aggregator.decide(stats);

                let sum: u32 = scores.iter().map(|&s| u32::from(s)).sum();
                let mean = f64::from(sum) / 5.0;
                let expected_average = (mean + 0.5).floor() as u8;
                let expected_peak = *scores.iter().max().unwrap();

                assert_eq!(stats.average, expected_average);
                assert_eq!(stats.peak, expected_peak);
                assert_eq!(
                    verdict.is_synthetic,
                    expected_average > 50 || expected_peak > 75
                );
                let expected_confidence = if verdict.is_synthetic {
                    expected_average.max(expected_peak)
                } else {
                    expected_average
                };
                assert_eq!(verdict.confidence, expected_confidence);
            }
        }
    }

    #[test]
    fn zero_samples_is_an_error() {
        assert_eq!(
            VerdictAggregator::default().multi(&[]),
            Err(InsufficientSamplesError)
        );
    }

    #[test]
    fn custom_policy_moves_thresholds() {
        let aggregator = VerdictAggregator::new(AggregationPolicy {
            average_threshold: 20,
            peak_threshold: 95,
        });
        let verdict = aggregator.multi(&samples(&[30, 30, 30])).unwrap();
        assert!(verdict.is_synthetic);
        let verdict = aggregator.multi(&samples(&[90, 0, 0, 0, 0])).unwrap();
        assert!(!verdict.is_synthetic);
        assert_eq!(verdict.confidence, 18);
    }
}
