//! Sentio Trends - Trend Analyzer
//!
//! Regression-based trend statistics over a window of historical numeric
//! readings. Fits an ordinary least-squares line of value against epoch
//! seconds, derives a direction from the slope's p-value (Students-T), and
//! computes a time-weighted average alongside peak detection.
//!
//! Samples are supplied time-descending (newest first), as the store
//! returns them.
//!
//! @version 0.1.0
//! @author Sentio Development Team

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Minimum sample count for a regression to be attempted.
pub const TREND_LOWER_COUNT: usize = 5;

/// Significance level below which a slope is considered a real trend.
const P_SIGNIFICANT: f64 = 0.05;

// =============================================================================
// Trend Sample
// =============================================================================

/// One numeric observation supplied to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

// =============================================================================
// Trend Output
// =============================================================================

/// Trend direction derived from the regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increase,
    Decrease,
    Stable,
}

/// A value extreme over the supplied window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPeak {
    pub reading: f64,
    pub time: DateTime<Utc>,
}

/// Trend statistics for one tag over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrendInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<TrendDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_max: Option<TrendPeak>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_min: Option<TrendPeak>,
    /// Span of the oldest-to-newest sample used, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i64>,
    /// Number of samples used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Trend Analyzer
// =============================================================================

/// Computes trend statistics from time-descending sample sets.
pub struct TrendAnalyzer;

impl TrendAnalyzer {
    /// Analyze a time-descending sample set, optionally truncated to the
    /// newest `depth` samples for the regression.
    ///
    /// Peaks are always computed over the full supplied set, before any
    /// depth truncation.
    pub fn analyze(samples: &[TrendSample], depth: Option<usize>) -> TrendInfo {
        let mut info = TrendInfo::default();
        if samples.is_empty() {
            info.error = Some("No data".into());
            return info;
        }

        let peak_max = samples
            .iter()
            .copied()
            .max_by(|a, b| a.value.total_cmp(&b.value))
            .map(|s| TrendPeak {
                reading: s.value,
                time: s.timestamp,
            });
        let peak_min = samples
            .iter()
            .copied()
            .min_by(|a, b| a.value.total_cmp(&b.value))
            .map(|s| TrendPeak {
                reading: s.value,
                time: s.timestamp,
            });
        info.peak_max = peak_max;
        info.peak_min = peak_min;

        if samples.len() <= TREND_LOWER_COUNT {
            info.error = Some(format!("Less than {} values count", TREND_LOWER_COUNT));
            info.number = Some(samples.len());
            info.period_seconds = Some(Self::span_seconds(samples));
            return info;
        }

        let used: &[TrendSample] = match depth {
            Some(depth) if samples.len() > depth => &samples[..depth],
            Some(_) => {
                info.caution = Some("Low values count".into());
                samples
            }
            None => samples,
        };
        info.number = Some(used.len());
        info.period_seconds = Some(Self::span_seconds(used));

        let (slope, p_value) = Self::linear_regression(used);
        info.slope = Some(slope);
        info.average = Some(Self::time_weighted_average(used));
        info.direction = Some(if p_value < P_SIGNIFICANT && slope > 0.0 {
            TrendDirection::Increase
        } else if p_value < P_SIGNIFICANT && slope < 0.0 {
            TrendDirection::Decrease
        } else {
            TrendDirection::Stable
        });
        info
    }

    fn span_seconds(samples: &[TrendSample]) -> i64 {
        match (samples.first(), samples.last()) {
            (Some(newest), Some(oldest)) => (newest.timestamp - oldest.timestamp).num_seconds(),
            _ => 0,
        }
    }

    /// OLS slope and two-sided p-value of value against epoch seconds.
    fn linear_regression(samples: &[TrendSample]) -> (f64, f64) {
        let n = samples.len() as f64;
        let xs: Vec<f64> = samples
            .iter()
            .map(|s| s.timestamp.timestamp_millis() as f64 / 1000.0)
            .collect();
        let ys: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;
        let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
        let syy: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
        let sxy: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();

        // Zero time variance: all timestamps coincide, no defined slope.
        if sxx == 0.0 {
            return (0.0, 1.0);
        }
        let slope = sxy / sxx;
        if syy == 0.0 {
            // Perfectly flat values; the slope is exactly zero.
            return (0.0, 1.0);
        }

        let r = sxy / (sxx * syy).sqrt();
        let df = n - 2.0;
        if df <= 0.0 {
            return (slope, 1.0);
        }
        let r2 = (r * r).min(1.0);
        if 1.0 - r2 < f64::EPSILON {
            // Perfect fit.
            return (slope, 0.0);
        }
        let t = r.abs() * (df / (1.0 - r2)).sqrt();
        let p_value = match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => 2.0 * (1.0 - dist.cdf(t)),
            Err(_) => 1.0,
        };
        (slope, p_value)
    }

    /// Time-weighted average: the newest sample is dropped, and each
    /// remaining sample is weighted by its time gap to the next-newer one.
    /// Degenerates to the arithmetic mean when all gaps are zero.
    fn time_weighted_average(samples: &[TrendSample]) -> f64 {
        let mut weight_sum = 0.0;
        let mut weighted = 0.0;
        for i in 1..samples.len() {
            let gap = (samples[i - 1].timestamp - samples[i].timestamp).num_milliseconds() as f64
                / 1000.0;
            let w = gap.abs();
            weight_sum += w;
            weighted += w * samples[i].value;
        }
        if weight_sum == 0.0 {
            let rest = &samples[1..];
            if rest.is_empty() {
                return samples[0].value;
            }
            return rest.iter().map(|s| s.value).sum::<f64>() / rest.len() as f64;
        }
        weighted / weight_sum
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// Newest-first samples, `step` seconds apart, values via `f(i)` with
    /// i = 0 the oldest.
    fn descending(count: usize, step: i64, f: impl Fn(usize) -> f64) -> Vec<TrendSample> {
        (0..count)
            .rev()
            .map(|i| TrendSample {
                timestamp: base() + Duration::seconds(i as i64 * step),
                value: f(i),
            })
            .collect()
    }

    #[test]
    fn test_no_data() {
        let info = TrendAnalyzer::analyze(&[], None);
        assert_eq!(info.error.as_deref(), Some("No data"));
        assert!(info.peak_max.is_none());
    }

    #[test]
    fn test_insufficient_at_exactly_lower_count() {
        let samples = descending(TREND_LOWER_COUNT, 10, |i| i as f64);
        let info = TrendAnalyzer::analyze(&samples, None);
        assert_eq!(info.error.as_deref(), Some("Less than 5 values count"));
        assert!(info.peak_max.is_some());
        assert!(info.peak_min.is_some());
        assert!(info.slope.is_none());
    }

    #[test]
    fn test_increasing_direction() {
        let samples = descending(10, 10, |i| i as f64);
        let info = TrendAnalyzer::analyze(&samples, None);
        assert_eq!(info.direction, Some(TrendDirection::Increase));
        assert!(info.slope.unwrap() > 0.0);
        assert_eq!(info.number, Some(10));
        assert_eq!(info.period_seconds, Some(90));
    }

    #[test]
    fn test_decreasing_direction() {
        let samples = descending(10, 10, |i| 100.0 - i as f64);
        let info = TrendAnalyzer::analyze(&samples, None);
        assert_eq!(info.direction, Some(TrendDirection::Decrease));
        assert!(info.slope.unwrap() < 0.0);
    }

    #[test]
    fn test_noise_is_stable() {
        // Alternating values have no significant slope.
        let samples = descending(20, 10, |i| if i % 2 == 0 { 1.0 } else { -1.0 });
        let info = TrendAnalyzer::analyze(&samples, None);
        assert_eq!(info.direction, Some(TrendDirection::Stable));
    }

    #[test]
    fn test_flat_values_are_stable() {
        let samples = descending(10, 10, |_| 42.0);
        let info = TrendAnalyzer::analyze(&samples, None);
        assert_eq!(info.direction, Some(TrendDirection::Stable));
        assert_eq!(info.slope, Some(0.0));
        assert_eq!(info.average, Some(42.0));
    }

    #[test]
    fn test_peaks_over_full_set_before_truncation() {
        // Oldest sample holds the maximum; depth truncation must not hide it.
        let mut samples = descending(20, 10, |i| i as f64);
        samples.last_mut().unwrap().value = 1000.0;
        let info = TrendAnalyzer::analyze(&samples, Some(10));
        assert_eq!(info.peak_max.unwrap().reading, 1000.0);
        assert_eq!(info.number, Some(10));
    }

    #[test]
    fn test_depth_caution() {
        let samples = descending(10, 10, |i| i as f64);
        let info = TrendAnalyzer::analyze(&samples, Some(50));
        assert_eq!(info.caution.as_deref(), Some("Low values count"));
        assert_eq!(info.number, Some(10));
    }

    #[test]
    fn test_coincident_timestamps_fall_back() {
        let samples: Vec<TrendSample> = (0..8)
            .map(|i| TrendSample {
                timestamp: base(),
                value: i as f64,
            })
            .collect();
        let info = TrendAnalyzer::analyze(&samples, None);
        assert_eq!(info.direction, Some(TrendDirection::Stable));
        assert_eq!(info.slope, Some(0.0));
        // Arithmetic mean of samples[1..] = mean(1..=7) = 4.0.
        assert_eq!(info.average, Some(4.0));
    }

    #[test]
    fn test_weighted_average_respects_gaps() {
        // Newest first: values 10 (t=30), 4 (t=20), 2 (t=0).
        // Drop newest; weights: 4 weighted by 10s, 2 weighted by 20s.
        let samples = vec![
            TrendSample {
                timestamp: base() + Duration::seconds(30),
                value: 10.0,
            },
            TrendSample {
                timestamp: base() + Duration::seconds(20),
                value: 4.0,
            },
            TrendSample {
                timestamp: base(),
                value: 2.0,
            },
        ];
        let avg = TrendAnalyzer::time_weighted_average(&samples);
        assert!((avg - (4.0 * 10.0 + 2.0 * 20.0) / 30.0).abs() < 1e-9);
    }
}
