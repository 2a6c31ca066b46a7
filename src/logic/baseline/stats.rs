//! Pure statistical helpers used by the baseline engine. Kept free of any
//! state-manager or config dependency so they stay unit-testable in
//! isolation.

use super::types::{ByteProfile, PeriodicityBaseline, PayloadPatterns};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BasicStats {
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

/// Sample mean/stddev (Bessel's correction)/median/min/max. Empty and
/// single-element inputs are special-cased to avoid dividing by zero.
pub fn calculate_stats(values: &[f64]) -> BasicStats {
    if values.is_empty() {
        return BasicStats::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() == 1 {
        return BasicStats { mean, stddev: 0.0, median: mean, min: mean, max: mean };
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    BasicStats { mean, stddev, median, min, max }
}

/// Shannon entropy in bits, over byte-value frequencies. 0.0 for empty
/// payloads.
pub fn shannon_entropy(payload: &[u8]) -> f64 {
    if payload.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for &b in payload {
        counts[b as usize] += 1;
    }
    let n = payload.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

const COUNTER_MODAL_RATIO: f64 = 0.7;
const COUNTER_ALLOWED_STEPS: [u8; 5] = [1, 2, 4, 8, 16];
const COUNTER_ROLLOVER_SPAN: i32 = 200;

/// Classifies one byte position's behavior across a learning window, in
/// the precedence order: static, variable-by-low-change-count, counter,
/// else variable-with-range.
pub fn classify_byte_profile(samples: &[u8], min_changes_for_variable: usize) -> ByteProfile {
    let distinct: std::collections::HashSet<u8> = samples.iter().copied().collect();

    if distinct.len() <= 1 {
        return ByteProfile::Static { value: samples.first().copied().unwrap_or(0) };
    }

    if distinct.len() < min_changes_for_variable {
        let mut observed: Vec<u8> = distinct.into_iter().collect();
        observed.sort_unstable();
        return ByteProfile::Variable { observed, value_range: None, top_common: Vec::new() };
    }

    if samples.len() >= 2 {
        let mut diff_counts: HashMap<u8, u32> = HashMap::new();
        for w in samples.windows(2) {
            let diff = w[1].wrapping_sub(w[0]);
            *diff_counts.entry(diff).or_insert(0) += 1;
        }
        if let Some((&modal_step, &modal_count)) = diff_counts.iter().max_by_key(|(_, c)| **c) {
            let ratio = modal_count as f64 / (samples.len() - 1) as f64;
            if ratio > COUNTER_MODAL_RATIO && COUNTER_ALLOWED_STEPS.contains(&modal_step) {
                let min = *samples.iter().min().unwrap();
                let max = *samples.iter().max().unwrap();
                let rollover_detected = (max as i32 - min as i32) > COUNTER_ROLLOVER_SPAN;
                return ByteProfile::Counter {
                    step: modal_step,
                    min,
                    max,
                    rollover_detected,
                    initial_value: samples[0],
                };
            }
        }
    }

    let mut observed: Vec<u8> = distinct.into_iter().collect();
    observed.sort_unstable();
    let value_range = Some((*observed.first().unwrap(), *observed.last().unwrap()));
    let mut counts: HashMap<u8, u32> = HashMap::new();
    for &b in samples {
        *counts.entry(b).or_insert(0) += 1;
    }
    let mut by_freq: Vec<(u8, u32)> = counts.into_iter().collect();
    by_freq.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let top_common = by_freq.into_iter().take(5).map(|(v, _)| v).collect();

    ByteProfile::Variable { observed, value_range, top_common }
}

const PERIOD_MIN_SEC: f64 = 0.001;
const PERIOD_MAX_SEC: f64 = 10.0;

/// Statistical-fallback periodicity estimate (no FFT dependency is
/// available in this corpus, so only the reference's fallback path -
/// candidate periods drawn from mean/median IAT - is implemented; see
/// DESIGN.md).
pub fn compute_periodicity(iats: &[f64], payload_hashes: &[String]) -> PeriodicityBaseline {
    if iats.len() < 10 {
        return PeriodicityBaseline::default();
    }
    let stats = calculate_stats(iats);
    let mut candidates = vec![stats.mean, stats.median];
    candidates.retain(|p| *p >= PERIOD_MIN_SEC && *p <= PERIOD_MAX_SEC);
    candidates.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let payload_patterns = compute_payload_patterns(payload_hashes);

    if candidates.is_empty() {
        return PeriodicityBaseline {
            dominant_periods: Vec::new(),
            period_tolerance: 0.1,
            periodicity_score: 0.0,
            is_periodic: false,
            payload_patterns,
        };
    }

    let main_period = candidates[0];
    let score = (1.0
        - iats.iter().map(|iat| (iat - main_period).abs() / main_period).sum::<f64>() / iats.len() as f64)
        .max(0.0);

    PeriodicityBaseline {
        dominant_periods: candidates,
        period_tolerance: 0.1,
        periodicity_score: score,
        is_periodic: score > 0.7,
        payload_patterns,
    }
}

fn compute_payload_patterns(payload_hashes: &[String]) -> PayloadPatterns {
    if payload_hashes.is_empty() {
        return PayloadPatterns::default();
    }
    let unique: std::collections::HashSet<&String> = payload_hashes.iter().collect();
    let ratio = unique.len() as f64 / payload_hashes.len() as f64;
    PayloadPatterns { unique_payload_ratio: ratio, is_mostly_static: ratio < 0.2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_empty_and_single() {
        assert_eq!(calculate_stats(&[]), BasicStats::default());
        let single = calculate_stats(&[5.0]);
        assert_eq!(single.mean, 5.0);
        assert_eq!(single.stddev, 0.0);
    }

    #[test]
    fn stats_uses_sample_stddev() {
        let s = calculate_stats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s.mean - 5.0).abs() < 1e-9);
        assert!((s.stddev - 2.13809).abs() < 1e-3);
    }

    #[test]
    fn entropy_of_empty_is_zero() {
        assert_eq!(shannon_entropy(&[]), 0.0);
    }

    #[test]
    fn entropy_of_uniform_byte_is_zero() {
        assert_eq!(shannon_entropy(&[0xAA; 8]), 0.0);
    }

    #[test]
    fn classify_static_byte() {
        let samples = vec![5u8; 20];
        assert_eq!(classify_byte_profile(&samples, 5), ByteProfile::Static { value: 5 });
    }

    #[test]
    fn classify_counter_byte() {
        let samples: Vec<u8> = (0..50u32).map(|i| (i % 256) as u8).collect();
        match classify_byte_profile(&samples, 5) {
            ByteProfile::Counter { step, .. } => assert_eq!(step, 1),
            other => panic!("expected counter, got {:?}", other),
        }
    }

    #[test]
    fn classify_low_cardinality_as_variable() {
        let samples = vec![1u8, 2, 1, 2, 1];
        match classify_byte_profile(&samples, 5) {
            ByteProfile::Variable { observed, .. } => assert_eq!(observed, vec![1, 2]),
            other => panic!("expected variable, got {:?}", other),
        }
    }
}
