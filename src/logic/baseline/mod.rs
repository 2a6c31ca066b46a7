//! Baseline learning engine.
//!
//! Accumulates per-ID observations during the learning window, then derives
//! the statistical baseline (§3.4/§4.1) each ID will be checked against by
//! the detector pipeline. The engine itself never alerts; it only learns
//! and writes results back into the config store.

pub mod stats;
pub mod types;

pub use types::{Baseline, ByteProfile};

use crate::constants::MIN_FRAMES_FOR_BASELINE_FINALIZATION;
use crate::logic::config::ConfigStore;
use crate::logic::frame::Frame;
use std::collections::HashMap;

struct Accumulator {
    iats: Vec<f64>,
    dlcs: std::collections::HashSet<u8>,
    entropies: Vec<f64>,
    payload_hashes: Vec<String>,
    byte_samples: [Vec<u8>; 8],
    frame_count: u64,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            iats: Vec::new(),
            dlcs: std::collections::HashSet::new(),
            entropies: Vec::new(),
            payload_hashes: Vec::new(),
            byte_samples: Default::default(),
            frame_count: 0,
        }
    }
}

pub struct BaselineEngine {
    learning_start: Option<f64>,
    window_sec: f64,
    min_changes_for_variable: usize,
    accumulators: HashMap<String, Accumulator>,
    completed: bool,
}

impl BaselineEngine {
    pub fn new(window_sec: f64, min_changes_for_variable: usize) -> Self {
        BaselineEngine {
            learning_start: None,
            window_sec,
            min_changes_for_variable,
            accumulators: HashMap::new(),
            completed: false,
        }
    }

    /// Feeds one observed frame into the learning accumulators. `iat` is
    /// the inter-arrival time the state manager computed for this frame,
    /// if any (non-positive/missing deltas are dropped, matching the
    /// reference's IAT-stats input filter).
    pub fn observe(&mut self, frame: &Frame, iat: Option<f64>) {
        if self.completed {
            return;
        }
        self.learning_start.get_or_insert(frame.timestamp);

        let acc = self
            .accumulators
            .entry(frame.can_id.clone())
            .or_insert_with(Accumulator::new);

        if let Some(iat) = iat {
            if iat > 0.0 {
                acc.iats.push(iat);
            }
        }
        acc.dlcs.insert(frame.dlc);
        if !frame.payload.is_empty() {
            acc.entropies.push(stats::shannon_entropy(&frame.payload));
        }
        acc.payload_hashes.push(frame.payload_hash());
        for (i, &b) in frame.payload.iter().enumerate().take(8) {
            acc.byte_samples[i].push(b);
        }
        acc.frame_count += 1;
    }

    /// `elapsed >= window AND (every tracked ID has reached min_samples OR
    /// zero IDs are tracked)`, matching the reference's completion gate.
    pub fn is_learning_complete(&self, now: f64, min_samples_for_stable_baseline: u64) -> bool {
        let Some(start) = self.learning_start else { return false };
        if now - start < self.window_sec {
            return false;
        }
        self.accumulators.is_empty()
            || self
                .accumulators
                .values()
                .all(|acc| acc.frame_count >= min_samples_for_stable_baseline)
    }

    pub fn should_auto_add_id(&self, can_id: &str, min_samples_for_stable_baseline: u64) -> bool {
        self.accumulators
            .get(can_id)
            .map(|acc| acc.frame_count >= min_samples_for_stable_baseline)
            .unwrap_or(false)
    }

    /// Derives and writes baselines for every qualifying accumulated ID
    /// into the config store. Idempotent: a second call is a no-op.
    /// Returns the list of IDs that were finalized.
    pub fn finalize_baselines(&mut self, config: &ConfigStore) -> Vec<String> {
        if self.completed {
            return Vec::new();
        }
        self.completed = true;

        let mut finalized = Vec::new();
        for (can_id, acc) in &self.accumulators {
            if acc.frame_count < MIN_FRAMES_FOR_BASELINE_FINALIZATION {
                log::warn!(
                    "skipping baseline finalization for {}: only {} frames observed (minimum {})",
                    can_id, acc.frame_count, MIN_FRAMES_FOR_BASELINE_FINALIZATION
                );
                continue;
            }

            let iat_stats = stats::calculate_stats(&acc.iats);
            let entropy_stats = stats::calculate_stats(&acc.entropies);
            let mut learned_dlcs: Vec<u8> = acc.dlcs.iter().copied().collect();
            learned_dlcs.sort_unstable();

            let byte_profiles: Vec<ByteProfile> = acc
                .byte_samples
                .iter()
                .filter(|samples| !samples.is_empty())
                .map(|samples| stats::classify_byte_profile(samples, self.min_changes_for_variable))
                .collect();

            let periodicity = stats::compute_periodicity(&acc.iats, &acc.payload_hashes);

            let baseline = Baseline {
                iat: types::IatStats {
                    mean: iat_stats.mean,
                    stddev: iat_stats.stddev,
                    median: iat_stats.median,
                    min: iat_stats.min,
                    max: iat_stats.max,
                },
                learned_dlcs: learned_dlcs.clone(),
                entropy: types::EntropyStats {
                    mean: entropy_stats.mean,
                    stddev: entropy_stats.stddev,
                    min: entropy_stats.min,
                    max: entropy_stats.max,
                    count: acc.entropies.len() as u64,
                },
                byte_behavior_profiles: byte_profiles.clone(),
                periodicity,
            };

            write_baseline(config, can_id, &baseline);
            config.add_known_id(can_id);
            finalized.push(can_id.clone());
        }

        finalized
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

fn write_baseline(config: &ConfigStore, can_id: &str, baseline: &Baseline) {
    config.update_learned_data(can_id, "learned_dlcs", serde_json::json!(baseline.learned_dlcs));
    config.update_learned_data(
        can_id,
        "byte_behavior_profiles",
        serde_json::to_value(&baseline.byte_behavior_profiles).unwrap(),
    );
    config.update_learned_data(
        can_id,
        "entropy_stats",
        serde_json::to_value(&baseline.entropy).unwrap(),
    );
    config.update_learned_data(can_id, "drop_stats", serde_json::to_value(&baseline.iat).unwrap());
    config.update_learned_data(
        can_id,
        "periodicity_baseline",
        serde_json::to_value(&baseline.periodicity).unwrap(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::ConfigStore;

    fn frame(id: &str, ts: f64, payload: Vec<u8>) -> Frame {
        let dlc = payload.len() as u8;
        Frame { timestamp: ts, can_id: id.to_string(), dlc, payload, is_attack: false }
    }

    #[test]
    fn below_minimum_frame_count_is_skipped() {
        let mut engine = BaselineEngine::new(1.0, 5);
        for i in 0..5 {
            engine.observe(&frame("0x100", i as f64, vec![0]), Some(0.1));
        }
        let config = ConfigStore::from_document(serde_json::json!({}));
        let finalized = engine.finalize_baselines(&config);
        assert!(finalized.is_empty());
        assert!(!config.is_known_id("0x100"));
    }

    #[test]
    fn sufficient_frames_finalize_and_register_known_id() {
        let mut engine = BaselineEngine::new(1.0, 5);
        for i in 0..20 {
            engine.observe(&frame("0x100", i as f64 * 0.1, vec![0xAA, 0xBB]), Some(0.1));
        }
        let config = ConfigStore::from_document(serde_json::json!({}));
        let finalized = engine.finalize_baselines(&config);
        assert_eq!(finalized, vec!["0x100".to_string()]);
        assert!(config.is_known_id("0x100"));
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut engine = BaselineEngine::new(1.0, 5);
        for i in 0..20 {
            engine.observe(&frame("0x100", i as f64 * 0.1, vec![0]), Some(0.1));
        }
        let config = ConfigStore::from_document(serde_json::json!({}));
        let first = engine.finalize_baselines(&config);
        let second = engine.finalize_baselines(&config);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn is_learning_complete_requires_elapsed_window_and_sample_floor() {
        let mut engine = BaselineEngine::new(10.0, 50);
        for i in 0..5 {
            engine.observe(&frame("0x100", i as f64, vec![0]), Some(1.0));
        }
        assert!(!engine.is_learning_complete(5.0, 50));
        assert!(!engine.is_learning_complete(11.0, 50));
    }
}
