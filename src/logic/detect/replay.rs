//! Replay detector (C6): flags frames replayed too fast relative to the
//! learned periodicity, whose payload repeats unnaturally often, or whose
//! surrounding frame sequence was seen before at a suspiciously short
//! interval.
//!
//! Contextual payload repetition is actively wired in here even though the
//! reference detector's call site for it was disabled (see DESIGN.md,
//! "Replay Detector", for why this one got wired in anyway).

use super::alert::{Alert, AlertSeverity};
use crate::constants::MAX_HISTORICAL_SEQUENCES;
use crate::logic::config::{defaults::DEFAULT_PERIODIC_WHITELIST, ConfigStore};
use crate::logic::frame::Frame;
use crate::logic::state::IdState;
use serde_json::json;

const MULTIPLE_FACTORS: [u32; 4] = [2, 3, 4, 5];
const DIVISOR_FACTORS: [u32; 3] = [2, 3, 4];
const MIN_DIVISOR_PERIOD_SEC: f64 = 0.001;

pub struct ReplayDetector;

impl ReplayDetector {
    pub fn detect(config: &ConfigStore, state: &mut IdState, frame: &Frame, now: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let identical_enabled: bool =
            config.effective_setting(&frame.can_id, "replay", "identical_payload_enabled", true);
        let sequence_enabled: bool = config.effective_setting(&frame.can_id, "replay", "sequence_replay_enabled", true);

        if identical_enabled || sequence_enabled {
            let whitelisted = is_whitelisted(config, state, frame);

            if identical_enabled && !whitelisted {
                check_fast_replay(config, state, frame, &mut alerts);
                check_contextual_repetition(config, state, frame, now, &mut alerts);
            }

            if sequence_enabled {
                check_sequence_replay(config, state, frame, now, &mut alerts);
            }
        }

        let hash = frame.payload_hash();
        state.record_payload_hash(hash, now, crate::constants::MAX_PAYLOAD_HASH_HISTORY);

        alerts
    }
}

fn is_whitelisted(config: &ConfigStore, state: &IdState, frame: &Frame) -> bool {
    let Some(prev) = state.prev_timestamp else { return true };
    let interval_ms = (frame.timestamp - prev) * 1000.0;

    let mut entries: Vec<(Vec<f64>, f64)> = DEFAULT_PERIODIC_WHITELIST
        .iter()
        .filter(|e| e.can_id == frame.can_id)
        .map(|e| (e.expected_intervals_ms.to_vec(), e.tolerance_ms))
        .collect();

    if let Some(overrides) = config.id_section(&frame.can_id, "replay").and_then(|v| v.get("periodic_whitelist").cloned()) {
        if let (Some(intervals), Some(tolerance)) = (
            overrides.get("expected_intervals_ms").and_then(|v| v.as_array()).map(|a| {
                a.iter().filter_map(|x| x.as_f64()).collect::<Vec<f64>>()
            }),
            overrides.get("tolerance_ms").and_then(|v| v.as_f64()),
        ) {
            entries.push((intervals, tolerance));
        }
    }

    entries
        .iter()
        .any(|(intervals, tolerance)| intervals.iter().any(|i| (interval_ms - i).abs() <= *tolerance))
}

fn check_fast_replay(config: &ConfigStore, state: &mut IdState, frame: &Frame, alerts: &mut Vec<Alert>) {
    let Some(delta) = state.last_iat else { return };

    let periodicity = config.id_section(&frame.can_id, "periodicity_baseline");
    let dominant_periods: Vec<f64> = periodicity
        .as_ref()
        .and_then(|p| p.get("dominant_periods"))
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_f64()).collect())
        .unwrap_or_default();
    let score = periodicity
        .as_ref()
        .and_then(|p| p.get("periodicity_score"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    if dominant_periods.is_empty() {
        let absolute_min_iat_ms: f64 = config.effective_setting(&frame.can_id, "replay", "absolute_min_iat_ms", 0.2);
        if delta < absolute_min_iat_ms / 1000.0 {
            alerts.push(Alert::new(
                "replay_fast_replay",
                frame,
                AlertSeverity::Medium,
                format!("frame arrived after only {:.6}s (no periodicity baseline)", delta),
                "replay",
                json!({ "iat": delta, "absolute_min_iat_ms": absolute_min_iat_ms }),
            ));
        }
        return;
    }

    let tolerance = periodicity
        .as_ref()
        .and_then(|p| p.get("period_tolerance"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.1);

    for &period in &dominant_periods {
        if period <= 0.0 {
            continue;
        }
        if ((delta - period).abs() / period) <= tolerance {
            state.last_matched_period = Some(period);
            return;
        }
        for &k in &MULTIPLE_FACTORS {
            let candidate = period * k as f64;
            if ((delta - candidate).abs() / candidate) <= tolerance {
                state.last_matched_period = Some(period);
                return;
            }
        }
        for &d in &DIVISOR_FACTORS {
            let candidate = period / d as f64;
            if candidate >= MIN_DIVISOR_PERIOD_SEC && ((delta - candidate).abs() / candidate) <= tolerance {
                state.last_matched_period = Some(period);
                return;
            }
        }
    }

    let expected_min_iat = config
        .id_section(&frame.can_id, "replay")
        .and_then(|v| v.get("min_expected_iat_ms").and_then(|v| v.as_f64()))
        .map(|ms| ms / 1000.0)
        .unwrap_or_else(|| {
            let factor = if score > 0.8 { 0.05 } else if score > 0.5 { 0.15 } else { 0.3 };
            dominant_periods.iter().cloned().fold(f64::INFINITY, f64::min) * factor
        });

    if delta < expected_min_iat {
        let severity = if score > 0.8 {
            AlertSeverity::High
        } else if score > 0.5 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        };
        alerts.push(Alert::new(
            "replay_non_periodic_fast_replay",
            frame,
            severity,
            format!("iat {:.6}s below expected minimum {:.6}s (periodicity score {:.2})", delta, expected_min_iat, score),
            "replay",
            json!({ "iat": delta, "expected_min_iat": expected_min_iat, "periodicity_score": score }),
        ));
    }
}

fn check_contextual_repetition(config: &ConfigStore, state: &IdState, frame: &Frame, now: f64, alerts: &mut Vec<Alert>) {
    let periodicity = config.id_section(&frame.can_id, "periodicity_baseline");
    let is_mostly_static = periodicity
        .as_ref()
        .and_then(|p| p.get("payload_patterns"))
        .and_then(|pp| pp.get("is_mostly_static"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let score = periodicity
        .as_ref()
        .and_then(|p| p.get("periodicity_score"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let (window_ms, threshold): (f64, u32) = if is_mostly_static {
        (5000.0, 15)
    } else if score > 0.7 {
        (2000.0, 8)
    } else {
        (1000.0, 3)
    };

    let hash = frame.payload_hash();
    let window_sec = window_ms / 1000.0;
    let count = state
        .recent_payload_hashes_ts
        .iter()
        .filter(|(h, ts)| h == &hash && now - ts <= window_sec)
        .count() as u32
        + 1;

    if count > threshold {
        let severity = if is_mostly_static {
            AlertSeverity::Low.escalated(count > 3 * threshold, AlertSeverity::Medium)
        } else if score > 0.7 {
            AlertSeverity::Medium.escalated(count > 2 * threshold, AlertSeverity::High)
        } else {
            AlertSeverity::Low
        };
        alerts.push(Alert::new(
            "replay_contextual_payload_repetition",
            frame,
            severity,
            format!("payload repeated {} times within {:.1}s window", count, window_sec),
            "replay",
            json!({ "count": count, "window_sec": window_sec, "threshold": threshold }),
        ));
    }
}

fn check_sequence_replay(config: &ConfigStore, state: &mut IdState, frame: &Frame, now: f64, alerts: &mut Vec<Alert>) {
    let sequence_length: usize = config.effective_setting(&frame.can_id, "replay", "sequence_length", 5usize);
    let min_interval: f64 = config.effective_setting(&frame.can_id, "replay", "min_interval_sec", 10.0);
    let max_age: f64 = config.effective_setting(&frame.can_id, "replay", "max_sequence_age_sec", 300.0);

    let fingerprint = format!("{}:{}", frame.can_id, frame.payload_hash());
    let Some(key) = state.push_sequence_fingerprint(fingerprint, sequence_length) else { return };

    if let Some(&first_seen) = state.historical_sequences.get(&key) {
        let dt = now - first_seen;
        if dt > min_interval && dt < max_age {
            let severity = AlertSeverity::High.escalated(dt < 2.0 * min_interval, AlertSeverity::Critical);
            alerts.push(Alert::new(
                "replay_sequence_replay",
                frame,
                severity,
                format!("frame sequence repeated after {:.2}s (first seen {:.2}s ago)", dt, dt),
                "replay",
                json!({ "interval_sec": dt, "min_interval_sec": min_interval, "max_sequence_age_sec": max_age }),
            ));
        }
    }

    state.record_historical_sequence(key, now, MAX_HISTORICAL_SEQUENCES);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(ts: f64, payload: Vec<u8>) -> Frame {
        let dlc = payload.len() as u8;
        Frame { timestamp: ts, can_id: "0x100".into(), dlc, payload, is_attack: false }
    }

    #[test]
    fn legacy_fast_replay_without_baseline() {
        let config = ConfigStore::from_document(json!({}));
        let mut state = IdState::new(0.0, 0.0, 5);
        state.last_iat = Some(0.0001);
        state.prev_timestamp = Some(0.0);
        let alerts = ReplayDetector::detect(&config, &mut state, &frame(0.0001, vec![1]), 0.0001);
        assert!(alerts.iter().any(|a| a.alert_type == "replay_fast_replay"));
    }

    #[test]
    fn no_alert_for_normal_iat_without_baseline() {
        let config = ConfigStore::from_document(json!({}));
        let mut state = IdState::new(0.0, 0.0, 5);
        state.last_iat = Some(0.5);
        state.prev_timestamp = Some(0.0);
        let alerts = ReplayDetector::detect(&config, &mut state, &frame(0.5, vec![1]), 0.5);
        assert!(alerts.iter().all(|a| a.alert_type != "replay_fast_replay"));
    }

    #[test]
    fn whitelisted_interval_suppresses_fast_replay() {
        // 0x80 is whitelisted at 10ms +/- 1ms in the compiled-in table.
        let config = ConfigStore::from_document(json!({}));
        let mut state = IdState::new(0.0, 0.0, 5);
        state.prev_timestamp = Some(0.0);
        state.last_iat = Some(0.01);
        let frame = Frame { timestamp: 0.01, can_id: "0x80".into(), dlc: 1, payload: vec![1], is_attack: false };
        let alerts = ReplayDetector::detect(&config, &mut state, &frame, 0.01);
        assert!(alerts.iter().all(|a| a.alert_type != "replay_fast_replay"));
    }

    #[test]
    fn sequence_replay_fires_on_repeated_sequence_within_window() {
        let config = ConfigStore::from_document(json!({}));
        let mut state = IdState::new(0.0, 0.0, 5);
        for i in 0..5 {
            ReplayDetector::detect(&config, &mut state, &frame(i as f64, vec![i as u8]), i as f64);
        }
        // repeat the same 5-frame sequence after 15s (> min_interval 10s, < max_age 300s)
        let mut alerts = Vec::new();
        for i in 0..5 {
            alerts = ReplayDetector::detect(&config, &mut state, &frame(15.0 + i as f64, vec![i as u8]), 15.0 + i as f64);
        }
        assert!(alerts.iter().any(|a| a.alert_type == "replay_sequence_replay"));
    }
}
