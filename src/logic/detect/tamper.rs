//! Tamper detector (C5): flags payload content that deviates from the
//! learned DLC whitelist, entropy profile, or per-byte behavior.

use super::alert::{Alert, AlertSeverity};
use crate::logic::baseline::ByteProfile;
use crate::logic::baseline::stats::shannon_entropy;
use crate::logic::config::ConfigStore;
use crate::logic::frame::Frame;
use crate::logic::state::IdState;
use serde_json::json;

const ENTROPY_EPSILON: f64 = 1e-5;

pub struct TamperDetector;

impl TamperDetector {
    pub fn detect(config: &ConfigStore, state: &mut IdState, frame: &Frame) -> Vec<Alert> {
        let mut alerts = Vec::new();

        check_dlc_anomaly(config, frame, &mut alerts);

        if frame.dlc > 0 {
            check_entropy(config, frame, &mut alerts);
            check_byte_behavior(config, state, frame, &mut alerts);
            check_byte_change_ratio(config, state, frame, &mut alerts);
        }

        alerts
    }
}

fn check_dlc_anomaly(config: &ConfigStore, frame: &Frame, alerts: &mut Vec<Alert>) {
    let Some(learned_dlcs) = config
        .id_section(&frame.can_id, "baseline")
        .and_then(|v| v.get("learned_dlcs").cloned())
        .and_then(|v| serde_json::from_value::<Vec<u8>>(v).ok())
    else {
        return;
    };
    if learned_dlcs.is_empty() || learned_dlcs.contains(&frame.dlc) {
        return;
    }
    let severity = AlertSeverity::High.escalated(frame.dlc > 8, AlertSeverity::Critical);
    alerts.push(Alert::new(
        "tamper_dlc_anomaly",
        frame,
        severity,
        format!("dlc {} not in learned set {:?}", frame.dlc, learned_dlcs),
        "tamper",
        json!({ "dlc": frame.dlc, "learned_dlcs": learned_dlcs }),
    ));
}

fn check_entropy(config: &ConfigStore, frame: &Frame, alerts: &mut Vec<Alert>) {
    let Some(entropy_section) = config.id_section(&frame.can_id, "tamper_entropy") else { return };
    let Some(mean) = entropy_section.get("mean").and_then(|v| v.as_f64()) else { return };
    let Some(stddev) = entropy_section.get("stddev").and_then(|v| v.as_f64()) else { return };

    let absolute_threshold: f64 =
        config.effective_setting(&frame.can_id, "tamper", "entropy_absolute_threshold", 0.1);
    let sigma_threshold: f64 = config.effective_setting(&frame.can_id, "tamper", "entropy_sigma_threshold", 3.0);

    let entropy = shannon_entropy(&frame.payload);
    let deviation = entropy - mean;

    if stddev.abs() < ENTROPY_EPSILON {
        if deviation.abs() > absolute_threshold {
            alerts.push(Alert::new(
                "tamper_entropy_anomaly",
                frame,
                AlertSeverity::Medium,
                format!("entropy {:.4} deviates {:.4} from mean {:.4} (low-variance baseline)", entropy, deviation, mean),
                "tamper",
                json!({ "entropy": entropy, "mean": mean, "deviation": deviation }),
            ));
        }
        return;
    }

    let sigma_distance = deviation / stddev;
    if sigma_distance > sigma_threshold {
        let severity = AlertSeverity::Medium.escalated(sigma_distance > 2.0 * sigma_threshold, AlertSeverity::High);
        alerts.push(Alert::new(
            "tamper_entropy_anomaly",
            frame,
            severity,
            format!("entropy {:.4} is {:.2} sigma above mean {:.4}", entropy, sigma_distance, mean),
            "tamper",
            json!({ "entropy": entropy, "mean": mean, "stddev": stddev, "sigma_distance": sigma_distance }),
        ));
    }
}

fn check_byte_behavior(config: &ConfigStore, state: &mut IdState, frame: &Frame, alerts: &mut Vec<Alert>) {
    let Some(profiles) = config
        .id_section(&frame.can_id, "baseline")
        .and_then(|v| v.get("byte_behavior_profiles").cloned())
        .and_then(|v| serde_json::from_value::<Vec<ByteProfile>>(v).ok())
    else {
        return;
    };

    let static_threshold: u32 = config.effective_setting(&frame.can_id, "tamper", "static_mismatch_threshold", 1);
    let diff_critical: i32 = config.effective_setting(&frame.can_id, "tamper", "static_diff_critical_threshold", 100);
    let allowed_skips: u8 = config.effective_setting(&frame.can_id, "tamper", "counter_allowed_skips", 1);

    for (i, profile) in profiles.iter().enumerate() {
        let Some(&observed) = frame.payload.get(i) else { continue };

        match profile {
            ByteProfile::Static { value } => {
                if observed == *value {
                    state.static_byte_mismatch_counts[i] = 0;
                    continue;
                }
                state.static_byte_mismatch_counts[i] += 1;
                if state.static_byte_mismatch_counts[i] >= static_threshold {
                    let diff = (observed as i32 - *value as i32).abs();
                    let severity = AlertSeverity::High.escalated(diff > diff_critical, AlertSeverity::Critical);
                    alerts.push(Alert::new(
                        "tamper_static_byte_anomaly",
                        frame,
                        severity,
                        format!("byte[{}] expected {} got {}", i, value, observed),
                        "tamper",
                        json!({ "position": i, "expected": value, "observed": observed }),
                    ));
                }
            }
            ByteProfile::Counter { step, .. } => {
                if !state.counter_initialized[i] {
                    state.counter_initialized[i] = true;
                    state.last_byte_values_for_counter[i] = observed;
                    continue;
                }
                let last = state.last_byte_values_for_counter[i];
                let expected: Vec<u8> = (0..=allowed_skips)
                    .map(|k| last.wrapping_add(step.wrapping_mul(k + 1)))
                    .collect();
                if !expected.contains(&observed) {
                    let nearest_distance = expected
                        .iter()
                        .map(|&e| (e as i32 - observed as i32).abs().min(256 - (e as i32 - observed as i32).abs()))
                        .min()
                        .unwrap_or(256);
                    let severity = AlertSeverity::Medium
                        .escalated(nearest_distance > 2 * (*step as i32) * (allowed_skips as i32 + 1), AlertSeverity::High);
                    alerts.push(Alert::new(
                        "tamper_counter_byte_anomaly",
                        frame,
                        severity,
                        format!("byte[{}] counter jumped from {} to {}, expected one of {:?}", i, last, observed, expected),
                        "tamper",
                        json!({ "position": i, "last": last, "observed": observed, "expected": expected }),
                    ));
                }
                state.last_byte_values_for_counter[i] = observed;
            }
            ByteProfile::Variable { value_range, .. } => {
                if let Some((min, max)) = value_range {
                    if observed < *min || observed > *max {
                        alerts.push(Alert::new(
                            "tamper_variable_byte_out_of_range",
                            frame,
                            AlertSeverity::Low,
                            format!("byte[{}] value {} outside observed range {}..={}", i, observed, min, max),
                            "tamper",
                            json!({ "position": i, "observed": observed, "min": min, "max": max }),
                        ));
                    }
                }
            }
        }
    }
}

fn check_byte_change_ratio(config: &ConfigStore, state: &mut IdState, frame: &Frame, alerts: &mut Vec<Alert>) {
    let threshold: f64 = config.effective_setting(&frame.can_id, "tamper", "byte_change_ratio_threshold", 0.85);
    let high_threshold: f64 =
        config.effective_setting(&frame.can_id, "tamper", "byte_change_ratio_high_threshold", 0.95);

    let Some(last) = state.last_payload_bytes.clone() else {
        state.last_payload_bytes = Some(frame.payload.clone());
        return;
    };
    if last.len() != frame.payload.len() {
        state.last_payload_bytes = Some(frame.payload.clone());
        return;
    }

    let differing = last.iter().zip(frame.payload.iter()).filter(|(a, b)| a != b).count();
    let ratio = differing as f64 / last.len().max(1) as f64;

    if ratio > threshold {
        let severity = AlertSeverity::Medium.escalated(ratio > high_threshold, AlertSeverity::High);
        alerts.push(Alert::new(
            "tamper_byte_change_ratio",
            frame,
            severity,
            format!("{:.0}% of payload bytes changed between frames", ratio * 100.0),
            "tamper",
            json!({ "ratio": ratio, "threshold": threshold }),
        ));
    }

    // Only roll the comparison baseline forward if this frame did not
    // itself raise any tamper alert (broader than just this check's own
    // result; see DESIGN.md, "Detector Pipeline", for the reasoning).
    if alerts.is_empty() {
        state.last_payload_bytes = Some(frame.payload.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(payload: Vec<u8>) -> Frame {
        let dlc = payload.len() as u8;
        Frame { timestamp: 1.0, can_id: "0x100".into(), dlc, payload, is_attack: false }
    }

    #[test]
    fn dlc_anomaly_skips_when_learned_set_empty() {
        let config = ConfigStore::from_document(json!({}));
        let mut state = IdState::new(0.0, 0.0, 5);
        let alerts = TamperDetector::detect(&config, &mut state, &frame(vec![1]));
        assert!(alerts.iter().all(|a| a.alert_type != "tamper_dlc_anomaly"));
    }

    #[test]
    fn dlc_anomaly_fires_when_dlc_not_learned() {
        let config = ConfigStore::from_document(json!({
            "ids": { "0x100": { "baseline": { "learned_dlcs": [8] } } }
        }));
        let mut state = IdState::new(0.0, 0.0, 5);
        let alerts = TamperDetector::detect(&config, &mut state, &frame(vec![1]));
        assert!(alerts.iter().any(|a| a.alert_type == "tamper_dlc_anomaly"));
    }

    #[test]
    fn static_byte_fires_after_threshold_mismatches() {
        let config = ConfigStore::from_document(json!({
            "ids": { "0x100": { "baseline": { "byte_behavior_profiles": [{"kind":"static","value":7}] } } }
        }));
        let mut state = IdState::new(0.0, 0.0, 5);
        let alerts = TamperDetector::detect(&config, &mut state, &frame(vec![9]));
        assert!(alerts.iter().any(|a| a.alert_type == "tamper_static_byte_anomaly"));
    }

    #[test]
    fn counter_byte_first_observation_only_memorizes() {
        let config = ConfigStore::from_document(json!({
            "ids": { "0x100": { "baseline": { "byte_behavior_profiles": [
                {"kind":"counter","step":1,"min":0,"max":255,"rollover_detected":false,"initial_value":0}
            ] } } }
        }));
        let mut state = IdState::new(0.0, 0.0, 5);
        let alerts = TamperDetector::detect(&config, &mut state, &frame(vec![50]));
        assert!(alerts.is_empty());
        assert!(state.counter_initialized[0]);
        assert_eq!(state.last_byte_values_for_counter[0], 50);
    }

    #[test]
    fn counter_byte_jump_fires_after_seeding() {
        let config = ConfigStore::from_document(json!({
            "ids": { "0x100": { "baseline": { "byte_behavior_profiles": [
                {"kind":"counter","step":1,"min":0,"max":255,"rollover_detected":false,"initial_value":0}
            ] } } }
        }));
        let mut state = IdState::new(0.0, 0.0, 5);
        TamperDetector::detect(&config, &mut state, &frame(vec![50]));
        let alerts = TamperDetector::detect(&config, &mut state, &frame(vec![200]));
        assert!(alerts.iter().any(|a| a.alert_type == "tamper_counter_byte_anomaly"));
    }
}
