//! Drop detector (C4): flags missing/delayed frames relative to the
//! learned inter-arrival-time baseline.

use super::alert::{Alert, AlertSeverity};
use crate::logic::config::ConfigStore;
use crate::logic::frame::Frame;
use crate::logic::state::IdState;
use serde_json::json;

pub struct DropDetector;

impl DropDetector {
    pub fn detect(config: &ConfigStore, state: &mut IdState, frame: &Frame) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let Some((mean, stddev)) = baseline_iat(config, &frame.can_id) else {
            return alerts;
        };

        let sigma_multiplier: f64 = config.effective_setting(&frame.can_id, "drop", "iat_sigma_multiplier", 3.5);
        let allowed_missing: u64 = config.effective_setting(&frame.can_id, "drop", "allowed_consecutive_missing", 2);
        let iat_max_factor: f64 = config.effective_setting(&frame.can_id, "drop", "iat_max_factor", 2.5);
        let treat_dlc_zero_special: bool =
            config.effective_setting(&frame.can_id, "drop", "treat_dlc_zero_as_special", true);
        let dlc_zero_sigma: f64 = config.effective_setting(&frame.can_id, "drop", "dlc_zero_sigma_multiplier", 1.5);

        if let Some(iat) = state.last_iat {
            let threshold = if stddev == 0.0 { mean * 1.1 } else { mean + sigma_multiplier * stddev };
            if iat > threshold {
                let severity = AlertSeverity::Medium.escalated(iat > 2.0 * threshold, AlertSeverity::High);
                alerts.push(Alert::new(
                    "drop_iat_anomaly",
                    frame,
                    severity,
                    format!("inter-arrival time {:.6}s exceeds threshold {:.6}s", iat, threshold),
                    "drop",
                    json!({ "iat": iat, "threshold": threshold, "mean": mean, "stddev": stddev }),
                ));
                state.consecutive_missing_count += 1;
            } else {
                state.consecutive_missing_count = 0;
            }

            if state.consecutive_missing_count > allowed_missing as u32 {
                let severity = AlertSeverity::High
                    .escalated(state.consecutive_missing_count as u64 > 2 * allowed_missing, AlertSeverity::Critical);
                alerts.push(Alert::new(
                    "drop_consecutive_missing_frames",
                    frame,
                    severity,
                    format!("{} consecutive missing/delayed frames", state.consecutive_missing_count),
                    "drop",
                    json!({ "consecutive_missing_count": state.consecutive_missing_count, "allowed": allowed_missing }),
                ));
            }

            let factor_baseline = baseline_median(config, &frame.can_id).unwrap_or(mean);
            if factor_baseline > 0.0 {
                let threshold = iat_max_factor * factor_baseline;
                if iat > threshold {
                    let severity =
                        AlertSeverity::Medium.escalated(iat > 2.0 * threshold, AlertSeverity::High);
                    alerts.push(Alert::new(
                        "drop_iat_max_factor_violation",
                        frame,
                        severity,
                        format!("iat {:.6}s exceeds {}x baseline", iat, iat_max_factor),
                        "drop",
                        json!({ "iat": iat, "factor": iat_max_factor, "threshold": threshold }),
                    ));
                }
            }

            if frame.dlc == 0 && treat_dlc_zero_special {
                let threshold = if stddev == 0.0 { mean * 2.5 } else { mean + dlc_zero_sigma * stddev };
                if iat > threshold {
                    alerts.push(Alert::new(
                        "drop_dlc_zero_timing_anomaly",
                        frame,
                        AlertSeverity::Low,
                        format!("dlc=0 frame iat {:.6}s exceeds threshold {:.6}s", iat, threshold),
                        "drop",
                        json!({ "iat": iat, "threshold": threshold }),
                    ));
                }
            }
        }

        alerts
    }
}

/// Reads the learned IAT mean/stddev for `can_id` from the config store's
/// `drop` baseline section, written there by the baseline engine.
fn baseline_iat(config: &ConfigStore, can_id: &str) -> Option<(f64, f64)> {
    let section = config.id_section(can_id, "drop")?;
    let mean = section.get("mean")?.as_f64()?;
    let stddev = section.get("stddev")?.as_f64()?;
    Some((mean, stddev))
}

fn baseline_median(config: &ConfigStore, can_id: &str) -> Option<f64> {
    config.id_section(can_id, "drop")?.get("median")?.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_baseline(mean: f64, stddev: f64) -> ConfigStore {
        let doc = json!({
            "ids": { "0x100": { "drop": { "mean": mean, "stddev": stddev } } }
        });
        ConfigStore::from_document(doc)
    }

    fn frame(ts: f64, dlc: u8) -> Frame {
        Frame { timestamp: ts, can_id: "0x100".into(), dlc, payload: vec![0; dlc as usize], is_attack: false }
    }

    #[test]
    fn no_baseline_means_no_detection() {
        let config = ConfigStore::from_document(json!({}));
        let mut state = IdState::new(0.0, 0.0, 5);
        state.last_iat = Some(10.0);
        let alerts = DropDetector::detect(&config, &mut state, &frame(10.0, 1));
        assert!(alerts.is_empty());
    }

    #[test]
    fn large_gap_triggers_iat_anomaly() {
        let config = config_with_baseline(0.1, 0.01);
        let mut state = IdState::new(0.0, 0.0, 5);
        state.last_iat = Some(1.0);
        let alerts = DropDetector::detect(&config, &mut state, &frame(1.0, 1));
        assert!(alerts.iter().any(|a| a.alert_type == "drop_iat_anomaly"));
    }

    #[test]
    fn zero_variance_uses_1_1x_threshold() {
        let config = config_with_baseline(1.0, 0.0);
        let mut state = IdState::new(0.0, 0.0, 5);
        state.last_iat = Some(1.05);
        let alerts = DropDetector::detect(&config, &mut state, &frame(1.05, 1));
        assert!(alerts.iter().all(|a| a.alert_type != "drop_iat_anomaly"));
        state.last_iat = Some(1.2);
        let alerts = DropDetector::detect(&config, &mut state, &frame(1.2, 1));
        assert!(alerts.iter().any(|a| a.alert_type == "drop_iat_anomaly"));
    }

    #[test]
    fn dlc_zero_uses_2_5x_threshold_when_variance_is_zero() {
        let config = config_with_baseline(1.0, 0.0);
        let mut state = IdState::new(0.0, 0.0, 5);
        state.last_iat = Some(2.0);
        let alerts = DropDetector::detect(&config, &mut state, &frame(2.0, 0));
        assert!(alerts.iter().all(|a| a.alert_type != "drop_dlc_zero_timing_anomaly"));
        state.last_iat = Some(2.6);
        let alerts = DropDetector::detect(&config, &mut state, &frame(2.6, 0));
        assert!(alerts.iter().any(|a| a.alert_type == "drop_dlc_zero_timing_anomaly"));
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Low));
    }
}
