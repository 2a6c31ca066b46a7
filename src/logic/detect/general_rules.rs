//! General rules detector (C7): the single "unknown ID" rule, with an
//! optional shadow-learning phase before a new ID is promoted into the
//! known set.

use super::alert::{Alert, AlertSeverity};
use crate::logic::baseline::BaselineEngine;
use crate::logic::config::ConfigStore;
use crate::logic::frame::Frame;
use serde_json::json;
use std::collections::HashMap;

const DIAGNOSTIC_RANGE: std::ops::RangeInclusive<u32> = 0x7F0..=0x7FF;
const SUSPICIOUS_MAGIC: [u32; 4] = [0x0000, 0x7FF, 0xFFFF, 0x1FFFFFFF];

#[derive(Debug, Clone)]
struct ShadowEntry {
    first_seen: f64,
    last_seen: f64,
    frame_count: u64,
    added_to_baseline: bool,
}

pub struct GeneralRulesDetector {
    shadow_state: HashMap<String, ShadowEntry>,
}

impl GeneralRulesDetector {
    pub fn new() -> Self {
        GeneralRulesDetector { shadow_state: HashMap::new() }
    }

    pub fn detect(
        &mut self,
        config: &ConfigStore,
        baseline: &BaselineEngine,
        frame: &Frame,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if config.is_known_id(&frame.can_id) {
            return alerts;
        }

        let learning_mode: String = config.get_global_setting_or("general_rules", "learning_mode", "shadow".to_string());

        if learning_mode == "immediate" {
            let format = analyze_id_format(&frame.can_id);
            alerts.push(Alert::new(
                "unknown_id_detected",
                frame,
                AlertSeverity::High,
                format!("unknown CAN ID {} (immediate mode)", frame.can_id),
                "general_rules",
                json!({ "is_suspicious": is_suspicious_id(&frame.can_id), "id_format": format }),
            ));
            return alerts;
        }

        let is_first = !self.shadow_state.contains_key(&frame.can_id);
        let entry = self.shadow_state.entry(frame.can_id.clone()).or_insert_with(|| ShadowEntry {
            first_seen: frame.timestamp,
            last_seen: frame.timestamp,
            frame_count: 0,
            added_to_baseline: false,
        });
        entry.frame_count += 1;
        entry.last_seen = frame.timestamp;

        if is_first {
            alerts.push(Alert::new(
                "unknown_id_detected",
                frame,
                AlertSeverity::Medium,
                format!("first sighting of unknown CAN ID {} (shadow learning started)", frame.can_id),
                "general_rules",
                json!({ "is_first_detection": true }),
            ));
            return alerts;
        }

        let auto_add: bool = config.get_global_setting_or("general_rules", "auto_add", true);
        let shadow_duration: f64 = config.get_global_setting_or("general_rules", "shadow_duration_sec", 600.0);
        let min_frames: u64 = config.get_global_setting_or("general_rules", "min_frames_for_learning", 50);

        let time_in_shadow = entry.last_seen - entry.first_seen;
        if !entry.added_to_baseline
            && auto_add
            && time_in_shadow >= shadow_duration
            && entry.frame_count >= min_frames
            && baseline.should_auto_add_id(&frame.can_id, min_frames)
        {
            entry.added_to_baseline = true;
            config.add_known_id(&frame.can_id);
            alerts.push(Alert::new(
                "unknown_id_auto_added",
                frame,
                AlertSeverity::Low,
                format!("CAN ID {} auto-added to baseline after {:.0}s of shadow learning", frame.can_id, time_in_shadow),
                "general_rules",
                json!({ "duration_sec": time_in_shadow, "frame_count": entry.frame_count }),
            ));
        }

        alerts
    }

    /// Purges shadow entries that have gone quiet for longer than
    /// `max_age_sec`.
    pub fn cleanup_old_shadow_state(&mut self, now: f64, max_age_sec: f64) {
        self.shadow_state.retain(|_, entry| now - entry.last_seen <= max_age_sec);
    }
}

fn is_suspicious_id(can_id: &str) -> bool {
    let Ok(value) = parse_can_id_value(can_id) else { return true };
    if value > 0x1FFFFFFF {
        return true;
    }
    if SUSPICIOUS_MAGIC.contains(&value) {
        return true;
    }
    if DIAGNOSTIC_RANGE.contains(&value) {
        return true;
    }
    false
}

fn analyze_id_format(can_id: &str) -> serde_json::Value {
    match parse_can_id_value(can_id) {
        Ok(value) => json!({
            "hex_string": format!("{:X}", value),
            "decimal_value": value,
            "is_extended_id": value > 0x7FF,
            "bit_length": 32 - value.leading_zeros(),
            "is_valid_format": true,
        }),
        Err(_) => json!({
            "hex_string": null,
            "decimal_value": null,
            "is_extended_id": null,
            "bit_length": null,
            "is_valid_format": false,
        }),
    }
}

fn parse_can_id_value(can_id: &str) -> Result<u32, ()> {
    let hex_part = can_id.strip_prefix("0x").or_else(|| can_id.strip_prefix("0X")).unwrap_or(can_id);
    u32::from_str_radix(hex_part, 16).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::baseline::BaselineEngine;
    use serde_json::json;

    fn frame(id: &str, ts: f64) -> Frame {
        Frame { timestamp: ts, can_id: id.into(), dlc: 1, payload: vec![0], is_attack: false }
    }

    #[test]
    fn known_id_never_alerts() {
        let config = ConfigStore::from_document(json!({ "ids": { "0x100": {} } }));
        let baseline = BaselineEngine::new(300.0, 5);
        let mut detector = GeneralRulesDetector::new();
        let alerts = detector.detect(&config, &baseline, &frame("0x100", 1.0));
        assert!(alerts.is_empty());
    }

    #[test]
    fn first_sighting_fires_medium_alert_in_shadow_mode() {
        let config = ConfigStore::from_document(json!({}));
        let baseline = BaselineEngine::new(300.0, 5);
        let mut detector = GeneralRulesDetector::new();
        let alerts = detector.detect(&config, &baseline, &frame("0x999", 1.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "unknown_id_detected");
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    }

    #[test]
    fn immediate_mode_fires_high_every_time() {
        let config = ConfigStore::from_document(json!({
            "global_settings": { "general_rules": { "learning_mode": "immediate" } }
        }));
        let baseline = BaselineEngine::new(300.0, 5);
        let mut detector = GeneralRulesDetector::new();
        for i in 0..3 {
            let alerts = detector.detect(&config, &baseline, &frame("0x999", i as f64));
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].severity, AlertSeverity::High);
        }
    }

    #[test]
    fn subsequent_sightings_in_shadow_mode_are_silent_until_promotion() {
        let config = ConfigStore::from_document(json!({}));
        let baseline = BaselineEngine::new(300.0, 5);
        let mut detector = GeneralRulesDetector::new();
        detector.detect(&config, &baseline, &frame("0x999", 0.0));
        let alerts = detector.detect(&config, &baseline, &frame("0x999", 1.0));
        assert!(alerts.is_empty());
    }
}
