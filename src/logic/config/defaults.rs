//! Built-in defaults for every global settings section, plus the default
//! periodic whitelist table the replay detector falls back to.
//!
//! Values match the documented configuration defaults (see DESIGN.md), with
//! one deliberate deviation: `min_samples_for_stable_baseline` uses 100
//! rather than the reference config loader's 5, since 5 samples is too few
//! to call a baseline stable (see DESIGN.md).

use serde_json::{json, Value};

pub fn global_defaults() -> Value {
    json!({
        "learning_params": {
            "initial_learning_window_sec": 60,
            "min_samples_for_stable_baseline": 100,
            "learning_window_min_changes_for_variable": 5
        },
        "drop": {
            "iat_sigma_multiplier": 3.5,
            "allowed_consecutive_missing": 2,
            "iat_max_factor": 2.5,
            "treat_dlc_zero_as_special": true,
            "dlc_zero_sigma_multiplier": 1.5
        },
        "tamper": {
            "entropy_absolute_threshold": 0.1,
            "entropy_sigma_threshold": 3.0,
            "static_mismatch_threshold": 1,
            "static_diff_critical_threshold": 100,
            "counter_allowed_skips": 1,
            "byte_change_ratio_threshold": 0.85,
            "byte_change_ratio_high_threshold": 0.95
        },
        "replay": {
            "absolute_min_iat_ms": 0.2,
            "sequence_length": 5,
            "min_interval_sec": 10.0,
            "max_sequence_age_sec": 300.0,
            "periodic_whitelist": {}
        },
        "throttle": {
            "cooldown_sec": 0.25,
            "max_alerts_per_id_per_sec": 3,
            "global_max_alerts_per_sec": 20
        },
        "general_rules": {
            "learning_mode": "shadow",
            "shadow_duration_sec": 600,
            "min_frames_for_learning": 50,
            "auto_add": true,
            "shadow_cleanup_max_age_sec": 3600
        }
    })
}

/// A single entry of the compiled-in periodic whitelist: expected
/// inter-arrival times (milliseconds) and the tolerance (milliseconds)
/// used to match an observed interval against them.
pub struct WhitelistEntry {
    pub can_id: &'static str,
    pub expected_intervals_ms: &'static [f64],
    pub tolerance_ms: f64,
}

/// Compiled-in default periodic whitelist, ported entry-for-entry from the
/// reference replay detector's hard-coded table. CAN IDs are normalized to
/// `Frame::normalize_can_id`'s form (no leading zeros) so lookups against a
/// parsed frame's `can_id` match directly. The config store's
/// `replay.periodic_whitelist` section can add entries or override the
/// tolerance/intervals for any of these IDs (see DESIGN.md for the
/// per-ID-override design decision).
pub const DEFAULT_PERIODIC_WHITELIST: &[WhitelistEntry] = &[
    WhitelistEntry { can_id: "0x18", expected_intervals_ms: &[200.0], tolerance_ms: 19.0 },
    WhitelistEntry { can_id: "0x34", expected_intervals_ms: &[1000.0], tolerance_ms: 100.0 },
    WhitelistEntry { can_id: "0x42", expected_intervals_ms: &[1000.0], tolerance_ms: 100.0 },
    WhitelistEntry { can_id: "0x43", expected_intervals_ms: &[1000.0], tolerance_ms: 100.0 },
    WhitelistEntry { can_id: "0x44", expected_intervals_ms: &[1000.0], tolerance_ms: 100.0 },
    WhitelistEntry { can_id: "0x50", expected_intervals_ms: &[200.0], tolerance_ms: 19.0 },
    WhitelistEntry { can_id: "0x80", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x81", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0xA0", expected_intervals_ms: &[99.0, 100.0, 98.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0xA1", expected_intervals_ms: &[99.0, 100.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x110", expected_intervals_ms: &[100.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x120", expected_intervals_ms: &[200.0], tolerance_ms: 20.0 },
    WhitelistEntry { can_id: "0x165", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x18F", expected_intervals_ms: &[10.0, 9.0, 11.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x260", expected_intervals_ms: &[10.0, 9.0, 11.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x2A0", expected_intervals_ms: &[10.0, 9.0, 11.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x2B0", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x316", expected_intervals_ms: &[10.0, 9.0, 11.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x329", expected_intervals_ms: &[10.0, 9.0, 11.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x350", expected_intervals_ms: &[20.0], tolerance_ms: 2.0 },
    WhitelistEntry { can_id: "0x370", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x382", expected_intervals_ms: &[20.0, 21.0, 19.0], tolerance_ms: 2.0 },
    WhitelistEntry { can_id: "0x43F", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x440", expected_intervals_ms: &[10.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x4F0", expected_intervals_ms: &[20.0, 19.0, 21.0], tolerance_ms: 2.0 },
    WhitelistEntry { can_id: "0x4F1", expected_intervals_ms: &[100.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x4F2", expected_intervals_ms: &[20.0, 21.0, 19.0], tolerance_ms: 2.0 },
    WhitelistEntry { can_id: "0x510", expected_intervals_ms: &[100.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x517", expected_intervals_ms: &[200.0, 201.0, 199.0], tolerance_ms: 20.0 },
    WhitelistEntry { can_id: "0x51A", expected_intervals_ms: &[200.0, 199.0, 201.0], tolerance_ms: 20.0 },
    WhitelistEntry { can_id: "0x545", expected_intervals_ms: &[10.0, 11.0, 9.0], tolerance_ms: 1.0 },
    WhitelistEntry { can_id: "0x587", expected_intervals_ms: &[100.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x59B", expected_intervals_ms: &[100.0, 101.0, 99.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x5E4", expected_intervals_ms: &[100.0, 99.0, 101.0], tolerance_ms: 10.0 },
    WhitelistEntry { can_id: "0x5F0", expected_intervals_ms: &[200.0], tolerance_ms: 20.0 },
    WhitelistEntry { can_id: "0x690", expected_intervals_ms: &[100.0, 99.0, 101.0], tolerance_ms: 10.0 },
];

/// Recursively merges `defaults` into `value`, filling in any key missing
/// from `value` and recursing into nested objects. Existing keys in
/// `value` are never overwritten.
pub fn merge_defaults(value: &mut Value, defaults: &Value) {
    match (value, defaults) {
        (Value::Object(map), Value::Object(default_map)) => {
            for (key, default_val) in default_map {
                match map.get_mut(key) {
                    Some(existing) => merge_defaults(existing, default_val),
                    None => {
                        map.insert(key.clone(), default_val.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_fills_missing_keys_without_overwriting() {
        let mut value = json!({ "drop": { "allowed_consecutive_missing": 9 } });
        merge_defaults(&mut value, &global_defaults());
        assert_eq!(value["drop"]["allowed_consecutive_missing"], 9);
        assert_eq!(value["drop"]["iat_sigma_multiplier"], 3.5);
        assert_eq!(value["throttle"]["cooldown_sec"], 0.25);
    }
}
