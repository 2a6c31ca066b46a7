use crate::logic::frame::Frame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Escalates one tier if `condition` holds, otherwise leaves severity
    /// unchanged. Used everywhere a detector's "HIGH if more than 2x
    /// threshold" rule applies.
    pub fn escalated(self, condition: bool, escalated: AlertSeverity) -> AlertSeverity {
        if condition {
            escalated
        } else {
            self
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frame snapshot embedded in an alert for forensic context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub timestamp: f64,
    pub can_id: String,
    pub dlc: u8,
    pub payload: String,
    pub payload_hash: String,
    /// Original input line, when the caller has one to attach (set by
    /// `Pipeline::process_line` after detection; `None` for frames built
    /// or replayed without a source line).
    pub raw_text: Option<String>,
}

impl FrameSnapshot {
    pub fn from_frame(frame: &Frame) -> Self {
        FrameSnapshot {
            timestamp: frame.timestamp,
            can_id: frame.can_id.clone(),
            dlc: frame.dlc,
            payload: frame.payload_hex(),
            payload_hash: frame.payload_hash(),
            raw_text: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: String,
    pub can_id: String,
    pub timestamp: f64,
    pub severity: AlertSeverity,
    pub details: String,
    pub frame_data: FrameSnapshot,
    pub detection_context: Value,
}

impl Alert {
    /// `detector` identifies which detector raised the alert (e.g. `"drop"`,
    /// `"tamper"`) and, together with the frame's timestamp, is stamped into
    /// `detection_context` under the `detector` / `detection_time` keys that
    /// every detector-specific context shares.
    pub fn new(
        alert_type: impl Into<String>,
        frame: &Frame,
        severity: AlertSeverity,
        details: impl Into<String>,
        detector: &str,
        detection_context: Value,
    ) -> Self {
        let mut context = detection_context;
        if !context.is_object() {
            context = Value::Object(Default::default());
        }
        let obj = context.as_object_mut().expect("just normalized to an object above");
        obj.entry("detector".to_string()).or_insert_with(|| Value::String(detector.to_string()));
        obj.entry("detection_time".to_string()).or_insert_with(|| {
            serde_json::Number::from_f64(frame.timestamp).map(Value::Number).unwrap_or(Value::Null)
        });

        Alert {
            alert_type: alert_type.into(),
            can_id: frame.can_id.clone(),
            timestamp: frame.timestamp,
            severity,
            details: details.into(),
            frame_data: FrameSnapshot::from_frame(frame),
            detection_context: context,
        }
    }

    /// `{can_id}_{alert_type}_{timestamp}`, derived, never stored.
    pub fn alert_id(&self) -> String {
        format!("{}_{}_{}", self.can_id, self.alert_type, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_id_is_derived_not_stored() {
        let frame = Frame { timestamp: 12.5, can_id: "0x100".into(), dlc: 0, payload: vec![], is_attack: false };
        let alert = Alert::new("drop_iat_anomaly", &frame, AlertSeverity::Medium, "x", "drop", Value::Null);
        assert_eq!(alert.alert_id(), "0x100_drop_iat_anomaly_12.5");
    }

    #[test]
    fn detection_context_is_stamped_with_detector_and_time() {
        let frame = Frame { timestamp: 5.0, can_id: "0x200".into(), dlc: 0, payload: vec![], is_attack: false };
        let alert = Alert::new(
            "tamper_entropy_anomaly",
            &frame,
            AlertSeverity::High,
            "x",
            "tamper",
            serde_json::json!({ "entropy": 0.9 }),
        );
        assert_eq!(alert.detection_context["detector"], "tamper");
        assert_eq!(alert.detection_context["detection_time"], 5.0);
        assert_eq!(alert.detection_context["entropy"], 0.9);
    }
}
