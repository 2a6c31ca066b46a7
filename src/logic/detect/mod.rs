//! Detector pipeline (§2, §4.3-§4.6): runs the four independent detectors
//! against one frame's updated state and returns whatever alerts they
//! raised. A detector that panics is caught and logged rather than taking
//! the whole pipeline down (§7 DetectorError handling). CAN-bus input is
//! adversarial by definition, and one malformed baseline entry should not
//! blind the other three detectors.

pub mod alert;
pub mod drop;
pub mod error;
pub mod general_rules;
pub mod replay;
pub mod tamper;

pub use alert::{Alert, AlertSeverity};
pub use error::DetectorError;

use crate::logic::baseline::BaselineEngine;
use crate::logic::config::ConfigStore;
use crate::logic::frame::Frame;
use crate::logic::state::IdState;
use std::panic::{self, AssertUnwindSafe};

pub struct DetectorPipeline {
    pub general_rules: general_rules::GeneralRulesDetector,
}

impl DetectorPipeline {
    pub fn new() -> Self {
        DetectorPipeline { general_rules: general_rules::GeneralRulesDetector::new() }
    }

    /// Runs all four detectors for one frame. `state` must already reflect
    /// this frame (i.e. called after `StateManager::update_and_get_state`).
    pub fn run(
        &mut self,
        config: &ConfigStore,
        baseline: &BaselineEngine,
        state: &mut IdState,
        frame: &Frame,
        now: f64,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        alerts.extend(guarded("drop", || drop::DropDetector::detect(config, state, frame)));
        alerts.extend(guarded("tamper", || tamper::TamperDetector::detect(config, state, frame)));
        alerts.extend(guarded("replay", || replay::ReplayDetector::detect(config, state, frame, now)));

        let general_rules = &mut self.general_rules;
        alerts.extend(guarded_mut("general_rules", move || general_rules.detect(config, baseline, frame)));

        alerts
    }
}

fn guarded<F: FnOnce() -> Vec<Alert>>(name: &'static str, f: F) -> Vec<Alert> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(alerts) => alerts,
        Err(_) => {
            log::error!("{}", DetectorError::new(name, "panicked while processing frame"));
            Vec::new()
        }
    }
}

fn guarded_mut<F: FnOnce() -> Vec<Alert>>(name: &'static str, f: F) -> Vec<Alert> {
    guarded(name, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::state::StateManager;
    use serde_json::json;

    #[test]
    fn pipeline_runs_all_detectors_without_panicking_on_empty_config() {
        let config = ConfigStore::from_document(json!({}));
        let baseline = BaselineEngine::new(300.0, 5);
        let mut sm = StateManager::with_defaults();
        let mut pipeline = DetectorPipeline::new();

        let frame = Frame { timestamp: 1.0, can_id: "0x100".into(), dlc: 1, payload: vec![1], is_attack: false };
        let (state, _) = sm.update_and_get_state(&frame, 1.0);
        let alerts = pipeline.run(&config, &baseline, state, &frame, 1.0);
        // unknown-ID shadow detection always fires on first sighting.
        assert!(alerts.iter().any(|a| a.alert_type == "unknown_id_detected"));
    }
}
