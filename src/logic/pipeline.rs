//! Wires the five subsystems together into one frame-at-a-time pipeline.
//! This is the only place that knows about all of them; each subsystem
//! module stays ignorant of the others.

use crate::logic::alerting::AlertManager;
use crate::logic::baseline::BaselineEngine;
use crate::logic::config::ConfigStore;
use crate::logic::detect::{Alert, DetectorPipeline};
use crate::logic::frame::{Frame, ParseError};
use crate::logic::state::StateManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Learn-only: accumulate baselines, never detect.
    Learn,
    /// Detect-only: assume baselines already exist in the config store.
    Detect,
    /// Learn until the window closes, then detect for the rest of the run.
    Auto,
}

const SHADOW_CLEANUP_INTERVAL_SEC: f64 = 300.0;

pub struct Pipeline {
    pub config: ConfigStore,
    pub state: StateManager,
    pub baseline: BaselineEngine,
    pub detectors: DetectorPipeline,
    pub alerts: AlertManager,
    mode: Mode,
    learning_done: bool,
    last_shadow_cleanup: f64,
}

impl Pipeline {
    pub fn new(config: ConfigStore, alerts: AlertManager, mode: Mode, learning_window_sec: f64) -> Self {
        let min_changes: usize =
            config.get_global_setting_or("learning_params", "learning_window_min_changes_for_variable", 5);
        Pipeline {
            config,
            state: StateManager::with_defaults(),
            baseline: BaselineEngine::new(learning_window_sec, min_changes),
            detectors: DetectorPipeline::new(),
            alerts,
            mode,
            learning_done: mode == Mode::Detect,
            last_shadow_cleanup: 0.0,
        }
    }

    /// Parses and processes one frame log line. Parse failures are
    /// returned to the caller, who logs them and continues (§7
    /// ParseError handling is per-line, never fatal to the run).
    pub fn process_line(&mut self, line: &str) -> Result<Vec<Alert>, ParseError> {
        let frame = Frame::parse_json_line(line)?;
        let mut alerts = self.process_frame(&frame);
        for alert in &mut alerts {
            alert.frame_data.raw_text = Some(line.to_string());
        }
        Ok(alerts)
    }

    pub fn process_frame(&mut self, frame: &Frame) -> Vec<Alert> {
        let now = frame.timestamp;
        let (state, _outcome) = self.state.update_and_get_state(frame, now);
        let iat = state.last_iat;

        if self.mode != Mode::Detect && !self.learning_done {
            self.baseline.observe(frame, iat);

            let min_samples: u64 =
                self.config.get_global_setting_or("learning_params", "min_samples_for_stable_baseline", 100);
            if self.mode == Mode::Auto && self.baseline.is_learning_complete(now, min_samples) {
                let finalized = self.baseline.finalize_baselines(&self.config);
                log::info!("baseline learning complete, finalized {} IDs", finalized.len());
                self.learning_done = true;
            }
            if self.mode == Mode::Learn {
                return Vec::new();
            }
            if self.mode == Mode::Auto && !self.learning_done {
                return Vec::new();
            }
        }

        if now - self.last_shadow_cleanup >= SHADOW_CLEANUP_INTERVAL_SEC {
            self.last_shadow_cleanup = now;
            let max_age: f64 = self.config.get_global_setting_or("general_rules", "shadow_cleanup_max_age_sec", 3600.0);
            self.detectors.general_rules.cleanup_old_shadow_state(now, max_age);
        }

        let state_mut = self.state.get_mut(&frame.can_id).expect("state just updated above");
        let raw_alerts = self.detectors.run(&self.config, &self.baseline, state_mut, frame, now);

        let mut accepted = Vec::new();
        for alert in raw_alerts {
            if self.alerts.process(alert.clone(), now) {
                accepted.push(alert);
            }
        }
        accepted
    }

    /// Forces the learn phase to conclude immediately, as if the window
    /// had elapsed (used by `learn`-mode callers and tests).
    pub fn finish_learning(&mut self) -> Vec<String> {
        self.baseline.finalize_baselines(&self.config)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}
