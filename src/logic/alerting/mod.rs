//! Alert manager (C8): throttles, records, and dispatches alerts.
//!
//! Throttling runs in three tiers, in order: a global cooldown since the
//! last accepted alert of any kind, a per-(ID, alert type) rate cap, and a
//! global per-alert-type rate cap. Any tier rejecting the alert discards
//! it without recording or dispatching it.

pub mod sink;

use crate::logic::detect::Alert;
use sink::{ConsoleSink, FileFormat, FileSink, JsonFileSink, SinkConfig};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

const THROTTLE_WINDOW_SEC: f64 = 1.0;
const RETENTION_PURGE_AGE_SEC: f64 = 60.0;
const MIN_RECENT_ALERTS_CAP: usize = 100;

#[derive(Debug, Default, Clone)]
pub struct AlertStats {
    pub total_alerts: u64,
    pub alerts_by_type: HashMap<String, u64>,
    pub alerts_by_id: HashMap<String, u64>,
    pub alerts_by_severity: HashMap<String, u64>,
    pub throttled_alerts: u64,
    pub last_alert_time: Option<f64>,
}

pub struct AlertManagerConfig {
    pub cooldown_sec: f64,
    pub max_alerts_per_id_per_sec: usize,
    pub global_max_alerts_per_sec: usize,
    pub recent_alerts_cap: usize,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        AlertManagerConfig {
            cooldown_sec: 0.25,
            max_alerts_per_id_per_sec: 3,
            global_max_alerts_per_sec: 20,
            recent_alerts_cap: 1000,
        }
    }
}

pub struct AlertManager {
    cfg: AlertManagerConfig,
    last_alert_ts_any: Option<f64>,
    per_id_type_timestamps: HashMap<(String, String), VecDeque<f64>>,
    global_type_timestamps: HashMap<String, VecDeque<f64>>,
    recent_alerts: VecDeque<Alert>,
    stats: AlertStats,
    console: Option<ConsoleSink>,
    file: Option<FileSink>,
    json_file: Option<JsonFileSink>,
}

impl AlertManager {
    pub fn new(cfg: AlertManagerConfig) -> Self {
        AlertManager {
            cfg,
            last_alert_ts_any: None,
            per_id_type_timestamps: HashMap::new(),
            global_type_timestamps: HashMap::new(),
            recent_alerts: VecDeque::new(),
            stats: AlertStats::default(),
            console: None,
            file: None,
            json_file: None,
        }
    }

    pub fn enable_console(&mut self, config: SinkConfig) {
        self.console = Some(ConsoleSink { config });
    }

    pub fn enable_file(&mut self, path: PathBuf, format: FileFormat, config: SinkConfig) -> std::io::Result<()> {
        self.file = Some(FileSink::new(path, format, config)?);
        Ok(())
    }

    pub fn enable_json_file(&mut self, path: PathBuf, config: SinkConfig) -> std::io::Result<()> {
        self.json_file = Some(JsonFileSink::new(path, config)?);
        Ok(())
    }

    /// Attempts to accept `alert`. Returns `true` if it was recorded and
    /// dispatched, `false` if it was throttled.
    pub fn process(&mut self, alert: Alert, now: f64) -> bool {
        if let Some(last) = self.last_alert_ts_any {
            if now - last < self.cfg.cooldown_sec {
                self.stats.throttled_alerts += 1;
                return false;
            }
        }

        let id_type_key = (alert.can_id.clone(), alert.alert_type.clone());
        let id_type_deque = self.per_id_type_timestamps.entry(id_type_key).or_default();
        trim_window(id_type_deque, now, THROTTLE_WINDOW_SEC);
        if id_type_deque.len() >= self.cfg.max_alerts_per_id_per_sec {
            self.stats.throttled_alerts += 1;
            return false;
        }

        let global_type_deque = self.global_type_timestamps.entry(alert.alert_type.clone()).or_default();
        trim_window(global_type_deque, now, THROTTLE_WINDOW_SEC);
        if global_type_deque.len() >= self.cfg.global_max_alerts_per_sec {
            self.stats.throttled_alerts += 1;
            return false;
        }

        self.record(&alert, now);
        self.output(&alert);
        self.update_statistics(&alert, now);
        self.recent_alerts.push_back(alert);
        while self.recent_alerts.len() > self.cfg.recent_alerts_cap {
            self.recent_alerts.pop_front();
        }
        true
    }

    fn record(&mut self, alert: &Alert, now: f64) {
        self.per_id_type_timestamps
            .entry((alert.can_id.clone(), alert.alert_type.clone()))
            .or_default()
            .push_back(now);
        self.global_type_timestamps.entry(alert.alert_type.clone()).or_default().push_back(now);
        self.last_alert_ts_any = Some(now);
    }

    fn output(&mut self, alert: &Alert) {
        if let Some(console) = &self.console {
            console.emit(alert);
        }
        if let Some(file) = &mut self.file {
            if let Err(e) = file.emit(alert) {
                log::error!("file alert sink write failed: {}", e);
            }
        }
        if let Some(json_file) = &mut self.json_file {
            if let Err(e) = json_file.emit(alert) {
                log::error!("json alert sink write failed: {}", e);
            }
        }
    }

    fn update_statistics(&mut self, alert: &Alert, now: f64) {
        self.stats.total_alerts += 1;
        *self.stats.alerts_by_type.entry(alert.alert_type.clone()).or_insert(0) += 1;
        *self.stats.alerts_by_id.entry(alert.can_id.clone()).or_insert(0) += 1;
        *self.stats.alerts_by_severity.entry(alert.severity.to_string()).or_insert(0) += 1;
        self.stats.last_alert_time = Some(now);
    }

    pub fn stats(&self) -> &AlertStats {
        &self.stats
    }

    pub fn recent_alerts(&self) -> &VecDeque<Alert> {
        &self.recent_alerts
    }

    /// Relieves memory pressure (§7 MemoryError handling): halves the
    /// recent-alerts retention window (never below 100) and purges
    /// throttle timestamps older than 60s.
    pub fn reduce_alert_retention(&mut self, now: f64) {
        self.cfg.recent_alerts_cap = (self.cfg.recent_alerts_cap / 2).max(MIN_RECENT_ALERTS_CAP);
        while self.recent_alerts.len() > self.cfg.recent_alerts_cap {
            self.recent_alerts.pop_front();
        }
        self.cleanup_throttle_timestamps(now);
    }

    fn cleanup_throttle_timestamps(&mut self, now: f64) {
        self.per_id_type_timestamps.retain(|_, deque| {
            deque.retain(|ts| now - ts <= RETENTION_PURGE_AGE_SEC);
            !deque.is_empty()
        });
        self.global_type_timestamps.retain(|_, deque| {
            deque.retain(|ts| now - ts <= RETENTION_PURGE_AGE_SEC);
            !deque.is_empty()
        });
    }

    pub fn export_alerts_to_file(
        &self,
        path: &std::path::Path,
        format: FileFormat,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> std::io::Result<()> {
        let filtered: Vec<&Alert> = self
            .recent_alerts
            .iter()
            .filter(|a| start_time.map_or(true, |s| a.timestamp >= s))
            .filter(|a| end_time.map_or(true, |e| a.timestamp <= e))
            .collect();

        let body = match format {
            FileFormat::Csv => filtered.iter().map(|a| sink::format_csv(a)).collect::<Vec<_>>().join("\n"),
            FileFormat::Text => serde_json::to_string_pretty(&filtered)?,
        };
        std::fs::write(path, body)
    }
}

fn trim_window(deque: &mut VecDeque<f64>, now: f64, window: f64) {
    while let Some(&front) = deque.front() {
        if now - front > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::detect::AlertSeverity;
    use crate::logic::frame::Frame;

    fn alert(id: &str, kind: &str, ts: f64) -> Alert {
        let frame = Frame { timestamp: ts, can_id: id.into(), dlc: 1, payload: vec![1], is_attack: false };
        Alert::new(kind, &frame, AlertSeverity::Medium, "x", "test", serde_json::json!({}))
    }

    #[test]
    fn global_cooldown_throttles_rapid_alerts() {
        let mut mgr = AlertManager::new(AlertManagerConfig::default());
        assert!(mgr.process(alert("0x100", "a", 0.0), 0.0));
        assert!(!mgr.process(alert("0x200", "b", 0.01), 0.01));
        assert_eq!(mgr.stats().throttled_alerts, 1);
    }

    #[test]
    fn per_id_type_cap_throttles_after_limit() {
        let mut cfg = AlertManagerConfig::default();
        cfg.cooldown_sec = 0.0;
        cfg.max_alerts_per_id_per_sec = 2;
        let mut mgr = AlertManager::new(cfg);
        assert!(mgr.process(alert("0x100", "a", 0.0), 0.0));
        assert!(mgr.process(alert("0x100", "a", 0.1), 0.1));
        assert!(!mgr.process(alert("0x100", "a", 0.2), 0.2));
    }

    #[test]
    fn reduce_alert_retention_halves_cap_with_floor() {
        let mut mgr = AlertManager::new(AlertManagerConfig::default());
        mgr.reduce_alert_retention(0.0);
        assert_eq!(mgr.cfg.recent_alerts_cap, 500);
        for _ in 0..20 {
            mgr.cfg.recent_alerts_cap = MIN_RECENT_ALERTS_CAP;
            mgr.reduce_alert_retention(0.0);
        }
        assert_eq!(mgr.cfg.recent_alerts_cap, MIN_RECENT_ALERTS_CAP);
    }
}
