//! Alert output sinks: console, text log file, JSONL file. Each is
//! independently toggleable, mirroring the reference alert manager's
//! per-sink `enabled` flags.

use crate::logic::detect::Alert;
use chrono::{TimeZone, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub enabled: bool,
    pub include_context: bool,
    pub include_frame_data: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig { enabled: true, include_context: true, include_frame_data: true }
    }
}

fn display_time(alert: &Alert) -> String {
    let context_time = alert
        .detection_context
        .get("detection_time")
        .and_then(|v| v.as_f64())
        .unwrap_or(alert.timestamp);
    Utc.timestamp_opt(context_time as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| context_time.to_string())
}

pub fn format_text(alert: &Alert, cfg: &SinkConfig) -> String {
    let mut line = format!(
        "[{}] {} severity={} can_id={} - {}",
        display_time(alert),
        alert.alert_type,
        alert.severity,
        alert.can_id,
        alert.details
    );
    if cfg.include_frame_data {
        line.push_str(&format!(" frame={{dlc={} hash={}}}", alert.frame_data.dlc, alert.frame_data.payload_hash));
    }
    if cfg.include_context && alert.detection_context != serde_json::Value::Null {
        line.push_str(&format!(" context={}", alert.detection_context));
    }
    line
}

pub fn format_csv(alert: &Alert) -> String {
    format!(
        "{},{},{},{},{},\"{}\"",
        alert.timestamp,
        alert.alert_type,
        alert.can_id,
        alert.severity,
        alert.frame_data.payload_hash,
        alert.details.replace('"', "'")
    )
}

pub struct ConsoleSink {
    pub config: SinkConfig,
}

impl ConsoleSink {
    pub fn emit(&self, alert: &Alert) {
        if !self.config.enabled {
            return;
        }
        println!("{}", format_text(alert, &self.config));
    }
}

pub enum FileFormat {
    Text,
    Csv,
}

pub struct FileSink {
    pub config: SinkConfig,
    pub format: FileFormat,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn new(path: PathBuf, format: FileFormat, config: SinkConfig) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileSink { config, format, writer: BufWriter::new(file) })
    }

    pub fn emit(&mut self, alert: &Alert) -> std::io::Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let line = match self.format {
            FileFormat::Text => format_text(alert, &self.config),
            FileFormat::Csv => format_csv(alert),
        };
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()
    }
}

pub struct JsonFileSink {
    pub config: SinkConfig,
    writer: BufWriter<File>,
}

impl JsonFileSink {
    pub fn new(path: PathBuf, config: SinkConfig) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonFileSink { config, writer: BufWriter::new(file) })
    }

    pub fn emit(&mut self, alert: &Alert) -> std::io::Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut value = serde_json::to_value(alert).expect("Alert always serializes");
        value["alert_id"] = serde_json::Value::String(alert.alert_id());
        if !self.config.include_context {
            value.as_object_mut().unwrap().remove("detection_context");
        }
        if !self.config.include_frame_data {
            value.as_object_mut().unwrap().remove("frame_data");
        }
        writeln!(self.writer, "{}", serde_json::to_string(&value)?)?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::detect::AlertSeverity;
    use crate::logic::frame::Frame;
    use tempfile::TempDir;

    fn sample_alert() -> Alert {
        let frame = Frame { timestamp: 1.0, can_id: "0x100".into(), dlc: 1, payload: vec![1], is_attack: false };
        Alert::new("drop_iat_anomaly", &frame, AlertSeverity::Medium, "test", "drop", serde_json::json!({}))
    }

    #[test]
    fn json_sink_writes_one_object_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let mut sink = JsonFileSink::new(path.clone(), SinkConfig::default()).unwrap();
        sink.emit(&sample_alert()).unwrap();
        sink.emit(&sample_alert()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            assert!(serde_json::from_str::<serde_json::Value>(line).is_ok());
        }
    }

    #[test]
    fn csv_format_escapes_quotes() {
        let mut alert = sample_alert();
        alert.details = "has \"quotes\"".to_string();
        let csv = format_csv(&alert);
        assert!(csv.contains("'quotes'"));
    }
}
