use std::collections::{HashMap, VecDeque};

/// Runtime state tracked per CAN ID (§3.3). `counter_initialized` is a
/// supplemental field beyond the distilled schema, needed to implement the
/// tamper detector's "memorize the first counter-byte observation without
/// alerting" rule.
#[derive(Debug, Clone)]
pub struct IdState {
    pub first_seen: f64,
    pub last_timestamp: f64,
    pub prev_timestamp: Option<f64>,
    pub last_active: f64,
    pub frame_count: u64,
    pub last_iat: Option<f64>,
    pub consecutive_missing_count: u32,
    pub last_payload_bytes: Option<Vec<u8>>,
    pub last_payload_len: usize,
    pub last_byte_values_for_counter: [u8; 8],
    pub counter_initialized: [bool; 8],
    pub static_byte_mismatch_counts: [u32; 8],
    pub recent_payload_hashes_ts: VecDeque<(String, f64)>,
    pub recent_frame_sequence: VecDeque<String>,
    pub historical_sequences: HashMap<Vec<String>, f64>,
    pub last_alert_timestamps: HashMap<String, f64>,
    pub anomaly_flags: Vec<String>,
    pub last_matched_period: Option<f64>,
}

impl IdState {
    pub fn new(first_seen: f64, now: f64, _sequence_length: usize) -> Self {
        IdState {
            first_seen,
            last_timestamp: first_seen,
            prev_timestamp: None,
            last_active: now,
            frame_count: 0,
            last_iat: None,
            consecutive_missing_count: 0,
            last_payload_bytes: None,
            last_payload_len: 0,
            last_byte_values_for_counter: [0; 8],
            counter_initialized: [false; 8],
            static_byte_mismatch_counts: [0; 8],
            recent_payload_hashes_ts: VecDeque::new(),
            recent_frame_sequence: VecDeque::new(),
            historical_sequences: HashMap::new(),
            last_alert_timestamps: HashMap::new(),
            anomaly_flags: Vec::new(),
            last_matched_period: None,
        }
    }

    pub fn record_payload_hash(&mut self, hash: String, now: f64, max_history: usize) {
        self.recent_payload_hashes_ts.push_back((hash, now));
        while self.recent_payload_hashes_ts.len() > max_history {
            self.recent_payload_hashes_ts.pop_front();
        }
    }

    pub fn push_sequence_fingerprint(&mut self, fingerprint: String, sequence_length: usize) -> Option<Vec<String>> {
        self.recent_frame_sequence.push_back(fingerprint);
        while self.recent_frame_sequence.len() > sequence_length {
            self.recent_frame_sequence.pop_front();
        }
        if self.recent_frame_sequence.len() == sequence_length {
            Some(self.recent_frame_sequence.iter().cloned().collect())
        } else {
            None
        }
    }

    pub fn record_historical_sequence(&mut self, key: Vec<String>, now: f64, max_entries: usize) {
        self.historical_sequences.insert(key, now);
        if self.historical_sequences.len() > max_entries {
            let mut entries: Vec<(Vec<String>, f64)> = self.historical_sequences.drain().collect();
            entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            entries.truncate(max_entries);
            self.historical_sequences = entries.into_iter().collect();
        }
    }

    pub fn time_since_last_alert(&self, alert_type: &str, now: f64) -> Option<f64> {
        self.last_alert_timestamps.get(alert_type).map(|ts| now - ts)
    }

    pub fn record_alert(&mut self, alert_type: &str, now: f64) {
        self.last_alert_timestamps.insert(alert_type.to_string(), now);
    }
}
