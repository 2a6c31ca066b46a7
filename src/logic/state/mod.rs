//! Per-ID runtime state tracking.
//!
//! Owns the bounded, evicting table of live per-CAN-ID state that the
//! detector pipeline reads and writes every frame. A single caller-supplied
//! "now" (the frame's timestamp, by convention) drives both inter-arrival
//! bookkeeping and eviction/cleanup cutoffs, collapsing the reference
//! implementation's mix of frame-timestamp and wall-clock time into one
//! consistent domain (see DESIGN.md, "Per-ID State Manager").

mod types;

pub use types::IdState;

use crate::constants::DEFAULT_MAX_TRACKED_IDS;
use crate::logic::frame::Frame;
use std::collections::HashMap;

const CLEANUP_INTERVAL_SEC: f64 = 300.0;
const HASH_HISTORY_MAX_AGE_SEC: f64 = 300.0;
const SEQUENCE_MAX_AGE_SEC: f64 = 1800.0;
const INACTIVE_EVICTION_SEC: f64 = 600.0;
const MEMORY_PRESSURE_ACTIVE_WINDOW_SEC: f64 = 60.0;
const MEMORY_PRESSURE_HASH_CAP: usize = 50;
const MEMORY_PRESSURE_SEQUENCE_CAP: usize = 100;

pub struct StateManager {
    states: HashMap<String, IdState>,
    max_ids: usize,
    sequence_length: usize,
    last_cleanup: f64,
}

/// What changed when a frame updated an ID's state, handed to the detector
/// pipeline so detectors don't have to re-derive it.
pub struct UpdateOutcome {
    pub is_new_id: bool,
}

impl StateManager {
    pub fn new(max_ids: usize, sequence_length: usize) -> Self {
        StateManager {
            states: HashMap::new(),
            max_ids,
            sequence_length,
            last_cleanup: 0.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_IDS, 5)
    }

    pub fn get(&self, can_id: &str) -> Option<&IdState> {
        self.states.get(can_id)
    }

    pub fn get_mut(&mut self, can_id: &str) -> Option<&mut IdState> {
        self.states.get_mut(can_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Updates the state for `frame`'s CAN ID and returns a mutable
    /// reference to it plus whether it was newly created this call.
    pub fn update_and_get_state(&mut self, frame: &Frame, now: f64) -> (&mut IdState, UpdateOutcome) {
        self.maybe_evict_for_capacity();

        let is_new_id = !self.states.contains_key(&frame.can_id);
        let state = self
            .states
            .entry(frame.can_id.clone())
            .or_insert_with(|| IdState::new(frame.timestamp, now, self.sequence_length));

        let prev_timestamp = state.prev_timestamp;
        state.last_iat = None;
        if let Some(prev) = prev_timestamp {
            if prev < frame.timestamp {
                state.last_iat = Some(frame.timestamp - prev);
            }
        }
        state.prev_timestamp = Some(frame.timestamp);
        state.last_timestamp = frame.timestamp;
        state.last_active = now;
        state.frame_count += 1;
        state.last_payload_len = frame.payload.len();

        self.maybe_run_periodic_cleanup(now);

        (self.states.get_mut(&frame.can_id).unwrap(), UpdateOutcome { is_new_id })
    }

    fn maybe_evict_for_capacity(&mut self) {
        if self.states.len() < self.max_ids {
            return;
        }
        if let Some(oldest_id) = self
            .states
            .iter()
            .min_by(|a, b| a.1.last_active.partial_cmp(&b.1.last_active).unwrap())
            .map(|(id, _)| id.clone())
        {
            self.states.remove(&oldest_id);
        }
    }

    fn maybe_run_periodic_cleanup(&mut self, now: f64) {
        if now - self.last_cleanup < CLEANUP_INTERVAL_SEC {
            return;
        }
        self.last_cleanup = now;
        self.cleanup_old_data(now);
    }

    /// Trims bounded history that has aged out and evicts IDs that have
    /// gone quiet for longer than the inactivity cutoff.
    pub fn cleanup_old_data(&mut self, now: f64) {
        self.states.retain(|_, state| now - state.last_active <= INACTIVE_EVICTION_SEC);
        for state in self.states.values_mut() {
            state
                .recent_payload_hashes_ts
                .retain(|(_, ts)| now - ts <= HASH_HISTORY_MAX_AGE_SEC);
            state
                .historical_sequences
                .retain(|_, ts| now - *ts <= SEQUENCE_MAX_AGE_SEC);
        }
    }

    /// Aggressive trim invoked when the process is under memory pressure
    /// (§7 MemoryError handling): keep only recently-active IDs, and cap
    /// every bounded history harder than the steady-state limits.
    pub fn memory_pressure_cleanup(&mut self, now: f64) {
        let mut ids: Vec<(String, f64)> = self
            .states
            .iter()
            .filter(|(_, s)| now - s.last_active <= MEMORY_PRESSURE_ACTIVE_WINDOW_SEC)
            .map(|(id, s)| (id.clone(), s.last_active))
            .collect();
        ids.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ids.truncate(self.max_ids);
        let keep: std::collections::HashSet<String> = ids.into_iter().map(|(id, _)| id).collect();
        self.states.retain(|id, _| keep.contains(id));

        for state in self.states.values_mut() {
            if state.recent_payload_hashes_ts.len() > MEMORY_PRESSURE_HASH_CAP {
                let drain_to = state.recent_payload_hashes_ts.len() - MEMORY_PRESSURE_HASH_CAP;
                state.recent_payload_hashes_ts.drain(0..drain_to);
            }
            if state.historical_sequences.len() > MEMORY_PRESSURE_SEQUENCE_CAP {
                let mut entries: Vec<(Vec<String>, f64)> =
                    state.historical_sequences.drain().collect();
                entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
                entries.truncate(MEMORY_PRESSURE_SEQUENCE_CAP);
                state.historical_sequences = entries.into_iter().collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, ts: f64, payload: Vec<u8>) -> Frame {
        let dlc = payload.len() as u8;
        Frame { timestamp: ts, can_id: id.to_string(), dlc, payload, is_attack: false }
    }

    #[test]
    fn first_frame_has_no_iat() {
        let mut sm = StateManager::with_defaults();
        let (state, outcome) = sm.update_and_get_state(&frame("0x100", 1.0, vec![]), 1.0);
        assert!(outcome.is_new_id);
        assert_eq!(state.last_iat, None);
        assert_eq!(state.frame_count, 1);
    }

    #[test]
    fn equal_timestamp_yields_no_iat() {
        let mut sm = StateManager::with_defaults();
        sm.update_and_get_state(&frame("0x100", 1.0, vec![]), 1.0);
        let (state, _) = sm.update_and_get_state(&frame("0x100", 1.0, vec![]), 1.0);
        assert_eq!(state.last_iat, None);
    }

    #[test]
    fn increasing_timestamp_computes_iat() {
        let mut sm = StateManager::with_defaults();
        sm.update_and_get_state(&frame("0x100", 1.0, vec![]), 1.0);
        let (state, _) = sm.update_and_get_state(&frame("0x100", 1.1, vec![]), 1.1);
        assert!((state.last_iat.unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn inactive_ids_are_evicted_on_cleanup() {
        let mut sm = StateManager::with_defaults();
        sm.update_and_get_state(&frame("0x100", 1.0, vec![]), 1.0);
        sm.cleanup_old_data(1.0 + INACTIVE_EVICTION_SEC + 1.0);
        assert!(sm.get("0x100").is_none());
    }

    #[test]
    fn capacity_eviction_removes_oldest_active() {
        let mut sm = StateManager::new(2, 5);
        sm.update_and_get_state(&frame("0x100", 1.0, vec![]), 1.0);
        sm.update_and_get_state(&frame("0x200", 2.0, vec![]), 2.0);
        sm.update_and_get_state(&frame("0x300", 3.0, vec![]), 3.0);
        assert!(sm.get("0x100").is_none());
        assert!(sm.get("0x300").is_some());
    }
}
