//! Central Configuration Constants
//!
//! Single source of truth for defaults that are not overridable per config
//! section. Section-specific defaults (learning window, drop thresholds,
//! tamper thresholds, replay thresholds, throttle limits) live in
//! `logic::config::defaults` next to the schema they fill in.

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "can-ids-core";

/// Minimum frame count a CAN ID must reach before `finalize_baselines`
/// will promote it into the known-ID set, independent of the configurable
/// `min_samples_for_stable_baseline`. Below this floor there simply is not
/// enough data to trust any derived statistic.
pub const MIN_FRAMES_FOR_BASELINE_FINALIZATION: u64 = 10;

/// Bound on recent payload-hash history kept per tracked ID.
pub const MAX_PAYLOAD_HASH_HISTORY: usize = 1000;

/// Bound on historical frame sequences kept per tracked ID (sequence replay).
pub const MAX_HISTORICAL_SEQUENCES: usize = 1000;

/// Default max number of CAN IDs tracked by the state manager before LRU
/// eviction kicks in.
pub const DEFAULT_MAX_TRACKED_IDS: usize = 5000;
