use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IatStats {
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntropyStats {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

/// Classification of one byte position's behavior across the learning
/// window, in the same strict precedence order the classifier checks them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ByteProfile {
    Static { value: u8 },
    Variable {
        observed: Vec<u8>,
        value_range: Option<(u8, u8)>,
        top_common: Vec<u8>,
    },
    Counter {
        step: u8,
        min: u8,
        max: u8,
        rollover_detected: bool,
        initial_value: u8,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PayloadPatterns {
    pub unique_payload_ratio: f64,
    pub is_mostly_static: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeriodicityBaseline {
    pub dominant_periods: Vec<f64>,
    pub period_tolerance: f64,
    pub periodicity_score: f64,
    pub is_periodic: bool,
    pub payload_patterns: PayloadPatterns,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub iat: IatStats,
    pub learned_dlcs: Vec<u8>,
    pub entropy: EntropyStats,
    pub byte_behavior_profiles: Vec<ByteProfile>,
    pub periodicity: PeriodicityBaseline,
}
