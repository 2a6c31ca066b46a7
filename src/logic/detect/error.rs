use std::fmt;

/// A detector failure for a single frame. The pipeline logs these and
/// moves on rather than aborting the run (§7 DetectorError handling).
#[derive(Debug)]
pub struct DetectorError {
    pub detector: &'static str,
    pub message: String,
}

impl DetectorError {
    pub fn new(detector: &'static str, message: impl Into<String>) -> Self {
        DetectorError { detector, message: message.into() }
    }
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} detector failed: {}", self.detector, self.message)
    }
}

impl std::error::Error for DetectorError {}
