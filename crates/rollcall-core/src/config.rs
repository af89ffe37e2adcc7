use crate::admission::{AdmissionWindow, WindowCheck, DEFAULT_MIN_CONFIDENCE};
use crate::confidence::DEFAULT_MATCH_THRESHOLD;
use crate::scheduler::DEFAULT_FRAME_STRIDE;
use chrono::NaiveTime;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("match threshold must be in (0, 1), got {0}")]
    MatchThreshold(f64),
    #[error("minimum confidence must be in [0, 100], got {0}")]
    MinConfidence(f64),
    #[error("frame stride must be at least 1")]
    FrameStride,
    #[error("invalid time of day {0:?} (expected HH:MM or HH:MM:SS)")]
    TimeOfDay(String),
}

/// Recognition and admission tuning for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Euclidean distance at or below which a query matches a catalog entry.
    pub match_threshold: f64,
    /// Confidence a match must strictly exceed to be admitted.
    pub min_confidence: f64,
    pub window: AdmissionWindow,
    pub window_check: WindowCheck,
    /// Run recognition on one frame in `frame_stride`.
    pub frame_stride: u32,
    /// Treat identities already recorded today as seen at session start.
    pub seed_seen_from_store: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            window: AdmissionWindow::default(),
            window_check: WindowCheck::default(),
            frame_stride: DEFAULT_FRAME_STRIDE,
            seed_seen_from_store: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold > 0.0 && self.match_threshold < 1.0) {
            return Err(ConfigError::MatchThreshold(self.match_threshold));
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(ConfigError::MinConfidence(self.min_confidence));
        }
        if self.frame_stride == 0 {
            return Err(ConfigError::FrameStride);
        }
        Ok(())
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| ConfigError::TimeOfDay(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let c = PipelineConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.min_confidence, 92.5);
        assert_eq!(c.frame_stride, 2);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        for t in [0.0, 1.0, -0.1, f64::NAN] {
            let c = PipelineConfig { match_threshold: t, ..Default::default() };
            assert!(matches!(c.validate(), Err(ConfigError::MatchThreshold(_))), "{t}");
        }
    }

    #[test]
    fn test_rejects_bad_confidence_and_stride() {
        let c = PipelineConfig { min_confidence: 101.0, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::MinConfidence(101.0)));
        let c = PipelineConfig { frame_stride: 0, ..Default::default() };
        assert_eq!(c.validate(), Err(ConfigError::FrameStride));
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("08:00").unwrap(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(
            parse_time_of_day(" 09:30:15 ").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 15).unwrap()
        );
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("nine").is_err());
    }
}
