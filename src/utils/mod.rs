//! Utilities module for logging, errors, metrics and formatting helpers

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{ExperimentError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{PhaseAccumulator, PhaseMetrics};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a metric that may be undefined (NaN) for table output
pub fn format_metric(value: f64) -> String {
    if value.is_finite() {
        format!("{:.4}", value)
    } else {
        "n/a".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_metric() {
        assert_eq!(format_metric(0.75), "0.7500");
        assert_eq!(format_metric(f64::NAN), "n/a");
    }
}
