//! Detection configuration
//!
//! Thresholds and category lists are threaded explicitly into every detector so each
//! one can be tested with varied settings and shared safely across threads.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::DetectionError;
use crate::primitives::category::normalize_key;

/// Most past months an End-of-Month run may be asked to compare
pub const MAX_MONTHS_BACK: u32 = 120;

/// Late-night window in local hours. `start_hour` is inclusive, `end_hour` exclusive;
/// the window wraps past midnight when `start_hour > end_hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateNightWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for LateNightWindow {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 2,
        }
    }
}

/// Tunable settings for all detectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    // Small recurring purchases
    /// Purchases strictly below this absolute amount are "small"
    pub small_purchase_threshold: f64,
    /// Minimum qualifying small purchases before detection is possible
    pub min_transaction_gate: usize,
    /// Trailing window for the small-recurring and stress detectors
    pub lookback_days: u32,
    /// Minimum purchases for a merchant or category to earn its own signal
    pub min_merchant_occurrences: usize,

    // Stress spending
    pub late_night_window: LateNightWindow,
    /// Maximum gap between consecutive purchases in the same cluster
    pub cluster_gap_minutes: i64,
    /// Late-night purchases needed to detect on volume alone
    pub stress_min_late_night_count: usize,
    /// Cluster size needed to detect on a single burst alone
    pub stress_min_cluster_size: usize,
    /// Categories associated with emotional or impulse purchasing
    pub comfort_categories: Vec<String>,
    /// Weight applied to non-comfort late-night purchases (comfort = 1.0)
    pub non_comfort_weight: f64,

    // End-of-month collapse
    /// Last day of the "early" window; later days form the "late" window
    pub early_month_cutoff_day: u32,
    /// Months compared when the caller does not specify
    pub default_months_back: u32,
    /// Covered months needed before detection is possible
    pub min_history_months: u32,
    /// Late/early daily spending ratio that marks a spike month
    pub late_spike_ratio: f64,
    /// Share of covered months that must spike
    pub min_recurrence_ratio: f64,
    /// How far into a month history may start while the month still counts as covered
    pub month_coverage_grace_days: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            small_purchase_threshold: 15.0,
            min_transaction_gate: 15,
            lookback_days: 30,
            min_merchant_occurrences: 3,
            late_night_window: LateNightWindow::default(),
            cluster_gap_minutes: 120,
            stress_min_late_night_count: 6,
            stress_min_cluster_size: 4,
            comfort_categories: default_comfort_categories(),
            non_comfort_weight: 0.5,
            early_month_cutoff_day: 20,
            default_months_back: 3,
            min_history_months: 2,
            late_spike_ratio: 1.5,
            min_recurrence_ratio: 0.5,
            month_coverage_grace_days: 7,
        }
    }
}

fn default_comfort_categories() -> Vec<String> {
    [
        "food_delivery",
        "fast_food",
        "restaurants",
        "takeout",
        "entertainment",
        "streaming",
        "games",
        "gaming",
        "shopping",
        "online_shopping",
        "alcohol",
        "bars",
        "snacks",
        "convenience",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl DetectionConfig {
    /// Load configuration from a JSON string; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self, DetectionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, DetectionError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            DetectionError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, DetectionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject a months-back request beyond [`MAX_MONTHS_BACK`]
    pub fn validate_months_back(months_back: u32) -> Result<(), DetectionError> {
        if months_back > MAX_MONTHS_BACK {
            return Err(DetectionError::InvalidConfig(format!(
                "months_back must be at most {}, got {}",
                MAX_MONTHS_BACK, months_back
            )));
        }
        Ok(())
    }

    /// Reject settings no detector can operate under
    pub fn validate(&self) -> Result<(), DetectionError> {
        let invalid = |msg: String| Err(DetectionError::InvalidConfig(msg));

        if !self.small_purchase_threshold.is_finite() || self.small_purchase_threshold <= 0.0 {
            return invalid(format!(
                "small_purchase_threshold must be positive, got {}",
                self.small_purchase_threshold
            ));
        }
        if self.min_transaction_gate == 0 {
            return invalid("min_transaction_gate must be at least 1".to_string());
        }
        if self.lookback_days == 0 {
            return invalid("lookback_days must be at least 1".to_string());
        }
        if self.late_night_window.start_hour > 23 || self.late_night_window.end_hour > 23 {
            return invalid(format!(
                "late_night_window hours must be 0-23, got {}-{}",
                self.late_night_window.start_hour, self.late_night_window.end_hour
            ));
        }
        if self.late_night_window.start_hour == self.late_night_window.end_hour {
            return invalid("late_night_window must not be empty".to_string());
        }
        if self.cluster_gap_minutes <= 0 {
            return invalid("cluster_gap_minutes must be positive".to_string());
        }
        if self.stress_min_late_night_count == 0 || self.stress_min_cluster_size < 2 {
            return invalid(
                "stress gates need a late-night count >= 1 and a cluster size >= 2".to_string(),
            );
        }
        if !(0.0..=1.0).contains(&self.non_comfort_weight) {
            return invalid(format!(
                "non_comfort_weight must be within 0-1, got {}",
                self.non_comfort_weight
            ));
        }
        if !(1..=27).contains(&self.early_month_cutoff_day) {
            return invalid(format!(
                "early_month_cutoff_day must be within 1-27, got {}",
                self.early_month_cutoff_day
            ));
        }
        Self::validate_months_back(self.default_months_back)?;
        if self.min_history_months < 2 {
            return invalid("min_history_months must be at least 2".to_string());
        }
        if !self.late_spike_ratio.is_finite() || self.late_spike_ratio <= 1.0 {
            return invalid(format!(
                "late_spike_ratio must be greater than 1, got {}",
                self.late_spike_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.min_recurrence_ratio) {
            return invalid(format!(
                "min_recurrence_ratio must be within 0-1, got {}",
                self.min_recurrence_ratio
            ));
        }

        Ok(())
    }

    /// Comfort categories as normalized keys
    pub fn comfort_keys(&self) -> Vec<String> {
        self.comfort_categories
            .iter()
            .filter_map(|c| normalize_key(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = DetectionConfig::from_json(r#"{"small_purchase_threshold": 10.0}"#).unwrap();
        assert_eq!(config.small_purchase_threshold, 10.0);
        assert_eq!(config.lookback_days, 30);
        assert_eq!(config.late_night_window, LateNightWindow::default());
    }

    #[test]
    fn test_json_round_trip() {
        let config = DetectionConfig {
            early_month_cutoff_day: 18,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(DetectionConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            r#"{"small_purchase_threshold": 0.0}"#,
            r#"{"min_transaction_gate": 0}"#,
            r#"{"late_night_window": {"start_hour": 25, "end_hour": 2}}"#,
            r#"{"late_night_window": {"start_hour": 3, "end_hour": 3}}"#,
            r#"{"early_month_cutoff_day": 31}"#,
            r#"{"late_spike_ratio": 0.9}"#,
            r#"{"min_history_months": 1}"#,
            r#"{"stress_min_cluster_size": 1}"#,
            r#"{"default_months_back": 121}"#,
        ];

        for json in cases {
            assert!(
                matches!(
                    DetectionConfig::from_json(json),
                    Err(DetectionError::InvalidConfig(_))
                ),
                "expected rejection for {}",
                json
            );
        }
    }

    #[test]
    fn test_months_back_upper_bound() {
        assert!(DetectionConfig::validate_months_back(0).is_ok());
        assert!(DetectionConfig::validate_months_back(MAX_MONTHS_BACK).is_ok());
        let err = DetectionConfig::validate_months_back(200_000).unwrap_err();
        assert!(err.to_string().contains("at most 120"));
    }

    #[test]
    fn test_comfort_keys_are_normalized() {
        let config = DetectionConfig {
            comfort_categories: vec!["Food Delivery".to_string(), "  ".to_string()],
            ..Default::default()
        };
        assert_eq!(config.comfort_keys(), vec!["food_delivery".to_string()]);
    }
}
