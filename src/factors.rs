//! Confidence factors
//!
//! Each factor is a pure function returning a value in [0, 1]. Detectors combine them
//! with the explicit weighted sums at the bottom of this module, so tuning a weight never
//! touches a detection gate.

use std::f64::consts::TAU;

/// Exponential saturation: `1 - exp(-n / scale)`
///
/// Maps `n == scale` to ~63% and approaches 1.0 asymptotically. Non-decreasing in `n`.
pub fn saturating_count(n: usize, scale: f64) -> f64 {
    if scale <= 0.0 {
        return if n > 0 { 1.0 } else { 0.0 };
    }
    (1.0 - (-(n as f64) / scale).exp()).clamp(0.0, 1.0)
}

/// Time-of-day regularity as the mean resultant length of circular angles
///
/// Each time is mapped onto the 24h circle so 23:50 and 00:10 count as close.
/// Result: 1.0 = always the same time, ~0.0 = times spread around the clock.
/// Fewer than two observations carry no regularity evidence.
pub fn time_of_day_regularity(minutes_of_day: &[u32]) -> f64 {
    if minutes_of_day.len() < 2 {
        return 0.0;
    }

    let n = minutes_of_day.len() as f64;
    let (sum_cos, sum_sin) = minutes_of_day.iter().fold((0.0, 0.0), |(c, s), &m| {
        let angle = TAU * (m as f64) / 1440.0;
        (c + angle.cos(), s + angle.sin())
    });

    ((sum_cos.powi(2) + sum_sin.powi(2)).sqrt() / n).clamp(0.0, 1.0)
}

/// Weighted mean of per-group values; `(weight, value)` pairs with zero total weight give 0
pub fn weighted_mean(groups: &[(usize, f64)]) -> f64 {
    let total: usize = groups.iter().map(|(w, _)| w).sum();
    if total == 0 {
        return 0.0;
    }
    let sum: f64 = groups.iter().map(|(w, v)| *w as f64 * v).sum();
    (sum / total as f64).clamp(0.0, 1.0)
}

/// Herfindahl index over group counts
///
/// 1.0 when a single group holds everything, 1/k for k equal groups.
pub fn herfindahl_concentration(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .map(|&c| (c as f64 / total as f64).powi(2))
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Share of `part` in `total`
pub fn share(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64).clamp(0.0, 1.0)
}

/// Degree of clustering among late-night purchases
///
/// Formula: `0.4 * clustered_share + 0.4 * min(largest / gate, 1) + 0.2 * tightness`
/// where `tightness` is how far below the gap threshold the in-cluster gaps sit.
pub fn clustering_factor(
    clustered_members: usize,
    total: usize,
    largest_cluster: usize,
    cluster_gate: usize,
    tightness: f64,
) -> f64 {
    let largest = if cluster_gate == 0 {
        0.0
    } else {
        (largest_cluster as f64 / cluster_gate as f64).min(1.0)
    };
    (0.4 * share(clustered_members, total) + 0.4 * largest + 0.2 * tightness.clamp(0.0, 1.0))
        .clamp(0.0, 1.0)
}

/// Tightness of a cluster: `1 - mean_gap / max_gap`, 0 for singletons
pub fn cluster_tightness(span_minutes: i64, size: usize, max_gap_minutes: i64) -> f64 {
    if size < 2 || max_gap_minutes <= 0 {
        return 0.0;
    }
    let mean_gap = span_minutes.max(0) as f64 / (size - 1) as f64;
    (1.0 - mean_gap / max_gap_minutes as f64).clamp(0.0, 1.0)
}

/// Amount relative to a reference: `amount / (amount + reference)`
pub fn amount_factor(amount: f64, reference: f64) -> f64 {
    if !amount.is_finite() || amount <= 0.0 || reference <= 0.0 {
        return 0.0;
    }
    (amount / (amount + reference)).clamp(0.0, 1.0)
}

/// Magnitude of a late-month spike from the mean late/early ratio of spiking months
///
/// Formula: `1 - exp(-(ratio - 1))`; a ratio of 1 (flat) is 0.
pub fn spike_magnitude(mean_ratio: f64) -> f64 {
    if !mean_ratio.is_finite() || mean_ratio <= 1.0 {
        return 0.0;
    }
    (1.0 - (-(mean_ratio - 1.0)).exp()).clamp(0.0, 1.0)
}

/// Historical depth from the number of covered months (3 months -> ~63%)
pub fn history_depth(covered_months: usize) -> f64 {
    saturating_count(covered_months, 3.0)
}

/// Small recurring: `0.40 * count + 0.30 * regularity + 0.30 * concentration`
pub fn small_recurring_confidence(count: f64, regularity: f64, concentration: f64) -> f64 {
    (0.40 * count + 0.30 * regularity + 0.30 * concentration).clamp(0.0, 1.0)
}

/// Stress spending: `0.40 * count + 0.35 * clustering + 0.25 * comfort_overlap`
pub fn stress_confidence(count: f64, clustering: f64, comfort_overlap: f64) -> f64 {
    (0.40 * count + 0.35 * clustering + 0.25 * comfort_overlap).clamp(0.0, 1.0)
}

/// End of month: `0.50 * recurrence + 0.30 * magnitude + 0.20 * depth`
pub fn end_of_month_confidence(recurrence: f64, magnitude: f64, depth: f64) -> f64 {
    (0.50 * recurrence + 0.30 * magnitude + 0.20 * depth).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_count() {
        assert_eq!(saturating_count(0, 15.0), 0.0);
        assert!((saturating_count(15, 15.0) - 0.632).abs() < 0.01);
        assert!(saturating_count(200, 15.0) > 0.99);
        assert_eq!(saturating_count(3, 0.0), 1.0);
    }

    #[test]
    fn test_saturating_count_is_monotonic() {
        let mut previous = 0.0;
        for n in 0..100 {
            let value = saturating_count(n, 15.0);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_regularity_same_time_is_one() {
        assert!((time_of_day_regularity(&[480, 480, 480, 480]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_regularity_wraps_midnight() {
        // 23:50 and 00:10 are 20 minutes apart on the circle
        let across_midnight = time_of_day_regularity(&[1430, 10]);
        assert!(across_midnight > 0.99);
    }

    #[test]
    fn test_regularity_scattered_is_low() {
        let scattered: Vec<u32> = (0..24).map(|h| h * 60).collect();
        assert!(time_of_day_regularity(&scattered) < 0.01);
        assert_eq!(time_of_day_regularity(&[600]), 0.0);
        assert_eq!(time_of_day_regularity(&[]), 0.0);
    }

    #[test]
    fn test_herfindahl() {
        assert_eq!(herfindahl_concentration(&[]), 0.0);
        assert!((herfindahl_concentration(&[20]) - 1.0).abs() < 1e-9);
        assert!((herfindahl_concentration(&[5, 5, 5, 5]) - 0.25).abs() < 1e-9);
        assert!(herfindahl_concentration(&[17, 1, 1, 1]) > herfindahl_concentration(&[5, 5, 5, 5]));
    }

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean(&[]), 0.0);
        assert!((weighted_mean(&[(3, 1.0), (1, 0.0)]) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_cluster_tightness() {
        assert_eq!(cluster_tightness(0, 1, 120), 0.0);
        assert!((cluster_tightness(60, 5, 120) - 0.875).abs() < 1e-9);
        assert_eq!(cluster_tightness(480, 3, 120), 0.0);
    }

    #[test]
    fn test_clustering_factor_prefers_bigger_bursts() {
        let small = clustering_factor(2, 10, 2, 4, 0.5);
        let large = clustering_factor(8, 10, 8, 4, 0.5);
        assert!(large > small);
        assert!(clustering_factor(10, 10, 10, 4, 1.0) <= 1.0);
    }

    #[test]
    fn test_amount_factor() {
        assert_eq!(amount_factor(0.0, 50.0), 0.0);
        assert!((amount_factor(50.0, 50.0) - 0.5).abs() < 1e-9);
        assert_eq!(amount_factor(f64::NAN, 50.0), 0.0);
    }

    #[test]
    fn test_spike_magnitude() {
        assert_eq!(spike_magnitude(1.0), 0.0);
        assert_eq!(spike_magnitude(0.5), 0.0);
        assert!(spike_magnitude(3.0) > spike_magnitude(1.5));
    }

    #[test]
    fn test_confidence_weights_sum_to_one() {
        assert!((small_recurring_confidence(1.0, 1.0, 1.0) - 1.0).abs() < 1e-9);
        assert!((stress_confidence(1.0, 1.0, 1.0) - 1.0).abs() < 1e-9);
        assert!((end_of_month_confidence(1.0, 1.0, 1.0) - 1.0).abs() < 1e-9);
        assert_eq!(small_recurring_confidence(0.0, 0.0, 0.0), 0.0);
        assert!((stress_confidence(1.0, 0.0, 0.0) - 0.40).abs() < 1e-9);
        assert!((end_of_month_confidence(1.0, 0.0, 0.0) - 0.50).abs() < 1e-9);
    }
}
