//! Gap-based clustering of purchase timestamps
//!
//! Consecutive events no more than `max_gap` apart belong to the same cluster, which
//! separates bursts of spending from isolated purchases.

use chrono::{Duration, NaiveDateTime};

/// A run of events with no internal gap larger than the threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Index of the first member in the sorted input
    pub start_index: usize,
    /// Number of members
    pub size: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Cluster {
    /// Time between first and last member
    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the sorted-input index belongs to this cluster
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start_index && index < self.start_index + self.size
    }
}

/// Cluster timestamps. Input must be sorted ascending; every event lands in exactly one
/// cluster, so singletons are returned too.
pub fn cluster_timestamps(sorted: &[NaiveDateTime], max_gap: Duration) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for (index, &ts) in sorted.iter().enumerate() {
        match clusters.last_mut() {
            Some(current) if ts - current.end <= max_gap => {
                current.size += 1;
                current.end = ts;
            }
            _ => clusters.push(Cluster {
                start_index: index,
                size: 1,
                start: ts,
                end: ts,
            }),
        }
    }

    clusters
}

/// Size of the largest cluster, 0 for no events
pub fn largest_cluster_size(clusters: &[Cluster]) -> usize {
    clusters.iter().map(|c| c.size).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_timestamps(&[], Duration::minutes(120)).is_empty());
        assert_eq!(largest_cluster_size(&[]), 0);
    }

    #[test]
    fn test_burst_and_isolated_events() {
        let events = vec![
            at(1, 22, 0),
            at(1, 22, 40),
            at(1, 23, 30),
            at(2, 0, 50),
            at(5, 23, 0),
        ];
        let clusters = cluster_timestamps(&events, Duration::minutes(120));

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].size, 4);
        assert_eq!(clusters[0].span(), Duration::minutes(170));
        assert_eq!(clusters[1].size, 1);
        assert_eq!(clusters[1].start_index, 4);
        assert_eq!(largest_cluster_size(&clusters), 4);
    }

    #[test]
    fn test_cluster_crosses_midnight() {
        let events = vec![at(1, 23, 50), at(2, 0, 20)];
        let clusters = cluster_timestamps(&events, Duration::minutes(60));
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].contains(1));
        assert!(!clusters[0].contains(2));
    }

    #[test]
    fn test_gap_at_threshold_joins() {
        let events = vec![at(1, 20, 0), at(1, 22, 0)];
        assert_eq!(cluster_timestamps(&events, Duration::minutes(120)).len(), 1);
        assert_eq!(cluster_timestamps(&events, Duration::minutes(119)).len(), 2);
    }
}
