//! Stress Spending detector
//!
//! Flags late-night spending, weighted toward comfort categories and bursts of several
//! purchases in a short span on the same night.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::DetectionConfig;
use crate::detectors::{expenses_in_window, Detector, LookbackWindow};
use crate::error::DetectionError;
use crate::factors::{
    amount_factor, cluster_tightness, clustering_factor, saturating_count, share,
    stress_confidence, weighted_mean,
};
use crate::primitives::{classify_time, cluster_timestamps, largest_cluster_size, ComfortClassifier};
use crate::types::{
    DetectionMetadata, DetectionResult, DetectorKind, Signal, TimeContext, Transaction,
};

/// Heuristic set version, bumped on any threshold or logic change
pub const ALGORITHM_VERSION: &str = "1.0.0";

/// Purchase amount that contributes half of the amount factor
const REFERENCE_AMOUNT: f64 = 50.0;

/// Late-night stress spending detector
pub struct StressSpendingDetector {
    config: DetectionConfig,
    clock: Arc<dyn Clock>,
}

impl Default for StressSpendingDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl StressSpendingDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DetectionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Strength formula: `0.5 * category_weight + 0.3 * cluster_factor + 0.2 * amount_factor`
    fn signal_strength(&self, comfort: bool, cluster_size: usize, amount: f64) -> f64 {
        let category_weight = if comfort {
            1.0
        } else {
            self.config.non_comfort_weight
        };
        let cluster = if cluster_size >= 2 {
            (cluster_size as f64 / self.config.stress_min_cluster_size as f64).min(1.0)
        } else {
            0.0
        };
        0.5 * category_weight + 0.3 * cluster + 0.2 * amount_factor(amount, REFERENCE_AMOUNT)
    }
}

impl Detector for StressSpendingDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::StressSpending
    }

    fn name(&self) -> &'static str {
        "Stress Spending"
    }

    fn detect(&self, transactions: &[Transaction]) -> Result<DetectionResult, DetectionError> {
        self.config.validate()?;

        let run_timestamp = self.clock.now();
        let window = LookbackWindow::trailing(self.clock.today(), self.config.lookback_days);
        let eligible = expenses_in_window(transactions, &window);

        // Counts all in-window expenses; the late-night subset is filtered below
        let metadata = DetectionMetadata::new(
            ALGORITHM_VERSION,
            eligible.len(),
            self.config.lookback_days,
            run_timestamp,
        );

        // Unknown times are daytime here
        let mut late: Vec<(NaiveDateTime, &Transaction)> = eligible
            .iter()
            .filter(|t| {
                classify_time(t.transaction_time, &self.config.late_night_window)
                    == TimeContext::LateNight
            })
            .filter_map(|t| t.timestamp().map(|ts| (ts, *t)))
            .collect();
        late.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let timestamps: Vec<NaiveDateTime> = late.iter().map(|(ts, _)| *ts).collect();
        let max_gap = Duration::minutes(self.config.cluster_gap_minutes);
        let clusters = cluster_timestamps(&timestamps, max_gap);
        let largest = largest_cluster_size(&clusters);

        let volume_gate = late.len() >= self.config.stress_min_late_night_count;
        let burst_gate = largest >= self.config.stress_min_cluster_size;

        if !volume_gate && !burst_gate {
            debug!(
                detector = DetectorKind::StressSpending.as_str(),
                late_night = late.len(),
                largest_cluster = largest,
                "No late-night pattern"
            );
            return Ok(DetectionResult::not_detected(metadata));
        }

        let mut cluster_size_of = vec![1usize; late.len()];
        for cluster in &clusters {
            for slot in &mut cluster_size_of[cluster.start_index..cluster.start_index + cluster.size]
            {
                *slot = cluster.size;
            }
        }

        let classifier = ComfortClassifier::from_config(&self.config);
        let mut comfort_count = 0;
        let mut signals = Vec::with_capacity(late.len());

        for ((_, tx), &cluster_size) in late.iter().zip(&cluster_size_of) {
            let category = tx.category_key();
            let comfort = classifier.is_comfort(category.as_deref());
            if comfort {
                comfort_count += 1;
            }

            let reason = if cluster_size >= self.config.stress_min_cluster_size {
                "late_night_cluster"
            } else if comfort {
                "late_night_comfort_purchase"
            } else {
                "late_night_purchase"
            };

            signals.push(
                Signal::new(
                    reason,
                    self.signal_strength(comfort, cluster_size, tx.magnitude()),
                    TimeContext::LateNight,
                )
                .with_category(category)
                .with_transaction(tx.id.clone()),
            );
        }

        let bursts: Vec<_> = clusters.iter().filter(|c| c.size >= 2).collect();
        let clustered_members: usize = bursts.iter().map(|c| c.size).sum();
        let tightness = weighted_mean(
            &bursts
                .iter()
                .map(|c| {
                    (
                        c.size,
                        cluster_tightness(
                            c.span().num_minutes(),
                            c.size,
                            self.config.cluster_gap_minutes,
                        ),
                    )
                })
                .collect::<Vec<_>>(),
        );

        let count = saturating_count(late.len(), self.config.stress_min_late_night_count as f64);
        let clustering = clustering_factor(
            clustered_members,
            late.len(),
            largest,
            self.config.stress_min_cluster_size,
            tightness,
        );
        let comfort_overlap = share(comfort_count, late.len());
        let confidence = stress_confidence(count, clustering, comfort_overlap);

        debug!(
            detector = DetectorKind::StressSpending.as_str(),
            late_night = late.len(),
            largest_cluster = largest,
            comfort = comfort_count,
            confidence,
            "Stress spending detected"
        );

        Ok(DetectionResult::detected(confidence, signals, metadata))
    }
}
