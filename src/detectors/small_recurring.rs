//! Small Recurring Purchases detector
//!
//! Flags habitual low-value spending: many purchases under a small threshold, ideally
//! concentrated on a few merchants and happening at consistent times of day.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::DetectionConfig;
use crate::detectors::{expenses_in_window, Detector, LookbackWindow};
use crate::error::DetectionError;
use crate::factors::{
    herfindahl_concentration, saturating_count, share, small_recurring_confidence,
    time_of_day_regularity, weighted_mean,
};
use crate::primitives::{classify_time, minute_of_day};
use crate::types::{
    DetectionMetadata, DetectionResult, DetectorKind, Signal, TimeContext, Transaction,
};

/// Heuristic set version, bumped on any threshold or logic change
pub const ALGORITHM_VERSION: &str = "1.0.0";

/// Minimum share of qualifying purchases a category needs for its own signal
const CATEGORY_SIGNAL_MIN_SHARE: f64 = 0.25;

/// Small recurring purchase detector
pub struct SmallRecurringDetector {
    config: DetectionConfig,
    clock: Arc<dyn Clock>,
}

impl Default for SmallRecurringDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl SmallRecurringDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DetectionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

/// Purchases sharing a merchant or category key
struct Group<'a> {
    key: String,
    members: Vec<&'a Transaction>,
}

impl<'a> Group<'a> {
    fn total_amount(&self) -> f64 {
        self.members.iter().map(|t| t.magnitude()).sum()
    }

    fn minutes(&self) -> Vec<u32> {
        self.members
            .iter()
            .filter_map(|t| t.transaction_time)
            .map(minute_of_day)
            .collect()
    }
}

fn group_by<'a, F>(transactions: &[&'a Transaction], key_fn: F) -> (Vec<Group<'a>>, usize)
where
    F: Fn(&Transaction) -> Option<String>,
{
    let mut groups: BTreeMap<String, Vec<&'a Transaction>> = BTreeMap::new();
    let mut unattributed = 0;

    for &tx in transactions {
        match key_fn(tx) {
            Some(key) => groups.entry(key).or_default().push(tx),
            None => unattributed += 1,
        }
    }

    let mut groups: Vec<Group<'a>> = groups
        .into_iter()
        .map(|(key, members)| Group { key, members })
        .collect();
    // Largest first; BTreeMap order breaks ties by key
    groups.sort_by(|a, b| b.members.len().cmp(&a.members.len()));

    (groups, unattributed)
}

impl SmallRecurringDetector {
    fn dominant_context(&self, transactions: &[&Transaction]) -> TimeContext {
        let (mut late, mut day) = (0usize, 0usize);
        for tx in transactions {
            match classify_time(tx.transaction_time, &self.config.late_night_window) {
                TimeContext::LateNight => late += 1,
                TimeContext::Daytime => day += 1,
                _ => {}
            }
        }
        if late == 0 && day == 0 {
            TimeContext::Unknown
        } else if late > day {
            TimeContext::LateNight
        } else {
            TimeContext::Daytime
        }
    }

    /// Strength grows with the group's share of count or amount, then with regularity
    fn group_strength(&self, group: &Group<'_>, total_count: usize, total_amount: f64) -> f64 {
        let count_share = share(group.members.len(), total_count);
        let amount_share = if total_amount > 0.0 {
            (group.total_amount() / total_amount).clamp(0.0, 1.0)
        } else {
            0.0
        };
        0.7 * count_share.max(amount_share) + 0.3 * time_of_day_regularity(&group.minutes())
    }
}

fn dominant_category(members: &[&Transaction]) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in members.iter().filter_map(|t| t.category_key()) {
        *counts.entry(key).or_default() += 1;
    }
    // max_by_key keeps the last maximum; iterate in reverse so ties go to the smallest key
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(key, _)| key)
}

impl Detector for SmallRecurringDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SmallRecurring
    }

    fn name(&self) -> &'static str {
        "Small Recurring Purchases"
    }

    fn detect(&self, transactions: &[Transaction]) -> Result<DetectionResult, DetectionError> {
        self.config.validate()?;

        let run_timestamp = self.clock.now();
        let window = LookbackWindow::trailing(self.clock.today(), self.config.lookback_days);

        let qualifying: Vec<&Transaction> = expenses_in_window(transactions, &window)
            .into_iter()
            .filter(|t| t.magnitude() < self.config.small_purchase_threshold)
            .collect();

        let metadata = DetectionMetadata::new(
            ALGORITHM_VERSION,
            qualifying.len(),
            self.config.lookback_days,
            run_timestamp,
        );

        if qualifying.len() < self.config.min_transaction_gate {
            debug!(
                detector = DetectorKind::SmallRecurring.as_str(),
                qualifying = qualifying.len(),
                gate = self.config.min_transaction_gate,
                "Below minimum sample size"
            );
            return Ok(DetectionResult::not_detected(metadata));
        }

        let total_count = qualifying.len();
        let total_amount: f64 = qualifying.iter().map(|t| t.magnitude()).sum();
        let (merchants, unattributed) = group_by(&qualifying, Transaction::merchant_key);
        let (categories, _) = group_by(&qualifying, Transaction::category_key);

        // Factor: sample size relative to the gate
        let count = saturating_count(total_count, self.config.min_transaction_gate as f64);

        // Factor: same merchant, same time of day
        let regularity = weighted_mean(
            &merchants
                .iter()
                .map(|g| g.minutes())
                .filter(|m| m.len() >= 2)
                .map(|m| (m.len(), time_of_day_regularity(&m)))
                .collect::<Vec<_>>(),
        );

        // Factor: few merchants carrying most of the spend; unknown merchants are singletons
        let mut merchant_counts: Vec<usize> = merchants.iter().map(|g| g.members.len()).collect();
        merchant_counts.extend(std::iter::repeat(1).take(unattributed));
        let concentration = herfindahl_concentration(&merchant_counts);

        let confidence = small_recurring_confidence(count, regularity, concentration);

        let mut signals = vec![Signal::new(
            "small_purchase_volume",
            count,
            self.dominant_context(&qualifying),
        )];

        for group in merchants
            .iter()
            .filter(|g| g.members.len() >= self.config.min_merchant_occurrences)
        {
            signals.push(
                Signal::new(
                    "frequent_small_purchase",
                    self.group_strength(group, total_count, total_amount),
                    self.dominant_context(&group.members),
                )
                .with_category(dominant_category(&group.members)),
            );
        }

        for group in categories.iter().filter(|g| {
            g.members.len() >= self.config.min_merchant_occurrences
                && share(g.members.len(), total_count) >= CATEGORY_SIGNAL_MIN_SHARE
        }) {
            signals.push(
                Signal::new(
                    "small_purchase_category",
                    self.group_strength(group, total_count, total_amount),
                    self.dominant_context(&group.members),
                )
                .with_category(Some(group.key.clone())),
            );
        }

        debug!(
            detector = DetectorKind::SmallRecurring.as_str(),
            qualifying = total_count,
            merchants = merchants.len(),
            regularity,
            concentration,
            confidence,
            "Small recurring purchases detected"
        );

        Ok(DetectionResult::detected(confidence, signals, metadata))
    }
}
