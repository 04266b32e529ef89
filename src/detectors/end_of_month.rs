//! End-of-Month Collapse detector
//!
//! Compares early-month and late-month spending rates across several past calendar
//! months. A pattern is reported only when the late-month spike recurs; one heavy month
//! is never enough on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Months, NaiveDate};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::{DetectionConfig, MAX_MONTHS_BACK};
use crate::detectors::{finite_expenses, Detector};
use crate::error::DetectionError;
use crate::factors::{end_of_month_confidence, history_depth, share, spike_magnitude};
use crate::types::{
    BudgetContext, DetectionMetadata, DetectionResult, DetectorKind, Signal, TimeContext,
    Transaction,
};

/// Heuristic set version, bumped on any threshold or logic change
pub const ALGORITHM_VERSION: &str = "1.0.0";

/// Spiking months needed regardless of the recurrence ratio
const MIN_SPIKE_MONTHS: usize = 2;

/// Cap on the late/early ratio so a near-empty early window cannot dominate
const MAX_RATIO: f64 = 5.0;

/// Early vs late spending for one calendar month
#[derive(Debug, Clone, PartialEq)]
pub struct MonthSplit {
    pub month_start: NaiveDate,
    pub early_total: f64,
    pub late_total: f64,
    pub early_days: u32,
    pub late_days: u32,
    pub expense_count: usize,
    /// History reaches back far enough for this month to be compared
    pub covered: bool,
    late_by_category: BTreeMap<String, f64>,
}

impl MonthSplit {
    fn new(month_start: NaiveDate, cutoff_day: u32, covered: bool) -> Self {
        let days = days_in_month(month_start);
        let early_days = cutoff_day.min(days - 1);
        Self {
            month_start,
            early_total: 0.0,
            late_total: 0.0,
            early_days,
            late_days: days - early_days,
            expense_count: 0,
            covered,
            late_by_category: BTreeMap::new(),
        }
    }

    fn add(&mut self, tx: &Transaction, day: u32) {
        self.expense_count += 1;
        if day <= self.early_days {
            self.early_total += tx.magnitude();
        } else {
            self.late_total += tx.magnitude();
            if let Some(category) = tx.category_key() {
                *self.late_by_category.entry(category).or_default() += tx.magnitude();
            }
        }
    }

    /// Late-window daily rate over early-window daily rate, capped
    pub fn ratio(&self) -> f64 {
        let early_rate = self.early_total / f64::from(self.early_days);
        let late_rate = self.late_total / f64::from(self.late_days);
        if early_rate <= 0.0 {
            return if late_rate > 0.0 { MAX_RATIO } else { 1.0 };
        }
        (late_rate / early_rate).min(MAX_RATIO)
    }

    /// Category with the most late-window spend; ties go to the smallest key
    pub fn top_late_category(&self) -> Option<String> {
        self.late_by_category
            .iter()
            .rev()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k.clone())
    }

    fn has_data(&self) -> bool {
        self.covered && self.expense_count > 0
    }
}

/// Months since year zero, so consecutive calendar months differ by one
fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

fn days_in_month(month_start: NaiveDate) -> u32 {
    month_start
        .checked_add_months(Months::new(1))
        .map(|next| (next - month_start).num_days() as u32)
        .unwrap_or(30)
}

/// End-of-month collapse detector
pub struct EndOfMonthDetector {
    config: DetectionConfig,
    clock: Arc<dyn Clock>,
    months_back: u32,
    budgets: BudgetContext,
}

impl Default for EndOfMonthDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl EndOfMonthDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DetectionConfig, clock: Arc<dyn Clock>) -> Self {
        let months_back = config.default_months_back;
        Self {
            config,
            clock,
            months_back,
            budgets: BudgetContext::default(),
        }
    }

    /// Number of complete past months to compare
    pub fn with_months_back(mut self, months_back: u32) -> Self {
        self.months_back = months_back;
        self
    }

    /// Active budgets used to annotate recurring late-month categories
    pub fn with_budgets(mut self, budgets: BudgetContext) -> Self {
        self.budgets = budgets;
        self
    }

    /// Split the examined months. Returns the splits (oldest first) and the number of
    /// expenses that fell inside them.
    ///
    /// Months before the earliest usable record can never be covered, so the request
    /// is clamped to the span of the data and to [`MAX_MONTHS_BACK`].
    pub fn split_months(
        &self,
        transactions: &[Transaction],
        current_month_start: NaiveDate,
    ) -> (Vec<MonthSplit>, usize) {
        let history_start = transactions
            .iter()
            .filter(|t| t.amount.is_finite())
            .filter_map(|t| t.transaction_date)
            .min();
        let Some(history_start) = history_start else {
            return (Vec::new(), 0);
        };
        let grace = chrono::Duration::days(i64::from(self.config.month_coverage_grace_days));

        let span = (month_index(current_month_start) - month_index(history_start)).max(0);
        let months = i64::from(self.months_back.min(MAX_MONTHS_BACK)).min(span) as u32;

        let mut splits: Vec<MonthSplit> = (1..=months)
            .rev()
            .filter_map(|i| current_month_start.checked_sub_months(Months::new(i)))
            .map(|month_start| {
                let covered = history_start <= month_start + grace;
                MonthSplit::new(month_start, self.config.early_month_cutoff_day, covered)
            })
            .collect();

        let Some(first_index) = splits.first().map(|s| month_index(s.month_start)) else {
            return (splits, 0);
        };

        let mut analyzed = 0;
        for tx in finite_expenses(transactions) {
            let Some(date) = tx.transaction_date else {
                continue;
            };
            if date >= current_month_start {
                continue;
            }
            let offset = month_index(date) - first_index;
            if offset < 0 {
                continue;
            }
            if let Some(split) = splits.get_mut(offset as usize) {
                split.add(tx, date.day());
                analyzed += 1;
            }
        }

        (splits, analyzed)
    }
}

impl Detector for EndOfMonthDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::EndOfMonth
    }

    fn name(&self) -> &'static str {
        "End-of-Month Collapse"
    }

    fn detect(&self, transactions: &[Transaction]) -> Result<DetectionResult, DetectionError> {
        self.config.validate()?;

        let run_timestamp = self.clock.now();
        let today = self.clock.today();
        let current_month_start = today.with_day(1).unwrap_or(today);

        let (splits, analyzed) = self.split_months(transactions, current_month_start);
        let time_range_days = splits
            .first()
            .map(|s| (current_month_start - s.month_start).num_days() as u32)
            .unwrap_or(0);

        let mut metadata =
            DetectionMetadata::new(ALGORITHM_VERSION, analyzed, time_range_days, run_timestamp);

        let covered: Vec<&MonthSplit> = splits.iter().filter(|s| s.has_data()).collect();
        let spikes: Vec<&MonthSplit> = covered
            .iter()
            .copied()
            .filter(|s| s.ratio() >= self.config.late_spike_ratio)
            .collect();
        let recurrence = share(spikes.len(), covered.len());

        let detected = covered.len() >= self.config.min_history_months as usize
            && spikes.len() >= MIN_SPIKE_MONTHS
            && recurrence >= self.config.min_recurrence_ratio;

        if !detected {
            debug!(
                detector = DetectorKind::EndOfMonth.as_str(),
                covered_months = covered.len(),
                spike_months = spikes.len(),
                "No recurring late-month spike"
            );
            return Ok(DetectionResult::not_detected(metadata));
        }

        let mean_ratio = spikes.iter().map(|s| s.ratio()).sum::<f64>() / spikes.len() as f64;
        let confidence = end_of_month_confidence(
            recurrence,
            spike_magnitude(mean_ratio),
            history_depth(covered.len()),
        );

        let mut signals: Vec<Signal> = spikes
            .iter()
            .map(|s| {
                Signal::new("late_month_spike", 1.0 - 1.0 / s.ratio(), TimeContext::EndOfMonth)
                    .with_category(s.top_late_category())
            })
            .collect();

        if !self.budgets.is_empty() {
            let mut recurring: BTreeMap<String, usize> = BTreeMap::new();
            for category in spikes.iter().filter_map(|s| s.top_late_category()) {
                *recurring.entry(category).or_default() += 1;
            }
            for (category, months) in recurring {
                if months >= MIN_SPIKE_MONTHS && self.budgets.covers(&category) {
                    signals.push(
                        Signal::new(
                            "late_month_budget_category",
                            share(months, spikes.len()),
                            TimeContext::EndOfMonth,
                        )
                        .with_category(Some(category.clone())),
                    );
                    metadata.budget_categories.push(category);
                }
            }
        }

        debug!(
            detector = DetectorKind::EndOfMonth.as_str(),
            covered_months = covered.len(),
            spike_months = spikes.len(),
            mean_ratio,
            confidence,
            "End-of-month spike detected"
        );

        Ok(DetectionResult::detected(confidence, signals, metadata))
    }
}
