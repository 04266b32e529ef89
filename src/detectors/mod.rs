//! Behavioral spending detectors
//!
//! Each detector is a pure function of the transaction snapshot, its configuration and
//! the clock. Detectors share nothing mutable, so the aggregator can run them in
//! parallel.
//!
//! - **Small Recurring** - habitual low-value spending
//! - **Stress Spending** - late-night and clustered comfort spending
//! - **End of Month** - recurring late-month spending spikes

pub mod end_of_month;
pub mod small_recurring;
pub mod stress_spending;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::error::DetectionError;
use crate::types::{DetectionResult, DetectorKind, Transaction};

pub use end_of_month::EndOfMonthDetector;
pub use small_recurring::SmallRecurringDetector;
pub use stress_spending::StressSpendingDetector;

/// A behavioral pattern detector
pub trait Detector: Send + Sync {
    /// Which pattern this detector reports
    fn kind(&self) -> DetectorKind;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Analyze a transaction snapshot
    fn detect(&self, transactions: &[Transaction]) -> Result<DetectionResult, DetectionError>;
}

/// Detect small recurring purchases with default settings
pub fn detect_small_recurring(
    transactions: &[Transaction],
) -> Result<DetectionResult, DetectionError> {
    SmallRecurringDetector::default().detect(transactions)
}

/// Detect late-night stress spending with default settings
pub fn detect_stress_spending(
    transactions: &[Transaction],
) -> Result<DetectionResult, DetectionError> {
    StressSpendingDetector::default().detect(transactions)
}

/// Detect an end-of-month spending collapse over the given number of past months
pub fn detect_end_of_month_collapse(
    transactions: &[Transaction],
    months_back: u32,
) -> Result<DetectionResult, DetectionError> {
    EndOfMonthDetector::default()
        .with_months_back(months_back)
        .detect(transactions)
}

/// Trailing window of whole days ending today (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LookbackWindow {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
}

impl LookbackWindow {
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        Self {
            first_day: today - Duration::days(i64::from(days.max(1)) - 1),
            last_day: today,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_day && date <= self.last_day
    }
}

/// Expenses with an amount the heuristics can reason about.
///
/// A non-finite amount excludes only its own record; `TransactionAdapter::validate_transactions`
/// reports it by id.
pub(crate) fn finite_expenses<'a>(
    transactions: &'a [Transaction],
) -> impl Iterator<Item = &'a Transaction> + 'a {
    transactions
        .iter()
        .filter(|t| {
            let finite = t.amount.is_finite();
            if !finite {
                debug!(transaction_id = %t.id, amount = t.amount, "Skipping non-finite amount");
            }
            finite
        })
        .filter(|t| t.is_expense())
}

/// Dated expenses inside the window
pub(crate) fn expenses_in_window<'a>(
    transactions: &'a [Transaction],
    window: &LookbackWindow,
) -> Vec<&'a Transaction> {
    finite_expenses(transactions)
        .filter(|t| t.transaction_date.is_some_and(|d| window.contains(d)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_lookback_window_bounds() {
        let window = LookbackWindow::trailing(d(2024, 3, 30), 30);
        assert_eq!(window.first_day, d(2024, 3, 1));
        assert!(window.contains(d(2024, 3, 1)));
        assert!(window.contains(d(2024, 3, 30)));
        assert!(!window.contains(d(2024, 2, 29)));
        assert!(!window.contains(d(2024, 3, 31)));
    }

    #[test]
    fn test_expenses_in_window_skips_undated_and_income() {
        let window = LookbackWindow::trailing(d(2024, 3, 30), 30);
        let mut undated = Transaction::new("undated", -5.0, d(2024, 3, 10));
        undated.transaction_date = None;
        let transactions = vec![
            Transaction::new("expense", -5.0, d(2024, 3, 10)),
            Transaction::new("income", 500.0, d(2024, 3, 10)),
            Transaction::new("old", -5.0, d(2024, 1, 10)),
            undated,
        ];

        let expenses = expenses_in_window(&transactions, &window);
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].id, "expense");
    }

    #[test]
    fn test_non_finite_amounts_are_skipped_individually() {
        let window = LookbackWindow::trailing(d(2024, 3, 30), 30);
        let transactions = vec![
            Transaction::new("nan", f64::NAN, d(2024, 3, 10)),
            Transaction::new("neg-inf", f64::NEG_INFINITY, d(2024, 3, 11)),
            Transaction::new("inf", f64::INFINITY, d(2024, 3, 12)),
            Transaction::new("expense", -5.0, d(2024, 3, 12)),
        ];

        let ids: Vec<&str> = expenses_in_window(&transactions, &window)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["expense"]);
        assert_eq!(finite_expenses(&transactions).count(), 1);
    }
}
