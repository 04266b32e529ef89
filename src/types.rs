//! Core data types for spending pattern detection
//!
//! Transactions flow in from an external supply; detection results flow out to the
//! aggregator and its consumers. Everything here is transient and recomputed per call.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::primitives::category::normalize_key;

/// Kind of transaction as reported by the supply. Detection logic does not branch on it
/// except to keep transfers out of the expense set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Expense,
    Income,
    Transfer,
    Refund,
    Fee,
    #[serde(other)]
    Other,
}

/// A single transaction, externally owned and read-only to the engine.
///
/// Optional fields degrade detection richness, never correctness:
/// - `merchant_name` / `category_id` missing: the record still counts, but is not
///   attributed to a merchant or category signal
/// - `transaction_time` missing: time-of-day is `unknown`, treated as daytime
/// - `transaction_date` missing: the record cannot be placed in a window and is skipped
///
/// On input `transaction_date` accepts a calendar date (`2024-03-01`), a naive datetime
/// (`2024-03-01T23:30:00`) or an RFC 3339 timestamp (`2024-03-01T23:30:00Z`). A datetime
/// fills `transaction_time` unless the record also carries an explicit time. Output
/// always keeps date and time apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TransactionRecord")]
pub struct Transaction {
    /// Opaque unique identifier
    pub id: String,
    /// Signed amount; negative values are money leaving the account
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Local calendar date
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<NaiveDate>,
    /// Local wall-clock time, when the supply has hour resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<TransactionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Wire shape of a transaction as supplies send it
#[derive(Deserialize)]
struct TransactionRecord {
    id: String,
    amount: f64,
    #[serde(default, alias = "merchant")]
    merchant_name: Option<String>,
    #[serde(default, alias = "category")]
    category_id: Option<String>,
    #[serde(default, alias = "date", deserialize_with = "deserialize_when")]
    transaction_date: Option<(NaiveDate, Option<NaiveTime>)>,
    #[serde(default, alias = "time")]
    transaction_time: Option<NaiveTime>,
    #[serde(default)]
    transaction_type: Option<TransactionType>,
    #[serde(default)]
    source: Option<String>,
}

impl From<TransactionRecord> for Transaction {
    fn from(record: TransactionRecord) -> Self {
        let (date, time) = match record.transaction_date {
            Some((date, time)) => (Some(date), time),
            None => (None, None),
        };
        Self {
            id: record.id,
            amount: record.amount,
            merchant_name: record.merchant_name,
            category_id: record.category_id,
            transaction_date: date,
            transaction_time: record.transaction_time.or(time),
            transaction_type: record.transaction_type,
            source: record.source,
        }
    }
}

fn deserialize_when<'de, D>(
    deserializer: D,
) -> Result<Option<(NaiveDate, Option<NaiveTime>)>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_when(&raw).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// Parse a transaction date, keeping the time of day when the input has one.
///
/// RFC 3339 timestamps keep the wall-clock time of their own offset.
fn parse_when(raw: &str) -> Result<(NaiveDate, Option<NaiveTime>), String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok((date, None));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        let local = dt.naive_local();
        return Ok((local.date(), Some(local.time())));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|dt| (dt.date(), Some(dt.time())))
        .ok_or_else(|| format!("unrecognized transaction date: {}", raw))
}

impl Transaction {
    /// Create a dated transaction with no optional metadata
    pub fn new(id: impl Into<String>, amount: f64, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            amount,
            merchant_name: None,
            category_id: None,
            transaction_date: Some(date),
            transaction_time: None,
            transaction_type: None,
            source: None,
        }
    }

    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.transaction_time = Some(time);
        self
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant_name = Some(merchant.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category_id = Some(category.into());
        self
    }

    pub fn with_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = Some(transaction_type);
        self
    }

    /// Money leaving the account that is not a transfer between own accounts.
    /// A non-finite amount is never an expense.
    pub fn is_expense(&self) -> bool {
        self.amount.is_finite()
            && self.amount < 0.0
            && self.transaction_type != Some(TransactionType::Transfer)
    }

    /// Unsigned amount
    pub fn magnitude(&self) -> f64 {
        self.amount.abs()
    }

    /// Date and time combined, when both are known
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match (self.transaction_date, self.transaction_time) {
            (Some(date), Some(time)) => Some(date.and_time(time)),
            _ => None,
        }
    }

    /// Normalized merchant grouping key
    pub fn merchant_key(&self) -> Option<String> {
        self.merchant_name.as_deref().and_then(normalize_key)
    }

    /// Normalized category grouping key
    pub fn category_key(&self) -> Option<String> {
        self.category_id.as_deref().and_then(normalize_key)
    }
}

/// Time-of-day context attached to a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeContext {
    Daytime,
    LateNight,
    EndOfMonth,
    Unknown,
}

impl TimeContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeContext::Daytime => "daytime",
            TimeContext::LateNight => "late_night",
            TimeContext::EndOfMonth => "end_of_month",
            TimeContext::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One discrete piece of evidence supporting a detected pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Machine-readable tag naming the rule that fired
    pub detection_reason: String,
    /// Contribution of this piece of evidence (0.0 - 1.0)
    pub signal_strength: f64,
    pub time_context: TimeContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl Signal {
    /// Create a signal; strength is clamped into [0, 1]
    pub fn new(reason: impl Into<String>, strength: f64, time_context: TimeContext) -> Self {
        Self {
            detection_reason: reason.into(),
            signal_strength: clamp_unit(strength),
            time_context,
            category_id: None,
            transaction_id: None,
        }
    }

    pub fn with_category(mut self, category_id: Option<String>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// Provenance of a detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetadata {
    /// Semantic version of the detector's heuristic set
    pub algorithm_version: String,
    /// Transactions that survived the detector's input filters.
    ///
    /// The filters differ per detector:
    /// - Small Recurring: small expenses inside the lookback window
    /// - Stress Spending: every expense inside the lookback window, not only the
    ///   late-night subset the pattern is computed from
    /// - End-of-Month: expenses inside the examined months
    pub transactions_analyzed: usize,
    /// Length of the window actually examined
    pub time_range_days: u32,
    pub run_timestamp: DateTime<Utc>,
    /// Budgeted categories implicated by the pattern, when budget context was supplied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub budget_categories: Vec<String>,
}

impl DetectionMetadata {
    pub fn new(
        algorithm_version: &str,
        transactions_analyzed: usize,
        time_range_days: u32,
        run_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            algorithm_version: algorithm_version.to_string(),
            transactions_analyzed,
            time_range_days,
            run_timestamp,
            budget_categories: Vec::new(),
        }
    }
}

/// Output of a single detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    /// 0.0 whenever `detected` is false
    pub confidence: f64,
    /// Evidence in discovery order; empty when nothing was detected
    pub signals: Vec<Signal>,
    pub metadata: DetectionMetadata,
}

impl DetectionResult {
    /// A negative result: no detection, zero confidence, no signals
    pub fn not_detected(metadata: DetectionMetadata) -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            signals: Vec::new(),
            metadata,
        }
    }

    /// A positive result with clamped confidence
    pub fn detected(confidence: f64, signals: Vec<Signal>, metadata: DetectionMetadata) -> Self {
        Self {
            detected: true,
            confidence: clamp_unit(confidence),
            signals,
            metadata,
        }
    }
}

/// The detectors known to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    SmallRecurring,
    StressSpending,
    EndOfMonth,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 3] = [
        DetectorKind::SmallRecurring,
        DetectorKind::StressSpending,
        DetectorKind::EndOfMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::SmallRecurring => "small_recurring",
            DetectorKind::StressSpending => "stress_spending",
            DetectorKind::EndOfMonth => "end_of_month",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "small_recurring" => Ok(DetectorKind::SmallRecurring),
            "stress_spending" => Ok(DetectorKind::StressSpending),
            "end_of_month" => Ok(DetectorKind::EndOfMonth),
            _ => Err(format!("Unknown detector: {}", s)),
        }
    }
}

/// A budget the user currently has active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveBudget {
    pub category_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_limit: Option<f64>,
}

/// Optional budget context for interpretive color on end-of-month results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetContext {
    #[serde(default)]
    pub budgets: Vec<ActiveBudget>,
}

impl BudgetContext {
    pub fn new(budgets: Vec<ActiveBudget>) -> Self {
        Self { budgets }
    }

    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }

    /// Whether a normalized category key has an active budget
    pub fn covers(&self, category_key: &str) -> bool {
        self.budgets
            .iter()
            .filter_map(|b| normalize_key(&b.category_id))
            .any(|k| k == category_key)
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_deserialize_with_aliases() {
        let json = r#"{
            "id": "tx-1",
            "amount": -4.5,
            "merchant": "Blue Bottle",
            "category": "coffee",
            "date": "2024-03-02",
            "time": "08:15:00"
        }"#;

        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.merchant_name.as_deref(), Some("Blue Bottle"));
        assert_eq!(tx.category_id.as_deref(), Some("coffee"));
        assert_eq!(
            tx.timestamp().unwrap().to_string(),
            "2024-03-02 08:15:00"
        );
        assert!(tx.is_expense());
    }

    #[test]
    fn test_transaction_missing_optional_fields() {
        let tx: Transaction = serde_json::from_str(r#"{"id": "x", "amount": -3.0}"#).unwrap();
        assert!(tx.transaction_date.is_none());
        assert!(tx.timestamp().is_none());
        assert!(tx.merchant_key().is_none());
    }

    #[test]
    fn test_unknown_transaction_type_maps_to_other() {
        let tx: Transaction = serde_json::from_str(
            r#"{"id": "x", "amount": -3.0, "transaction_type": "crypto_swap"}"#,
        )
        .unwrap();
        assert_eq!(tx.transaction_type, Some(TransactionType::Other));
    }

    #[test]
    fn test_transfers_and_income_are_not_expenses() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert!(!Transaction::new("a", 100.0, date).is_expense());
        assert!(!Transaction::new("b", -100.0, date)
            .with_type(TransactionType::Transfer)
            .is_expense());
        assert!(Transaction::new("c", -100.0, date)
            .with_type(TransactionType::Fee)
            .is_expense());
    }

    #[test]
    fn test_signal_strength_is_clamped() {
        assert_eq!(Signal::new("x", 1.7, TimeContext::Daytime).signal_strength, 1.0);
        assert_eq!(Signal::new("x", -0.2, TimeContext::Daytime).signal_strength, 0.0);
        assert_eq!(Signal::new("x", f64::NAN, TimeContext::Daytime).signal_strength, 0.0);
    }

    #[test]
    fn test_detector_kind_round_trip() {
        for kind in DetectorKind::ALL {
            assert_eq!(DetectorKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(
            DetectorKind::from_str("end-of-month").unwrap(),
            DetectorKind::EndOfMonth
        );
        assert!(DetectorKind::from_str("nope").is_err());
    }

    #[test]
    fn test_budget_context_covers_normalized_keys() {
        let budgets = BudgetContext::new(vec![ActiveBudget {
            category_id: "Food Delivery".to_string(),
            monthly_limit: Some(200.0),
        }]);
        assert!(budgets.covers("food_delivery"));
        assert!(!budgets.covers("groceries"));
    }
}
