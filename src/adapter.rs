//! Transaction input adapter
//!
//! Parses transaction snapshots from JSON arrays or NDJSON and reports records the
//! detectors will skip.

use serde::Deserialize;

use crate::error::DetectionError;
use crate::types::{ActiveBudget, BudgetContext, Transaction};

/// Adapter for reading transaction snapshots
pub struct TransactionAdapter;

impl TransactionAdapter {
    /// Parse a JSON string containing an array of transactions
    pub fn parse_array(json: &str) -> Result<Vec<Transaction>, DetectionError> {
        let transactions: Vec<Transaction> = serde_json::from_str(json)?;
        Ok(transactions)
    }

    /// Parse NDJSON (newline-delimited JSON), one transaction per line
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<Transaction>, DetectionError> {
        let mut transactions = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Transaction>(trimmed) {
                Ok(tx) => transactions.push(tx),
                Err(e) => {
                    return Err(DetectionError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(transactions)
    }

    /// Parse budget context from either `{"budgets": [...]}` or a bare array
    pub fn parse_budgets(json: &str) -> Result<BudgetContext, DetectionError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum BudgetInput {
            Context(BudgetContext),
            List(Vec<ActiveBudget>),
        }

        match serde_json::from_str::<BudgetInput>(json)? {
            BudgetInput::Context(context) => Ok(context),
            BudgetInput::List(budgets) => Ok(BudgetContext::new(budgets)),
        }
    }

    /// Validate a batch of transactions, returning only the records with issues
    pub fn validate_transactions(transactions: &[Transaction]) -> Vec<ValidationIssue> {
        transactions
            .iter()
            .enumerate()
            .filter_map(|(idx, tx)| {
                validate(tx).err().map(|error| ValidationIssue {
                    index: idx,
                    transaction_id: tx.id.clone(),
                    error,
                })
            })
            .collect()
    }
}

fn validate(tx: &Transaction) -> Result<(), ValidationError> {
    if tx.id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if !tx.amount.is_finite() {
        return Err(ValidationError::NonFiniteAmount { amount: tx.amount });
    }
    if tx.transaction_date.is_none() {
        return Err(ValidationError::MissingDate);
    }
    Ok(())
}

/// A record that detectors will skip (missing date or non-finite amount)
#[derive(Debug)]
pub struct ValidationIssue {
    pub index: usize,
    pub transaction_id: String,
    pub error: ValidationError,
}

/// Validation errors for individual transactions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Transaction id is empty")]
    EmptyId,

    #[error("Amount is not finite: {amount}; record is skipped by every detector")]
    NonFiniteAmount { amount: f64 },

    #[error("Transaction date is missing; record is skipped by every detector")]
    MissingDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionType;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn test_parse_array_with_aliases() {
        let json = r#"[
            {
                "id": "t1",
                "amount": -4.5,
                "merchant": "Blue Bottle",
                "category": "coffee",
                "date": "2024-03-12",
                "time": "08:15:00",
                "transaction_type": "expense"
            },
            {"id": "t2", "amount": 2500.0, "transaction_date": "2024-03-01", "transaction_type": "income"}
        ]"#;

        let transactions = TransactionAdapter::parse_array(json).unwrap();
        assert_eq!(transactions.len(), 2);

        let coffee = &transactions[0];
        assert_eq!(coffee.merchant_name.as_deref(), Some("Blue Bottle"));
        assert_eq!(coffee.category_id.as_deref(), Some("coffee"));
        assert_eq!(coffee.transaction_date, NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(coffee.transaction_time, NaiveTime::from_hms_opt(8, 15, 0));
        assert_eq!(transactions[1].transaction_type, Some(TransactionType::Income));
    }

    #[test]
    fn test_parse_array_accepts_datetime_shapes() {
        let json = r#"[
            {"id": "date", "amount": -3.0, "date": "2024-03-01"},
            {"id": "naive", "amount": -3.0, "date": "2024-03-01T23:30:00"},
            {"id": "spaced", "amount": -3.0, "date": "2024-03-01 23:30:00"},
            {"id": "utc", "amount": -3.0, "date": "2024-03-01T23:30:00Z"},
            {"id": "offset", "amount": -3.0, "transaction_date": "2024-03-01T23:30:00.250+05:30"}
        ]"#;

        let transactions = TransactionAdapter::parse_array(json).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert!(transactions.iter().all(|t| t.transaction_date == date));

        assert_eq!(transactions[0].transaction_time, None);
        let late = NaiveTime::from_hms_opt(23, 30, 0);
        assert_eq!(transactions[1].transaction_time, late);
        assert_eq!(transactions[2].transaction_time, late);
        assert_eq!(transactions[3].transaction_time, late);
        assert_eq!(
            transactions[4].transaction_time,
            NaiveTime::from_hms_milli_opt(23, 30, 0, 250)
        );
    }

    #[test]
    fn test_explicit_time_wins_over_datetime() {
        let json = r#"[{"id": "a", "amount": -3.0, "date": "2024-03-01T00:00:00Z", "time": "23:45:00"}]"#;
        let transactions = TransactionAdapter::parse_array(json).unwrap();
        assert_eq!(transactions[0].transaction_time, NaiveTime::from_hms_opt(23, 45, 0));
    }

    #[test]
    fn test_datetime_round_trips_as_date_and_time() {
        let json = r#"{"id": "a", "amount": -3.0, "date": "2024-03-01T23:30:00Z"}"#;
        let tx = &TransactionAdapter::parse_ndjson(json).unwrap()[0];
        let value = serde_json::to_value(tx).unwrap();
        assert_eq!(value["transaction_date"], "2024-03-01");
        assert_eq!(value["transaction_time"], "23:30:00");
    }

    #[test]
    fn test_unparseable_date_fails_the_batch() {
        let json = r#"[{"id": "a", "amount": -3.0, "date": "March 1st"}]"#;
        let err = TransactionAdapter::parse_array(json).unwrap_err();
        assert!(err.to_string().contains("unrecognized transaction date"));
    }

    #[test]
    fn test_parse_array_missing_optional_fields() {
        let json = r#"[{"id": "bare", "amount": -10.0}]"#;
        let transactions = TransactionAdapter::parse_array(json).unwrap();
        assert!(transactions[0].transaction_date.is_none());
        assert!(transactions[0].merchant_name.is_none());
    }

    #[test]
    fn test_parse_ndjson() {
        let ndjson = "{\"id\":\"a\",\"amount\":-3.0,\"date\":\"2024-03-01\"}\n\n{\"id\":\"b\",\"amount\":-5.0,\"date\":\"2024-03-02\"}\n";
        let transactions = TransactionAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[1].id, "b");
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"id\":\"a\",\"amount\":-3.0}\nnot json\n";
        let err = TransactionAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_budgets_both_shapes() {
        let wrapped = r#"{"budgets": [{"category_id": "dining", "monthly_limit": 200.0}]}"#;
        let bare = r#"[{"category_id": "dining"}]"#;

        assert_eq!(TransactionAdapter::parse_budgets(wrapped).unwrap().budgets.len(), 1);
        let context = TransactionAdapter::parse_budgets(bare).unwrap();
        assert!(context.covers("dining"));
    }

    #[test]
    fn test_validate_transactions() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut undated = Transaction::new("undated", -5.0, date);
        undated.transaction_date = None;
        let transactions = vec![
            Transaction::new("ok", -5.0, date),
            Transaction::new("", -5.0, date),
            Transaction::new("inf", f64::INFINITY, date),
            undated,
        ];

        let issues = TransactionAdapter::validate_transactions(&transactions);
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].index, 1);
        assert_eq!(issues[0].error, ValidationError::EmptyId);
        assert!(matches!(issues[1].error, ValidationError::NonFiniteAmount { .. }));
        assert_eq!(issues[2].transaction_id, "undated");
        assert_eq!(issues[2].error, ValidationError::MissingDate);
    }
}
