//! Error types for Spendlens

use thiserror::Error;

/// Errors that can occur while preparing input or running detectors.
///
/// Insufficient data is never an error: detectors report it as an undetected result.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to parse transactions: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transaction supply failed: {0}")]
    Supply(String),

    #[error("Detector {detector} failed: {reason}")]
    DetectorFailed { detector: String, reason: String },
}
