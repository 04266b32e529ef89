//! Spendlens - On-device behavioral spending pattern detection
//!
//! Spendlens reads an already-fetched transaction snapshot and runs a set of
//! deterministic heuristics over it: input filtering → shared primitives (time of day,
//! clustering, categories) → per-detector gates → weighted confidence → aggregation.
//!
//! ## Detectors
//!
//! - **Small Recurring**: habitual low-value purchases, typically at the same merchants
//! - **Stress Spending**: late-night purchases, weighted toward comfort categories and bursts
//! - **End-of-Month Collapse**: late-month spending spikes that recur across months
//!
//! The `BehavioralContextAggregator` runs all three with failure isolation, and the
//! `AdvisoryEncoder` reduces the result to a payload safe to hand to an advisory model.

pub mod adapter;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod encoder;
pub mod error;
pub mod factors;
pub mod primitives;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use adapter::{TransactionAdapter, ValidationError, ValidationIssue};
pub use aggregator::{
    BehavioralContext, BehavioralContextAggregator, DetectorOutcome, InMemorySupply,
    TransactionSupply,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{DetectionConfig, LateNightWindow, MAX_MONTHS_BACK};
pub use detectors::{
    detect_end_of_month_collapse, detect_small_recurring, detect_stress_spending, Detector,
    EndOfMonthDetector, SmallRecurringDetector, StressSpendingDetector,
};
pub use encoder::{AdvisoryEncoder, AdvisoryPayload};
pub use error::DetectionError;
pub use types::{
    ActiveBudget, BudgetContext, DetectionMetadata, DetectionResult, DetectorKind, Signal,
    TimeContext, Transaction, TransactionType,
};

/// Engine version embedded in advisory payloads
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for advisory payloads
pub const PRODUCER_NAME: &str = "spendlens";
