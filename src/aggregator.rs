//! Behavioral context aggregation
//!
//! Runs every detector over one transaction snapshot and folds the results into a
//! `BehavioralContext`. A detector that errors or panics is recorded as unavailable;
//! the other detectors are unaffected.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::DetectionConfig;
use crate::detectors::{
    Detector, EndOfMonthDetector, SmallRecurringDetector, StressSpendingDetector,
};
use crate::error::DetectionError;
use crate::types::{BudgetContext, DetectionResult, DetectorKind, Transaction};

/// Source of the transaction snapshot (database, sync cache, host app)
pub trait TransactionSupply: Send + Sync {
    fn transactions(&self) -> Result<Vec<Transaction>, DetectionError>;
}

/// Supply backed by an already-fetched list
#[derive(Debug, Clone, Default)]
pub struct InMemorySupply {
    transactions: Vec<Transaction>,
}

impl InMemorySupply {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }
}

impl TransactionSupply for InMemorySupply {
    fn transactions(&self) -> Result<Vec<Transaction>, DetectionError> {
        Ok(self.transactions.clone())
    }
}

/// Result of one detector inside a behavioral context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectorOutcome {
    Available { result: DetectionResult },
    Unavailable { error: String },
}

impl DetectorOutcome {
    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            DetectorOutcome::Available { result } => Some(result),
            DetectorOutcome::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, DetectorOutcome::Available { .. })
    }

    pub fn detected(&self) -> bool {
        self.result().is_some_and(|r| r.detected)
    }

    /// Confidence, with unavailable detectors contributing zero
    pub fn confidence(&self) -> f64 {
        self.result().map_or(0.0, |r| r.confidence)
    }
}

/// Composite output handed to the advisory component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralContext {
    pub small_recurring: DetectorOutcome,
    pub stress_spending: DetectorOutcome,
    pub end_of_month: DetectorOutcome,
    pub generated_at: DateTime<Utc>,
}

impl BehavioralContext {
    pub fn get(&self, kind: DetectorKind) -> &DetectorOutcome {
        match kind {
            DetectorKind::SmallRecurring => &self.small_recurring,
            DetectorKind::StressSpending => &self.stress_spending,
            DetectorKind::EndOfMonth => &self.end_of_month,
        }
    }

    /// Outcomes in canonical detector order
    pub fn outcomes(&self) -> [(DetectorKind, &DetectorOutcome); 3] {
        DetectorKind::ALL.map(|kind| (kind, self.get(kind)))
    }

    pub fn available_count(&self) -> usize {
        self.outcomes().iter().filter(|(_, o)| o.is_available()).count()
    }
}

/// Runs all detectors with failure isolation
pub struct BehavioralContextAggregator {
    config: DetectionConfig,
    clock: Arc<dyn Clock>,
    months_back: u32,
    budgets: BudgetContext,
    detectors: Vec<Box<dyn Detector>>,
}

impl Default for BehavioralContextAggregator {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

impl BehavioralContextAggregator {
    pub fn new(config: DetectionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DetectionConfig, clock: Arc<dyn Clock>) -> Self {
        let months_back = config.default_months_back;
        let detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(SmallRecurringDetector::with_clock(config.clone(), clock.clone())),
            Box::new(StressSpendingDetector::with_clock(config.clone(), clock.clone())),
            Box::new(EndOfMonthDetector::with_clock(config.clone(), clock.clone())),
        ];
        Self {
            config,
            clock,
            months_back,
            budgets: BudgetContext::default(),
            detectors,
        }
    }

    /// Months examined by the end-of-month detector
    pub fn with_months_back(mut self, months_back: u32) -> Self {
        self.months_back = months_back;
        self.rebuild_end_of_month()
    }

    /// Active budgets passed to the end-of-month detector
    pub fn with_budgets(mut self, budgets: BudgetContext) -> Self {
        self.budgets = budgets;
        self.rebuild_end_of_month()
    }

    /// Register a detector, replacing the one of the same kind
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        let kind = detector.kind();
        match self.detectors.iter().position(|d| d.kind() == kind) {
            Some(idx) => self.detectors[idx] = detector,
            None => self.detectors.push(detector),
        }
        self
    }

    /// The registered detector of the given kind
    pub fn detector(&self, kind: DetectorKind) -> Option<&dyn Detector> {
        self.detectors
            .iter()
            .find(|d| d.kind() == kind)
            .map(|d| d.as_ref())
    }

    fn rebuild_end_of_month(self) -> Self {
        let detector = EndOfMonthDetector::with_clock(self.config.clone(), self.clock.clone())
            .with_months_back(self.months_back)
            .with_budgets(self.budgets.clone());
        self.with_detector(Box::new(detector))
    }

    /// Fetch the snapshot from `supply` and analyze it
    pub fn get_behavioral_context(
        &self,
        supply: &dyn TransactionSupply,
    ) -> Result<BehavioralContext, DetectionError> {
        let transactions = supply.transactions()?;
        Ok(self.analyze(&transactions))
    }

    /// Run all detectors concurrently on scoped threads
    pub fn analyze(&self, transactions: &[Transaction]) -> BehavioralContext {
        let outcomes: Vec<(DetectorKind, DetectorOutcome)> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .detectors
                .iter()
                .map(|detector| (detector, scope.spawn(move || detector.detect(transactions))))
                .collect();

            handles
                .into_iter()
                .map(|(detector, handle)| {
                    (detector.kind(), settle(detector.as_ref(), handle.join()))
                })
                .collect()
        });

        self.assemble(outcomes)
    }

    /// Run all detectors one after another on the calling thread
    pub fn analyze_sequential(&self, transactions: &[Transaction]) -> BehavioralContext {
        let outcomes = self
            .detectors
            .iter()
            .map(|detector| {
                let run = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(transactions)));
                (detector.kind(), settle(detector.as_ref(), run))
            })
            .collect();

        self.assemble(outcomes)
    }

    fn assemble(&self, mut outcomes: Vec<(DetectorKind, DetectorOutcome)>) -> BehavioralContext {
        let mut take = |kind: DetectorKind| {
            match outcomes.iter().position(|(k, _)| *k == kind) {
                Some(idx) => outcomes.swap_remove(idx).1,
                None => DetectorOutcome::Unavailable {
                    error: format!("no detector registered for {}", kind),
                },
            }
        };

        let context = BehavioralContext {
            small_recurring: take(DetectorKind::SmallRecurring),
            stress_spending: take(DetectorKind::StressSpending),
            end_of_month: take(DetectorKind::EndOfMonth),
            generated_at: self.clock.now(),
        };

        info!(
            available = context.available_count(),
            small_recurring = context.small_recurring.detected(),
            stress_spending = context.stress_spending.detected(),
            end_of_month = context.end_of_month.detected(),
            "Behavioral context built"
        );

        context
    }
}

type DetectorRun = Result<DetectionResult, DetectionError>;

/// Turn a detector run (which may have panicked) into an outcome
fn settle(detector: &dyn Detector, run: thread::Result<DetectorRun>) -> DetectorOutcome {
    let error = match run {
        Ok(Ok(result)) => return DetectorOutcome::Available { result },
        Ok(Err(e)) => e,
        Err(payload) => DetectionError::DetectorFailed {
            detector: detector.kind().to_string(),
            reason: panic_message(payload.as_ref()),
        },
    };

    warn!(
        detector = detector.kind().as_str(),
        name = detector.name(),
        error = %error,
        "Detector unavailable"
    );

    DetectorOutcome::Unavailable {
        error: error.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "detector panicked".to_string()
    }
}
