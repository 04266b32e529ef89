//! Advisory encoder
//!
//! Reduces a `BehavioralContext` to the sanitized payload consumed by the AI-advisory
//! component. Reason codes are counted per detector and the categories they touch are
//! listed; transaction ids, merchants and amounts never leave through this payload.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::{BehavioralContext, DetectorOutcome};
use crate::error::DetectionError;
use crate::types::DetectorKind;
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Current advisory payload schema version
pub const ADVISORY_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// One reason code with how often it fired and its strongest signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryReason {
    pub reason: String,
    pub count: usize,
    pub max_strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryDetector {
    pub detector: DetectorKind,
    pub available: bool,
    pub detected: bool,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_version: Option<String>,
    pub reasons: Vec<AdvisoryReason>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryPayload {
    pub advisory_version: String,
    pub producer: AdvisoryProducer,
    pub computed_at_utc: String,
    pub detectors: Vec<AdvisoryDetector>,
}

/// Advisory payload encoder
pub struct AdvisoryEncoder {
    instance_id: String,
}

impl Default for AdvisoryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisoryEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(&self, context: &BehavioralContext) -> AdvisoryPayload {
        let producer = AdvisoryProducer {
            name: PRODUCER_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        };

        AdvisoryPayload {
            advisory_version: ADVISORY_VERSION.to_string(),
            producer,
            computed_at_utc: context.generated_at.to_rfc3339(),
            detectors: context
                .outcomes()
                .into_iter()
                .map(|(kind, outcome)| self.build_detector(kind, outcome))
                .collect(),
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(&self, context: &BehavioralContext) -> Result<String, DetectionError> {
        let payload = self.encode(context);
        serde_json::to_string_pretty(&payload).map_err(DetectionError::JsonError)
    }

    fn build_detector(&self, kind: DetectorKind, outcome: &DetectorOutcome) -> AdvisoryDetector {
        let Some(result) = outcome.result() else {
            return AdvisoryDetector {
                detector: kind,
                available: false,
                detected: false,
                confidence: 0.0,
                algorithm_version: None,
                reasons: Vec::new(),
                categories: Vec::new(),
            };
        };

        // Keyed by reason in first-seen order
        let mut order: Vec<&str> = Vec::new();
        let mut by_reason: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
        let mut categories = BTreeSet::new();

        for signal in &result.signals {
            let entry = by_reason
                .entry(signal.detection_reason.as_str())
                .or_insert_with(|| {
                    order.push(signal.detection_reason.as_str());
                    (0, 0.0)
                });
            entry.0 += 1;
            entry.1 = entry.1.max(signal.signal_strength);

            if let Some(category) = &signal.category_id {
                categories.insert(category.clone());
            }
        }

        let reasons = order
            .into_iter()
            .filter_map(|reason| {
                by_reason.get(reason).map(|&(count, max_strength)| AdvisoryReason {
                    reason: reason.to_string(),
                    count,
                    max_strength,
                })
            })
            .collect();

        AdvisoryDetector {
            detector: kind,
            available: true,
            detected: result.detected,
            confidence: result.confidence,
            algorithm_version: Some(result.metadata.algorithm_version.clone()),
            reasons,
            categories: categories.into_iter().collect(),
        }
    }
}
