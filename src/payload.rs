//! Outbound event payloads.
//!
//! The evaluator is opaque here: anything that can say whether it fired and
//! can be serialized may be handed to [`build_payload`]. Only triggered
//! entries leave the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OwnerId, PayloadSummary, EVENT_ALERT_TRIGGERED};

/// Result ids kept in a delivery record's summary.
const SUMMARY_MAX_IDS: usize = 10;

/// An evaluator output that may have met its firing condition.
pub trait TriggeredResult: Serialize {
    fn is_triggered(&self) -> bool;

    /// Stable identifier used in delivery summaries.
    fn result_id(&self) -> Option<&str> {
        None
    }
}

/// Result shape accepted from evaluators over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub rule_id: String,
    pub triggered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TriggeredResult for EvaluationResult {
    fn is_triggered(&self) -> bool {
        self.triggered
    }

    fn result_id(&self) -> Option<&str> {
        Some(&self.rule_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub owner_id: OwnerId,
    pub triggered_count: usize,
    pub evaluated_at: DateTime<Utc>,
    pub results: Vec<serde_json::Value>,
    #[serde(skip)]
    result_ids: Vec<String>,
}

impl WebhookPayload {
    pub fn is_empty(&self) -> bool {
        self.triggered_count == 0
    }

    /// Serialized body. Struct fields keep declaration order and JSON
    /// objects inside `results` have sorted keys, so equal payloads always
    /// produce equal bytes.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn summary(&self) -> PayloadSummary {
        PayloadSummary {
            triggered_count: self.triggered_count,
            evaluated_at: self.evaluated_at,
            result_ids: self.result_ids.clone(),
        }
    }
}

/// Wrap the triggered subset of `results` into an outbound payload.
pub fn build_payload<T: TriggeredResult>(
    owner: &OwnerId,
    results: &[T],
    evaluated_at: DateTime<Utc>,
) -> serde_json::Result<WebhookPayload> {
    let triggered: Vec<&T> = results.iter().filter(|r| r.is_triggered()).collect();

    let result_ids = triggered
        .iter()
        .filter_map(|r| r.result_id())
        .take(SUMMARY_MAX_IDS)
        .map(str::to_string)
        .collect();

    let values = triggered
        .iter()
        .map(serde_json::to_value)
        .collect::<serde_json::Result<Vec<_>>>()?;

    Ok(WebhookPayload {
        event: EVENT_ALERT_TRIGGERED.to_string(),
        owner_id: owner.clone(),
        triggered_count: values.len(),
        evaluated_at,
        results: values,
        result_ids,
    })
}
