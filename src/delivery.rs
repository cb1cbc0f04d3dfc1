//! Signed, synchronous webhook delivery with bounded retries.
//!
//! A delivery is at most `max_attempts` POSTs of the same signed body. The
//! record moves `pending -> delivered | failed` through
//! [`DeliveryRecord::apply`], which is the only place attempt counting and
//! status changes happen. The calling request stays blocked until the
//! record is terminal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::payload::WebhookPayload;
use crate::signing::{sign_payload, SIGNATURE_HEADER};
use crate::store::WebhookStore;
use crate::types::{DeliveryRecord, DeliveryStatus, OwnerId, PayloadSummary, EVENT_ALERT_TRIGGERED};

pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const DELIVERY_HEADER: &str = "X-Webhook-Delivery";

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Hard limit on each attempt.
    pub attempt_timeout: Duration,
    /// Sleep after the first failed attempt; doubles after each further one.
    pub backoff_base: Duration,
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            user_agent: concat!("nexus-webhook-notifier/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Delay before the attempt following `attempt` (1-indexed).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// What a single HTTP attempt observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Response { status: u16 },
    Timeout { after: Duration },
    Transport(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Response { status } if (200..300).contains(status))
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            AttemptOutcome::Response { status } => Some(*status),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AttemptOutcome::Response { status } => {
                let reason = reqwest::StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason());
                match reason {
                    Some(reason) => format!("HTTP {status} {reason}"),
                    None => format!("HTTP {status}"),
                }
            }
            AttemptOutcome::Timeout { after } => {
                format!("request timed out after {}s", after.as_secs_f64())
            }
            AttemptOutcome::Transport(err) => format!("connection error: {err}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Retry { next_attempt: u32 },
    Done,
}

impl DeliveryRecord {
    /// A fresh record about to make its first attempt.
    pub fn pending(url: &str, summary: PayloadSummary) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event: EVENT_ALERT_TRIGGERED.to_string(),
            status: DeliveryStatus::Pending,
            url: url.to_string(),
            summary,
            http_status: None,
            attempts: 1,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Fold one attempt's outcome into the record.
    ///
    /// `http_status` always mirrors the latest attempt. Terminal records
    /// reject further outcomes.
    pub fn apply(&mut self, outcome: &AttemptOutcome, max_attempts: u32) -> Result<Transition> {
        if self.status.is_terminal() {
            return Err(WebhookError::InvalidTransition { from: self.status });
        }

        self.http_status = outcome.http_status();

        if outcome.is_success() {
            self.status = DeliveryStatus::Delivered;
            self.completed_at = Some(Utc::now());
            return Ok(Transition::Done);
        }

        if self.attempts < max_attempts {
            self.attempts += 1;
            return Ok(Transition::Retry {
                next_attempt: self.attempts,
            });
        }

        self.status = DeliveryStatus::Failed;
        self.failure_reason = Some(outcome.describe());
        self.completed_at = Some(Utc::now());
        Ok(Transition::Done)
    }
}

pub struct DeliveryEngine {
    client: reqwest::Client,
    store: Arc<WebhookStore>,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    pub fn new(store: Arc<WebhookStore>, config: DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            // A 3xx is the destination's answer, not somewhere else to POST.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            store,
            config,
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver `payload` to `url`, retrying on failure, and record the outcome.
    ///
    /// Delivery failures are reported through the returned record's status,
    /// never as `Err`. Errors mean the payload could not be serialized or
    /// the state machine was misused.
    pub async fn deliver(
        &self,
        owner: &OwnerId,
        payload: &WebhookPayload,
        url: &str,
        secret: Option<&str>,
    ) -> Result<DeliveryRecord> {
        let body = payload.to_bytes().map_err(WebhookError::Payload)?;
        let signature = secret.map(|s| sign_payload(s, &body));

        let mut record = DeliveryRecord::pending(url, payload.summary());
        self.persist(owner, &record).await;

        loop {
            let outcome = self
                .attempt(url, &record.id, &body, signature.as_deref())
                .await;

            match record.apply(&outcome, self.config.max_attempts)? {
                Transition::Retry { next_attempt } => {
                    let delay = self.config.backoff_after(next_attempt - 1);
                    tracing::warn!(
                        owner = %owner,
                        delivery_id = %record.id,
                        attempt = next_attempt - 1,
                        outcome = %outcome.describe(),
                        retry_in_ms = delay.as_millis() as u64,
                        "webhook attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                Transition::Done => break,
            }
        }

        self.persist(owner, &record).await;

        match record.status {
            DeliveryStatus::Delivered => tracing::info!(
                owner = %owner,
                delivery_id = %record.id,
                attempts = record.attempts,
                "webhook delivered"
            ),
            _ => tracing::warn!(
                owner = %owner,
                delivery_id = %record.id,
                attempts = record.attempts,
                reason = record.failure_reason.as_deref().unwrap_or(""),
                "webhook delivery failed"
            ),
        }

        Ok(record)
    }

    async fn attempt(
        &self,
        url: &str,
        delivery_id: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> AttemptOutcome {
        let mut request = self
            .client
            .post(url)
            .timeout(self.config.attempt_timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, EVENT_ALERT_TRIGGERED)
            .header(DELIVERY_HEADER, delivery_id)
            .body(body.to_vec());

        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        match request.send().await {
            Ok(response) => AttemptOutcome::Response {
                status: response.status().as_u16(),
            },
            Err(err) if err.is_timeout() => AttemptOutcome::Timeout {
                after: self.config.attempt_timeout,
            },
            Err(err) => AttemptOutcome::Transport(err.to_string()),
        }
    }

    async fn persist(&self, owner: &OwnerId, record: &DeliveryRecord) {
        if let Err(e) = self.store.upsert_delivery(owner, record.clone()).await {
            tracing::warn!(
                owner = %owner,
                delivery_id = %record.id,
                error = %e,
                "failed to persist delivery record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> PayloadSummary {
        PayloadSummary {
            triggered_count: 1,
            evaluated_at: Utc::now(),
            result_ids: vec![],
        }
    }

    fn ok() -> AttemptOutcome {
        AttemptOutcome::Response { status: 200 }
    }

    fn server_error() -> AttemptOutcome {
        AttemptOutcome::Response { status: 500 }
    }

    #[test]
    fn backoff_doubles() {
        let config = DeliveryConfig::default();
        assert_eq!(config.backoff_after(1), Duration::from_secs(1));
        assert_eq!(config.backoff_after(2), Duration::from_secs(2));
    }

    #[test]
    fn default_worst_case_is_bounded() {
        let config = DeliveryConfig::default();
        let sleeps: Duration = (1..config.max_attempts).map(|n| config.backoff_after(n)).sum();
        let worst = config.attempt_timeout * config.max_attempts + sleeps;
        assert_eq!(worst, Duration::from_secs(33));
    }

    #[test]
    fn first_attempt_success() {
        let mut record = DeliveryRecord::pending("https://example.test/hook", summary());
        assert_eq!(record.apply(&ok(), 3).unwrap(), Transition::Done);
        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.http_status, Some(200));
        assert!(record.failure_reason.is_none());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn success_on_third_attempt() {
        let mut record = DeliveryRecord::pending("https://example.test/hook", summary());
        assert_eq!(
            record.apply(&server_error(), 3).unwrap(),
            Transition::Retry { next_attempt: 2 }
        );
        assert_eq!(
            record.apply(&server_error(), 3).unwrap(),
            Transition::Retry { next_attempt: 3 }
        );
        assert_eq!(record.apply(&ok(), 3).unwrap(), Transition::Done);
        assert_eq!(record.status, DeliveryStatus::Delivered);
        assert_eq!(record.attempts, 3);
    }

    #[test]
    fn exhausts_attempts() {
        let mut record = DeliveryRecord::pending("https://example.test/hook", summary());
        record.apply(&server_error(), 3).unwrap();
        record.apply(&server_error(), 3).unwrap();
        let last = AttemptOutcome::Timeout {
            after: Duration::from_secs(10),
        };
        assert_eq!(record.apply(&last, 3).unwrap(), Transition::Done);

        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.http_status, None);
        assert_eq!(
            record.failure_reason.as_deref(),
            Some("request timed out after 10s")
        );
    }

    #[test]
    fn terminal_record_rejects_outcomes() {
        let mut record = DeliveryRecord::pending("https://example.test/hook", summary());
        record.apply(&ok(), 3).unwrap();
        let err = record.apply(&ok(), 3).unwrap_err();
        assert!(matches!(
            err,
            WebhookError::InvalidTransition {
                from: DeliveryStatus::Delivered
            }
        ));
    }

    #[test]
    fn describes_outcomes() {
        assert_eq!(server_error().describe(), "HTTP 500 Internal Server Error");
        assert_eq!(
            AttemptOutcome::Transport("refused".into()).describe(),
            "connection error: refused"
        );
        assert!(AttemptOutcome::Response { status: 204 }.is_success());
        assert!(!AttemptOutcome::Response { status: 302 }.is_success());
    }
}
