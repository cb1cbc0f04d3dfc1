use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::delivery::DeliveryEngine;
use crate::error::WebhookError;
use crate::manager::WebhookManager;
use crate::payload::{build_payload, TriggeredResult};
use crate::types::{DeliveryRecord, OwnerId};

/// Hook for evaluation endpoints: after producing results, hand them here.
///
/// Runs the whole delivery inline and never fails. Returns the delivery
/// record when a delivery was attempted.
#[derive(Clone)]
pub struct Notifier {
    manager: WebhookManager,
    engine: Arc<DeliveryEngine>,
}

impl Notifier {
    pub fn new(manager: WebhookManager, engine: Arc<DeliveryEngine>) -> Self {
        Self { manager, engine }
    }

    pub async fn notify<T>(
        &self,
        owner: &OwnerId,
        results: &[T],
        evaluated_at: DateTime<Utc>,
    ) -> Option<DeliveryRecord>
    where
        T: TriggeredResult + Sync,
    {
        let config = self.manager.get(owner).await?;
        if !config.active {
            return None;
        }

        let payload = match build_payload(owner, results, evaluated_at) {
            Ok(payload) => payload,
            Err(e) => {
                let e = WebhookError::Payload(e);
                tracing::warn!(owner = %owner, error = %e, "webhook notification aborted");
                return None;
            }
        };
        if payload.is_empty() {
            tracing::debug!(owner = %owner, "no triggered results, skipping webhook");
            return None;
        }

        match self
            .engine
            .deliver(owner, &payload, &config.url, config.secret.as_deref())
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "webhook notification aborted");
                None
            }
        }
    }
}
