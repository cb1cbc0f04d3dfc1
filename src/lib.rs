//! Per-account webhook notifications for triggered evaluations.
//!
//! An owner registers one destination URL (and optionally a signing
//! secret). When an evaluation reports triggered results, [`Notifier`]
//! delivers a signed JSON payload to that destination inline, retrying a
//! bounded number of times, and appends the outcome to a capped per-owner
//! history kept in a single crash-safe JSON file.

pub mod accounts;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http_server;
pub mod manager;
pub mod notify;
pub mod payload;
pub mod rate_limit;
pub mod signing;
pub mod store;
pub mod types;

pub use accounts::{AccountDirectory, StaticAccounts};
pub use config::{ConfigError, ServiceConfig};
pub use delivery::{AttemptOutcome, DeliveryConfig, DeliveryEngine, Transition};
pub use error::{Result, WebhookError};
pub use http_server::{router, AppState};
pub use manager::WebhookManager;
pub use notify::Notifier;
pub use payload::{build_payload, EvaluationResult, TriggeredResult, WebhookPayload};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use signing::{sign_payload, verify_signature, SIGNATURE_HEADER};
pub use store::{WebhookStore, MAX_DELIVERIES_PER_OWNER};
pub use types::{
    DeliveryRecord, DeliveryStatus, OwnerId, PayloadSummary, RateLimitInfo, WebhookConfiguration,
};
