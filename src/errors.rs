use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::alerts::types::AlertStatus;

/// Data-quality errors raised at the ingest boundary. The offending event
/// is rejected; ingestion itself keeps running.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("amount must be positive and finite, got {0}")]
    InvalidAmount(f64),
    #[error("timestamp {timestamp} is {reason}")]
    TimestampOutOfRange {
        timestamp: DateTime<Utc>,
        reason: &'static str,
    },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Faults inside a single detector. Caught by the orchestrator; the other
/// detectors still run.
#[derive(Debug, Error)]
#[error("{detector} detector fault: {message}")]
pub struct DetectorError {
    pub detector: &'static str,
    pub message: String,
}

impl DetectorError {
    pub fn new(detector: &'static str, message: impl Into<String>) -> Self {
        Self {
            detector,
            message: message.into(),
        }
    }
}

/// Errors from alert life-cycle operations.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(Uuid),
    #[error("invalid alert status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors at the durable-store boundary. A timeout is retryable; in-memory
/// state stays authoritative.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store backend error: {0}")]
    Backend(String),
}
