//! High-risk notifications for compliance reviewers

use crate::types::{Match, RiskLevel, ScreeningResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

pub const HIGH_RISK_MATCH: &str = "high_risk_match";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert channel closed: {0}")]
    ChannelClosed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub event_type: String,
    pub screening_id: uuid::Uuid,
    pub subject_fingerprint: String,
    pub query_fingerprint: String,
    pub risk_level: RiskLevel,
    pub matches: Vec<Match>,
    pub raised_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn high_risk(result: &ScreeningResult) -> Self {
        Self {
            event_type: HIGH_RISK_MATCH.to_string(),
            screening_id: result.screening_id,
            subject_fingerprint: result.subject_fingerprint.clone(),
            query_fingerprint: result.query_fingerprint.clone(),
            risk_level: result.risk_level,
            matches: result.matches.clone(),
            raised_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, event: AlertEvent) -> Result<(), AlertError>;
}

/// Hands events to the host application over an unbounded channel
pub struct ChannelAlertSink {
    event_tx: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelAlertSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { event_tx }, event_rx)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn publish(&self, event: AlertEvent) -> Result<(), AlertError> {
        self.event_tx
            .send(event)
            .map_err(|e| AlertError::ChannelClosed(e.to_string()))
    }
}

/// Writes alerts to the log only
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn publish(&self, event: AlertEvent) -> Result<(), AlertError> {
        let top = event.matches.first();
        warn!(
            event_type = %event.event_type,
            screening_id = %event.screening_id,
            subject = %event.subject_fingerprint,
            matches = event.matches.len(),
            top_source = top.map(|m| m.source_id.as_str()).unwrap_or(""),
            top_score = top.map(|m| m.score).unwrap_or(0.0),
            "High-risk screening result"
        );
        Ok(())
    }
}
