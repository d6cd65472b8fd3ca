//! Decoding inbound payloads into insertable rows.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use iox_time::TimeProvider;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Default origin tag prefixed onto every decoded `event_type`
pub const DEFAULT_ORIGIN_TAG: &str = "rust";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message has no payload")]
    EmptyPayload,

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Layouts accepted for timestamps without an offset, read as UTC
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 timestamp, with or without an offset
fn parse_event_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(t.with_timezone(&Utc));
    }

    let naive = s.strip_suffix(['Z', 'z']).unwrap_or(s);
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|t| t.and_utc())
}

/// The fields the consumer understands, all optional so that a partial payload still decodes
#[derive(Debug, Deserialize)]
struct InboundEvent {
    mall_id: Option<i32>,
    kiosk_id: Option<i32>,
    event_type: Option<String>,
    event_ts: Option<Value>,
    amount_cents: Option<i32>,
    total_items: Option<i32>,
    payment_method: Option<i32>,
    status: Option<i32>,
}

/// One row of the events table
///
/// Numeric fields absent from the payload are stored as NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    pub mall_id: Option<i32>,
    pub kiosk_id: Option<i32>,
    pub event_type: String,
    pub event_ts: DateTime<Utc>,
    pub amount_cents: Option<i32>,
    pub total_items: Option<i32>,
    pub payment_method: Option<i32>,
    pub status: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Turns raw payloads into [`RowRecord`]s stamped with the ingestion time
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    origin_tag: String,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecordDecoder {
    pub fn new(origin_tag: impl Into<String>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            origin_tag: origin_tag.into(),
            time_provider,
        }
    }

    pub fn origin_tag(&self) -> &str {
        &self.origin_tag
    }

    /// Decode a payload
    ///
    /// A missing or unparseable `event_ts` falls back to the ingestion time instead of failing
    /// the record. A missing `event_type` becomes `<origin>-unknown`.
    pub fn decode(&self, payload: Option<&[u8]>) -> Result<RowRecord, DecodeError> {
        let payload = payload.ok_or(DecodeError::EmptyPayload)?;
        let event: InboundEvent = serde_json::from_slice(payload)?;
        let now = self.time_provider.now().date_time();

        let event_ts = event
            .event_ts
            .as_ref()
            .and_then(Value::as_str)
            .and_then(parse_event_ts)
            .unwrap_or(now);

        let event_type = format!(
            "{}-{}",
            self.origin_tag,
            event.event_type.as_deref().unwrap_or("unknown")
        );

        Ok(RowRecord {
            mall_id: event.mall_id,
            kiosk_id: event.kiosk_id,
            event_type,
            event_ts,
            amount_cents: event.amount_cents,
            total_items: event.total_items,
            payment_method: event.payment_method,
            status: event.status,
            created_at: now,
            updated_at: now,
        })
    }
}
