//! Synthetic kiosk events and their wire representation.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sequence::derive_entity_id;

/// Events are stamped with a random day within this many days before "now".
pub const HISTORY_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("entity id {entity_id} derived from sequence {sequence} does not fit in a kiosk id")]
    EntityIdOutOfRange { sequence: u64, entity_id: u64 },

    #[error("failed to serialize event for sequence {sequence}: {source}")]
    Serialize {
        sequence: u64,
        source: serde_json::Error,
    },
}

/// The fixed payload fields stamped onto every generated event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTemplate {
    pub mall_id: i32,
    pub event_type: String,
    pub amount_cents: i32,
    pub total_items: i32,
    pub payment_method: i32,
    pub status: i32,
}

impl Default for EventTemplate {
    fn default() -> Self {
        Self {
            mall_id: 1,
            event_type: String::from("visit"),
            amount_cents: 1000,
            total_items: 5,
            payment_method: 1,
            status: 0,
        }
    }
}

/// A single kiosk event, built once per allocated sequence number.
///
/// Field names are the lower snake case names used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticEvent {
    pub mall_id: i32,
    pub kiosk_id: i32,
    pub event_type: String,
    pub event_ts: DateTime<Utc>,
    pub amount_cents: i32,
    pub total_items: i32,
    pub payment_method: i32,
    pub status: i32,
}

impl SyntheticEvent {
    /// Build the event for `sequence` from a template, stamping it with `event_ts`.
    pub fn new(
        template: &EventTemplate,
        sequence: u64,
        event_ts: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let entity_id = derive_entity_id(sequence);
        let kiosk_id = i32::try_from(entity_id).map_err(|_| EventError::EntityIdOutOfRange {
            sequence,
            entity_id,
        })?;

        Ok(Self {
            mall_id: template.mall_id,
            kiosk_id,
            event_type: template.event_type.clone(),
            event_ts,
            amount_cents: template.amount_cents,
            total_items: template.total_items,
            payment_method: template.payment_method,
            status: template.status,
        })
    }
}

/// Pick a uniformly random whole-day offset within the last [`HISTORY_DAYS`] days of `now`.
pub fn random_historical_timestamp<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> DateTime<Utc> {
    let days_ago = rng.gen_range(0..HISTORY_DAYS);
    now - chrono::Duration::days(days_ago)
}

/// A record ready to be handed to the outbound transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    /// The sequence number the record was built from
    pub sequence: u64,
    /// The partitioning key: the kiosk id rendered as text
    pub key: String,
    /// UTF-8 JSON body
    pub value: String,
}

/// Maps [`SyntheticEvent`]s onto keyed JSON [`WireRecord`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSerializer;

impl EventSerializer {
    pub fn serialize(
        &self,
        sequence: u64,
        event: &SyntheticEvent,
    ) -> Result<WireRecord, EventError> {
        let value = serde_json::to_string(event)
            .map_err(|source| EventError::Serialize { sequence, source })?;
        Ok(WireRecord {
            sequence,
            key: event.kiosk_id.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::Value;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap()
    }

    #[test]
    fn event_from_template() {
        let event = SyntheticEvent::new(&EventTemplate::default(), 250_123, ts()).unwrap();
        assert_eq!(
            event,
            SyntheticEvent {
                mall_id: 1,
                kiosk_id: 2,
                event_type: "visit".to_string(),
                event_ts: ts(),
                amount_cents: 1000,
                total_items: 5,
                payment_method: 1,
                status: 0,
            }
        );
    }

    #[test]
    fn kiosk_id_overflow_is_an_error() {
        let seq = (i32::MAX as u64 + 1) * 100_000;
        let err = SyntheticEvent::new(&EventTemplate::default(), seq, ts()).unwrap_err();
        assert!(matches!(err, EventError::EntityIdOutOfRange { .. }), "{err}");
    }

    #[test]
    fn wire_record_uses_snake_case_fields() {
        let event = SyntheticEvent::new(&EventTemplate::default(), 100_000, ts()).unwrap();
        let record = EventSerializer.serialize(100_000, &event).unwrap();
        assert_eq!(record.key, "1");
        assert_eq!(record.sequence, 100_000);

        let json: Value = serde_json::from_str(&record.value).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            [
                "amount_cents",
                "event_ts",
                "event_type",
                "kiosk_id",
                "mall_id",
                "payment_method",
                "status",
                "total_items",
            ]
        );
        assert_eq!(json["event_ts"], "2024-03-09T12:30:00Z");
        assert_eq!(json["kiosk_id"], 1);
    }

    #[test]
    fn historical_timestamps_stay_within_a_year() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = ts();
        for _ in 0..1_000 {
            let t = random_historical_timestamp(&mut rng, now);
            assert!(t <= now);
            assert!(now - t < chrono::Duration::days(HISTORY_DAYS));
            assert_eq!(t.time(), now.time(), "offsets are whole days");
        }
    }
}
