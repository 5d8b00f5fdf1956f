use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stockledger_core::{AggregateId, TenantId};

use crate::event::Event;

/// A committed notification plus the metadata subscribers route on.
///
/// - `tenant_id` scopes delivery; a consumer serving one tenant drops the rest.
/// - `sequence_number` is the aggregate version the event was committed at.
///   Several envelopes may share one (they came from one commit); a lower one
///   is a stale or duplicate delivery.
/// - `event_type`, `schema_version` and `occurred_at` are copied off the event
///   so consumers can dispatch without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,
    schema_version: u32,
    occurred_at: DateTime<Utc>,
    sequence_number: u64,
    payload: E,
}

impl<E: Event> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            schema_version: event.version(),
            occurred_at: event.occurred_at(),
            sequence_number,
            payload: event,
        }
    }
}

impl<E: Serialize> EventEnvelope<E> {
    /// Re-encode the payload as JSON, keeping every piece of metadata.
    pub fn to_json(&self) -> Result<EventEnvelope<JsonValue>, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type.clone(),
            event_type: self.event_type.clone(),
            schema_version: self.schema_version,
            occurred_at: self.occurred_at,
            sequence_number: self.sequence_number,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}

impl<E> EventEnvelope<E> {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
