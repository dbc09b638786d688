//! Domain events and their binding to a position in an aggregate's log.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::DomainError;

/// Trait that every event payload implements.
///
/// Implementations are plain data types; the aggregate builder dispatches on
/// the concrete runtime type.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Rust type name of the payload, for diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl dyn Event {
    /// Returns the payload as `T` if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        let any: &dyn Any = self;
        any.downcast_ref::<T>()
    }

    /// `TypeId` of the concrete payload type.
    #[must_use]
    pub fn payload_type_id(&self) -> std::any::TypeId {
        let any: &dyn Any = self;
        any.type_id()
    }
}

/// Events produced by one command, in the order they must be persisted.
pub type Events = Vec<Box<dyn Event>>;

/// Decodes a serialized payload into a boxed event.
pub type EventDecoder = fn(&[u8]) -> Result<Box<dyn Event>, serde_json::Error>;

/// Identity and position of an aggregate.
///
/// Version 0 means no events have been applied yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateInfo {
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Aggregate identifier, unique within its type.
    pub id: String,
    /// Number of events applied.
    pub version: u64,
}

impl AggregateInfo {
    /// Creates the info for an aggregate that has no history yet.
    #[must_use]
    pub fn new(aggregate_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id: id.into(),
            version: 0,
        }
    }

    /// Same identity at the next version.
    #[must_use]
    pub fn incremented(&self) -> Self {
        self.at_version(self.version + 1)
    }

    /// Same identity at an explicit version.
    #[must_use]
    pub fn at_version(&self, version: u64) -> Self {
        Self {
            aggregate_type: self.aggregate_type.clone(),
            id: self.id.clone(),
            version,
        }
    }

    /// Returns `true` if both infos name the same aggregate.
    #[must_use]
    pub fn same_aggregate(&self, other: &Self) -> bool {
        self.aggregate_type == other.aggregate_type && self.id == other.id
    }
}

impl fmt::Display for AggregateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.aggregate_type, self.id, self.version)
    }
}

/// An event payload kept in serialized form until first read.
///
/// The decoded value is computed at most once and cached.
pub struct LazyEvent {
    name: String,
    raw: Vec<u8>,
    decoder: EventDecoder,
    decoded: OnceLock<Box<dyn Event>>,
}

impl LazyEvent {
    /// Wraps a raw payload with the decoder registered for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, raw: Vec<u8>, decoder: EventDecoder) -> Self {
        Self {
            name: name.into(),
            raw,
            decoder,
            decoded: OnceLock::new(),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialized payload as received.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Returns `true` once the payload has been decoded.
    #[must_use]
    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }

    /// Decodes the payload on first call and returns the cached value after.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not decode.
    /// A failed decode is not cached; the next call retries.
    pub fn event(&self) -> Result<&dyn Event, DomainError> {
        if let Some(event) = self.decoded.get() {
            return Ok(event.as_ref());
        }
        let event = (self.decoder)(&self.raw).map_err(|e| {
            DomainError::Serialization(format!("failed to decode event {}: {e}", self.name))
        })?;
        Ok(self.decoded.get_or_init(|| event).as_ref())
    }
}

impl fmt::Debug for LazyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyEvent")
            .field("name", &self.name)
            .field("raw_len", &self.raw.len())
            .field("decoded", &self.decoded.get())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Decoded(Arc<dyn Event>),
    Lazy(Arc<LazyEvent>),
}

/// An event bound to a specific (type, id, version).
#[derive(Debug, Clone)]
pub struct AggregateEvent {
    info: AggregateInfo,
    payload: Payload,
}

impl AggregateEvent {
    /// Binds a typed payload to a position.
    #[must_use]
    pub fn new<E: Event>(info: AggregateInfo, event: E) -> Self {
        Self {
            info,
            payload: Payload::Decoded(Arc::new(event)),
        }
    }

    /// Binds an already boxed payload to a position.
    #[must_use]
    pub fn from_boxed(info: AggregateInfo, event: Box<dyn Event>) -> Self {
        Self {
            info,
            payload: Payload::Decoded(Arc::from(event)),
        }
    }

    /// Binds a lazily decoded payload to a position.
    #[must_use]
    pub fn lazy(info: AggregateInfo, event: LazyEvent) -> Self {
        Self {
            info,
            payload: Payload::Lazy(Arc::new(event)),
        }
    }

    /// Position of this event.
    #[must_use]
    pub fn info(&self) -> &AggregateInfo {
        &self.info
    }

    /// The payload, decoding it first if it is still raw.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if a lazy payload does not decode.
    pub fn event(&self) -> Result<&dyn Event, DomainError> {
        match &self.payload {
            Payload::Decoded(event) => Ok(event.as_ref()),
            Payload::Lazy(lazy) => lazy.event(),
        }
    }

    /// Wire name and raw bytes, for payloads that arrived serialized.
    #[must_use]
    pub fn raw(&self) -> Option<(&str, &[u8])> {
        match &self.payload {
            Payload::Decoded(_) => None,
            Payload::Lazy(lazy) => Some((lazy.name(), lazy.raw())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Noted {
        text: String,
    }

    impl Event for Noted {}

    fn decode_noted(raw: &[u8]) -> Result<Box<dyn Event>, serde_json::Error> {
        Ok(Box::new(serde_json::from_slice::<Noted>(raw)?))
    }

    #[test]
    fn test_incremented_keeps_identity() {
        let info = AggregateInfo::new("Counter", "c-1");

        let next = info.incremented().incremented();

        assert_eq!(next.version, 2);
        assert!(next.same_aggregate(&info));
        assert_eq!(next.to_string(), "Counter:c-1@2");
    }

    #[test]
    fn test_lazy_event_decodes_once_on_first_read() {
        // Arrange
        let lazy = LazyEvent::new("Noted", br#"{"text":"hi"}"#.to_vec(), decode_noted);
        assert!(!lazy.is_decoded());

        // Act
        let first = lazy.event().unwrap().downcast_ref::<Noted>().unwrap() as *const Noted;
        let second = lazy.event().unwrap().downcast_ref::<Noted>().unwrap() as *const Noted;

        // Assert
        assert!(lazy.is_decoded());
        assert_eq!(first, second);
    }

    #[test]
    fn test_lazy_event_reports_malformed_payload() {
        let lazy = LazyEvent::new("Noted", b"not json".to_vec(), decode_noted);

        let result = lazy.event();

        assert!(matches!(result, Err(DomainError::Serialization(_))));
        assert!(!lazy.is_decoded());
    }

    #[test]
    fn test_aggregate_event_exposes_raw_only_for_lazy_payloads() {
        let info = AggregateInfo::new("Notes", "n-1").incremented();
        let typed = AggregateEvent::new(info.clone(), Noted { text: "a".into() });
        let lazy = AggregateEvent::lazy(
            info,
            LazyEvent::new("Noted", br#"{"text":"b"}"#.to_vec(), decode_noted),
        );

        assert!(typed.raw().is_none());
        assert_eq!(lazy.raw().map(|(name, _)| name), Some("Noted"));
        let decoded = lazy.event().unwrap().downcast_ref::<Noted>().unwrap();
        assert_eq!(decoded.text, "b");
    }
}
