//! Trait implemented by every typed event payload.

use serde::{de::DeserializeOwned, Serialize};

/// A typed payload that can travel inside an [`EventEnvelope`](crate::EventEnvelope).
///
/// The event type tag is the discriminator stored in the envelope; the topic
/// is resolved through the [`EventCatalog`](crate::EventCatalog), never
/// hard-wired into the payload type.
///
/// # Example
///
/// ```rust
/// use event_bus::DomainEvent;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct CardBlocked {
///     card_id: i64,
/// }
///
/// impl DomainEvent for CardBlocked {
///     const EVENT_TYPE: &'static str = "CardBlocked";
///
///     fn partition_key(&self) -> String {
///         self.card_id.to_string()
///     }
/// }
/// ```
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Schema tag written to `event_type`.
    const EVENT_TYPE: &'static str;

    /// Identity of the entity this event is about.
    fn partition_key(&self) -> String;
}
