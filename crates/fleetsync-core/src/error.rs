//! Error types for fleetsync core.

use thiserror::Error;

use crate::event::SubResource;

/// Errors raised while turning a resource into an event envelope.
///
/// An encode error means nothing was sent: no partial envelope is ever
/// returned to the caller.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The resource has no value for the field this codec transmits.
    #[error("resource {resource_id} has no {field} to encode")]
    MissingPayload {
        resource_id: String,
        field: SubResource,
    },

    /// The event type names a different direction than this codec carries.
    #[error("codec carries {expected} but event type is for {actual}")]
    MismatchedEventType {
        expected: SubResource,
        actual: SubResource,
    },

    /// The payload could not be serialized to JSON.
    #[error("failed to serialize {field} body: {source}")]
    Serialize {
        field: SubResource,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while turning an event envelope back into a resource.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A required extension attribute is absent.
    #[error("missing required extension: {0}")]
    MissingExtension(&'static str),

    /// An extension is present but its value cannot be parsed.
    #[error("invalid extension {name}: {reason}")]
    InvalidExtension { name: &'static str, reason: String },

    /// The event type does not belong to this codec.
    #[error("unexpected event type: {0}")]
    UnexpectedEventType(String),

    /// The body could not be deserialized into the expected payload.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
}

/// Errors raised while computing a content hash.
#[derive(Debug, Error)]
pub enum HashError {
    /// The value could not be lowered into the canonical data model.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The value contains something with no canonical form.
    #[error("unsupported value in canonical encoding: {0}")]
    Unsupported(&'static str),
}

/// Errors raised while parsing identifiers and event types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid event type {0:?}: expected <kind>/<sub-resource>/<action>")]
    EventType(String),

    #[error("unknown sub-resource: {0}")]
    SubResource(String),

    #[error("unknown action: {0}")]
    Action(String),
}
