//! Event codec: Resource <-> Envelope.
//!
//! One codec instance exists per direction of travel. The spec codec puts
//! `resource.spec` in the body, the status codec puts `resource.status`
//! there; the extension handling is shared.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::error::{DecodeError, EncodeError};
use crate::event::{extensions, Envelope, EventType, SubResource, JSON_CONTENT_TYPE, SPEC_VERSION};
use crate::resource::{Resource, ResourceKind};
use crate::types::{ResourceId, ResourceVersion};

/// Bidirectional mapping between a resource and an envelope for one
/// direction.
pub struct Codec<K: ResourceKind> {
    field: SubResource,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Clone for Codec<K> {
    fn clone(&self) -> Self {
        Self {
            field: self.field,
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> std::fmt::Debug for Codec<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("kind", &K::DATA_TYPE)
            .field("field", &self.field)
            .finish()
    }
}

impl<K: ResourceKind> Codec<K> {
    /// A codec for `field` with explicit clock and id source.
    pub fn new(field: SubResource, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            field,
            clock,
            ids,
            _kind: PhantomData,
        }
    }

    /// A codec for `field` stamped with wall-clock time and random UUIDs.
    pub fn system(field: SubResource) -> Self {
        Self::new(field, Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    /// The direction this codec carries.
    pub fn field(&self) -> SubResource {
        self.field
    }

    /// The `update_request` event type for this codec's direction.
    pub fn event_type(&self) -> EventType {
        EventType::update_request(K::DATA_TYPE, self.field)
    }

    /// Encode `resource` into a fresh envelope.
    pub fn encode(
        &self,
        source_id: &str,
        event_type: &EventType,
        resource: &Resource<K>,
    ) -> Result<Envelope, EncodeError> {
        if event_type.sub_resource != self.field {
            return Err(EncodeError::MismatchedEventType {
                expected: self.field,
                actual: event_type.sub_resource,
            });
        }

        let body = match self.field {
            SubResource::Spec => resource.spec.as_ref().map(serde_json::to_value),
            SubResource::Status => resource.status.as_ref().map(serde_json::to_value),
        };
        let data = body
            .ok_or_else(|| EncodeError::MissingPayload {
                resource_id: resource.id.to_string(),
                field: self.field,
            })?
            .map_err(|source| EncodeError::Serialize {
                field: self.field,
                source,
            })?;

        let mut attrs = BTreeMap::new();
        attrs.insert(extensions::RESOURCE_ID.to_owned(), resource.id.to_string());
        attrs.insert(extensions::RESOURCE_VERSION.to_owned(), resource.version.to_string());
        attrs.insert(extensions::CLUSTER_NAME.to_owned(), resource.id.to_string());
        if let Some(at) = resource.deletion_timestamp {
            attrs.insert(
                extensions::DELETION_TIMESTAMP.to_owned(),
                at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            );
        }

        Ok(Envelope {
            specversion: SPEC_VERSION.to_owned(),
            id: self.ids.next_id(),
            source: source_id.to_owned(),
            event_type: event_type.to_string(),
            time: self.clock.now(),
            datacontenttype: JSON_CONTENT_TYPE.to_owned(),
            data,
            extensions: attrs,
        })
    }

    /// Decode an envelope into a resource with only this codec's field set.
    pub fn decode(&self, envelope: &Envelope) -> Result<Resource<K>, DecodeError> {
        let version = envelope
            .extension(extensions::RESOURCE_VERSION)
            .ok_or(DecodeError::MissingExtension(extensions::RESOURCE_VERSION))?;
        let cluster_name = envelope
            .extension(extensions::CLUSTER_NAME)
            .ok_or(DecodeError::MissingExtension(extensions::CLUSTER_NAME))?;

        match envelope.parsed_type() {
            Ok(t) if t.data_type == K::DATA_TYPE && t.sub_resource == self.field => {}
            _ => return Err(DecodeError::UnexpectedEventType(envelope.event_type.clone())),
        }

        let deletion_timestamp = envelope
            .extension(extensions::DELETION_TIMESTAMP)
            .map(parse_timestamp)
            .transpose()?;

        let mut resource = Resource {
            id: ResourceId::new(cluster_name),
            version: ResourceVersion::new(version),
            deletion_timestamp,
            spec: None,
            status: None,
        };

        match self.field {
            SubResource::Spec => {
                let spec = serde_json::from_value(envelope.data.clone())
                    .map_err(DecodeError::MalformedPayload)?;
                resource.spec = Some(spec);
            }
            SubResource::Status => {
                let status = serde_json::from_value(envelope.data.clone())
                    .map_err(DecodeError::MalformedPayload)?;
                resource.status = Some(status);
            }
        }

        Ok(resource)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DecodeError::InvalidExtension {
            name: extensions::DELETION_TIMESTAMP,
            reason: e.to_string(),
        })
}
