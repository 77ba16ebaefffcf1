//! Event envelope and event type string.
//!
//! The envelope follows the CloudEvents attribute set. Identity and version
//! travel as string extensions outside the body, so routing and dedup can
//! inspect them without deserializing the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// CloudEvents spec version stamped on every envelope.
pub const SPEC_VERSION: &str = "1.0";

/// Content type of every envelope body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Extension attribute names.
pub mod extensions {
    pub const RESOURCE_ID: &str = "resourceid";
    pub const RESOURCE_VERSION: &str = "resourceversion";
    pub const CLUSTER_NAME: &str = "clustername";
    pub const DELETION_TIMESTAMP: &str = "deletiontimestamp";
}

/// Which half of a resource an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubResource {
    Spec,
    Status,
}

impl SubResource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Status => "status",
        }
    }

    /// The opposite direction.
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Spec => Self::Status,
            Self::Status => Self::Spec,
        }
    }
}

impl fmt::Display for SubResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubResource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec" => Ok(Self::Spec),
            "status" => Ok(Self::Status),
            other => Err(ParseError::SubResource(other.to_owned())),
        }
    }
}

/// What the sender asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    UpdateRequest,
}

impl EventAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateRequest => "update_request",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update_request" => Ok(Self::UpdateRequest),
            other => Err(ParseError::Action(other.to_owned())),
        }
    }
}

/// Parsed form of `"<resource-kind>/<sub-resource>/<action>"`.
///
/// The kind segment may itself contain slashes, so parsing splits from the
/// right.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventType {
    pub data_type: String,
    pub sub_resource: SubResource,
    pub action: EventAction,
}

impl EventType {
    pub fn new(data_type: impl Into<String>, sub_resource: SubResource, action: EventAction) -> Self {
        Self {
            data_type: data_type.into(),
            sub_resource,
            action,
        }
    }

    /// An `update_request` for `sub_resource` of the given kind.
    pub fn update_request(data_type: impl Into<String>, sub_resource: SubResource) -> Self {
        Self::new(data_type, sub_resource, EventAction::UpdateRequest)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.data_type, self.sub_resource, self.action)
    }
}

impl FromStr for EventType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '/');
        let (Some(action), Some(sub_resource), Some(data_type)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::EventType(s.to_owned()));
        };
        if data_type.is_empty() {
            return Err(ParseError::EventType(s.to_owned()));
        }
        Ok(Self {
            data_type: data_type.to_owned(),
            sub_resource: sub_resource.parse()?,
            action: action.parse()?,
        })
    }
}

/// Transport-neutral event wrapper.
///
/// Serializes to CloudEvents structured-mode JSON, with extensions
/// flattened to top-level string attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, String>,
}

impl Envelope {
    /// Look up an extension attribute.
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    /// Parse the `type` attribute.
    pub fn parsed_type(&self) -> Result<EventType, ParseError> {
        self.event_type.parse()
    }

    /// The routing key, if present.
    pub fn cluster_name(&self) -> Option<&str> {
        self.extension(extensions::CLUSTER_NAME)
    }

    /// Serialize to structured-mode JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse structured-mode JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
