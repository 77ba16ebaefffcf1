//! Device payloads: the rendered spec pushed to an agent and the status it
//! reports back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{Resource, ResourceKind};

/// Marker for the device resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceKind;

impl ResourceKind for DeviceKind {
    const DATA_TYPE: &'static str = "io.fleetsync.devices.v1alpha1";
    type Spec = DeviceSpec;
    type Status = DeviceStatus;
}

/// A device resource.
pub type Device = Resource<DeviceKind>;

/// Fully rendered desired state for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// Version of the rendering this spec was produced from.
    pub rendered_version: String,
    /// Rendered configuration document, opaque to the sync layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<DeviceOsSpec>,
    /// Containers the agent should report on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<MatchPatterns>,
    /// Systemd units the agent should report on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd: Option<MatchPatterns>,
}

impl DeviceSpec {
    /// A spec with only the rendered version set.
    pub fn new(rendered_version: impl Into<String>) -> Self {
        Self {
            rendered_version: rendered_version.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOsSpec {
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPatterns {
    pub match_patterns: Vec<String>,
}

/// Observed state reported by a device's agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
    #[serde(default)]
    pub config: ConfigStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsStatus>,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    #[serde(default)]
    pub systemd_units: Vec<SystemdUnitStatus>,
}

impl DeviceStatus {
    /// The spec version the agent reports as applied, if any.
    pub fn rendered_version(&self) -> Option<&str> {
        let version = self.config.rendered_version.as_str();
        (!version.is_empty()).then_some(version)
    }

    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub architecture: String,
    pub boot_id: String,
    pub operating_system: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStatus {
    #[serde(default)]
    pub rendered_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsStatus {
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub image: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemdUnitStatus {
    pub name: String,
    pub load_state: String,
    pub active_state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_uses_camel_case() {
        let status = DeviceStatus {
            config: ConfigStatus {
                rendered_version: "4".into(),
            },
            systemd_units: vec![SystemdUnitStatus {
                name: "sshd.service".into(),
                load_state: "loaded".into(),
                active_state: "active".into(),
            }],
            ..DeviceStatus::default()
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["config"]["renderedVersion"], "4");
        assert_eq!(json["systemdUnits"][0]["activeState"], "active");
        assert!(json.get("systemInfo").is_none());
    }

    #[test]
    fn test_rendered_version_empty_is_none() {
        assert_eq!(DeviceStatus::default().rendered_version(), None);

        let mut status = DeviceStatus::default();
        status.config.rendered_version = "2".into();
        assert_eq!(status.rendered_version(), Some("2"));
    }

    #[test]
    fn test_condition_lookup() {
        let status = DeviceStatus {
            conditions: vec![Condition {
                condition_type: "Updating".into(),
                status: ConditionStatus::False,
                reason: None,
                message: None,
                last_transition_time: None,
            }],
            ..DeviceStatus::default()
        };
        assert_eq!(
            status.condition("Updating").map(|c| c.status),
            Some(ConditionStatus::False)
        );
        assert!(status.condition("Degraded").is_none());
    }

    #[test]
    fn test_spec_deserializes_minimal_body() {
        let spec: DeviceSpec = serde_json::from_str(r#"{"renderedVersion":"1"}"#).unwrap();
        assert_eq!(spec, DeviceSpec::new("1"));
    }
}
