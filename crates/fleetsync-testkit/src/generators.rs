//! Proptest generators for property-based testing.

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use fleetsync_core::{
    Condition, ConditionStatus, ConfigStatus, ContainerStatus, Device, DeviceOsSpec, DeviceSpec,
    DeviceStatus, MatchPatterns, OsStatus, Resource, ResourceVersion, SystemInfo,
    SystemdUnitStatus,
};

/// Generate a device name usable as a routing key.
pub fn device_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,31}".prop_map(String::from)
}

/// Generate a resource version counter.
pub fn resource_version() -> impl Strategy<Value = ResourceVersion> {
    (1u64..=1_000_000u64).prop_map(ResourceVersion::from)
}

/// Generate a whole-second timestamp between 2001 and 2033.
pub fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_000_000_000i64..=2_000_000_000i64)
        .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_default())
}

/// Generate short free-form text.
pub fn text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ._:/-]{0,24}".prop_map(String::from)
}

/// Generate a ConditionStatus.
pub fn condition_status() -> impl Strategy<Value = ConditionStatus> {
    prop_oneof![
        Just(ConditionStatus::True),
        Just(ConditionStatus::False),
        Just(ConditionStatus::Unknown),
    ]
}

/// Generate a status condition.
pub fn condition() -> impl Strategy<Value = Condition> {
    (
        prop_oneof![Just("Updating"), Just("Degraded"), Just("SpecValid")],
        condition_status(),
        proptest::option::of(text()),
        proptest::option::of(text()),
        proptest::option::of(timestamp()),
    )
        .prop_map(|(kind, status, reason, message, at)| Condition {
            condition_type: kind.to_owned(),
            status,
            reason,
            message,
            last_transition_time: at,
        })
}

/// Generate a device spec.
pub fn device_spec() -> impl Strategy<Value = DeviceSpec> {
    (
        (1u64..=10_000u64).prop_map(|v| v.to_string()),
        proptest::option::of(text()),
        proptest::option::of(text().prop_map(|image| DeviceOsSpec { image })),
        proptest::option::of(prop::collection::vec(text(), 0..4)),
    )
        .prop_map(|(rendered_version, config, os, patterns)| DeviceSpec {
            rendered_version,
            config,
            os,
            containers: patterns.map(|match_patterns| MatchPatterns { match_patterns }),
            systemd: None,
        })
}

/// Generate a device status.
pub fn device_status() -> impl Strategy<Value = DeviceStatus> {
    (
        prop::collection::vec(condition(), 0..3),
        proptest::option::of((text(), text(), text())),
        (0u64..=10_000u64).prop_map(|v| if v == 0 { String::new() } else { v.to_string() }),
        proptest::option::of(text()),
        prop::collection::vec((text(), text(), text()), 0..3),
        prop::collection::vec((text(), text(), text()), 0..3),
    )
        .prop_map(|(conditions, info, rendered_version, os, containers, units)| DeviceStatus {
            conditions,
            system_info: info.map(|(architecture, boot_id, operating_system)| SystemInfo {
                architecture,
                boot_id,
                operating_system,
            }),
            config: ConfigStatus { rendered_version },
            os: os.map(|image| OsStatus { image }),
            containers: containers
                .into_iter()
                .map(|(name, image, status)| ContainerStatus { name, image, status })
                .collect(),
            systemd_units: units
                .into_iter()
                .map(|(name, load_state, active_state)| SystemdUnitStatus {
                    name,
                    load_state,
                    active_state,
                })
                .collect(),
        })
}

/// Parameters for generating a device resource.
#[derive(Debug, Clone)]
pub struct DeviceParams {
    pub name: String,
    pub version: ResourceVersion,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub spec: DeviceSpec,
    pub status: DeviceStatus,
}

impl Arbitrary for DeviceParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            device_name(),
            resource_version(),
            proptest::option::of(timestamp()),
            device_spec(),
            device_status(),
        )
            .prop_map(|(name, version, deletion_timestamp, spec, status)| DeviceParams {
                name,
                version,
                deletion_timestamp,
                spec,
                status,
            })
            .boxed()
    }
}

/// Build a device carrying both payloads from parameters.
pub fn device_from_params(params: &DeviceParams) -> Device {
    Resource {
        id: params.name.as_str().into(),
        version: params.version.clone(),
        deletion_timestamp: params.deletion_timestamp,
        spec: Some(params.spec.clone()),
        status: Some(params.status.clone()),
    }
}
