//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Payloads are stored as CBOR
//! blobs, timestamps as RFC 3339 text.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use fleetsync_core::{ContentHash, DeviceSpec, DeviceStatus, OrgId, ResourceId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{DeviceRecord, StatusUpdate, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside a transaction on the blocking pool.
    async fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection mutex poisoned: {}", e)))?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Raw column values, converted to a record outside the rusqlite closure.
struct DeviceRow {
    org_id: String,
    name: String,
    resource_version: i64,
    spec: Option<Vec<u8>>,
    status: Option<Vec<u8>>,
    status_hash: Option<String>,
    deletion_timestamp: Option<String>,
    updated_at: String,
}

const SELECT_DEVICE: &str = "SELECT org_id, name, resource_version, spec, status, status_hash,
        deletion_timestamp, updated_at
    FROM devices";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRow> {
    Ok(DeviceRow {
        org_id: row.get("org_id")?,
        name: row.get("name")?,
        resource_version: row.get("resource_version")?,
        spec: row.get("spec")?,
        status: row.get("status")?,
        status_hash: row.get("status_hash")?,
        deletion_timestamp: row.get("deletion_timestamp")?,
        updated_at: row.get("updated_at")?,
    })
}

impl TryFrom<DeviceRow> for DeviceRecord {
    type Error = StoreError;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let org_id = OrgId::parse(&row.org_id)
            .map_err(|e| StoreError::InvalidData(format!("org_id {}: {}", row.org_id, e)))?;
        let resource_version = u64::try_from(row.resource_version)
            .map_err(|_| StoreError::InvalidData(format!("negative resource_version for {}", row.name)))?;
        let status_hash = row
            .status_hash
            .as_deref()
            .map(ContentHash::from_hex)
            .transpose()
            .map_err(|e| StoreError::InvalidData(format!("status_hash: {}", e)))?;

        Ok(DeviceRecord {
            org_id,
            name: ResourceId::new(row.name),
            resource_version,
            spec: row.spec.as_deref().map(decode_cbor::<DeviceSpec>).transpose()?,
            status: row.status.as_deref().map(decode_cbor::<DeviceStatus>).transpose()?,
            status_hash,
            deletion_timestamp: row.deletion_timestamp.as_deref().map(parse_time).transpose()?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

fn load_record(tx: &Transaction<'_>, org: &OrgId, name: &ResourceId) -> Result<Option<DeviceRecord>> {
    let row = tx
        .query_row(
            &format!("{} WHERE org_id = ?1 AND name = ?2", SELECT_DEVICE),
            params![org.to_string(), name.as_str()],
            read_row,
        )
        .optional()?;
    row.map(DeviceRecord::try_from).transpose()
}

fn save_record(tx: &Transaction<'_>, record: &DeviceRecord) -> Result<()> {
    let resource_version = i64::try_from(record.resource_version)
        .map_err(|_| StoreError::InvalidData("resource_version overflow".into()))?;

    tx.execute(
        "INSERT INTO devices (
            org_id, name, resource_version, spec, status, status_hash,
            deletion_timestamp, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(org_id, name) DO UPDATE SET
            resource_version = excluded.resource_version,
            spec = excluded.spec,
            status = excluded.status,
            status_hash = excluded.status_hash,
            deletion_timestamp = excluded.deletion_timestamp,
            updated_at = excluded.updated_at",
        params![
            record.org_id.to_string(),
            record.name.as_str(),
            resource_version,
            record.spec.as_ref().map(encode_cbor).transpose()?,
            record.status.as_ref().map(encode_cbor).transpose()?,
            record.status_hash.map(|h| h.to_hex()),
            record.deletion_timestamp.map(format_time),
            format_time(record.updated_at),
        ],
    )?;
    Ok(())
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("timestamp {}: {}", s, e)))
}

#[async_trait]
impl Store for SqliteStore {
    async fn update_status(
        &self,
        org: &OrgId,
        name: &ResourceId,
        status: &DeviceStatus,
    ) -> Result<StatusUpdate> {
        let hash = ContentHash::of(status)?;
        let (org, name, status) = (*org, name.clone(), status.clone());

        self.with_tx(move |tx| {
            let now = Utc::now();
            let mut record = load_record(tx, &org, &name)?
                .unwrap_or_else(|| DeviceRecord::new(org, name.clone(), now));
            let outcome = record.apply_status(&status, hash, now);
            if outcome.changed() {
                save_record(tx, &record)?;
            }
            Ok(outcome)
        })
        .await
    }

    async fn upsert_spec(
        &self,
        org: &OrgId,
        name: &ResourceId,
        spec: &DeviceSpec,
    ) -> Result<DeviceRecord> {
        let (org, name, spec) = (*org, name.clone(), spec.clone());

        self.with_tx(move |tx| {
            let now = Utc::now();
            let mut record = load_record(tx, &org, &name)?
                .unwrap_or_else(|| DeviceRecord::new(org, name.clone(), now));
            if record.apply_spec(&spec, now) {
                save_record(tx, &record)?;
            }
            Ok(record)
        })
        .await
    }

    async fn mark_deleted(
        &self,
        org: &OrgId,
        name: &ResourceId,
        at: DateTime<Utc>,
    ) -> Result<DeviceRecord> {
        let (org, name) = (*org, name.clone());

        self.with_tx(move |tx| {
            let mut record =
                load_record(tx, &org, &name)?.ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            record.apply_deletion(at, Utc::now());
            save_record(tx, &record)?;
            Ok(record)
        })
        .await
    }

    async fn get_device(&self, org: &OrgId, name: &ResourceId) -> Result<Option<DeviceRecord>> {
        let (org, name) = (*org, name.clone());
        self.with_tx(move |tx| load_record(tx, &org, &name)).await
    }

    async fn list_devices(&self, org: &OrgId) -> Result<Vec<DeviceRecord>> {
        let org = *org;

        self.with_tx(move |tx| {
            let mut stmt = tx.prepare(&format!("{} WHERE org_id = ?1 ORDER BY name", SELECT_DEVICE))?;
            let rows = stmt
                .query_map(params![org.to_string()], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(DeviceRecord::try_from).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::{Condition, ConditionStatus, DeviceOsSpec, SystemInfo};
    use chrono::TimeZone;

    fn status() -> DeviceStatus {
        DeviceStatus {
            conditions: vec![Condition {
                condition_type: "Updating".into(),
                status: ConditionStatus::False,
                reason: Some("Idle".into()),
                message: None,
                last_transition_time: Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()),
            }],
            system_info: Some(SystemInfo {
                architecture: "arm64".into(),
                boot_id: "b-1".into(),
                operating_system: "linux".into(),
            }),
            ..DeviceStatus::default()
        }
    }

    #[tokio::test]
    async fn test_status_roundtrip_and_dedup() {
        let store = SqliteStore::open_memory().unwrap();
        let name = ResourceId::new("dev-1");

        assert_eq!(
            store.update_status(&OrgId::NULL, &name, &status()).await.unwrap(),
            StatusUpdate::Created
        );
        assert_eq!(
            store.update_status(&OrgId::NULL, &name, &status()).await.unwrap(),
            StatusUpdate::Unchanged
        );

        let record = store.get_device(&OrgId::NULL, &name).await.unwrap().unwrap();
        assert_eq!(record.status, Some(status()));
        assert_eq!(record.status_hash, Some(ContentHash::of(&status()).unwrap()));
        assert_eq!(record.resource_version, 0);
    }

    #[tokio::test]
    async fn test_spec_and_deletion_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap();
        let name = ResourceId::new("dev-1");
        let spec = DeviceSpec {
            os: Some(DeviceOsSpec { image: "os:1".into() }),
            ..DeviceSpec::new("1")
        };

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_spec(&OrgId::NULL, &name, &spec).await.unwrap();
            store.mark_deleted(&OrgId::NULL, &name, at).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let record = store.get_device(&OrgId::NULL, &name).await.unwrap().unwrap();
        assert_eq!(record.spec, Some(spec));
        assert_eq!(record.resource_version, 2);
        assert_eq!(record.deletion_timestamp, Some(at));
    }

    #[tokio::test]
    async fn test_list_devices_ordered() {
        let store = SqliteStore::open_memory().unwrap();
        for name in ["dev-b", "dev-a"] {
            store
                .update_status(&OrgId::NULL, &ResourceId::new(name), &status())
                .await
                .unwrap();
        }
        let names: Vec<_> = store
            .list_devices(&OrgId::NULL)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name.into_string())
            .collect();
        assert_eq!(names, vec!["dev-a", "dev-b"]);
    }

    #[tokio::test]
    async fn test_mark_deleted_missing() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(matches!(
            store
                .mark_deleted(&OrgId::NULL, &ResourceId::new("ghost"), Utc::now())
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_status_writes() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut s = status();
                s.config.rendered_version = i.to_string();
                store
                    .update_status(&OrgId::NULL, &ResourceId::new(format!("dev-{}", i)), &s)
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), StatusUpdate::Created);
        }
        assert_eq!(store.list_devices(&OrgId::NULL).await.unwrap().len(), 8);
    }
}
