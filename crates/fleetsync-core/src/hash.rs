//! Content hashing of status payloads.
//!
//! The hash is BLAKE3 over a domain-separation prefix followed by the
//! canonical CBOR bytes of the payload, rendered as 64 lowercase hex
//! characters. Identical canonical bytes always give the same hash; any
//! semantic change to the payload changes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::canonical::canonical_bytes;
use crate::error::HashError;
use crate::resource::{Resource, ResourceKind};

const STATUS_DOMAIN: &[u8] = b"fleetsync-status-v1:";

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash arbitrary bytes under the status domain.
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(STATUS_DOMAIN);
        hasher.update(bytes);
        Self(*hasher.finalize().as_bytes())
    }

    /// Hash any serializable payload by its canonical form.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, HashError> {
        Ok(Self::digest(&canonical_bytes(value)?))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Fixed-width lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from the hex form.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash the status of a resource.
///
/// An absent status hashes as CBOR null, so it is distinct from every
/// populated status.
pub fn status_hash<K: ResourceKind>(resource: &Resource<K>) -> Result<ContentHash, HashError> {
    ContentHash::of(&resource.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceStatus};

    #[test]
    fn test_hex_is_fixed_width() {
        let hash = ContentHash::of(&DeviceStatus::default()).unwrap();
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_hex().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = ContentHash::digest(b"status");
        assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(ContentHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_status_hash_ignores_identity_and_version() {
        let status = DeviceStatus::default();
        let a = Device::with_status("dev-1", "1", status.clone());
        let b = Device::with_status("dev-2", "9", status);
        assert_eq!(status_hash(&a).unwrap(), status_hash(&b).unwrap());
    }

    #[test]
    fn test_status_hash_changes_with_status() {
        let mut status = DeviceStatus::default();
        let before = status_hash(&Device::with_status("dev-1", "1", status.clone())).unwrap();
        status.config.rendered_version = "2".into();
        let after = status_hash(&Device::with_status("dev-1", "1", status)).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_missing_status_differs_from_default() {
        let mut device = Device::with_status("dev-1", "1", DeviceStatus::default());
        let populated = status_hash(&device).unwrap();
        device.status = None;
        assert_ne!(status_hash(&device).unwrap(), populated);
    }
}
