//! Whole-store snapshots.
//!
//! ## File Layout
//!
//! ```text
//! entry count (u64)
//! repeated per entry:
//!   key length (i64) + UTF-8 key bytes
//!   value             (see protocol::snapshot)
//!   has expiry (u8)   0 or 1
//!   expiry (i64)      nanoseconds since the Unix epoch, only when flag is 1
//! ```
//!
//! All integers are little-endian.

use super::engine::{Entry, StorageEngine};
use crate::protocol::snapshot::{
    decode_value, encode_value, get_i64, get_string, get_u64, get_u8, put_bytes, SnapshotError,
};
use bytes::{Buf, BufMut};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

impl StorageEngine {
    /// Encodes every live entry into a snapshot buffer.
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let now = SystemTime::now();
        let live: Vec<_> = self.iter_live(now).collect();

        let mut buf = Vec::with_capacity(8 + live.len() * 32);
        buf.put_u64_le(live.len() as u64);
        for (key, entry) in live {
            put_bytes(&mut buf, key.as_bytes());
            encode_value(&entry.value, &mut buf);
            match entry.expires_at {
                Some(at) => {
                    buf.put_u8(1);
                    buf.put_i64_le(to_unix_nanos(at));
                }
                None => buf.put_u8(0),
            }
        }
        buf
    }

    /// Rebuilds an engine from a snapshot buffer.
    ///
    /// Entries whose expiry has passed since the snapshot was taken are kept;
    /// they disappear the first time they are looked at.
    pub fn decode_snapshot(mut buf: &[u8]) -> Result<Self, SnapshotError> {
        let count = get_u64(&mut buf)?;
        let mut engine = StorageEngine::new();

        for _ in 0..count {
            let key = get_string(&mut buf)?;
            let value = decode_value(&mut buf)?;
            let expires_at = match get_u8(&mut buf)? {
                0 => None,
                1 => Some(from_unix_nanos(get_i64(&mut buf)?)),
                flag => return Err(SnapshotError::InvalidExpiryFlag(flag)),
            };
            engine.insert_entry(key, Entry::new(value, expires_at));
        }

        if buf.has_remaining() {
            return Err(SnapshotError::TrailingBytes(buf.remaining()));
        }
        Ok(engine)
    }

    /// Writes a snapshot to `path`.
    ///
    /// The data goes to a sibling temporary file first and is renamed over
    /// `path`, so a crash never leaves a half-written snapshot behind.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let data = self.encode_snapshot();
        let tmp = temp_path(path);

        std::fs::write(&tmp, &data)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = data.len(), "Snapshot written");
        Ok(())
    }

    /// Reads a snapshot from `path`.
    ///
    /// A missing file is reported as [`SnapshotError::NotFound`].
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(SnapshotError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let engine = Self::decode_snapshot(&data)?;
        debug!(path = %path.display(), keys = engine.len(), "Snapshot loaded");
        Ok(engine)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Nanoseconds between the Unix epoch and `at`, if that fits in an `i64`.
///
/// This is the range of deadlines a snapshot can hold, roughly the years
/// 1678 to 2262.
pub fn unix_nanos(at: SystemTime) -> Option<i64> {
    match at.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).ok(),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .ok()
            .and_then(i64::checked_neg),
    }
}

/// Like [`unix_nanos`], but clamps out-of-range deadlines so a key is never
/// flipped from "far future" to "already expired".
fn to_unix_nanos(at: SystemTime) -> i64 {
    unix_nanos(at).unwrap_or(if at > UNIX_EPOCH { i64::MAX } else { i64::MIN })
}

fn from_unix_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespValue;
    use bytes::Bytes;

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn sample_engine() -> StorageEngine {
        let mut engine = StorageEngine::new();
        engine.set("name".into(), bulk("Ariz"), None);
        engine.set("empty".into(), bulk(""), None);
        engine.set("nil".into(), RespValue::null(), None);
        engine.set(
            "session".into(),
            bulk("token"),
            Some(SystemTime::now() + Duration::from_secs(3600)),
        );
        engine.set(
            "list".into(),
            RespValue::array(vec![bulk("a"), RespValue::array(vec![]), RespValue::null_array()]),
            None,
        );
        engine.set("status".into(), RespValue::simple_string("OK"), None);
        engine.set("failure".into(), RespValue::error("ERR", "boom"), None);
        engine.set("int".into(), RespValue::Integer(-5), None);
        engine
    }

    fn sorted(engine: StorageEngine) -> Vec<(String, Entry)> {
        let mut entries: Vec<_> = engine.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    #[test]
    fn test_snapshot_roundtrip_in_memory() {
        let engine = sample_engine();
        let encoded = engine.encode_snapshot();
        let restored = StorageEngine::decode_snapshot(&encoded).unwrap();
        assert_eq!(sorted(restored), sorted(engine));
    }

    #[test]
    fn test_empty_snapshot() {
        let encoded = StorageEngine::new().encode_snapshot();
        assert_eq!(encoded, 0u64.to_le_bytes().to_vec());
        assert!(StorageEngine::decode_snapshot(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_entry_layout() {
        let nanos: i64 = 4_000_000_000_123_456_789;
        let mut engine = StorageEngine::new();
        engine.set(
            "k".into(),
            RespValue::Integer(7),
            Some(UNIX_EPOCH + Duration::from_nanos(nanos as u64)),
        );

        let mut expected = Vec::new();
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&1i64.to_le_bytes());
        expected.push(b'k');
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(&7i64.to_le_bytes());
        expected.push(1);
        expected.extend_from_slice(&nanos.to_le_bytes());

        assert_eq!(engine.encode_snapshot(), expected);
    }

    #[test]
    fn test_expired_entries_skipped_on_save() {
        let mut engine = StorageEngine::new();
        engine.set("live".into(), bulk("v"), None);
        engine.set("dead".into(), bulk("v"), Some(SystemTime::now() - Duration::from_secs(1)));

        let restored = StorageEngine::decode_snapshot(&engine.encode_snapshot()).unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");

        let engine = sample_engine();
        engine.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = StorageEngine::load(&path).unwrap();
        assert_eq!(sorted(loaded), sorted(engine));
    }

    #[test]
    fn test_save_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");

        sample_engine().save(&path).unwrap();
        let mut small = StorageEngine::new();
        small.set("only".into(), bulk("one"), None);
        small.save(&path).unwrap();

        let loaded = StorageEngine::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = StorageEngine::load(&dir.path().join("absent.tkv"));
        assert!(matches!(result, Err(SnapshotError::NotFound)));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");

        let mut data = sample_engine().encode_snapshot();
        data.truncate(data.len() - 3);
        std::fs::write(&path, &data).unwrap();
        assert!(matches!(
            StorageEngine::load(&path),
            Err(SnapshotError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut data = StorageEngine::new().encode_snapshot();
        data.push(0);
        assert!(matches!(
            StorageEngine::decode_snapshot(&data),
            Err(SnapshotError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_bad_expiry_flag() {
        let mut data = Vec::new();
        data.put_u64_le(1);
        put_bytes(&mut data, b"k");
        encode_value(&RespValue::Integer(1), &mut data);
        data.put_u8(2);
        assert!(matches!(
            StorageEngine::decode_snapshot(&data),
            Err(SnapshotError::InvalidExpiryFlag(2))
        ));
    }

    #[test]
    fn test_unix_nanos_conversion() {
        let at = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_123_456_789);
        assert_eq!(from_unix_nanos(to_unix_nanos(at)), at);

        let before = UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(to_unix_nanos(before), -5_000_000_000);
        assert_eq!(from_unix_nanos(-5_000_000_000), before);
    }

    #[test]
    fn test_far_future_expiry_survives_snapshot() {
        // Year 2286, past the last instant an i64 of nanoseconds can hold
        let far = UNIX_EPOCH + Duration::from_secs(10_000_000_000);
        assert_eq!(unix_nanos(far), None);

        let mut engine = StorageEngine::new();
        engine.set("k".into(), bulk("v"), Some(far));

        let mut loaded = StorageEngine::decode_snapshot(&engine.encode_snapshot()).unwrap();
        assert_eq!(loaded.get("k"), Some(&bulk("v")));
        let entries: Vec<_> = loaded.into_iter().collect();
        let expires_at = entries[0].1.expires_at.unwrap();
        assert!(expires_at > SystemTime::now() + Duration::from_secs(100 * 365 * 24 * 3600));
    }

    #[test]
    fn test_unix_nanos_range() {
        assert_eq!(unix_nanos(UNIX_EPOCH), Some(0));
        let last = UNIX_EPOCH + Duration::from_nanos(i64::MAX as u64);
        assert_eq!(unix_nanos(last), Some(i64::MAX));
        assert_eq!(unix_nanos(last + Duration::from_nanos(1)), None);
    }
}
