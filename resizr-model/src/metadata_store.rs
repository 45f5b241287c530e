//! `MetadataStore` (spec.md §2) — the external durable K/V collaborator.
//! This module defines the port the rest of the crate programs against and
//! a Redis-compatible adapter. Every higher-level component
//! ([`crate::hash_index::HashIndex`], [`crate::metadata_repo::MetadataRepo`])
//! is written against the trait, never against `RedisMetadataStore`
//! directly, so the in-memory fake in [`crate::testing`] exercises the same
//! code paths in tests.

use async_trait::async_trait;
use redis::AsyncCommands;
use resizr_util::Error;

/// A value read from the store together with the opaque version token
/// needed to `compare_and_swap` it. Treat `version` as opaque; stores are
/// free to use a counter, a timestamp, or a content hash internally.
#[derive(Debug, Clone)]
pub struct VersionedValue {
    pub bytes: Vec<u8>,
    pub version: u64,
}

/// Durable K/V storage for `ImageRecord`s and `DedupRecord`s, with atomic
/// per-key compare-and-swap (spec.md §4.1, §4.2). Implementations MUST make
/// `put_if_absent` and `compare_and_swap` atomic with respect to each other
/// on the same key — this is the only consistency guarantee the rest of the
/// crate relies on.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, Error>;

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.get(key).await?.is_some())
    }

    /// Inserts `value` at `key` only if absent. Returns `Ok(false)` without
    /// mutating anything if the key is already present (the `AlreadyExists`
    /// case callers use to fall back to `link`, spec.md §4.1 `claim`).
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Error>;

    /// Atomically replaces `key`'s value with `value` iff its current
    /// version equals `expected_version`. Returns `Ok(false)` (not an
    /// error) on a version mismatch so callers drive their own bounded
    /// retry loop (spec.md §4.2, §9 "CAS-with-retry").
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
    ) -> Result<bool, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Appends `member` to the ordered index at `index_key` (used to back
    /// `MetadataRepo::list`, spec.md §6 "optional `image_ids`").
    async fn index_add(&self, index_key: &str, member: &str, score: i64) -> Result<(), Error>;
    async fn index_remove(&self, index_key: &str, member: &str) -> Result<(), Error>;
    async fn index_range(
        &self,
        index_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, Error>;
}

/// Lua script performing an atomic read-compare-write: the value at `KEYS[1]`
/// is a `"<version>\n<payload>"` envelope. Returns 1 and writes
/// `"<version+1>\n<ARGV[2]>"` iff the stored version equals `ARGV[1]`
/// (or the key is absent and `ARGV[1]` is `"0"`); returns 0 otherwise.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local expected = ARGV[1]
if current == false then
    if expected ~= "0" then
        return 0
    end
else
    local sep = string.find(current, "\n")
    local current_version = string.sub(current, 1, sep - 1)
    if current_version ~= expected then
        return 0
    end
end
local next_version = tonumber(expected) + 1
redis.call('SET', KEYS[1], tostring(next_version) .. "\n" .. ARGV[2])
return next_version
"#;

pub struct RedisMetadataStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisMetadataStore {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Storage(format!("invalid metadata store url: {}", e)))?;
        let manager = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| Error::Storage(format!("connecting to metadata store: {}", e)))?;
        Ok(RedisMetadataStore { manager })
    }

    fn encode(version: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = version.to_string().into_bytes();
        out.push(b'\n');
        out.extend_from_slice(payload);
        out
    }

    fn decode(raw: &[u8]) -> Result<VersionedValue, Error> {
        let pos = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Error::Internal("malformed metadata envelope".to_string()))?;
        let version: u64 = std::str::from_utf8(&raw[..pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Internal("malformed metadata envelope version".to_string()))?;
        Ok(VersionedValue {
            bytes: raw[pos + 1..].to_vec(),
            version,
        })
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, Error> {
        let mut conn = self.manager.clone();
        let raw: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::Storage(format!("metadata get {}: {}", key, e)))?;
        raw.map(|r| Self::decode(&r)).transpose()
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Error> {
        let mut conn = self.manager.clone();
        let envelope = Self::encode(1, &value);
        let set: bool = redis::cmd("SET")
            .arg(key)
            .arg(envelope)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Storage(format!("metadata put_if_absent {}: {}", key, e)))?;
        Ok(set)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
    ) -> Result<bool, Error> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(CAS_SCRIPT);
        let next_version: u64 = script
            .key(key)
            .arg(expected_version)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Storage(format!("metadata cas {}: {}", key, e)))?;
        Ok(next_version > 0)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| Error::Storage(format!("metadata delete {}: {}", key, e)))?;
        Ok(())
    }

    async fn index_add(&self, index_key: &str, member: &str, score: i64) -> Result<(), Error> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .zadd(index_key, member, score)
            .await
            .map_err(|e| Error::Storage(format!("metadata index_add {}: {}", index_key, e)))?;
        Ok(())
    }

    async fn index_remove(&self, index_key: &str, member: &str) -> Result<(), Error> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .zrem(index_key, member)
            .await
            .map_err(|e| Error::Storage(format!("metadata index_remove {}: {}", index_key, e)))?;
        Ok(())
    }

    async fn index_range(
        &self,
        index_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, Error> {
        let mut conn = self.manager.clone();
        let stop = offset as isize + limit as isize - 1;
        let members: Vec<String> = conn
            .zrange(index_key, offset as isize, stop)
            .await
            .map_err(|e| Error::Storage(format!("metadata index_range {}: {}", index_key, e)))?;
        Ok(members)
    }
}
