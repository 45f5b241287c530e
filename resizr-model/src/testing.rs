//! In-memory fakes of the three external ports, used by this crate's and
//! `resizr-api`'s tests so dedup/CAS/single-flight behavior is exercised
//! without a real Redis or S3-compatible store (§10.6).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use resizr_util::Error;

use crate::codec::ImageCodec;
use crate::image_record::MimeType;
use crate::metadata_store::{MetadataStore, VersionedValue};
use crate::object_store::ObjectStore;

#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: Mutex<HashMap<String, Bytes>>,
    put_counts: Mutex<HashMap<String, u32>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self, key: &str) -> u32 {
        *self.put_counts.lock().unwrap().get(key).unwrap_or(&0)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<(), Error> {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
        *self.put_counts.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, Error> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, Error>>, Error> {
        let bytes = self.get(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })))
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.blobs.lock().unwrap().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), Error> {
        self.blobs.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl_secs: u32) -> Result<String, Error> {
        Ok(format!("https://fake-object-store.test/{}?ttl={}", key, ttl_secs))
    }
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    values: Mutex<HashMap<String, VersionedValue>>,
    indexes: Mutex<HashMap<String, Vec<(i64, String)>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, Error> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Error> {
        let mut values = self.values.lock().unwrap();
        if values.contains_key(key) {
            Ok(false)
        } else {
            values.insert(
                key.to_string(),
                VersionedValue {
                    bytes: value,
                    version: 1,
                },
            );
            Ok(true)
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: Vec<u8>,
    ) -> Result<bool, Error> {
        let mut values = self.values.lock().unwrap();
        match values.get(key) {
            Some(current) if current.version == expected_version => {
                values.insert(
                    key.to_string(),
                    VersionedValue {
                        bytes: value,
                        version: expected_version + 1,
                    },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn index_add(&self, index_key: &str, member: &str, score: i64) -> Result<(), Error> {
        let mut indexes = self.indexes.lock().unwrap();
        let entries = indexes.entry(index_key.to_string()).or_default();
        entries.retain(|(_, m)| m != member);
        entries.push((score, member.to_string()));
        entries.sort_by_key(|(s, _)| *s);
        Ok(())
    }

    async fn index_remove(&self, index_key: &str, member: &str) -> Result<(), Error> {
        if let Some(entries) = self.indexes.lock().unwrap().get_mut(index_key) {
            entries.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn index_range(
        &self,
        index_key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, Error> {
        let indexes = self.indexes.lock().unwrap();
        let entries = match indexes.get(index_key) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        Ok(entries
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

/// A deterministic, non-decoding codec: treats every input as a valid
/// 800x600 JPEG and "resizes" by producing a small marker payload, so tests
/// can assert on dimensions/counts without shipping real image bytes.
pub struct StubImageCodec;

#[async_trait]
impl ImageCodec for StubImageCodec {
    async fn identify(&self, _bytes: &[u8]) -> Result<(MimeType, u32, u32), Error> {
        Ok((MimeType::Jpeg, 800, 600))
    }

    async fn resize_and_encode(
        &self,
        _bytes: &[u8],
        _mime_type: MimeType,
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Vec<u8>, Error> {
        Ok(format!("resized:{}x{}:{}", width, height, quality).into_bytes())
    }
}
