//! `VariantEngine` (spec.md §4.4): lazy materialization of
//! `(owner_id, resolution)` blobs, single-flighted within a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use resizr_util::Error;
use uuid::Uuid;

use crate::codec::ImageCodec;
use crate::hash_index::HashIndex;
use crate::image_record::ImageRecord;
use crate::metadata_repo::MetadataRepo;
use crate::object_store::ObjectStore;
use crate::resolution::Resolution;

type InflightKey = (Uuid, String);
type InflightFuture = Shared<BoxFuture<'static, Result<String, Error>>>;

/// Materializes variant blobs on demand. Holds the process-local
/// single-flight map described in spec.md §4.4/§5 and §9's "Global mutable
/// state" design note: an explicit, injectable component rather than a
/// hidden singleton.
pub struct VariantEngine {
    object_store: Arc<dyn ObjectStore>,
    codec: Arc<dyn ImageCodec>,
    pub(crate) metadata_repo: Arc<MetadataRepo>,
    hash_index: Arc<HashIndex>,
    thumbnail_size: u32,
    quality: u8,
    inflight: Mutex<HashMap<InflightKey, InflightFuture>>,
}

impl VariantEngine {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ImageCodec>,
        metadata_repo: Arc<MetadataRepo>,
        hash_index: Arc<HashIndex>,
        thumbnail_size: u32,
        quality: u8,
    ) -> Self {
        VariantEngine {
            object_store,
            codec,
            metadata_repo,
            hash_index,
            thumbnail_size,
            quality,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Guarantees the blob for `resolution` exists when this returns
    /// without error, and that `record.resolutions` (and the dedup
    /// record's `resolution_refs`) have been updated to reflect it.
    /// Returns the storage key.
    pub async fn ensure(&self, record: &ImageRecord, resolution: Resolution) -> Result<String, Error> {
        if resolution == Resolution::Original {
            return Ok(record.original_key());
        }

        let dimension_tag = resolution
            .dimension_tag(self.thumbnail_size)
            .expect("non-Original resolutions always have dimensions");
        let owner = record.owner_id();
        let key: InflightKey = (owner, dimension_tag);

        let fut = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let shared = Self::render_and_record(
                        self.object_store.clone(),
                        self.codec.clone(),
                        self.metadata_repo.clone(),
                        self.hash_index.clone(),
                        self.thumbnail_size,
                        self.quality,
                        record.clone(),
                        resolution,
                    )
                    .boxed()
                    .shared();
                    inflight.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };

        let result = fut.await;
        self.inflight.lock().unwrap().remove(&key);
        result
    }

    /// Opens a read stream for `resolution`, deriving it first if needed.
    pub async fn stream(
        &self,
        record: &ImageRecord,
        resolution: Resolution,
    ) -> Result<(BoxStream<'static, Result<Bytes, Error>>, crate::image_record::MimeType), Error> {
        let key = self.ensure(record, resolution).await?;
        let stream = self.object_store.get_stream(&key).await?;
        Ok((stream, record.mime_type))
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_and_record(
        object_store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ImageCodec>,
        metadata_repo: Arc<MetadataRepo>,
        hash_index: Arc<HashIndex>,
        thumbnail_size: u32,
        quality: u8,
        record: ImageRecord,
        resolution: Resolution,
    ) -> Result<String, Error> {
        let (width, height) = resolution
            .dimensions(thumbnail_size)
            .expect("non-Original resolutions always have dimensions");
        let dimension_tag = resolution.dimension_tag(thumbnail_size).unwrap();
        let full_tag = resolution.tag().unwrap();
        let storage_key = record.variant_key(&dimension_tag);

        if !object_store.exists(&storage_key).await? {
            let original = object_store.get(&record.original_key()).await?;
            let encoded = codec
                .resize_and_encode(&original, record.mime_type, width, height, quality)
                .await?;
            object_store
                .put(&storage_key, Bytes::from(encoded), record.mime_type.content_type())
                .await?;
        }

        match metadata_repo
            .update(record.id, |r| {
                r.add_resolution(&full_tag);
            })
            .await
        {
            Ok(_) => {}
            Err(Error::NotFound) => {
                // The record was deleted mid-derivation (§9 open question):
                // abandon without error; any blob we just wrote is picked
                // up by the orphan sweep.
                tracing::info!(image_id = %record.id, tag = %full_tag, "record vanished during derivation, abandoning");
                return Err(Error::NotFound);
            }
            Err(e) => return Err(e),
        }

        hash_index
            .link_resolution(&record.hash, &full_tag, record.id)
            .await?;

        Ok(storage_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::MAX_DIMENSION;
    use crate::testing::{InMemoryMetadataStore, InMemoryObjectStore, StubImageCodec};
    use resizr_util::data::ImageHash;

    fn engine() -> (VariantEngine, Arc<InMemoryObjectStore>) {
        let object_store = Arc::new(InMemoryObjectStore::new());
        let metadata_store: Arc<dyn crate::metadata_store::MetadataStore> =
            Arc::new(InMemoryMetadataStore::new());
        let metadata_repo = Arc::new(MetadataRepo::new(metadata_store.clone()));
        let hash_index = Arc::new(HashIndex::new(metadata_store));
        let codec = Arc::new(StubImageCodec);
        let engine = VariantEngine::new(
            object_store.clone(),
            codec,
            metadata_repo,
            hash_index,
            150,
            85,
        );
        (engine, object_store)
    }

    async fn sample_record(object_store: &InMemoryObjectStore) -> ImageRecord {
        let id = Uuid::new_v4();
        let hash = ImageHash::of(b"fake-bytes");
        let record = ImageRecord::new_original(
            id,
            "cat.jpg".to_string(),
            crate::image_record::MimeType::Jpeg,
            10,
            800,
            600,
            hash,
        );
        object_store
            .put(&record.original_key(), Bytes::from_static(b"fake-bytes"), "image/jpeg")
            .await
            .unwrap();
        record
    }

    #[tokio::test]
    async fn ensure_appends_tag_and_writes_blob_once() {
        let (engine, object_store) = engine();
        let record = sample_record(&object_store).await;

        let key = engine
            .ensure(&record, Resolution::Thumbnail)
            .await
            .unwrap();
        assert!(object_store.exists(&key).await.unwrap());

        let updated = engine
            .metadata_repo
            .get(record.id)
            .await
            .unwrap();
        assert_eq!(updated.resolutions, vec!["thumbnail".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_ensure_is_single_flight() {
        let (engine, object_store) = engine();
        let record = sample_record(&object_store).await;
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let engine = engine.clone();
            let record = record.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .ensure(&record, Resolution::parse("80x60", MAX_DIMENSION, MAX_DIMENSION).unwrap())
                    .await
            }));
        }
        let mut keys = Vec::new();
        for h in handles {
            keys.push(h.await.unwrap().unwrap());
        }
        assert!(keys.iter().all(|k| k == &keys[0]));

        let updated = engine.metadata_repo.get(record.id).await.unwrap();
        assert_eq!(updated.resolutions, vec!["80x60".to_string()]);
        assert_eq!(object_store.put_count(&keys[0]), 1);
    }
}
