//! `ImageService` (spec.md §4.5): the orchestration layer the HTTP handlers
//! call into. Ties `Deduper`, `VariantEngine`, `MetadataRepo` and
//! `HashIndex` together; no component here talks to an external store
//! directly.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use resizr_util::Error;
use uuid::Uuid;

use crate::deduper::Deduper;
use crate::hash_index::HashIndex;
use crate::image_record::{ImageRecord, MimeType};
use crate::metadata_repo::MetadataRepo;
use crate::object_store::ObjectStore;
use crate::resolution::Resolution;
use crate::variant_engine::VariantEngine;

/// Upper bound on `presign`'s `ttl_secs`: 7 days (spec.md §4.5, §8).
pub const MAX_PRESIGN_TTL_SECS: u32 = 7 * 24 * 60 * 60;

pub struct UploadResult {
    pub id: Uuid,
    pub resolutions: Vec<String>,
}

pub struct PresignResult {
    pub url: String,
    pub expires_in: u32,
}

pub struct ImageService {
    object_store: Arc<dyn ObjectStore>,
    metadata_repo: Arc<MetadataRepo>,
    hash_index: Arc<HashIndex>,
    deduper: Deduper,
    variant_engine: VariantEngine,
    thumbnail_size: u32,
    max_width: u32,
    max_height: u32,
}

impl ImageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        metadata_repo: Arc<MetadataRepo>,
        hash_index: Arc<HashIndex>,
        deduper: Deduper,
        variant_engine: VariantEngine,
        thumbnail_size: u32,
        max_width: u32,
        max_height: u32,
    ) -> Self {
        ImageService {
            object_store,
            metadata_repo,
            hash_index,
            deduper,
            variant_engine,
            thumbnail_size,
            max_width,
            max_height,
        }
    }

    /// Ingests `bytes`, then renders `thumbnail` plus every requested
    /// resolution before returning (spec.md §4.3 step 5, §8 scenario 1).
    /// A failure rendering any individual variant (including `thumbnail`)
    /// does not fail the upload: it is logged as a warning and simply
    /// omitted from the returned `resolutions` list.
    pub async fn upload(
        &self,
        filename: String,
        bytes: Bytes,
        requested: &[String],
    ) -> Result<UploadResult, Error> {
        let record = self.deduper.ingest(filename, bytes).await?;

        self.try_ensure(&record, Resolution::Thumbnail).await;
        for raw in requested {
            match Resolution::parse(raw, self.max_width, self.max_height) {
                Ok(Resolution::Original) => {}
                Ok(resolution) => self.try_ensure(&record, resolution).await,
                Err(e) => {
                    tracing::warn!(image_id = %record.id, requested = %raw, error = %e, "skipping unparseable requested resolution");
                }
            }
        }

        let final_record = self.metadata_repo.get(record.id).await?;
        Ok(UploadResult {
            id: final_record.id,
            resolutions: final_record.resolutions,
        })
    }

    /// Derives `resolution` for `record`, logging and swallowing any error
    /// rather than propagating it (spec.md §4.3 step 5: individual variant
    /// failures are warnings, not upload failures).
    async fn try_ensure(&self, record: &ImageRecord, resolution: Resolution) {
        if let Err(e) = self.variant_engine.ensure(record, resolution.clone()).await {
            tracing::warn!(image_id = %record.id, resolution = ?resolution, error = %e, "variant derivation failed during upload");
        }
    }

    pub async fn get_metadata(&self, id: Uuid) -> Result<ImageRecord, Error> {
        self.metadata_repo.get(id).await
    }

    /// Resolves `raw_resolution` (grammar or alias), deriving it if needed,
    /// and opens a read stream plus the record's mime type.
    pub async fn stream(
        &self,
        id: Uuid,
        raw_resolution: &str,
    ) -> Result<(BoxStream<'static, Result<Bytes, Error>>, MimeType), Error> {
        let record = self.metadata_repo.get(id).await?;
        let resolution = self.resolve_resolution(&record, raw_resolution)?;
        self.variant_engine.stream(&record, resolution).await
    }

    /// Derives `raw_resolution` if needed and mints a presigned URL for it.
    pub async fn presign(
        &self,
        id: Uuid,
        raw_resolution: &str,
        ttl_secs: u32,
    ) -> Result<PresignResult, Error> {
        if ttl_secs == 0 || ttl_secs > MAX_PRESIGN_TTL_SECS {
            return Err(Error::Validation("expires_in out of bounds".to_string()));
        }
        let record = self.metadata_repo.get(id).await?;
        let resolution = self.resolve_resolution(&record, raw_resolution)?;
        let key = self.variant_engine.ensure(&record, resolution).await?;
        let url = self.object_store.presign_get(&key, ttl_secs).await?;
        Ok(PresignResult {
            url,
            expires_in: ttl_secs,
        })
    }

    /// Unlinks `id` from its dedup record; if that drains the last
    /// reference, sweeps every blob under the (former) master prefix and
    /// drops the dedup record. Always deletes the `ImageRecord` itself.
    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        let record = self.metadata_repo.get(id).await?;
        let (_, orphaned) = self.hash_index.unlink(&record.hash, id).await?;
        if orphaned {
            self.object_store.delete_prefix(&record.prefix()).await?;
            self.hash_index.drop_record(&record.hash).await?;
        }
        self.metadata_repo.delete(id).await
    }

    /// Removes `tag` from `id`'s rendered resolutions; deletes the
    /// underlying blob once no referencer needs it anymore. `original`
    /// cannot be removed this way (I5).
    pub async fn delete_resolution(&self, id: Uuid, tag: &str) -> Result<(), Error> {
        if tag == "original" {
            return Err(Error::Validation("cannot delete the original resolution".to_string()));
        }
        let record = self.metadata_repo.get(id).await?;
        let resolution = Resolution::parse(tag, self.max_width, self.max_height)?;

        let (_, drained) = self.hash_index.unlink_resolution(&record.hash, tag, id).await?;
        self.metadata_repo
            .update(id, |r| {
                r.remove_resolution(tag);
            })
            .await?;

        if drained {
            let dimension_tag = resolution
                .dimension_tag(self.thumbnail_size)
                .ok_or_else(|| Error::Internal("resolved tag has no dimensions".to_string()))?;
            let key = record.variant_key(&dimension_tag);
            self.object_store.delete(&key).await?;
        }
        Ok(())
    }

    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<ImageRecord>, Error> {
        self.metadata_repo.list(offset, limit).await
    }

    /// Best-effort reconciliation (spec.md §4.3, §11): pages through every
    /// claimed hash and reclaims the ones whose `master_image_id` no longer
    /// resolves to a live `ImageRecord` — the result of a crash between
    /// unlinking a master and either promoting the next referencer or
    /// sweeping an orphaned hash's blobs. Returns the number of hashes
    /// reclaimed (storage prefix deleted, dedup record dropped).
    pub async fn sweep_orphans(&self, page_size: usize) -> Result<usize, Error> {
        let mut reclaimed = 0;
        let mut offset = 0;
        loop {
            let page = self.hash_index.list_page(offset, page_size).await?;
            if page.is_empty() {
                break;
            }
            for record in &page {
                reclaimed += self.sweep_one(record).await;
            }
            offset += page.len();
        }
        Ok(reclaimed)
    }

    /// Reconciles a single `DedupRecord`; returns `1` if it was reclaimed.
    async fn sweep_one(&self, record: &crate::dedup_record::DedupRecord) -> usize {
        if self.metadata_repo.exists(record.master_image_id).await.unwrap_or(false) {
            return 0;
        }

        let mut live_referencer = None;
        for candidate in &record.referencing_ids {
            if *candidate == record.master_image_id {
                continue;
            }
            if self.metadata_repo.exists(*candidate).await.unwrap_or(false) {
                live_referencer = Some(*candidate);
                break;
            }
        }

        match live_referencer {
            Some(new_master) => {
                if let Err(e) = self.hash_index.promote_master(&record.hash, new_master).await {
                    tracing::warn!(hash = %record.hash, error = %e, "orphan sweep failed to promote new master");
                }
                0
            }
            None => {
                tracing::warn!(hash = %record.hash, master_image_id = %record.master_image_id, "orphan sweep reclaiming dedup record with no live referencer");
                if let Err(e) = self.object_store.delete_prefix(&format!("images/{}/", record.master_image_id)).await {
                    tracing::warn!(hash = %record.hash, error = %e, "orphan sweep failed to delete storage prefix");
                    return 0;
                }
                if let Err(e) = self.hash_index.drop_record(&record.hash).await {
                    tracing::warn!(hash = %record.hash, error = %e, "orphan sweep failed to drop dedup record");
                    return 0;
                }
                1
            }
        }
    }

    /// Resolves a path segment against grammar first, then bare-alias
    /// lookup against the record's already-rendered tags (§4.4 step 1).
    fn resolve_resolution(&self, record: &ImageRecord, raw: &str) -> Result<Resolution, Error> {
        match Resolution::parse(raw, self.max_width, self.max_height) {
            Ok(resolution) => Ok(resolution),
            Err(e) => Resolution::resolve_alias(raw, &record.resolutions).ok_or(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ImageCodec;
    use crate::metadata_store::MetadataStore;
    use crate::testing::{InMemoryMetadataStore, InMemoryObjectStore, StubImageCodec};
    use resizr_util::data::ImageHash;

    fn service() -> (ImageService, Arc<InMemoryObjectStore>) {
        let object_store = Arc::new(InMemoryObjectStore::new());
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let metadata_repo = Arc::new(MetadataRepo::new(metadata_store.clone()));
        let hash_index = Arc::new(HashIndex::new(metadata_store));
        let codec: Arc<dyn ImageCodec> = Arc::new(StubImageCodec);

        let deduper = Deduper::new(
            object_store.clone(),
            codec.clone(),
            metadata_repo.clone(),
            hash_index.clone(),
            10 * 1024 * 1024,
        );
        let variant_engine = VariantEngine::new(
            object_store.clone(),
            codec,
            metadata_repo.clone(),
            hash_index.clone(),
            150,
            85,
        );
        let service = ImageService::new(
            object_store.clone(),
            metadata_repo,
            hash_index,
            deduper,
            variant_engine,
            150,
            crate::resolution::MAX_DIMENSION,
            crate::resolution::MAX_DIMENSION,
        );
        (service, object_store)
    }

    #[tokio::test]
    async fn upload_renders_thumbnail_and_requested_resolutions() {
        let (service, _objects) = service();
        let result = service
            .upload(
                "cat.jpg".to_string(),
                Bytes::from_static(b"fake-bytes"),
                &["50x40".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(result.resolutions, vec!["thumbnail".to_string(), "50x40".to_string()]);
    }

    /// A codec whose `resize_and_encode` fails for one specific width, so
    /// tests can exercise the "one variant fails" path without touching the
    /// others.
    struct FailingCodec {
        fails_width: u32,
    }

    #[async_trait::async_trait]
    impl ImageCodec for FailingCodec {
        async fn identify(&self, bytes: &[u8]) -> Result<(MimeType, u32, u32), Error> {
            StubImageCodec.identify(bytes).await
        }

        async fn resize_and_encode(
            &self,
            bytes: &[u8],
            mime_type: MimeType,
            width: u32,
            height: u32,
            quality: u8,
        ) -> Result<Vec<u8>, Error> {
            if width == self.fails_width {
                return Err(Error::Processing("simulated encode failure".to_string()));
            }
            StubImageCodec.resize_and_encode(bytes, mime_type, width, height, quality).await
        }
    }

    #[tokio::test]
    async fn upload_omits_but_does_not_fail_on_a_bad_variant() {
        let object_store = Arc::new(InMemoryObjectStore::new());
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let metadata_repo = Arc::new(MetadataRepo::new(metadata_store.clone()));
        let hash_index = Arc::new(HashIndex::new(metadata_store));
        let codec: Arc<dyn ImageCodec> = Arc::new(FailingCodec { fails_width: 50 });

        let deduper = Deduper::new(
            object_store.clone(),
            codec.clone(),
            metadata_repo.clone(),
            hash_index.clone(),
            10 * 1024 * 1024,
        );
        let variant_engine = VariantEngine::new(
            object_store.clone(),
            codec,
            metadata_repo.clone(),
            hash_index.clone(),
            150,
            85,
        );
        let service = ImageService::new(
            object_store,
            metadata_repo,
            hash_index,
            deduper,
            variant_engine,
            150,
            crate::resolution::MAX_DIMENSION,
            crate::resolution::MAX_DIMENSION,
        );

        let result = service
            .upload(
                "cat.jpg".to_string(),
                Bytes::from_static(b"fake-bytes"),
                &["50x40".to_string(), "200x100".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(
            result.resolutions,
            vec!["thumbnail".to_string(), "200x100".to_string()]
        );
    }

    #[tokio::test]
    async fn dedup_second_upload_shares_the_same_owner() {
        let (service, objects) = service();
        let first = service
            .upload("a.jpg".to_string(), Bytes::from_static(b"same-bytes"), &[])
            .await
            .unwrap();
        let second = service
            .upload("b.jpg".to_string(), Bytes::from_static(b"same-bytes"), &[])
            .await
            .unwrap();

        let second_record = service.get_metadata(second.id).await.unwrap();
        assert!(second_record.is_deduped);
        assert_eq!(second_record.shared_image_id, Some(first.id));
        assert!(objects.exists(&format!("images/{}/original.jpg", first.id)).await.unwrap());
        assert!(!objects.exists(&format!("images/{}/original.jpg", second.id)).await.unwrap());
    }

    #[tokio::test]
    async fn delete_last_reference_sweeps_blobs_and_record() {
        let (service, objects) = service();
        let uploaded = service
            .upload("a.jpg".to_string(), Bytes::from_static(b"solo-bytes"), &[])
            .await
            .unwrap();
        let key = format!("images/{}/original.jpg", uploaded.id);
        assert!(objects.exists(&key).await.unwrap());

        service.delete(uploaded.id).await.unwrap();

        assert!(matches!(
            service.get_metadata(uploaded.id).await,
            Err(Error::NotFound)
        ));
        assert!(!objects.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_orphans_reclaims_a_dangling_master() {
        let (service, objects) = service();
        let uploaded = service
            .upload("a.jpg".to_string(), Bytes::from_static(b"orphan-bytes"), &[])
            .await
            .unwrap();
        let key = format!("images/{}/original.jpg", uploaded.id);
        assert!(objects.exists(&key).await.unwrap());

        // Simulate a crash after the ImageRecord was deleted directly
        // (bypassing `delete`'s unlink step), leaving the DedupRecord's
        // master pointing at nothing.
        service.metadata_repo.delete(uploaded.id).await.unwrap();

        let reclaimed = service.sweep_orphans(10).await.unwrap();
        assert_eq!(reclaimed, 1);
        assert!(!objects.exists(&key).await.unwrap());
        assert!(service.hash_index.lookup(&ImageHash::of(b"orphan-bytes")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_orphans_promotes_a_live_referencer_instead_of_reclaiming() {
        let (service, objects) = service();
        let first = service
            .upload("a.jpg".to_string(), Bytes::from_static(b"shared-bytes"), &[])
            .await
            .unwrap();
        let second = service
            .upload("b.jpg".to_string(), Bytes::from_static(b"shared-bytes"), &[])
            .await
            .unwrap();
        let key = format!("images/{}/original.jpg", first.id);

        service.metadata_repo.delete(first.id).await.unwrap();

        let reclaimed = service.sweep_orphans(10).await.unwrap();
        assert_eq!(reclaimed, 0);
        assert!(objects.exists(&key).await.unwrap());

        let dedup = service
            .hash_index
            .lookup(&ImageHash::of(b"shared-bytes"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dedup.master_image_id, second.id);
    }

    #[tokio::test]
    async fn presign_rejects_ttl_out_of_bounds() {
        let (service, _objects) = service();
        let uploaded = service
            .upload("a.jpg".to_string(), Bytes::from_static(b"bytes-here"), &[])
            .await
            .unwrap();
        assert!(matches!(
            service.presign(uploaded.id, "original", MAX_PRESIGN_TTL_SECS + 1).await,
            Err(Error::Validation(_))
        ));
        assert!(service.presign(uploaded.id, "original", 3600).await.is_ok());
    }
}
