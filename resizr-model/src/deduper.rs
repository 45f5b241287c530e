//! `Deduper` (spec.md §4.3): the upload-time pipeline — validate, hash,
//! allocate an id, and either claim a fresh content group or link onto an
//! existing one after a byte-exact verification.

use std::sync::Arc;

use bytes::Bytes;
use resizr_util::data::ImageHash;
use resizr_util::Error;
use uuid::Uuid;

use crate::codec::ImageCodec;
use crate::hash_index::{ClaimOutcome, HashIndex};
use crate::image_record::ImageRecord;
use crate::metadata_repo::MetadataRepo;
use crate::object_store::ObjectStore;

pub struct Deduper {
    object_store: Arc<dyn ObjectStore>,
    codec: Arc<dyn ImageCodec>,
    metadata_repo: Arc<MetadataRepo>,
    hash_index: Arc<HashIndex>,
    max_file_size: u64,
}

impl Deduper {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ImageCodec>,
        metadata_repo: Arc<MetadataRepo>,
        hash_index: Arc<HashIndex>,
        max_file_size: u64,
    ) -> Self {
        Deduper {
            object_store,
            codec,
            metadata_repo,
            hash_index,
            max_file_size,
        }
    }

    /// Ingests one upload: validates, hashes, allocates an id, and commits
    /// either a fresh content group or a link onto an existing one. Returns
    /// the persisted record with an empty `resolutions` list — variant
    /// enqueuing (spec.md §4.3 step 5) is the caller's (`ImageService`)
    /// responsibility.
    pub async fn ingest(&self, filename: String, bytes: Bytes) -> Result<ImageRecord, Error> {
        // Step 1: validate.
        if bytes.len() as u64 > self.max_file_size {
            return Err(Error::TooLarge);
        }
        let (mime_type, width, height) = self.codec.identify(&bytes).await?;

        // Step 2: hash.
        let hash = ImageHash::of(&bytes);

        // Step 3: allocate id.
        let id = Uuid::new_v4();

        // Step 4: lookup by hash (claim is atomic, so there is no
        // "claim lost the race" case to retry here: it deterministically
        // returns Claimed xor AlreadyExists).
        let storage_key = format!("images/{}/original.{}", id, mime_type.extension());
        match self.hash_index.claim(&hash, id, storage_key.clone()).await? {
            ClaimOutcome::Claimed(_) => {
                self.commit_new_master(
                    id,
                    filename,
                    mime_type,
                    width,
                    height,
                    hash,
                    storage_key,
                    bytes,
                )
                .await
            }
            ClaimOutcome::AlreadyExists(dedup) => {
                let master_bytes = self.object_store.get(&dedup.storage_key).await?;
                if master_bytes == bytes {
                    self.commit_link(
                        id,
                        filename,
                        mime_type,
                        width,
                        height,
                        hash,
                        dedup.master_image_id,
                    )
                    .await
                } else {
                    // A SHA-256 collision is, in practice, impossible; this
                    // path exists only because spec.md §4.3 step 4
                    // mandates a defined fallback instead of a panic. The
                    // new record deliberately is not registered against
                    // the colliding DedupRecord (see DESIGN.md).
                    tracing::error!(hash = %hash, "SHA-256 collision detected on upload, falling back to unshared storage");
                    let storage_key = format!("images/{}/original.{}", id, mime_type.extension());
                    self.commit_new_master(
                        id,
                        filename,
                        mime_type,
                        width,
                        height,
                        hash,
                        storage_key,
                        bytes,
                    )
                    .await
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_new_master(
        &self,
        id: Uuid,
        filename: String,
        mime_type: crate::image_record::MimeType,
        width: u32,
        height: u32,
        hash: ImageHash,
        storage_key: String,
        bytes: Bytes,
    ) -> Result<ImageRecord, Error> {
        let size = bytes.len() as u64;
        if let Err(e) = self
            .object_store
            .put(&storage_key, bytes, mime_type.content_type())
            .await
        {
            self.rollback_claim(&hash, id).await;
            return Err(e);
        }

        let record = ImageRecord::new_original(id, filename, mime_type, size, width, height, hash.clone());
        if let Err(e) = self.metadata_repo.put(&record).await {
            let _ = self.object_store.delete(&storage_key).await;
            self.rollback_claim(&hash, id).await;
            return Err(e);
        }
        Ok(record)
    }

    async fn commit_link(
        &self,
        id: Uuid,
        filename: String,
        mime_type: crate::image_record::MimeType,
        width: u32,
        height: u32,
        hash: ImageHash,
        master_id: Uuid,
    ) -> Result<ImageRecord, Error> {
        self.hash_index.link(&hash, id).await?;

        let mut record = ImageRecord::new_original(
            id,
            filename,
            mime_type,
            hash.size,
            width,
            height,
            hash.clone(),
        );
        record.is_deduped = true;
        record.shared_image_id = Some(master_id);

        if let Err(e) = self.metadata_repo.put(&record).await {
            self.rollback_claim(&hash, id).await;
            return Err(e);
        }
        Ok(record)
    }

    /// Best-effort rollback of a claim that could not be followed through
    /// to a persisted record (spec.md §4.3: "On object-store failure after
    /// claim, unlink and delete the record").
    async fn rollback_claim(&self, hash: &ImageHash, id: Uuid) {
        match self.hash_index.unlink(hash, id).await {
            Ok((_, true)) => {
                if let Err(e) = self.hash_index.drop_record(hash).await {
                    tracing::warn!(%hash, error = %e, "failed to drop orphaned dedup record during rollback");
                }
            }
            Ok((_, false)) => {}
            Err(e) => tracing::warn!(%hash, error = %e, "failed to unlink during claim rollback"),
        }
    }
}
