//! `HashIndex` (spec.md §4.1): `ImageHash → DedupRecord`, serialized
//! per-hash via CAS-with-retry. This is the only place reference-graph
//! correctness is enforced.

use std::sync::Arc;

use resizr_util::data::ImageHash;
use resizr_util::Error;
use uuid::Uuid;

use crate::cas::{cas_update, load};
use crate::dedup_record::DedupRecord;
use crate::metadata_store::MetadataStore;

/// Outcome of [`HashIndex::claim`]: either this call created the record, or
/// another writer beat it to it and the caller should `link` instead
/// (spec.md §4.1).
pub enum ClaimOutcome {
    Claimed(DedupRecord),
    AlreadyExists(DedupRecord),
}

/// Backs the orphan sweep (spec.md §4.3, §11): every claimed hash is listed
/// here so the sweep can page through them without a store-wide scan, the
/// same way `MetadataRepo::list` pages `image_ids` instead of scanning keys.
const HASH_LISTING_INDEX: &str = "dedup_hashes";

pub struct HashIndex {
    store: Arc<dyn MetadataStore>,
}

impl HashIndex {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        HashIndex { store }
    }

    pub async fn lookup(&self, hash: &ImageHash) -> Result<Option<DedupRecord>, Error> {
        load(self.store.as_ref(), &hash.store_key()).await
    }

    /// Inserts a fresh record with `reference_count = 1`. If one already
    /// exists at this hash, returns it unchanged as
    /// `ClaimOutcome::AlreadyExists` rather than erroring — the caller
    /// (`Deduper`) always has a sensible next step either way.
    pub async fn claim(
        &self,
        hash: &ImageHash,
        master_id: Uuid,
        storage_key: String,
    ) -> Result<ClaimOutcome, Error> {
        let key = hash.store_key();
        let record = DedupRecord::new(hash.clone(), master_id, storage_key);
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| Error::Internal(format!("encoding dedup record: {}", e)))?;

        if self.store.put_if_absent(&key, encoded).await? {
            self.store.index_add(HASH_LISTING_INDEX, &key, 0).await?;
            Ok(ClaimOutcome::Claimed(record))
        } else {
            let existing = load(self.store.as_ref(), &key)
                .await?
                .ok_or_else(|| Error::Internal(format!("dedup record {} vanished", key)))?;
            Ok(ClaimOutcome::AlreadyExists(existing))
        }
    }

    /// Adds `image_id` to `referencing_ids`. No-op if already present.
    pub async fn link(&self, hash: &ImageHash, image_id: Uuid) -> Result<DedupRecord, Error> {
        let key = hash.store_key();
        cas_update(self.store.as_ref(), &key, |existing: Option<DedupRecord>| {
            let mut rec = existing
                .ok_or_else(|| Error::Internal(format!("dedup record {} vanished", key)))?;
            rec.link(image_id);
            Ok(rec)
        })
        .await
    }

    /// Removes `image_id`. Returns the updated record and whether the hash
    /// is now orphaned (no referencers left).
    pub async fn unlink(
        &self,
        hash: &ImageHash,
        image_id: Uuid,
    ) -> Result<(DedupRecord, bool), Error> {
        let key = hash.store_key();
        let updated = cas_update(self.store.as_ref(), &key, |existing: Option<DedupRecord>| {
            let mut rec = existing
                .ok_or_else(|| Error::Internal(format!("dedup record {} vanished", key)))?;
            rec.unlink(image_id);
            Ok(rec)
        })
        .await?;
        let orphaned = updated.reference_count() == 0;
        Ok((updated, orphaned))
    }

    /// Deletes the dedup record outright. Callers must have already
    /// drained the underlying blobs (spec.md §4.5 `delete`).
    pub async fn drop_record(&self, hash: &ImageHash) -> Result<(), Error> {
        let key = hash.store_key();
        self.store.delete(&key).await?;
        self.store.index_remove(HASH_LISTING_INDEX, &key).await
    }

    /// Pages through every claimed hash, for the orphan sweep
    /// ([`crate::service::ImageService::sweep_orphans`]).
    pub async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<DedupRecord>, Error> {
        let keys = self.store.index_range(HASH_LISTING_INDEX, offset, limit).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = load(self.store.as_ref(), &key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Force-sets `master_image_id` without touching `referencing_ids`, for
    /// the orphan sweep reconciling a master that crashed between being
    /// unlinked and being promoted.
    pub async fn promote_master(&self, hash: &ImageHash, new_master: Uuid) -> Result<DedupRecord, Error> {
        let key = hash.store_key();
        cas_update(self.store.as_ref(), &key, |existing: Option<DedupRecord>| {
            let mut rec = existing
                .ok_or_else(|| Error::Internal(format!("dedup record {} vanished", key)))?;
            rec.master_image_id = new_master;
            Ok(rec)
        })
        .await
    }

    pub async fn link_resolution(
        &self,
        hash: &ImageHash,
        tag: &str,
        image_id: Uuid,
    ) -> Result<DedupRecord, Error> {
        let key = hash.store_key();
        cas_update(self.store.as_ref(), &key, |existing: Option<DedupRecord>| {
            let mut rec = existing
                .ok_or_else(|| Error::Internal(format!("dedup record {} vanished", key)))?;
            rec.link_resolution(tag, image_id);
            Ok(rec)
        })
        .await
    }

    /// Removes `image_id` from `tag`'s referencer set. Returns the updated
    /// record and whether the tag is now unreferenced (caller should delete
    /// the underlying variant blob).
    pub async fn unlink_resolution(
        &self,
        hash: &ImageHash,
        tag: &str,
        image_id: Uuid,
    ) -> Result<(DedupRecord, bool), Error> {
        let key = hash.store_key();
        let updated = cas_update(self.store.as_ref(), &key, |existing: Option<DedupRecord>| {
            let mut rec = existing
                .ok_or_else(|| Error::Internal(format!("dedup record {} vanished", key)))?;
            rec.unlink_resolution(tag, image_id);
            Ok(rec)
        })
        .await?;
        let drained = !updated.resolution_refs.contains_key(tag);
        Ok((updated, drained))
    }
}
