//! `MetadataRepo` (spec.md §4.2): CRUD over `ImageRecord`, with
//! compare-and-set updates so concurrent resolution appends converge
//! instead of clobbering each other.

use std::sync::Arc;

use resizr_util::Error;
use uuid::Uuid;

use crate::cas::{cas_update, load};
use crate::image_record::ImageRecord;
use crate::metadata_store::MetadataStore;

const LISTING_INDEX: &str = "image_ids";

fn record_key(id: Uuid) -> String {
    format!("image:{}", id)
}

pub struct MetadataRepo {
    store: Arc<dyn MetadataStore>,
}

impl MetadataRepo {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        MetadataRepo { store }
    }

    pub async fn put(&self, record: &ImageRecord) -> Result<(), Error> {
        let key = record_key(record.id);
        let encoded = serde_json::to_vec(record)
            .map_err(|e| Error::Internal(format!("encoding image record: {}", e)))?;
        if !self.store.put_if_absent(&key, encoded).await? {
            return Err(Error::Internal(format!(
                "image record {} already exists",
                record.id
            )));
        }
        self.store
            .index_add(LISTING_INDEX, &record.id.to_string(), record.created_at.timestamp_millis())
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<ImageRecord, Error> {
        load(self.store.as_ref(), &record_key(id))
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool, Error> {
        self.store.exists(&record_key(id)).await
    }

    /// Reads, applies `mutate`, and commits with CAS-with-retry. `mutate`
    /// may be invoked more than once if another writer races this update;
    /// it must be a pure function of the current record (as all callers in
    /// this crate are: "append this resolution tag", "flip this flag").
    pub async fn update<F>(&self, id: Uuid, mut mutate: F) -> Result<ImageRecord, Error>
    where
        F: FnMut(&mut ImageRecord),
    {
        let key = record_key(id);
        cas_update(self.store.as_ref(), &key, |existing| {
            let mut record = existing.ok_or(Error::NotFound)?;
            mutate(&mut record);
            record.updated_at = resizr_util::time::now();
            Ok(record)
        })
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        self.store.delete(&record_key(id)).await?;
        self.store.index_remove(LISTING_INDEX, &id.to_string()).await?;
        Ok(())
    }

    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<ImageRecord>, Error> {
        let ids = self
            .store
            .index_range(LISTING_INDEX, offset, limit)
            .await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let id: Uuid = id
                .parse()
                .map_err(|e| Error::Internal(format!("corrupt listing index entry: {}", e)))?;
            if let Some(record) = load(self.store.as_ref(), &record_key(id)).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
