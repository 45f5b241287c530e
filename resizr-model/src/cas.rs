//! Generic "load - mutate - compare-and-swap with bounded retries" helper
//! (§9 Design Notes). [`HashIndex`](crate::hash_index::HashIndex) and
//! [`MetadataRepo`](crate::metadata_repo::MetadataRepo) both build their
//! mutations on top of this so retry/backoff policy lives in one place.

use resizr_util::Error;
use serde::{de::DeserializeOwned, Serialize};

use crate::metadata_store::MetadataStore;

const MAX_ATTEMPTS: u32 = 8;

/// Repeatedly: reads `key`, decodes it as `T` (`None` if absent), calls
/// `mutate` to compute the next value, then attempts to commit it. Retries
/// on a lost CAS; gives up after [`MAX_ATTEMPTS`] and surfaces
/// `Error::Storage` (the caller's invariant could not be established, which
/// per spec.md §4.1/§4.2 means the store is badly contended or down).
pub async fn cas_update<T, F>(
    store: &dyn MetadataStore,
    key: &str,
    mut mutate: F,
) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnMut(Option<T>) -> Result<T, Error>,
{
    for attempt in 0..MAX_ATTEMPTS {
        let current = store.get(key).await?;
        let (existing, version) = match &current {
            Some(v) => {
                let decoded: T = serde_json::from_slice(&v.bytes)
                    .map_err(|e| Error::Internal(format!("decoding {}: {}", key, e)))?;
                (Some(decoded), v.version)
            }
            None => (None, 0),
        };

        let next = mutate(existing)?;
        let encoded = serde_json::to_vec(&next)
            .map_err(|e| Error::Internal(format!("encoding {}: {}", key, e)))?;

        let committed = if version == 0 {
            store.put_if_absent(key, encoded).await?
        } else {
            store.compare_and_swap(key, version, encoded).await?
        };

        if committed {
            return Ok(next);
        }

        tracing::debug!(key, attempt, "CAS conflict, retrying");
    }

    Err(Error::Storage(format!(
        "giving up on {} after {} CAS attempts",
        key, MAX_ATTEMPTS
    )))
}

/// Reads and decodes `key` as `T`, or `None` if absent.
pub async fn load<T>(store: &dyn MetadataStore, key: &str) -> Result<Option<T>, Error>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(v) => Ok(Some(
            serde_json::from_slice(&v.bytes)
                .map_err(|e| Error::Internal(format!("decoding {}: {}", key, e)))?,
        )),
        None => Ok(None),
    }
}
