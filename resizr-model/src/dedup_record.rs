//! `DedupRecord`, spec.md §3 — one per distinct content hash.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use resizr_util::data::ImageHash;

/// Tracks every image that shares the physical bytes stored under
/// `master_image_id`'s prefix. All mutation goes through [`HashIndex`],
/// which serializes access per-hash (§4.1).
///
/// [`HashIndex`]: crate::hash_index::HashIndex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub hash: ImageHash,
    pub master_image_id: Uuid,
    pub storage_key: String,
    pub referencing_ids: BTreeSet<Uuid>,
    pub resolution_refs: BTreeMap<String, BTreeSet<Uuid>>,
}

impl DedupRecord {
    pub fn new(hash: ImageHash, master_id: Uuid, storage_key: String) -> Self {
        let mut referencing_ids = BTreeSet::new();
        referencing_ids.insert(master_id);
        DedupRecord {
            hash,
            master_image_id: master_id,
            storage_key,
            referencing_ids,
            resolution_refs: BTreeMap::new(),
        }
    }

    pub fn reference_count(&self) -> usize {
        self.referencing_ids.len()
    }

    /// Adds `id` to `referencing_ids`. No-op (not an error) if already
    /// present, per §4.1 `link`.
    pub fn link(&mut self, id: Uuid) {
        self.referencing_ids.insert(id);
    }

    /// Removes `id`. If it was the master and others remain, promotes the
    /// lowest remaining id (a total order, so promotion is deterministic
    /// across racing deletes, §9 "Cross-process deletion race"). The bytes
    /// themselves never move: `storage_key` stays fixed at the original
    /// master's prefix regardless of which id now points at the hash.
    /// Returns `true` if the hash is now orphaned (no referencers left), in
    /// which case the caller is responsible for deleting `storage_key`'s
    /// prefix.
    pub fn unlink(&mut self, id: Uuid) -> bool {
        self.referencing_ids.remove(&id);
        for refs in self.resolution_refs.values_mut() {
            refs.remove(&id);
        }
        self.resolution_refs.retain(|_, refs| !refs.is_empty());

        if self.referencing_ids.is_empty() {
            return true;
        }
        if self.master_image_id == id {
            self.master_image_id = *self.referencing_ids.iter().next().unwrap();
        }
        false
    }

    pub fn link_resolution(&mut self, tag: &str, id: Uuid) {
        self.resolution_refs
            .entry(tag.to_string())
            .or_default()
            .insert(id);
    }

    /// Removes `id` from `tag`'s referencer set. Returns `true` if the tag
    /// now has no referencers (caller should delete the underlying blob).
    pub fn unlink_resolution(&mut self, tag: &str, id: Uuid) -> bool {
        match self.resolution_refs.get_mut(tag) {
            Some(refs) => {
                refs.remove(&id);
                let drained = refs.is_empty();
                if drained {
                    self.resolution_refs.remove(tag);
                }
                drained
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resizr_util::data::ImageHash;

    #[test]
    fn unlink_promotes_lowest_remaining_id_when_master_leaves() {
        let hash = ImageHash::of(b"x");
        let master = Uuid::from_u128(5);
        let other = Uuid::from_u128(1);
        let mut rec = DedupRecord::new(hash, master, "k".to_string());
        rec.link(other);

        let orphaned = rec.unlink(master);
        assert!(!orphaned);
        assert_eq!(rec.master_image_id, other);
        assert_eq!(rec.storage_key, "k");
        assert_eq!(rec.reference_count(), 1);
    }

    #[test]
    fn unlink_last_referencer_orphans() {
        let hash = ImageHash::of(b"x");
        let master = Uuid::new_v4();
        let mut rec = DedupRecord::new(hash, master, "k".to_string());
        assert!(rec.unlink(master));
        assert_eq!(rec.reference_count(), 0);
    }

    #[test]
    fn resolution_refs_drain_on_unlink() {
        let hash = ImageHash::of(b"x");
        let master = Uuid::new_v4();
        let mut rec = DedupRecord::new(hash, master, "k".to_string());
        rec.link_resolution("thumbnail", master);
        assert!(rec.unlink_resolution("thumbnail", master));
        assert!(!rec.resolution_refs.contains_key("thumbnail"));
    }
}
