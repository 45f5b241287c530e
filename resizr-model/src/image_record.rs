//! `ImageRecord`, spec.md §3 — one per logical image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use resizr_util::data::ImageHash;

/// One of the four formats this service understands. Output format always
/// mirrors the original (spec.md §1 Non-goals: no format conversion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/gif")]
    Gif,
    #[serde(rename = "image/webp")]
    Webp,
}

impl MimeType {
    pub fn content_type(&self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
            MimeType::Gif => "image/gif",
            MimeType::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MimeType::Jpeg => "jpg",
            MimeType::Png => "png",
            MimeType::Gif => "gif",
            MimeType::Webp => "webp",
        }
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content_type())
    }
}

/// One per logical image (spec.md §3). Variant blobs derived from it are
/// addressed relative to `owner_id()`, not `id` — the two coincide unless
/// the record is deduped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub filename: String,
    pub mime_type: MimeType,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    /// Ordered, duplicate-free list of rendered variant tags. Never
    /// contains `"original"` (I5).
    pub resolutions: Vec<String>,
    pub hash: ImageHash,
    pub is_deduped: bool,
    pub shared_image_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new_original(
        id: Uuid,
        filename: String,
        mime_type: MimeType,
        size: u64,
        width: u32,
        height: u32,
        hash: ImageHash,
    ) -> Self {
        let now = resizr_util::time::now();
        ImageRecord {
            id,
            filename,
            mime_type,
            size,
            width,
            height,
            resolutions: Vec::new(),
            hash,
            is_deduped: false,
            shared_image_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The id whose storage prefix holds the physical bytes for this
    /// record's content (spec.md §3, "Storage-key derivation").
    pub fn owner_id(&self) -> Uuid {
        if self.is_deduped {
            self.shared_image_id.unwrap_or(self.id)
        } else {
            self.id
        }
    }

    pub fn original_key(&self) -> String {
        format!(
            "images/{}/original.{}",
            self.owner_id(),
            self.mime_type.extension()
        )
    }

    /// `dimension_tag` is the `<W>x<H>` string, never including an alias
    /// (storage keys are alias-insensitive, spec.md §3).
    pub fn variant_key(&self, dimension_tag: &str) -> String {
        format!(
            "images/{}/{}.{}",
            self.owner_id(),
            dimension_tag,
            self.mime_type.extension()
        )
    }

    pub fn prefix(&self) -> String {
        format!("images/{}/", self.owner_id())
    }

    /// Adds `tag` to `resolutions` if absent. Returns `true` if it was
    /// newly added (so callers can decide whether a metadata write is
    /// needed). `resolutions` is treated as a set union under concurrent
    /// appends (§4.2).
    pub fn add_resolution(&mut self, tag: &str) -> bool {
        if self.resolutions.iter().any(|t| t == tag) {
            false
        } else {
            self.resolutions.push(tag.to_string());
            true
        }
    }

    pub fn remove_resolution(&mut self, tag: &str) -> bool {
        let before = self.resolutions.len();
        self.resolutions.retain(|t| t != tag);
        self.resolutions.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resizr_util::data::ImageHash;

    fn sample() -> ImageRecord {
        ImageRecord::new_original(
            Uuid::nil(),
            "cat.jpg".to_string(),
            MimeType::Jpeg,
            100,
            80,
            60,
            ImageHash::of(b"hello"),
        )
    }

    #[test]
    fn owner_id_is_self_unless_deduped() {
        let mut r = sample();
        assert_eq!(r.owner_id(), r.id);
        r.is_deduped = true;
        let master = Uuid::new_v4();
        r.shared_image_id = Some(master);
        assert_eq!(r.owner_id(), master);
    }

    #[test]
    fn add_resolution_is_idempotent() {
        let mut r = sample();
        assert!(r.add_resolution("thumbnail"));
        assert!(!r.add_resolution("thumbnail"));
        assert_eq!(r.resolutions, vec!["thumbnail".to_string()]);
    }

    #[test]
    fn keys_derive_from_owner_and_extension() {
        let r = sample();
        assert_eq!(r.original_key(), format!("images/{}/original.jpg", r.id));
        assert_eq!(
            r.variant_key("800x600"),
            format!("images/{}/800x600.jpg", r.id)
        );
    }
}
