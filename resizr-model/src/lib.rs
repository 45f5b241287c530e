//! The core engine: content-addressed deduplication, metadata/store
//! coordination, on-demand variant derivation, and the auth/rate-limit gate
//! that guards the request path above them (spec §2).

pub mod auth;
pub mod cas;
pub mod codec;
pub mod dedup_record;
pub mod deduper;
pub mod hash_index;
pub mod health;
pub mod image_record;
pub mod metadata_repo;
pub mod metadata_store;
pub mod object_store;
pub mod rate_limit;
pub mod resolution;
pub mod service;
pub mod variant_engine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dedup_record::DedupRecord;
pub use image_record::ImageRecord;
pub use resolution::Resolution;

use resizr_util::Error;
/// Convenience alias used across the crate's public APIs.
pub type Result<T> = std::result::Result<T, Error>;
