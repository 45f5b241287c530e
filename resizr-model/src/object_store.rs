//! `ObjectStore` (spec.md §2) — the external S3-compatible collaborator.
//! Opaque byte blobs keyed by path, plus presigned URL minting.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use resizr_util::Error;
use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), Error>;

    /// Full read. Used for hashing and resizing (§9 "Streaming vs.
    /// buffering" — the design reads originals fully).
    async fn get(&self, key: &str) -> Result<Bytes, Error>;

    /// Streaming read for the download path, so the object store's read
    /// side goes straight to the response writer (§5 "Memory discipline").
    async fn get_stream(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes, Error>>, Error>;

    async fn exists(&self, key: &str) -> Result<bool, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Lists keys under `prefix` and deletes them all (used by
    /// `ImageService::delete` when a hash becomes orphaned, spec.md §4.5).
    async fn delete_prefix(&self, prefix: &str) -> Result<(), Error>;

    /// Mints a presigned GET URL valid for `ttl_secs` seconds. Callers are
    /// responsible for the `(0, 604800]` bound of spec.md §4.5; this method
    /// trusts its input.
    async fn presign_get(&self, key: &str, ttl_secs: u32) -> Result<String, Error>;
}

pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(config: &resizr_util::config::ObjectStoreConfig) -> Result<Self, Error> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| Error::Storage(format!("building object store credentials: {}", e)))?;

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| Error::Storage(format!("configuring object store bucket: {}", e)))?;
        if config.path_style {
            bucket = bucket.with_path_style();
        }
        Ok(S3ObjectStore {
            bucket: Box::new(bucket),
        })
    }

    /// Ensures the configured bucket exists, creating it if this is a
    /// fresh deployment against a compatible store (garage, minio, ...).
    pub async fn ensure_bucket(&self, region: &str) -> Result<(), Error> {
        match self.bucket.list("".to_string(), None).await {
            Ok(_) => return Ok(()),
            Err(s3::error::S3Error::Http(404, _)) => {}
            Err(e) => return Err(Error::Storage(format!("checking bucket existence: {}", e))),
        }
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: self.bucket.url(),
        };
        let credentials = self
            .bucket
            .credentials()
            .read()
            .map_err(|e| Error::Storage(format!("reading object store credentials: {}", e)))?
            .clone();
        Bucket::create_with_path_style(
            &self.bucket.name,
            region,
            credentials,
            BucketConfiguration::default(),
        )
        .await
        .map_err(|e| Error::Storage(format!("creating bucket: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), Error> {
        self.bucket
            .put_object_with_content_type(key, &bytes, content_type)
            .await
            .map_err(|e| Error::Storage(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, Error> {
        let response = self
            .bucket
            .get_object(key)
            .await
            .map_err(|e| Error::Storage(format!("get {}: {}", key, e)))?;
        Ok(response.bytes().clone())
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, Error>>, Error> {
        // rust-s3's streaming reader hands back chunks already, but its
        // error type isn't `Send + 'static` friendly to box directly, so
        // we buffer once here and re-stream; true zero-copy streaming is
        // left to a future iteration (see DESIGN.md).
        let bytes = self.get(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })))
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        match self.bucket.head_object(key).await {
            Ok(_) => Ok(true),
            Err(s3::error::S3Error::Http(404, _)) => Ok(false),
            Err(e) => Err(Error::Storage(format!("head {}: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.bucket
            .delete_object(key)
            .await
            .map_err(|e| Error::Storage(format!("delete {}: {}", key, e)))?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), Error> {
        let listing = self
            .bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(|e| Error::Storage(format!("list {}: {}", prefix, e)))?;
        for page in listing {
            for object in page.contents {
                self.bucket
                    .delete_object(&object.key)
                    .await
                    .map_err(|e| Error::Storage(format!("delete {}: {}", object.key, e)))?;
            }
        }
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl_secs: u32) -> Result<String, Error> {
        self.bucket
            .presign_get(key, ttl_secs, None)
            .map_err(|e| Error::Storage(format!("presign {}: {}", key, e)))
    }
}
