//! Object storage buckets.

use async_trait::async_trait;

use crate::{ApiError, Tag};

/// Expiration rule applied to every object in a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleRule {
    pub expiration_days: u32,
}

/// Observed bucket configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub lifecycle: Option<LifecycleRule>,
    /// Bucket receiving this bucket's access logs.
    pub access_log_target: Option<String>,
    pub tags: Vec<Tag>,
}

/// Provider bucket API.
#[async_trait]
pub trait BucketApi: Send + Sync {
    /// Fails with `NoSuchBucket` when the bucket does not exist.
    async fn head_bucket(&self, name: &str) -> Result<BucketInfo, ApiError>;

    /// Fails with `BucketAlreadyOwnedByYou` when the bucket exists.
    async fn create_bucket(&self, name: &str, tags: Vec<Tag>) -> Result<(), ApiError>;

    async fn put_lifecycle(&self, name: &str, rule: Option<LifecycleRule>) -> Result<(), ApiError>;

    async fn put_access_logging(&self, name: &str, target: Option<String>)
        -> Result<(), ApiError>;

    /// Removes every object so the bucket can be deleted.
    async fn delete_objects(&self, name: &str) -> Result<(), ApiError>;

    /// Fails with `NoSuchBucket` when the bucket does not exist and with
    /// `BucketNotEmpty` while objects remain.
    async fn delete_bucket(&self, name: &str) -> Result<(), ApiError>;
}
