//! Bucket tag lookup used to resolve a bucket's jurisdiction.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_types::SdkConfig;
use tracing::debug;

/// S3 reports "no tags at all" as an error with this code.
const NO_SUCH_TAG_SET: &str = "NoSuchTagSet";

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("AWS SDK error: {0}")]
    Sdk(String),
}

/// Source of bucket tags.
#[async_trait]
pub trait TagLookup: Send + Sync {
    /// All tags on `bucket`. An untagged bucket yields an empty map.
    async fn bucket_tags(&self, bucket: &str) -> Result<HashMap<String, String>, TagError>;
}

/// Tag lookup backed by S3 `GetBucketTagging`.
pub struct S3TagLookup {
    client: aws_sdk_s3::Client,
}

impl S3TagLookup {
    pub fn new(sdk: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(sdk),
        }
    }
}

#[async_trait]
impl TagLookup for S3TagLookup {
    async fn bucket_tags(&self, bucket: &str) -> Result<HashMap<String, String>, TagError> {
        let resp = match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(resp) => resp,
            Err(e) if e.code() == Some(NO_SUCH_TAG_SET) => {
                debug!(bucket, "Bucket has no tag set");
                return Ok(HashMap::new());
            }
            Err(e) => return Err(TagError::Sdk(format!("GetBucketTagging failed: {e:?}"))),
        };

        Ok(resp
            .tag_set()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect())
    }
}

/// Fixed tags, either per bucket or for every bucket.
///
/// Used by the worker's `--jurisdiction` override and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTagLookup {
    per_bucket: HashMap<String, HashMap<String, String>>,
    fallback: HashMap<String, String>,
}

impl StaticTagLookup {
    /// Every bucket carries the single tag `key=value`.
    pub fn any_bucket(key: &str, value: &str) -> Self {
        Self {
            per_bucket: HashMap::new(),
            fallback: HashMap::from([(key.to_string(), value.to_string())]),
        }
    }

    pub fn with_bucket(mut self, bucket: &str, key: &str, value: &str) -> Self {
        self.per_bucket
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl TagLookup for StaticTagLookup {
    async fn bucket_tags(&self, bucket: &str) -> Result<HashMap<String, String>, TagError> {
        Ok(self
            .per_bucket
            .get(bucket)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
