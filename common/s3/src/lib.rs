//! Staging object store client.
//!
//! Events are staged as one object per event in an S3-compatible bucket (MinIO in
//! the local stack). Services only ever talk to the `S3Client` trait, so tests can
//! swap in `MockS3Client`, an in-memory bucket map with failure injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3SdkClient;
use envconfig::Envconfig;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum S3Error {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("S3 operation failed: {0}")]
    OperationFailed(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<std::string::FromUtf8Error> for S3Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        S3Error::ParseError(err.to_string())
    }
}

#[derive(Envconfig, Clone)]
pub struct S3Config {
    #[envconfig(default = "http://localhost:9000")]
    pub s3_endpoint: String,

    #[envconfig(default = "us-east-1")]
    pub s3_region: String,

    #[envconfig(default = "minioadmin")]
    pub s3_access_key_id: String,

    #[envconfig(default = "minioadmin")]
    pub s3_secret_access_key: String,

    // MinIO does not support virtual-hosted bucket addressing out of the box
    #[envconfig(default = "true")]
    pub s3_force_path_style: bool,
}

#[async_trait]
pub trait S3Client: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), S3Error>;

    /// List every key under `prefix`. The result is a snapshot: objects written while
    /// listing may or may not show up.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, S3Error>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, S3Error>;

    /// Deleting a key that does not exist is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), S3Error>;

    /// Create the bucket unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), S3Error>;

    async fn get_string(&self, bucket: &str, key: &str) -> Result<String, S3Error> {
        let body = self.get(bucket, key).await?;
        Ok(String::from_utf8(body)?)
    }
}

pub struct S3Impl {
    client: AwsS3SdkClient,
}

impl S3Impl {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }

    pub async fn from_config(config: &S3Config) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&config.s3_endpoint)
            .region(Region::new(config.s3_region.clone()))
            .credentials_provider(Credentials::new(
                &config.s3_access_key_id,
                &config.s3_secret_access_key,
                None,
                None,
                "clickstream",
            ))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.s3_force_path_style)
            .build();

        Self::new(AwsS3SdkClient::from_conf(s3_config))
    }
}

#[async_trait]
impl S3Client for S3Impl {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), S3Error> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                S3Error::OperationFailed(format!(
                    "Failed to put object {key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, S3Error> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                S3Error::OperationFailed(format!(
                    "Failed to list objects in {bucket}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_owned)),
            );
        }

        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, S3Error> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = format!("Failed to get object {key}: {}", DisplayErrorContext(&e));
                if let aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_) =
                    e.into_service_error()
                {
                    S3Error::NotFound(key.to_string())
                } else {
                    S3Error::OperationFailed(message)
                }
            })?;

        let body =
            output.body.collect().await.map_err(|e| {
                S3Error::OperationFailed(format!("Failed to read object {key}: {e}"))
            })?;

        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                S3Error::OperationFailed(format!(
                    "Failed to delete object {key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!("created bucket {}", bucket);
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to create bucket {bucket}: {}", DisplayErrorContext(&e));
                let service_error = e.into_service_error();
                if service_error.is_bucket_already_owned_by_you()
                    || service_error.is_bucket_already_exists()
                {
                    Ok(())
                } else {
                    Err(S3Error::OperationFailed(message))
                }
            }
        }
    }
}

#[derive(Default)]
struct MockState {
    buckets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    fail_puts: bool,
    fail_list: bool,
    failing_gets: HashSet<String>,
    failing_deletes: HashSet<String>,
}

/// In-memory staging store for tests. Always available, no conditional compilation
/// needed. Clones share the same buckets, so a test can keep a handle while the code
/// under test owns another.
#[derive(Clone, Default)]
pub struct MockS3Client {
    state: Arc<Mutex<MockState>>,
}

impl MockS3Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) -> Self {
        self.state()
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .insert(key.to_owned(), body.into());
        self
    }

    /// Make every `put` fail until reset.
    pub fn fail_puts(&self, fail: bool) {
        self.state().fail_puts = fail;
    }

    /// Make `list` fail until reset.
    pub fn fail_list(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    /// Make `get` fail for this key, as an unreachable store would.
    pub fn fail_get(&self, key: &str) {
        self.state().failing_gets.insert(key.to_owned());
    }

    pub fn fail_delete(&self, key: &str) {
        self.state().failing_deletes.insert(key.to_owned());
    }

    /// Current keys of a bucket, in lexical order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the buckets from the others
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl S3Client for MockS3Client {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), S3Error> {
        let mut state = self.state();
        if state.fail_puts {
            return Err(S3Error::OperationFailed(format!("mock put failure for {key}")));
        }

        state
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .insert(key.to_owned(), body);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, S3Error> {
        let state = self.state();
        if state.fail_list {
            return Err(S3Error::OperationFailed(format!(
                "mock listing failure for {bucket}"
            )));
        }

        Ok(state
            .buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, S3Error> {
        let state = self.state();
        if state.failing_gets.contains(key) {
            return Err(S3Error::OperationFailed(format!("mock get failure for {key}")));
        }

        state
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
            .ok_or_else(|| S3Error::NotFound(key.to_string()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        let mut state = self.state();
        if state.failing_deletes.contains(key) {
            return Err(S3Error::OperationFailed(format!(
                "mock delete failure for {key}"
            )));
        }

        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.state().buckets.entry(bucket.to_owned()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = "clickstream-storage";

    #[tokio::test]
    async fn test_mock_put_list_get_delete() {
        let client = MockS3Client::new();

        client
            .put(BUCKET, "event_click_1.json", b"{}".to_vec())
            .await
            .unwrap();
        client
            .put(BUCKET, "event_scroll_2.json", b"[]".to_vec())
            .await
            .unwrap();

        let keys = client.list(BUCKET, "").await.unwrap();
        assert_eq!(keys, vec!["event_click_1.json", "event_scroll_2.json"]);

        let scrolls = client.list(BUCKET, "event_scroll").await.unwrap();
        assert_eq!(scrolls, vec!["event_scroll_2.json"]);

        assert_eq!(
            client.get_string(BUCKET, "event_click_1.json").await.unwrap(),
            "{}"
        );

        client.delete(BUCKET, "event_click_1.json").await.unwrap();
        assert_eq!(client.keys(BUCKET), vec!["event_scroll_2.json"]);

        // Deleting twice is fine
        client.delete(BUCKET, "event_click_1.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_get_missing_key_is_not_found() {
        let client = MockS3Client::new();

        let result = client.get(BUCKET, "nonexistent-key").await;
        assert!(matches!(result, Err(S3Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let client = MockS3Client::new()
            .with_object(BUCKET, "a.json", "{}")
            .with_object(BUCKET, "b.json", "{}");

        client.fail_get("a.json");
        client.fail_delete("b.json");

        assert!(matches!(
            client.get(BUCKET, "a.json").await,
            Err(S3Error::OperationFailed(_))
        ));
        assert!(client.get(BUCKET, "b.json").await.is_ok());
        assert!(client.delete(BUCKET, "b.json").await.is_err());
        assert_eq!(client.keys(BUCKET).len(), 2);

        client.fail_list(true);
        assert!(client.list(BUCKET, "").await.is_err());
        client.fail_list(false);
        assert_eq!(client.list(BUCKET, "").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_clones_share_buckets() {
        let client = MockS3Client::new();
        let shared = client.clone();

        shared.ensure_bucket(BUCKET).await.unwrap();
        shared.put(BUCKET, "k", vec![1, 2, 3]).await.unwrap();

        assert_eq!(client.object(BUCKET, "k"), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_get_string_rejects_invalid_utf8() {
        let client = MockS3Client::new().with_object(BUCKET, "bin", vec![0, 159, 146, 150]);

        let result = client.get_string(BUCKET, "bin").await;
        assert!(matches!(result, Err(S3Error::ParseError(_))));
    }
}
