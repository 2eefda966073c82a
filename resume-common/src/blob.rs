//! Opaque byte storage for uploaded resumes, backed by an S3-compatible
//! object store.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::JobError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key` with the given content type.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), JobError>;

    /// Fetch the bytes stored under `key`. A missing key is permanent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, JobError>;
}

/// Connection settings for the object store, usually read from the
/// environment by the binaries.
#[derive(Debug, Clone)]
pub struct BlobSettings {
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// Blob store over a single S3 bucket. Path-style addressing keeps MinIO and
/// other self-hosted endpoints working.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(settings: BlobSettings) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "environment",
        );

        let base = aws_config::from_env()
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base).force_path_style(true);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Self {
            client,
            bucket: settings.bucket,
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), JobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|error| JobError::transient(format!("blob upload failed: {error}")))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, JobError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| {
                let service_error = error.into_service_error();
                if service_error.is_no_such_key() {
                    JobError::permanent(format!("no blob stored under {key}"))
                } else {
                    JobError::transient(format!("blob download failed: {service_error}"))
                }
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|error| JobError::transient(format!("blob body read failed: {error}")))?;

        Ok(data.into_bytes().to_vec())
    }
}

/// In-memory blob store for tests, with injectable failures and an optional
/// per-`get` delay for exercising deadlines.
#[derive(Clone, Default)]
pub struct MockBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    get_failures: Arc<Mutex<VecDeque<JobError>>>,
    get_delay: Arc<Mutex<Option<Duration>>>,
    get_calls: Arc<AtomicUsize>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.blobs.lock().unwrap().insert(key.to_owned(), data);
    }

    pub fn fail_next_get(&self, error: JobError) {
        self.get_failures.lock().unwrap().push_back(error);
    }

    /// Make every subsequent `get` sleep first.
    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<(), JobError> {
        self.insert(key, data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, JobError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.get_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| JobError::permanent(format!("no blob stored under {key}")))
    }
}
