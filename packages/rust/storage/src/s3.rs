//! Amazon S3 backend. Credentials and region come from the default AWS
//! provider chain (environment, profile, instance role).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use indexflow_shared::{IndexFlowError, Result};
use tracing::debug;

use crate::blob::BlobStore;

#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: Client,
}

impl S3BlobStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn s3_err(op: &str, bucket: &str, key: &str, e: impl std::error::Error) -> IndexFlowError {
    IndexFlowError::Storage(format!("s3 {op} {bucket}/{key}: {}", DisplayErrorContext(e)))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| s3_err("put", bucket, key, e))?;
        debug!(bucket, key, size, "object written");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_err("get", bucket, key, e))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| s3_err("read", bucket, key, e))?;
        Ok(data.into_bytes())
    }

    /// S3 acknowledges deletes of missing keys, so this is `true` on success.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_err("delete", bucket, key, e))?;
        debug!(bucket, key, "object deleted");
        Ok(true)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| s3_err("list", bucket, prefix, e))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}
