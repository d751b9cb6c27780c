//! Supplemental (§4.3.1): the object store the remote-shell adapter puts
//! uploaded artifacts into. Object-storage *primitives* are a named external
//! collaborator (§1), but the core still ships a working default adapter.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use owo_colors::OwoColorize;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<()>;
    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String>;
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    key_prefix: String,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, bucket: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<()> {
        let full_key = self.full_key(key);
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .set_acl(Some(ObjectCannedAcl::Private))
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await?;
        println!(
            "{} s3://{}/{} ({} bytes)",
            "📤 Uploaded artifact".cyan(),
            self.bucket,
            full_key,
            size
        );
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> anyhow::Result<String> {
        let full_key = self.full_key(key);
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .presigned(PresigningConfig::expires_in(ttl)?)
            .await?;
        Ok(presigned.uri().to_string())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&full_prefix)
            .send()
            .await?;
        Ok(resp
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|obj| obj.key)
            .collect())
    }
}
