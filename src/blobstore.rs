use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("storage request failed")]
    Transport(#[from] reqwest::Error),

    #[error("storage responded with status {0}")]
    Status(u16),

    #[error("storage request timed out")]
    Timeout,
}

/// Remote object store, addressed by logical key. Writes return the public
/// URL clients can fetch; deletes are best-effort and the caller decides
/// whether a failure matters.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Map a public URL previously returned by `put` back to its key, if it
    /// belongs to this store. Used when removing a record's images.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// HTTP-backed object store: PUT/DELETE against `endpoint`, public URLs
/// built against `public_base`.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    public_base: String,
}

impl HttpBlobStore {
    pub fn new(
        endpoint: impl Into<String>,
        public_base: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, key)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, BlobError> {
        let response = self
            .client
            .put(self.object_url(key))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BlobError::Timeout
                } else {
                    BlobError::Transport(err)
                }
            })?;

        if !response.status().is_success() {
            return Err(BlobError::Status(response.status().as_u16()));
        }

        Ok(format!("{}/{}", self.public_base, key))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let response = self.client.delete(self.object_url(key)).send().await?;
        if !response.status().is_success() {
            return Err(BlobError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Keys are unique per submission and namespaced so payment proofs can never
/// collide with product images.
pub fn payment_key(stamp_millis: i64, token: Uuid) -> String {
    format!("payments/{stamp_millis}-{token}")
}

pub fn product_image_key(stamp_millis: i64, token: Uuid, index: usize) -> String {
    format!("products/{stamp_millis}-{token}-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_apart() {
        let token = Uuid::new_v4();
        let payment = payment_key(1700000000000, token);
        let product = product_image_key(1700000000000, token, 0);
        assert!(payment.starts_with("payments/"));
        assert!(product.starts_with("products/"));
        assert_ne!(payment, product);
    }

    #[test]
    fn product_keys_differ_per_index() {
        let token = Uuid::new_v4();
        assert_ne!(
            product_image_key(1, token, 0),
            product_image_key(1, token, 1)
        );
    }

    #[test]
    fn url_round_trips_to_key() -> anyhow::Result<()> {
        let store = HttpBlobStore::new(
            "http://blobs.internal/bucket/",
            "https://cdn.example.com",
            Duration::from_secs(5),
        )?;
        let key = "payments/123-abc";
        assert_eq!(
            store.key_for_url(&format!("https://cdn.example.com/{key}")),
            Some(key.to_string())
        );
        assert_eq!(store.key_for_url("https://elsewhere.example.com/x"), None);
        Ok(())
    }
}
