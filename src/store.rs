//! Content-addressed blob storage.
//!
//! `ContentStore` is the seam to the external store: opaque bytes in, a
//! content-derived handle out. `BlobStore` sits on top of it and speaks
//! `SealedBlob`: it encodes, applies the per-call deadline, and decodes. It
//! keeps no state between calls and caches nothing; every `get` round-trips.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use tracing::debug;

use crate::blob::SealedBlob;
use crate::error::{MedledgerError, TransportKind};
use crate::retry::with_timeout;

/// Default IPFS HTTP API endpoint of a local node.
pub const DEFAULT_IPFS_API: &str = "http://127.0.0.1:5001/api/v0";

/// A content-addressed object store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes and return the store's handle for them.
    ///
    /// Storing the same bytes twice yields the same handle; whether the store
    /// deduplicates is its own business.
    async fn put_bytes(&self, bytes: &[u8]) -> Result<String, MedledgerError>;

    /// Fetch the bytes for a handle.
    ///
    /// Returns `NotFound` if the store has no such object.
    async fn get_bytes(&self, handle: &str) -> Result<Vec<u8>, MedledgerError>;
}

// ---------------------------------------------------------------------------
// Blob client
// ---------------------------------------------------------------------------

/// Sealed-blob view over a `ContentStore`.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ContentStore>,
    timeout: Duration,
}

impl BlobStore {
    pub fn new(store: Arc<dyn ContentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Encode and store a blob, returning its content handle.
    pub async fn put(&self, blob: &SealedBlob) -> Result<String, MedledgerError> {
        let bytes = blob.to_json()?;
        let handle = with_timeout(self.timeout, "content store put", self.store.put_bytes(&bytes)).await?;
        debug!(handle = %handle, size = bytes.len(), "blob stored");
        Ok(handle)
    }

    /// Fetch and decode the blob behind a handle.
    pub async fn get(&self, handle: &str) -> Result<SealedBlob, MedledgerError> {
        let bytes = with_timeout(self.timeout, "content store get", self.store.get_bytes(handle)).await?;
        SealedBlob::from_json(&bytes)
    }
}

// ---------------------------------------------------------------------------
// IPFS over HTTP
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Client for the IPFS HTTP API (`/add` and `/cat`).
pub struct IpfsStore {
    client: Client,
    api_url: String,
}

impl IpfsStore {
    /// `api_url` is the API root, e.g. `http://127.0.0.1:5001/api/v0`.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, MedledgerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

fn is_missing_object(status: reqwest::StatusCode, body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    status == reqwest::StatusCode::NOT_FOUND
        || body.contains("not found")
        || body.contains("invalid path")
        || body.contains("invalid cid")
}

#[async_trait]
impl ContentStore for IpfsStore {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<String, MedledgerError> {
        let part = multipart::Part::bytes(bytes.to_vec()).file_name("data.json");
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/add", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MedledgerError::transport(
                TransportKind::Protocol,
                format!("ipfs add returned {}: {}", status, body.trim()),
            ));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| MedledgerError::transport(TransportKind::Protocol, e.to_string()))?;
        Ok(added.hash)
    }

    async fn get_bytes(&self, handle: &str) -> Result<Vec<u8>, MedledgerError> {
        let response = self
            .client
            .post(format!("{}/cat", self.api_url))
            .query(&[("arg", handle)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_missing_object(status, &body) {
                return Err(MedledgerError::NotFound(handle.to_string()));
            }
            return Err(MedledgerError::transport(
                TransportKind::Protocol,
                format!("ipfs cat returned {}: {}", status, body.trim()),
            ));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-process store keyed by the hex SHA-256 of the content.
///
/// Thread-safe via `RwLock`. Not persistent; data is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the store would assign to these bytes.
    pub fn handle_for(bytes: &[u8]) -> String {
        hex::encode(ring::digest::digest(&ring::digest::SHA256, bytes))
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(handle))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<String, MedledgerError> {
        let handle = Self::handle_for(bytes);
        self.objects
            .write()
            .map_err(|_| MedledgerError::poisoned("memory store"))?
            .insert(handle.clone(), bytes.to_vec());
        Ok(handle)
    }

    async fn get_bytes(&self, handle: &str) -> Result<Vec<u8>, MedledgerError> {
        self.objects
            .read()
            .map_err(|_| MedledgerError::poisoned("memory store"))?
            .get(handle)
            .cloned()
            .ok_or_else(|| MedledgerError::NotFound(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;

    fn blobs() -> BlobStore {
        BlobStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = blobs();
        let (blob, _key) = crypto::seal(b"ecg trace").unwrap();
        let handle = store.put(&blob).await.unwrap();
        assert_eq!(store.get(&handle).await.unwrap(), blob);
    }

    #[tokio::test]
    async fn test_same_bytes_same_handle() {
        let store = blobs();
        let (blob, _key) = crypto::seal(b"ecg trace").unwrap();
        let first = store.put(&blob).await.unwrap();
        let second = store.put(&blob).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_handle_not_found() {
        let store = blobs();
        assert!(matches!(
            store.get("QmNothingHere").await,
            Err(MedledgerError::NotFound(h)) if h == "QmNothingHere"
        ));
    }

    #[tokio::test]
    async fn test_non_blob_content_is_malformed() {
        let raw = Arc::new(MemoryStore::new());
        let handle = raw.put_bytes(b"{\"hello\":1}").await.unwrap();
        let store = BlobStore::new(raw, Duration::from_secs(1));
        assert!(matches!(store.get(&handle).await, Err(MedledgerError::Malformed(_))));
    }

    #[test]
    fn test_missing_object_detection() {
        use reqwest::StatusCode;
        assert!(is_missing_object(StatusCode::INTERNAL_SERVER_ERROR, "merkledag: not found"));
        assert!(is_missing_object(StatusCode::BAD_REQUEST, "invalid path \"Qm\": invalid cid"));
        assert!(!is_missing_object(StatusCode::INTERNAL_SERVER_ERROR, "context deadline exceeded"));
    }

    #[tokio::test]
    async fn test_unreachable_ipfs_is_transport_error() {
        // Port 9 (discard) is never an IPFS API; connection is refused or times out.
        let store = IpfsStore::new("http://127.0.0.1:9/api/v0", Duration::from_millis(500)).unwrap();
        let err = store.get_bytes("QmSomething").await.unwrap_err();
        assert!(err.is_retriable());
    }
}
