//! Content-addressed staging of local executables
//!
//! Keys have the form `{prefix}/{md5-hex}-{basename}`. Before uploading, the
//! store is searched for any key sharing the `{prefix}/{md5-hex}-` part, so
//! content that is already stored is reused under its first name even when
//! the local file has been renamed since.

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::error::{ObiError, Result};
use crate::observability::EventLogger;

/// Durable object storage for executables
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Some stored key starting with `prefix`, if there is one
    async fn find(&self, prefix: &str) -> Result<Option<String>>;

    async fn upload(&self, key: &str, content: Vec<u8>) -> Result<()>;

    /// Remote URI the master uses to fetch `key`
    fn uri(&self, key: &str) -> String;
}

/// `{prefix}/{md5-hex}-`, the part of a key fixed by the content alone
pub fn content_prefix(prefix: &str, content: &[u8]) -> String {
    let digest = hex::encode(Md5::digest(content));
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}-", digest)
    } else {
        format!("{}/{}-", prefix, digest)
    }
}

pub fn content_key(prefix: &str, content: &[u8], basename: &str) -> String {
    format!("{}{}", content_prefix(prefix, content), basename)
}

/// Turn a local executable into a remote URI, uploading it unless an object
/// with the same content is already stored. References that are not local
/// files are returned unchanged.
pub async fn stage_executable(
    store: &dyn ArtifactStore,
    prefix: &str,
    reference: &str,
    events: &EventLogger,
) -> Result<String> {
    let path = Path::new(reference);
    if !path.is_file() {
        debug!(reference = %reference, "Executable is not a local file, passing through");
        return Ok(reference.to_string());
    }

    let content = tokio::fs::read(path)
        .await
        .map_err(|e| ObiError::io(path, e))?;
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "executable".to_string());

    let shared = content_prefix(prefix, &content);
    if let Some(existing) = store.find(&shared).await? {
        let uri = store.uri(&existing);
        events.artifact_reused(&uri);
        return Ok(uri);
    }

    let key = format!("{}{}", shared, basename);
    let uri = store.uri(&key);
    let bytes = content.len();
    store.upload(&key, content).await?;
    events.artifact_uploaded(&uri, bytes);
    Ok(uri)
}

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
}

#[derive(Deserialize)]
struct ObjectEntry {
    name: String,
}

/// Google Cloud Storage through its JSON API
pub struct GcsStore {
    client: reqwest::Client,
    base_url: Url,
    bucket: String,
    token: Option<String>,
}

impl GcsStore {
    pub fn new(base_url: &str, bucket: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ObiError::InvalidConfiguration(format!("storage_url: {}", e)))?;
        if bucket.trim().is_empty() {
            return Err(ObiError::configuration("artifact_bucket"));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            bucket: bucket.to_string(),
            token,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.storage_url,
            &settings.artifact_bucket,
            settings.storage_token.clone(),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ObiError::InvalidConfiguration("storage_url cannot be a base".to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ArtifactStore for GcsStore {
    async fn find(&self, prefix: &str) -> Result<Option<String>> {
        let mut url = self.endpoint(&["storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("prefix", prefix)
            .append_pair("maxResults", "1");

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ObiError::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ObiError::Storage(format!(
                "listing gs://{}/{}* returned {}",
                self.bucket, prefix, status
            )));
        }

        let list: ObjectList = response
            .json()
            .await
            .map_err(|e| ObiError::Storage(e.to_string()))?;
        Ok(list.items.into_iter().map(|o| o.name).next())
    }

    async fn upload(&self, key: &str, content: Vec<u8>) -> Result<()> {
        let mut url = self.endpoint(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        let response = self
            .authorize(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(|e| ObiError::Storage(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ObiError::Storage(format!(
                "upload of gs://{}/{} returned {}: {}",
                self.bucket, key, status, body
            )));
        }
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }
}
