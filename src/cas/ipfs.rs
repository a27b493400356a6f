//! IPFS HTTP RPC client
//!
//! Talks to a running IPFS node (Kubo) through its `/api/v0` endpoints:
//! - `add` uploads bytes and returns the resulting CID
//! - `cat` streams content back by CID
//! - `name/resolve` resolves an IPNS name to the CID it points at
//! - `version` is used as a connectivity check
//!
//! The node itself (repository, plugins, bootstrap) is managed outside this crate.

use super::{ContentId, ContentStore};
use crate::blob::BlobStream;
use crate::config::IpfsConfig;
use crate::error::{GantryError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const X_CONTENT_LENGTH: &str = "X-Content-Length";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResolveResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    message: String,
}

pub struct IpfsClientBuilder {
    api_url: String,
    timeout: Duration,
    pin: bool,
    cid_version: u8,
}

impl IpfsClientBuilder {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            timeout: Duration::from_secs(300),
            pin: true,
            cid_version: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pin(mut self, pin: bool) -> Self {
        self.pin = pin;
        self
    }

    pub fn with_cid_version(mut self, cid_version: u8) -> Self {
        self.cid_version = cid_version;
        self
    }

    pub fn build(self) -> Result<IpfsClient> {
        let base = url::Url::parse(&self.api_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(GantryError::Validation(format!(
                "IPFS API URL must use http or https: {}",
                self.api_url
            )));
        }
        let client = Client::builder().timeout(self.timeout).build()?;

        Ok(IpfsClient {
            client,
            api_url: self.api_url.trim_end_matches('/').to_string(),
            pin: self.pin,
            cid_version: self.cid_version,
        })
    }
}

/// Content store backed by an IPFS node's HTTP API
#[derive(Clone)]
pub struct IpfsClient {
    client: Client,
    api_url: String,
    pin: bool,
    cid_version: u8,
}

impl IpfsClient {
    pub fn builder(api_url: impl Into<String>) -> IpfsClientBuilder {
        IpfsClientBuilder::new(api_url)
    }

    pub fn from_config(config: &IpfsConfig) -> Result<Self> {
        Self::builder(config.api_url.clone())
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_pin(config.pin)
            .with_cid_version(config.cid_version)
            .build()
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }

    /// Node version, used to check the API is reachable
    pub async fn version(&self) -> Result<String> {
        let response = self.client.post(self.endpoint("version")).send().await?;
        let response = check_response(response, "version").await?;
        let body: VersionResponse = response.json().await?;
        Ok(body.version)
    }
}

#[async_trait]
impl ContentStore for IpfsClient {
    async fn put(&self, data: Bytes) -> Result<ContentId> {
        let size = data.len();
        let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::from(data), size as u64)
            .file_name("blob")
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&[
                ("pin", self.pin.to_string()),
                ("cid-version", self.cid_version.to_string()),
                ("progress", "false".to_string()),
            ])
            .multipart(form)
            .send()
            .await?;
        let response = check_response(response, "add").await?;
        let body = response.text().await?;
        let id = parse_add_response(&body)?;
        debug!(cid = %id, size, "Added content");
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<BlobStream> {
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", id.to_path())])
            .send()
            .await?;
        let response = check_response(response, "cat").await?;

        let declared = response
            .headers()
            .get(X_CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .or_else(|| response.content_length());

        match declared {
            Some(size) => {
                let stream = response
                    .bytes_stream()
                    .map_err(GantryError::from)
                    .boxed();
                Ok(BlobStream::new(stream, size))
            }
            None => {
                // No length advertised, buffer to learn the size
                let data = response.bytes().await?;
                Ok(BlobStream::from_bytes(data))
            }
        }
    }

    async fn resolve_name(&self, name: &str) -> Result<ContentId> {
        let response = self
            .client
            .post(self.endpoint("name/resolve"))
            .query(&[("arg", name), ("recursive", "true")])
            .send()
            .await?;
        let response = check_response(response, "name/resolve").await?;
        let body = response.text().await?;
        parse_resolve_response(&body)
    }
}

async fn check_response(response: Response, command: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());
    Err(api_error(status, &body, command))
}

fn api_error(status: StatusCode, body: &str, command: &str) -> GantryError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());
    GantryError::Storage(format!("{} failed (status {}): {}", command, status, message))
}

/// The add endpoint streams one JSON object per line; the last one names the root
fn parse_add_response(body: &str) -> Result<ContentId> {
    let last = body
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| GantryError::Storage("add returned an empty response".to_string()))?;
    let added: AddResponse = serde_json::from_str(last)?;
    ContentId::parse(&added.hash)
}

fn parse_resolve_response(body: &str) -> Result<ContentId> {
    let resolved: ResolveResponse = serde_json::from_str(body)?;
    ContentId::parse(&resolved.path)
}
