//! REST transport for devices exposing their configuration tree under `/rest`.
//!
//! Verb mapping:
//! - list: `GET /rest/<path>`
//! - create: `PUT /rest/<path>`
//! - update: `PATCH /rest/<path>/<id>`
//! - query: `POST /rest/<path>/print` with `{".proplist": [...]}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::attrs::{AttributeSet, json_type};
use crate::error::{FleetError, Result};
use crate::resource::ResourceDescriptor;
use crate::transport::{DeviceTarget, Transport};

/// Options for the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RestOptions {
    /// Timeout for a single HTTP request.
    pub request_timeout_secs: u64,
    /// Devices commonly ship self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            request_timeout_secs: 8,
            accept_invalid_certs: false,
        }
    }
}

/// [`Transport`] over the device REST API.
#[derive(Debug, Clone)]
pub struct RestTransport {
    client: Client,
}

impl RestTransport {
    pub fn new(options: &RestOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| FleetError::transport("failed to build HTTP client", e))?;
        Ok(Self { client })
    }

    fn url(device: &DeviceTarget, path: &str, suffix: Option<&str>) -> String {
        let base = device.endpoint().trim_end_matches('/');
        match suffix {
            Some(suffix) => format!("{base}/rest/{path}/{suffix}"),
            None => format!("{base}/rest/{path}"),
        }
    }

    fn request(&self, device: &DeviceTarget, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match device.credentials() {
            Some(creds) => builder.basic_auth(&creds.username, Some(creds.password())),
            None => builder,
        }
    }

    async fn send(&self, device: &DeviceTarget, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| FleetError::transport(format!("{what} on {} failed", device.name()), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FleetError::http(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn read_json(response: Response) -> Result<Value> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FleetError::transport("failed to read response body", e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| FleetError::malformed(format!("response is not JSON: {e}")))
    }

    async fn fetch_list(&self, device: &DeviceTarget, builder: RequestBuilder, what: &str) -> Result<Vec<AttributeSet>> {
        let response = self.send(device, builder, what).await?;
        match Self::read_json(response).await? {
            Value::Array(items) => items.iter().map(AttributeSet::from_json).collect(),
            // Single-object collections (e.g. system settings) come back bare.
            Value::Object(map) => Ok(vec![AttributeSet::from_json_object(&map)]),
            other => Err(FleetError::malformed(format!(
                "expected JSON array from {what}, got {}",
                json_type(&other)
            ))),
        }
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn list(&self, device: &DeviceTarget, resource: &ResourceDescriptor) -> Result<Vec<AttributeSet>> {
        let url = Self::url(device, resource.path(), None);
        debug!(device = %device, url = %url, "GET");
        let builder = self.request(device, Method::GET, &url);
        self.fetch_list(device, builder, "list").await
    }

    async fn create(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        attrs: &AttributeSet,
    ) -> Result<Option<AttributeSet>> {
        let url = Self::url(device, resource.path(), None);
        debug!(device = %device, url = %url, fields = ?attrs.keys().collect::<Vec<_>>(), "PUT");
        let builder = self.request(device, Method::PUT, &url).json(&attrs.to_json());
        let response = self.send(device, builder, "create").await?;
        match Self::read_json(response).await? {
            Value::Object(map) => Ok(Some(AttributeSet::from_json_object(&map))),
            _ => Ok(None),
        }
    }

    async fn update(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        id: &str,
        attrs: &AttributeSet,
    ) -> Result<()> {
        let url = Self::url(device, resource.path(), Some(id));
        debug!(device = %device, url = %url, fields = ?attrs.keys().collect::<Vec<_>>(), "PATCH");
        let builder = self.request(device, Method::PATCH, &url).json(&attrs.to_json());
        self.send(device, builder, "update").await?;
        Ok(())
    }

    async fn query(
        &self,
        device: &DeviceTarget,
        resource: &ResourceDescriptor,
        fields: &[String],
    ) -> Result<Vec<AttributeSet>> {
        let url = Self::url(device, resource.path(), Some("print"));
        debug!(device = %device, url = %url, fields = ?fields, "POST");
        let builder = self
            .request(device, Method::POST, &url)
            .json(&json!({ ".proplist": fields }));
        self.fetch_list(device, builder, "query").await
    }
}
