//! Transport through the KeepKey desktop application's local REST API.
//!
//! The app owns the device; there is no session lease. Each call is a single
//! self-contained `POST /call`, authenticated with a bearer key when one is
//! configured.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use super::{http_client, read_json, select_device, timeout_aware, DeviceHandle, DeviceInfo, Transport};
use crate::{
    config::{trimmed_url, TransportKind},
    error::{Error, Result},
    messages::{MessageType, ProtocolMessage},
};

const LIST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CallEnvelope<'a> {
    #[serde(rename = "type")]
    message_type: MessageType,
    message: &'a serde_json::Map<String, serde_json::Value>,
    path: &'a str,
}

pub struct DesktopTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    handle: Option<DeviceHandle>,
}

impl DesktopTransport {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: trimmed_url(base_url),
            api_key: api_key.filter(|k| !k.is_empty()),
            handle: None,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let request = self
            .authorized(self.http.get(format!("{}/devices", self.base_url)))
            .timeout(LIST_TIMEOUT);
        let response = request
            .send()
            .await
            .map_err(|e| timeout_aware(e, Some(LIST_TIMEOUT)))?;
        read_json(response, Some(LIST_TIMEOUT)).await
    }
}

#[async_trait]
impl Transport for DesktopTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Desktop
    }

    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        self.list_devices().await
    }

    async fn connect(&mut self, selector: Option<&str>) -> Result<DeviceHandle> {
        let devices = self.list_devices().await?;
        let selector = selector.or_else(|| self.handle.as_ref().map(|h| h.path.as_str()));
        let device = select_device(&devices, selector)?;
        info!(desktop = %self.base_url, path = %device.path, "desktop app reports device");

        let handle = DeviceHandle::open(TransportKind::Desktop, device.path.clone(), None)?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.handle = None;
        Ok(())
    }

    async fn call(&mut self, request: ProtocolMessage, timeout: Duration) -> Result<ProtocolMessage> {
        let handle = self.handle.as_ref().ok_or(Error::NotConnected)?;
        let body = CallEnvelope {
            message_type: request.message_type,
            message: &request.message,
            path: &handle.path,
        };
        debug!(message_type = %request.message_type, "desktop call");
        let response = self
            .authorized(self.http.post(format!("{}/call", self.base_url)))
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| timeout_aware(e, Some(timeout)))?;
        read_json(response, Some(timeout)).await
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }
}
