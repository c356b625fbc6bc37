pub mod bridge;
pub mod desktop;
pub mod framing;
pub mod hid;
pub mod webusb;

pub use bridge::{BridgeApi, BridgeSession, BridgeTransport};
pub use desktop::DesktopTransport;
pub use hid::{HidApiBackend, HidBackend, HidChannel, UsbHidTransport};
pub use webusb::{BulkChannel, RusbBackend, UsbBackend, WebUsbTransport};

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    config::{TransportConfig, TransportKind},
    error::{Error, Result},
    events::EventBus,
    features::DeviceFeatures,
    messages::ProtocolMessage,
};

pub const KEEPKEY_VID: u16 = 0x2B24;
/// Legacy HID and WebUSB product ids.
pub const KEEPKEY_PIDS: &[u16] = &[0x0001, 0x0002];

/// One open connection to a device.
///
/// While `connected` is true `path` is non-empty, and bridge handles also
/// carry the session token leased from the daemon.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHandle {
    pub kind: TransportKind,
    pub path: String,
    pub session: Option<String>,
    pub features: Option<DeviceFeatures>,
    pub connected: bool,
}

impl DeviceHandle {
    pub(crate) fn open(kind: TransportKind, path: impl Into<String>, session: Option<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(Error::ConnectionFailed(format!("{kind} transport returned an empty device path")));
        }
        if kind == TransportKind::Bridge && session.as_deref().map_or(true, str::is_empty) {
            return Err(Error::SessionInvalid(format!("no session acquired for {path}")));
        }
        Ok(Self {
            kind,
            path,
            session,
            features: None,
            connected: true,
        })
    }
}

/// A device as reported by enumeration (HID/USB scan, bridge daemon, desktop app).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    #[serde(alias = "id", alias = "deviceId")]
    pub path: String,
    pub session: Option<String>,
    pub vendor: Option<u16>,
    pub product: Option<u16>,
    #[serde(alias = "serial")]
    pub serial_number: Option<String>,
    pub label: Option<String>,
}

/// Capability set shared by every medium.
///
/// Exactly one request may be outstanding per connection: responses carry no
/// request id and are matched purely by arrival order.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Devices currently visible to this medium.
    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Opens a channel to the device matching `selector` (or the first one).
    /// Calling it while connected re-validates the existing channel.
    async fn connect(&mut self, selector: Option<&str>) -> Result<DeviceHandle>;

    /// Releases the channel. Medium errors during teardown are logged, and the
    /// transport always ends up disconnected.
    async fn disconnect(&mut self) -> Result<()>;

    async fn call(&mut self, request: ProtocolMessage, timeout: Duration) -> Result<ProtocolMessage>;

    fn is_connected(&self) -> bool;

    /// Session token currently leased for the open device, on media that lease one.
    fn session(&self) -> Option<String> {
        None
    }

    /// Starts a background event stream, where the medium has one.
    async fn listen(&mut self) -> Result<()> {
        Err(Error::UnsupportedEnvironment(format!(
            "{} transport has no event stream",
            self.kind()
        )))
    }

    async fn stop_listening(&mut self) {}
}

/// Builds the transport selected by `config.kind`.
pub fn create_transport(config: &TransportConfig, events: Arc<EventBus>) -> Result<Box<dyn Transport>> {
    Ok(match config.kind {
        TransportKind::UsbHid => Box::new(UsbHidTransport::new()),
        TransportKind::WebUsb => Box::new(WebUsbTransport::new()),
        TransportKind::Bridge => Box::new(BridgeTransport::new(&config.bridge_url, events)?),
        TransportKind::Desktop => Box::new(DesktopTransport::new(
            &config.desktop_url,
            config.api_key.clone(),
        )?),
    })
}

pub(crate) fn select_device<'a>(devices: &'a [DeviceInfo], selector: Option<&str>) -> Result<&'a DeviceInfo> {
    match selector {
        Some(path) => devices
            .iter()
            .find(|d| d.path == path || d.serial_number.as_deref() == Some(path)),
        None => devices.first(),
    }
    .ok_or_else(|| Error::DeviceNotFound(selector.map(str::to_string)))
}

pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| Error::ConnectionFailed(format!("cannot build HTTP client: {e}")))
}

/// Decodes a JSON body, turning non-success statuses into transport errors.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response, timeout: Option<Duration>) -> Result<T> {
    let status = response.status();
    let url = response.url().path().to_string();
    let body = response.bytes().await.map_err(|e| timeout_aware(e, timeout))?;
    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        return Err(match status.as_u16() {
            401 | 403 => Error::ConnectionFailed(format!("{url}: {status} {}", text.trim())),
            _ => Error::Transport(format!("{url}: HTTP {status}: {}", text.trim())),
        });
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }
    Ok(serde_json::from_slice(&body)?)
}

pub(crate) fn timeout_aware(err: reqwest::Error, timeout: Option<Duration>) -> Error {
    match timeout {
        Some(t) if err.is_timeout() => Error::Timeout(t),
        _ => err.into(),
    }
}
