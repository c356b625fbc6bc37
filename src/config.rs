//! Connection settings handed to [`DeviceClient`](crate::client::DeviceClient) at construction.

use std::{path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:21325";
pub const DEFAULT_DESKTOP_URL: &str = "http://localhost:1646";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Which medium the client talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportKind {
    UsbHid,
    WebUsb,
    #[default]
    Bridge,
    Desktop,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::UsbHid => "usbHid",
            TransportKind::WebUsb => "webUsb",
            TransportKind::Bridge => "bridge",
            TransportKind::Desktop => "desktop",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "usb" | "hid" | "usbhid" => Ok(TransportKind::UsbHid),
            "webusb" => Ok(TransportKind::WebUsb),
            "bridge" => Ok(TransportKind::Bridge),
            "desktop" | "keepkeydesktop" => Ok(TransportKind::Desktop),
            other => Err(Error::ConnectionFailed(format!(
                "unknown transport kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub bridge_url: String,
    pub desktop_url: String,
    /// Device selector: HID path, bridge path, or desktop device id.
    pub device_path: Option<String>,
    pub timeout_ms: u64,
    /// Bearer token for the desktop app REST API.
    pub api_key: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            desktop_url: DEFAULT_DESKTOP_URL.to_string(),
            device_path: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            api_key: None,
        }
    }
}

impl TransportConfig {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConnectionFailed(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Overlay `KEEPKEY_*` environment variables on top of this config.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(kind) = var("KEEPKEY_TRANSPORT") {
            self.kind = kind.parse()?;
        }
        if let Some(url) = var("KEEPKEY_BRIDGE_URL") {
            self.bridge_url = url;
        }
        if let Some(url) = var("KEEPKEY_DESKTOP_URL") {
            self.desktop_url = url;
        }
        if let Some(path) = var("KEEPKEY_DEVICE_PATH") {
            self.device_path = Some(path).filter(|p| !p.is_empty());
        }
        if let Some(ms) = var("KEEPKEY_TIMEOUT_MS") {
            self.timeout_ms = ms.trim().parse().map_err(|_| {
                Error::ConnectionFailed(format!("KEEPKEY_TIMEOUT_MS is not a number: {ms}"))
            })?;
        }
        if let Some(key) = var("KEEPKEY_API_KEY") {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub(crate) fn trimmed_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
