use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    messages::{MessageType, ProtocolMessage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity and security posture reported by `Initialize` / `GetFeatures`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFeatures {
    pub vendor: String,
    pub version: FirmwareVersion,
    pub bootloader_mode: bool,
    pub device_id: String,
    pub pin_protection: bool,
    pub passphrase_protection: bool,
    pub language: String,
    pub label: String,
    pub initialized: bool,
    pub model: String,
    pub needs_backup: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawFeatures {
    vendor: Option<String>,
    #[serde(alias = "major_version")]
    major_version: Option<u32>,
    #[serde(alias = "minor_version")]
    minor_version: Option<u32>,
    #[serde(alias = "patch_version")]
    patch_version: Option<u32>,
    #[serde(alias = "bootloader_mode")]
    bootloader_mode: Option<bool>,
    #[serde(alias = "device_id")]
    device_id: Option<String>,
    #[serde(alias = "pin_protection")]
    pin_protection: Option<bool>,
    #[serde(alias = "passphrase_protection")]
    passphrase_protection: Option<bool>,
    language: Option<String>,
    label: Option<String>,
    initialized: Option<bool>,
    model: Option<String>,
    #[serde(alias = "needs_backup")]
    needs_backup: Option<bool>,
    #[serde(alias = "no_backup")]
    no_backup: Option<bool>,
}

impl DeviceFeatures {
    /// Parses a `Features` response.
    pub fn from_message(msg: &ProtocolMessage) -> Result<Self> {
        if !msg.is(MessageType::Features) {
            return Err(Error::unexpected(MessageType::Features, msg.message_type));
        }
        let raw: RawFeatures = msg.parse_payload()?;
        Ok(Self {
            vendor: raw.vendor.unwrap_or_default(),
            version: FirmwareVersion {
                major: raw.major_version.unwrap_or(0),
                minor: raw.minor_version.unwrap_or(0),
                patch: raw.patch_version.unwrap_or(0),
            },
            bootloader_mode: raw.bootloader_mode.unwrap_or(false),
            device_id: raw.device_id.unwrap_or_default(),
            pin_protection: raw.pin_protection.unwrap_or(false),
            passphrase_protection: raw.passphrase_protection.unwrap_or(false),
            language: raw.language.unwrap_or_default(),
            label: raw.label.unwrap_or_default(),
            initialized: raw.initialized.unwrap_or(false),
            model: raw.model.unwrap_or_default(),
            // KeepKey firmware reports `no_backup`; newer payloads say `needsBackup`.
            needs_backup: raw.needs_backup.or(raw.no_backup),
        })
    }
}
