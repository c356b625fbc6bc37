//! Headless transport and session layer for KeepKey hardware wallets.
//!
//! One [`DeviceClient`] drives one device over USB-HID, WebUSB, the local
//! bridge daemon, or the desktop app's REST API.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod messages;
pub mod path;
pub mod pin;
pub mod transport;

pub use client::{ConfirmationKind, ConfirmationState, DeviceClient};
pub use config::{TransportConfig, TransportKind};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventBus, SubscriptionId};
pub use features::{DeviceFeatures, FirmwareVersion};
pub use messages::{MessageType, ProtocolMessage};
pub use transport::{DeviceHandle, DeviceInfo, Transport};

/// Licence and warranty notice for interactive front ends.
pub fn license_notice() -> String {
    format!(
        "{} {} is licensed under {}. It is provided as is, without warranty of any kind.",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_LICENSE"),
    )
}

/// Logs [`license_notice`] once per process.
pub fn announce_license() {
    static ANNOUNCED: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();
    ANNOUNCED.get_or_init(|| tracing::info!("{}", license_notice()));
}
