use super::MessageType;
use core::time::Duration;

/// Floor for anything that may sit behind a button press on the device.
pub const BUTTON_TIMEOUT: Duration = Duration::from_secs(60);
/// Firmware-class operations (erase/upload) take minutes.
pub const FIRMWARE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Read timeout for the response to `message_type`, given the configured base.
pub fn timeout_for(message_type: MessageType, base: Duration) -> Duration {
    match message_type {
        MessageType::FirmwareErase | MessageType::FirmwareUpload => FIRMWARE_TIMEOUT,
        MessageType::ButtonAck
        | MessageType::ApplySettings
        | MessageType::ApplyPolicies
        | MessageType::WipeDevice
        | MessageType::ResetDevice
        | MessageType::RecoveryDevice
        | MessageType::ChangePin
        | MessageType::PinMatrixAck
        | MessageType::PassphraseAck
        | MessageType::WordAck
        | MessageType::EntropyAck
        | MessageType::CharacterAck => base.max(BUTTON_TIMEOUT),
        _ => base,
    }
}
