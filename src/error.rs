use std::time::Duration;

use thiserror::Error;

use crate::client::ConfirmationKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Flat error taxonomy surfaced to upstream handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceNotFound,
    NotConnected,
    ConnectionFailed,
    TransportError,
    Timeout,
    UnexpectedResponse,
    UnsupportedEnvironment,
    SessionInvalid,
    InitializationFailed,
    DeviceDisconnected,
    DeviceFailure,
    ConfirmationMismatch,
    UnknownMessageType,
    Codec,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceNotFound => "DeviceNotFound",
            ErrorKind::NotConnected => "NotConnected",
            ErrorKind::ConnectionFailed => "ConnectionFailed",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::UnexpectedResponse => "UnexpectedResponse",
            ErrorKind::UnsupportedEnvironment => "UnsupportedEnvironment",
            ErrorKind::SessionInvalid => "SessionInvalid",
            ErrorKind::InitializationFailed => "InitializationFailed",
            ErrorKind::DeviceDisconnected => "DeviceDisconnected",
            ErrorKind::DeviceFailure => "DeviceFailure",
            ErrorKind::ConfirmationMismatch => "ConfirmationMismatch",
            ErrorKind::UnknownMessageType => "UnknownMessageType",
            ErrorKind::Codec => "Codec",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no KeepKey device found{}", .0.as_deref().map(|s| format!(" matching {s}")).unwrap_or_default())]
    DeviceNotFound(Option<String>),

    #[error("no device connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// A zero duration means the deadline was not known where the error arose.
    #[error("device did not respond {}", within(.0))]
    Timeout(Duration),

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("bridge session invalid: {0}")]
    SessionInvalid(String),

    #[error("device initialization failed: {0}")]
    InitializationFailed(String),

    #[error("device {0} disconnected")]
    DeviceDisconnected(String),

    #[error("device failure ({code}): {message}")]
    DeviceFailure { code: String, message: String },

    #[error("no outstanding {expected} confirmation (current: {})", .pending.map(|k| k.to_string()).unwrap_or_else(|| "none".into()))]
    ConfirmationMismatch {
        expected: ConfirmationKind,
        pending: Option<ConfirmationKind>,
    },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("payload codec error: {0}")]
    Codec(String),
}

fn within(deadline: &Duration) -> String {
    if deadline.is_zero() {
        "in time".to_string()
    } else {
        format!("within {deadline:?}")
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Error::Transport(_) => ErrorKind::TransportError,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::UnexpectedResponse { .. } => ErrorKind::UnexpectedResponse,
            Error::UnsupportedEnvironment(_) => ErrorKind::UnsupportedEnvironment,
            Error::SessionInvalid(_) => ErrorKind::SessionInvalid,
            Error::InitializationFailed(_) => ErrorKind::InitializationFailed,
            Error::DeviceDisconnected(_) => ErrorKind::DeviceDisconnected,
            Error::DeviceFailure { .. } => ErrorKind::DeviceFailure,
            Error::ConfirmationMismatch { .. } => ErrorKind::ConfirmationMismatch,
            Error::UnknownMessageType(_) => ErrorKind::UnknownMessageType,
            Error::Codec(_) => ErrorKind::Codec,
        }
    }

    pub(crate) fn unexpected(expected: impl ToString, actual: impl ToString) -> Self {
        Error::UnexpectedResponse {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured deadline on the error
            Error::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            Error::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            Error::Codec(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<hidapi::HidError> for Error {
    fn from(err: hidapi::HidError) -> Self {
        Error::Transport(format!("HID API error: {err}"))
    }
}

impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => Error::Timeout(Duration::ZERO),
            rusb::Error::NoDevice => Error::DeviceDisconnected("usb".into()),
            rusb::Error::NotFound => Error::DeviceNotFound(None),
            other => Error::Transport(format!("USB error: {other}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<prost::EncodeError> for Error {
    fn from(err: prost::EncodeError) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(Error::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(Error::Timeout(Duration::from_secs(1)).kind(), ErrorKind::Timeout);
        assert_eq!(
            Error::unexpected("Features", "Success").kind(),
            ErrorKind::UnexpectedResponse
        );
        assert_eq!(rusb::Error::Timeout.into_kind(), ErrorKind::Timeout);
    }

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            Error::DeviceNotFound(Some("/dev/hid0".into())).to_string(),
            "no KeepKey device found matching /dev/hid0"
        );
        assert_eq!(Error::DeviceNotFound(None).to_string(), "no KeepKey device found");
        assert_eq!(
            Error::Timeout(Duration::from_secs(60)).to_string(),
            "device did not respond within 60s"
        );
        assert_eq!(
            Error::from(rusb::Error::Timeout).to_string(),
            "device did not respond in time"
        );
        let err = Error::ConfirmationMismatch {
            expected: ConfirmationKind::Pin,
            pending: None,
        };
        assert_eq!(err.to_string(), "no outstanding pin confirmation (current: none)");
    }

    trait IntoKind {
        fn into_kind(self) -> ErrorKind;
    }

    impl IntoKind for rusb::Error {
        fn into_kind(self) -> ErrorKind {
            Error::from(self).kind()
        }
    }
}
