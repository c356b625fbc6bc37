mod codec;
mod macros;
pub mod schema;
mod timeouts;

pub use codec::{PayloadCodec, ProtobufCodec};
pub use timeouts::{timeout_for, BUTTON_TIMEOUT, FIRMWARE_TIMEOUT};

use std::{convert::TryFrom, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use macros::message_registry;

message_registry!(
    // Core device messages
    Initialize = 0,
    Ping = 1,
    Success = 2,
    Failure = 3,
    ChangePin = 4,
    WipeDevice = 5,
    FirmwareErase = 6,
    FirmwareUpload = 7,
    GetEntropy = 9,
    Entropy = 10,
    GetPublicKey = 11,
    PublicKey = 12,
    LoadDevice = 13,
    ResetDevice = 14,
    SignTx = 15,
    Features = 17,

    // PIN / session
    PinMatrixRequest = 18,
    PinMatrixAck = 19,
    Cancel = 20,
    TxRequest = 21,
    TxAck = 22,
    CipherKeyValue = 23,
    ClearSession = 24,
    ApplySettings = 25,
    ButtonRequest = 26,
    ButtonAck = 27,
    GetAddress = 29,
    Address = 30,
    EntropyRequest = 35,
    EntropyAck = 36,
    SignMessage = 38,
    VerifyMessage = 39,
    MessageSignature = 40,
    PassphraseRequest = 41,
    PassphraseAck = 42,
    RecoveryDevice = 45,
    WordRequest = 46,
    WordAck = 47,
    CipheredKeyValue = 48,
    SignIdentity = 53,
    SignedIdentity = 54,
    GetFeatures = 55,

    // Ethereum
    EthereumGetAddress = 56,
    EthereumAddress = 57,
    EthereumSignTx = 58,
    EthereumTxRequest = 59,
    EthereumTxAck = 60,
    EthereumSignMessage = 64,
    EthereumVerifyMessage = 65,
    EthereumMessageSignature = 66,

    // Recovery cipher
    CharacterRequest = 80,
    CharacterAck = 81,
    RawTxAck = 82,

    // Debug link
    DebugLinkDecision = 100,
    DebugLinkGetState = 101,
    DebugLinkState = 102,
    DebugLinkStop = 103,
    DebugLinkLog = 104,

    ApplyPolicies = 110,

    // THORChain
    ThorchainGetAddress = 500,
    ThorchainAddress = 501,
    ThorchainSignTx = 502,
    ThorchainMsgRequest = 503,
    ThorchainMsgAck = 504,
    ThorchainSignedTx = 505,
);

impl MessageType {
    /// Looks a code up, failing fast instead of defaulting to `Initialize`.
    pub fn try_from_code(code: u16) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| Error::UnknownMessageType(code.to_string()))
    }

    pub fn is_confirmation_request(self) -> bool {
        matches!(
            self,
            MessageType::ButtonRequest
                | MessageType::PinMatrixRequest
                | MessageType::PassphraseRequest
                | MessageType::WordRequest
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.strip_prefix("MessageType_").unwrap_or(s);
        if let Some(t) = Self::from_name(name) {
            return Ok(t);
        }
        match name.parse::<u16>() {
            Ok(code) => Self::try_from_code(code),
            Err(_) => Err(Error::UnknownMessageType(s.to_string())),
        }
    }
}

impl TryFrom<u16> for MessageType {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        Self::try_from_code(code)
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        match TypeRepr::deserialize(d)? {
            TypeRepr::Code(code) => Self::try_from_code(code),
            TypeRepr::Name(name) => name.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeRepr {
    Code(u16),
    Name(String),
}

/// One logical request or response: a registered type plus a key/value payload.
///
/// Serialises as the `{ "type": <code>, "message": { ... } }` envelope used by
/// the bridge daemon and desktop app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, deserialize_with = "object_or_null")]
    pub message: Map<String, Value>,
}

fn object_or_null<'de, D>(d: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "message payload must be an object, got {other}"
        ))),
    }
}

impl ProtocolMessage {
    pub fn new(message_type: MessageType, message: Map<String, Value>) -> Self {
        Self {
            message_type,
            message,
        }
    }

    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Map::new())
    }

    /// Builds a message from a raw code; unknown codes are rejected.
    pub fn from_code(code: u16, message: Map<String, Value>) -> Result<Self> {
        Ok(Self::new(MessageType::try_from_code(code)?, message))
    }

    /// Builds a message from any serialisable payload (must serialise to an object).
    pub fn with_payload<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self::new(message_type, map)),
            Value::Null => Ok(Self::empty(message_type)),
            other => Err(Error::Codec(format!(
                "{message_type} payload must be an object, got {other}"
            ))),
        }
    }

    pub fn is(&self, message_type: MessageType) -> bool {
        self.message_type == message_type
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.message.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.message.get(key).and_then(Value::as_str)
    }

    pub fn payload_value(&self) -> Value {
        Value::Object(self.message.clone())
    }

    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload_value())?)
    }

    /// Requires `expected`, turning `Failure` into a device error and anything
    /// else into `UnexpectedResponse`.
    pub fn expect(self, expected: MessageType) -> Result<Self> {
        if self.message_type == expected {
            return Ok(self);
        }
        if self.message_type == MessageType::Failure {
            return Err(self.into_failure());
        }
        Err(Error::unexpected(expected, self.message_type))
    }

    pub(crate) fn into_failure(self) -> Error {
        let code = match self.message.get("code") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "Failure_UnknownCode".to_string(),
        };
        Error::DeviceFailure {
            code,
            message: self.get_str("message").unwrap_or_default().to_string(),
        }
    }
}
