use prost::Message as _;
use serde::{de::DeserializeOwned, Serialize};

use super::{schema, MessageType, ProtocolMessage};
use crate::error::{Error, Result};

/// Converts between key/value payloads and the bytes carried inside a frame.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, message: &ProtocolMessage) -> Result<Vec<u8>>;
    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<ProtocolMessage>;
}

/// Protobuf encoding backed by the schemas in [`schema`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtobufCodec;

macro_rules! with_schema {
    ($message_type:expr, $f:ident $args:tt, [$($name:ident),* $(,)?]) => {
        match $message_type {
            $(MessageType::$name => $f::<schema::$name> $args,)*
            other => Err(Error::Codec(format!("no wire schema registered for {other}"))),
        }
    };
}

macro_rules! dispatch {
    ($message_type:expr, $f:ident ( $($arg:expr),* )) => {
        with_schema!($message_type, $f($($arg),*), [
            Initialize, GetFeatures, Features, Ping, Success, Failure,
            ButtonRequest, ButtonAck, PinMatrixRequest, PinMatrixAck,
            PassphraseRequest, PassphraseAck, WordRequest, WordAck,
            EntropyRequest, EntropyAck, GetEntropy, Entropy,
            ApplySettings, WipeDevice, ResetDevice, RecoveryDevice, ChangePin,
            Cancel, ClearSession, GetAddress, Address,
        ])
    };
}

fn encode_as<M>(message: &ProtocolMessage) -> Result<Vec<u8>>
where
    M: prost::Message + DeserializeOwned,
{
    let typed: M = message.parse_payload()?;
    Ok(typed.encode_to_vec())
}

fn decode_as<M>(message_type: MessageType, bytes: &[u8]) -> Result<ProtocolMessage>
where
    M: prost::Message + Default + Serialize,
{
    let typed = M::decode(bytes)?;
    ProtocolMessage::with_payload(message_type, &typed)
}

impl PayloadCodec for ProtobufCodec {
    fn encode(&self, message: &ProtocolMessage) -> Result<Vec<u8>> {
        dispatch!(message.message_type, encode_as(message))
    }

    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<ProtocolMessage> {
        dispatch!(message_type, decode_as(message_type, bytes))
    }
}

fn has_schema<M>() -> Result<()> {
    Ok(())
}

impl ProtobufCodec {
    pub fn supports(message_type: MessageType) -> bool {
        dispatch!(message_type, has_schema()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use serde_json::json;

    #[test]
    fn get_address_encodes_known_bytes() {
        let msg = ProtocolMessage::with_payload(
            MessageType::GetAddress,
            &json!({"addressN": [1, 2], "coinName": "Bitcoin", "scriptType": "SPENDWITNESS"}),
        )
        .unwrap();
        let bytes = ProtobufCodec.encode(&msg).unwrap();
        assert_eq!(
            bytes,
            [0x08, 0x01, 0x08, 0x02, 0x12, 0x07, b'B', b'i', b't', b'c', b'o', b'i', b'n', 0x28, 0x03]
        );
    }

    #[test]
    fn decodes_features() {
        let features = schema::Features {
            vendor: Some("keepkey.com".into()),
            major_version: Some(7),
            minor_version: Some(10),
            patch_version: Some(0),
            device_id: Some("ABC123".into()),
            initialized: Some(true),
            ..Default::default()
        };
        let decoded = ProtobufCodec
            .decode(MessageType::Features, &features.encode_to_vec())
            .unwrap();
        assert_eq!(decoded.message_type, MessageType::Features);
        assert_eq!(decoded.get_str("deviceId"), Some("ABC123"));
        assert_eq!(decoded.get("majorVersion"), Some(&json!(7)));
        assert!(decoded.get("label").is_none());
    }

    #[test]
    fn unschematised_type_is_a_codec_error() {
        let err = ProtobufCodec
            .encode(&ProtocolMessage::empty(MessageType::EthereumSignTx))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Codec);
        assert!(!ProtobufCodec::supports(MessageType::EthereumSignTx));
        assert!(ProtobufCodec::supports(MessageType::Address));
    }
}
