//! Wire schemas for the core device-management message set.
//!
//! These mirror the KeepKey `messages.proto` field numbers. Payload keys are
//! camelCase, enum fields accept either their symbolic name or the integer,
//! and `bytes` fields travel as hex strings.

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, skip_serializing_none};

macro_rules! wire_enum {
    ($module:ident { $($name:literal = $value:literal),* $(,)? }) => {
        pub mod $module {
            use serde::{Deserialize, Deserializer, Serializer};
            use serde_json::Value;

            pub const NAMES: &[(&str, i32)] = &[$(($name, $value)),*];

            pub fn name_of(value: i32) -> Option<&'static str> {
                NAMES.iter().find(|(_, v)| *v == value).map(|(n, _)| *n)
            }

            pub fn value_of(name: &str) -> Option<i32> {
                NAMES.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
            }

            pub fn serialize<S: Serializer>(v: &Option<i32>, s: S) -> Result<S::Ok, S::Error> {
                match v {
                    Some(v) => match name_of(*v) {
                        Some(name) => s.serialize_str(name),
                        None => s.serialize_i32(*v),
                    },
                    None => s.serialize_none(),
                }
            }

            pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
                match Value::deserialize(d)? {
                    Value::Null => Ok(None),
                    Value::String(name) => value_of(&name)
                        .map(Some)
                        .ok_or_else(|| serde::de::Error::custom(format!(
                            "unknown {} value '{}'", stringify!($module), name
                        ))),
                    Value::Number(n) => n
                        .as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .map(Some)
                        .ok_or_else(|| serde::de::Error::custom("enum value out of range")),
                    other => Err(serde::de::Error::custom(format!(
                        "expected {} name or number, got {}", stringify!($module), other
                    ))),
                }
            }
        }
    };
}

wire_enum!(input_script_type {
    "SPENDADDRESS" = 0,
    "SPENDMULTISIG" = 1,
    "EXTERNAL" = 2,
    "SPENDWITNESS" = 3,
    "SPENDP2SHWITNESS" = 4,
});

wire_enum!(failure_type {
    "Failure_UnexpectedMessage" = 1,
    "Failure_ButtonExpected" = 2,
    "Failure_SyntaxError" = 3,
    "Failure_ActionCancelled" = 4,
    "Failure_PinExpected" = 5,
    "Failure_PinCancelled" = 6,
    "Failure_PinInvalid" = 7,
    "Failure_InvalidSignature" = 8,
    "Failure_Other" = 9,
    "Failure_NotEnoughFunds" = 10,
    "Failure_NotInitialized" = 11,
    "Failure_PinMismatch" = 12,
    "Failure_FirmwareError" = 99,
});

wire_enum!(pin_matrix_request_type {
    "PinMatrixRequestType_Current" = 1,
    "PinMatrixRequestType_NewFirst" = 2,
    "PinMatrixRequestType_NewSecond" = 3,
});

wire_enum!(button_request_type {
    "ButtonRequest_Other" = 1,
    "ButtonRequest_FeeOverThreshold" = 2,
    "ButtonRequest_ConfirmOutput" = 3,
    "ButtonRequest_ResetDevice" = 4,
    "ButtonRequest_ConfirmWord" = 5,
    "ButtonRequest_WipeDevice" = 6,
    "ButtonRequest_ProtectCall" = 7,
    "ButtonRequest_SignTx" = 8,
    "ButtonRequest_FirmwareCheck" = 9,
    "ButtonRequest_Address" = 10,
});

macro_rules! empty_messages {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
            pub struct $name {}
        )*
    };
}

empty_messages!(
    Initialize,
    GetFeatures,
    ButtonAck,
    PassphraseRequest,
    WordRequest,
    EntropyRequest,
    WipeDevice,
    Cancel,
    ClearSession,
);

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    #[prost(string, optional, tag = "1")]
    pub vendor: Option<String>,
    #[prost(uint32, optional, tag = "2")]
    pub major_version: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub minor_version: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub patch_version: Option<u32>,
    #[prost(bool, optional, tag = "5")]
    pub bootloader_mode: Option<bool>,
    #[prost(string, optional, tag = "6")]
    pub device_id: Option<String>,
    #[prost(bool, optional, tag = "7")]
    pub pin_protection: Option<bool>,
    #[prost(bool, optional, tag = "8")]
    pub passphrase_protection: Option<bool>,
    #[prost(string, optional, tag = "9")]
    pub language: Option<String>,
    #[prost(string, optional, tag = "10")]
    pub label: Option<String>,
    #[prost(bool, optional, tag = "12")]
    pub initialized: Option<bool>,
    #[prost(bytes = "vec", optional, tag = "13")]
    #[serde_as(as = "Option<Hex>")]
    pub revision: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "14")]
    #[serde_as(as = "Option<Hex>")]
    pub bootloader_hash: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "15")]
    pub imported: Option<bool>,
    #[prost(bool, optional, tag = "16")]
    pub pin_cached: Option<bool>,
    #[prost(bool, optional, tag = "17")]
    pub passphrase_cached: Option<bool>,
    #[prost(string, optional, tag = "21")]
    pub model: Option<String>,
    #[prost(string, optional, tag = "22")]
    pub firmware_variant: Option<String>,
    #[prost(bytes = "vec", optional, tag = "23")]
    #[serde_as(as = "Option<Hex>")]
    pub firmware_hash: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "24")]
    pub no_backup: Option<bool>,
    #[prost(bool, optional, tag = "25")]
    pub wipe_code_protection: Option<bool>,
    #[prost(uint32, optional, tag = "26")]
    pub auto_lock_delay_ms: Option<u32>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ping {
    #[prost(string, optional, tag = "1")]
    pub message: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub button_protection: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub pin_protection: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub passphrase_protection: Option<bool>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Success {
    #[prost(string, optional, tag = "1")]
    pub message: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Failure {
    #[prost(int32, optional, tag = "1")]
    #[serde(with = "failure_type")]
    pub code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonRequest {
    #[prost(int32, optional, tag = "1")]
    #[serde(with = "button_request_type")]
    pub code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub data: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PinMatrixRequest {
    #[prost(int32, optional, tag = "1")]
    #[serde(rename = "type", with = "pin_matrix_request_type")]
    pub r#type: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PinMatrixAck {
    #[prost(string, required, tag = "1")]
    pub pin: String,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PassphraseAck {
    #[prost(string, required, tag = "1")]
    pub passphrase: String,
    /// Ask the device to collect the passphrase on its own screen.
    #[prost(bool, optional, tag = "3")]
    pub on_device: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WordAck {
    #[prost(string, required, tag = "1")]
    pub word: String,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntropyAck {
    #[prost(bytes = "vec", optional, tag = "1")]
    #[serde_as(as = "Option<Hex>")]
    pub entropy: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetEntropy {
    #[prost(uint32, required, tag = "1")]
    pub size: u32,
}

#[serde_as]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entropy {
    #[prost(bytes = "vec", required, tag = "1")]
    #[serde_as(as = "Hex")]
    pub entropy: Vec<u8>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplySettings {
    #[prost(string, optional, tag = "1")]
    pub language: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub label: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub use_passphrase: Option<bool>,
    #[prost(uint32, optional, tag = "4")]
    pub auto_lock_delay_ms: Option<u32>,
    #[prost(uint32, optional, tag = "5")]
    pub u2f_counter: Option<u32>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetDevice {
    #[prost(bool, optional, tag = "1")]
    pub display_random: Option<bool>,
    #[prost(uint32, optional, tag = "2")]
    pub strength: Option<u32>,
    #[prost(bool, optional, tag = "3")]
    pub passphrase_protection: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub pin_protection: Option<bool>,
    #[prost(string, optional, tag = "5")]
    pub language: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub label: Option<String>,
    #[prost(bool, optional, tag = "7")]
    pub no_backup: Option<bool>,
    #[prost(uint32, optional, tag = "8")]
    pub auto_lock_delay_ms: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub u2f_counter: Option<u32>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryDevice {
    #[prost(uint32, optional, tag = "1")]
    pub word_count: Option<u32>,
    #[prost(bool, optional, tag = "2")]
    pub passphrase_protection: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub pin_protection: Option<bool>,
    #[prost(string, optional, tag = "4")]
    pub language: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub label: Option<String>,
    #[prost(bool, optional, tag = "6")]
    pub enforce_wordlist: Option<bool>,
    #[prost(bool, optional, tag = "7")]
    pub use_character_cipher: Option<bool>,
    #[prost(uint32, optional, tag = "8")]
    pub auto_lock_delay_ms: Option<u32>,
    #[prost(uint32, optional, tag = "9")]
    pub u2f_counter: Option<u32>,
    #[prost(bool, optional, tag = "10")]
    pub dry_run: Option<bool>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangePin {
    #[prost(bool, optional, tag = "1")]
    pub remove: Option<bool>,
}

#[skip_serializing_none]
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetAddress {
    #[prost(uint32, repeated, packed = "false", tag = "1")]
    pub address_n: Vec<u32>,
    #[prost(string, optional, tag = "2")]
    pub coin_name: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub show_display: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    #[serde(with = "input_script_type")]
    pub script_type: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    #[prost(string, required, tag = "1")]
    pub address: String,
}
