mod common;

use std::sync::{Arc, Mutex};

use serde_json::json;

use common::{msg, EmulatorBackend, HidEmulator, DEVICE_ID};
use keepkey_transport::{
    messages::{schema, MessageType as T, ProtobufCodec, ProtocolMessage},
    path::parse_derivation_path,
    transport::UsbHidTransport,
    ConfirmationKind, DeviceClient, EventBus, TransportConfig, TransportKind,
};

const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

fn features() -> ProtocolMessage {
    msg(
        T::Features,
        json!({
            "vendor": "keepkey.com",
            "majorVersion": 7, "minorVersion": 10, "patchVersion": 0,
            "deviceId": DEVICE_ID,
            // long enough to need continuation reports
            "label": "A label that pushes the Features reply past a single report",
            "initialized": true,
            "model": "K1-14AM",
            "firmwareHash": "aa".repeat(32),
        }),
    )
}

fn client_over(script: Vec<(T, ProtocolMessage)>) -> (DeviceClient, Arc<Mutex<Vec<ProtocolMessage>>>) {
    let device = HidEmulator::new(script);
    let seen = Arc::clone(&device.seen);
    let transport = UsbHidTransport::with_backend(
        Arc::new(EmulatorBackend::new("/dev/hidraw3", device)),
        Arc::new(ProtobufCodec),
    );
    let client = DeviceClient::with_transport(
        TransportConfig::new(TransportKind::UsbHid),
        Box::new(transport),
        EventBus::new(),
    );
    (client, seen)
}

fn get_address(show: bool) -> ProtocolMessage {
    ProtocolMessage::with_payload(
        T::GetAddress,
        &schema::GetAddress {
            address_n: parse_derivation_path("m/84'/0'/0'/0/0").unwrap(),
            coin_name: Some("Bitcoin".into()),
            show_display: Some(show),
            script_type: Some(3),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn get_address_round_trips_through_framing() {
    let (mut client, seen) = client_over(vec![
        (T::Initialize, features()),
        (T::GetAddress, msg(T::Address, json!({ "address": ADDRESS }))),
    ]);

    let handle = client.connect().await.unwrap();
    assert_eq!(handle.path, "/dev/hidraw3");
    let features = handle.features.unwrap();
    assert_eq!(features.model, "K1-14AM");
    assert_eq!(features.version.to_string(), "7.10.0");

    let reply = client.call(get_address(false)).await.unwrap();
    assert!(reply.is(T::Address));
    assert_eq!(reply.get_str("address"), Some(ADDRESS));

    let seen = seen.lock().unwrap();
    assert_eq!(seen[1].get("addressN"), Some(&json!([0x8000_0054u32, 0x8000_0000u32, 0x8000_0000u32, 0, 0])));
    assert_eq!(seen[1].get_str("scriptType"), Some("SPENDWITNESS"));
}

#[tokio::test]
async fn raw_call_leaves_button_request_for_caller() {
    let (mut client, seen) = client_over(vec![
        (T::Initialize, features()),
        (T::GetAddress, msg(T::ButtonRequest, json!({ "code": "ButtonRequest_Address" }))),
        (T::ButtonAck, msg(T::Address, json!({ "address": ADDRESS }))),
    ]);
    client.connect().await.unwrap();

    let reply = client.call(get_address(true)).await.unwrap();
    assert!(reply.is(T::ButtonRequest));
    let pending = client.pending_confirmation().unwrap();
    assert_eq!(pending.kind, ConfirmationKind::Button);
    assert_eq!(pending.origin, T::GetAddress);

    let reply = client.send_button_ack().await.unwrap();
    assert_eq!(reply.get_str("address"), Some(ADDRESS));
    assert!(client.pending_confirmation().is_none());
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn pin_is_sent_as_matrix_positions() {
    let (mut client, seen) = client_over(vec![
        (T::Initialize, features()),
        (T::GetAddress, msg(T::PinMatrixRequest, json!({ "type": "PinMatrixRequestType_Current" }))),
        (T::PinMatrixAck, msg(T::Address, json!({ "address": ADDRESS }))),
    ]);
    client.connect().await.unwrap();

    let reply = client.call(get_address(false)).await.unwrap();
    assert!(reply.is(T::PinMatrixRequest));
    assert_eq!(reply.get_str("type"), Some("PinMatrixRequestType_Current"));

    let reply = client.send_pin("7913").await.unwrap();
    assert!(reply.is(T::Address));
    assert_eq!(seen.lock().unwrap()[2].get_str("pin"), Some("7913"));
}

#[tokio::test]
async fn unscripted_request_is_transport_error() {
    let (mut client, _) = client_over(vec![(T::Initialize, features())]);
    client.connect().await.unwrap();
    // The emulator refuses requests it has no reply for.
    let err = client.call(ProtocolMessage::empty(T::GetFeatures)).await.unwrap_err();
    assert_eq!(err.kind(), keepkey_transport::ErrorKind::TransportError);
}
