mod common;

use serde_json::json;

use common::{features_reply, DaemonState, MockDaemon};
use keepkey_transport::{DeviceClient, ErrorKind, TransportConfig, TransportKind};

fn desktop_config(daemon: &MockDaemon, api_key: Option<&str>) -> TransportConfig {
    let mut config = TransportConfig::new(TransportKind::Desktop);
    config.desktop_url = daemon.url.clone();
    config.api_key = api_key.map(str::to_string);
    config
}

#[tokio::test]
async fn calls_carry_bearer_key() {
    let mut state = DaemonState::with_device("kk-desktop-1")
        .reply(features_reply())
        .reply(json!({"type": "Entropy", "message": {"entropy": "00ff10"}}));
    state.api_key = Some("secret".into());
    let daemon = MockDaemon::start(state).await;

    let mut client = DeviceClient::new(desktop_config(&daemon, Some("secret"))).unwrap();
    let handle = client.connect().await.unwrap();
    assert_eq!(handle.path, "kk-desktop-1");
    assert!(handle.session.is_none());

    assert_eq!(client.get_entropy(3).await.unwrap(), vec![0x00, 0xff, 0x10]);

    let calls = daemon.calls();
    assert_eq!(calls[1]["type"], 9);
    assert_eq!(calls[1]["message"]["size"], 3);
    assert_eq!(calls[1]["path"], "kk-desktop-1");
    assert_eq!(
        daemon.hits(),
        vec!["GET /devices", "POST /call", "POST /call"]
    );
}

#[tokio::test]
async fn wrong_key_fails_to_connect() {
    let mut state = DaemonState::with_device("kk-desktop-1");
    state.api_key = Some("secret".into());
    let daemon = MockDaemon::start(state).await;

    let mut client = DeviceClient::new(desktop_config(&daemon, Some("nope"))).unwrap();
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn no_devices_is_device_not_found() {
    let daemon = MockDaemon::start(DaemonState::default()).await;
    let mut client = DeviceClient::new(desktop_config(&daemon, None)).unwrap();
    assert_eq!(client.connect().await.unwrap_err().kind(), ErrorKind::DeviceNotFound);
}

#[tokio::test]
async fn failure_during_init_tears_down() {
    let daemon = MockDaemon::start(DaemonState::with_device("kk-desktop-1").reply(json!({
        "type": "Failure",
        "message": {"code": "Failure_NotInitialized", "message": "Device not initialized"}
    })))
    .await;
    let mut client = DeviceClient::new(desktop_config(&daemon, None)).unwrap();
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceFailure);
    assert!(!client.is_connected());
    assert!(client.get_device().is_none());
}
