#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};

use keepkey_transport::{
    messages::{MessageType, PayloadCodec, ProtobufCodec, ProtocolMessage},
    transport::{
        framing::{self, Reassembler, PACKET_SIZE},
        DeviceInfo, HidBackend, HidChannel,
    },
    Error, Result,
};

pub const DEVICE_ID: &str = "343737340F4736331F003B00";

pub fn features_reply() -> Value {
    json!({
        "type": "Features",
        "message": {
            "vendor": "keepkey.com",
            "majorVersion": 7, "minorVersion": 10, "patchVersion": 0,
            "deviceId": DEVICE_ID,
            "label": "Test",
            "initialized": true,
            "pinProtection": true
        }
    })
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub path: String,
    pub session: Option<String>,
}

/// Scripted stand-in for both the bridge daemon and the desktop app.
#[derive(Debug, Default)]
pub struct DaemonState {
    pub devices: Vec<MockDevice>,
    pub next_session: u32,
    /// Every request seen, as `"METHOD /path"`.
    pub hits: Vec<String>,
    pub call_replies: VecDeque<Value>,
    pub calls: Vec<Value>,
    pub listen_replies: VecDeque<Value>,
    pub api_key: Option<String>,
    pub reject_acquire: bool,
}

impl DaemonState {
    pub fn with_device(path: &str) -> Self {
        Self {
            devices: vec![MockDevice {
                path: path.to_string(),
                session: None,
            }],
            ..Default::default()
        }
    }

    pub fn reply(mut self, reply: Value) -> Self {
        self.call_replies.push_back(reply);
        self
    }
}

pub type Shared = Arc<Mutex<DaemonState>>;

pub struct MockDaemon {
    pub url: String,
    pub state: Shared,
}

impl MockDaemon {
    pub async fn start(state: DaemonState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, state }
    }

    pub fn hits(&self) -> Vec<String> {
        self.state.lock().unwrap().hits.clone()
    }

    pub fn calls(&self) -> Vec<Value> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Simulates another client taking over the device.
    pub fn steal_session(&self, path: &str, session: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.devices.iter_mut().find(|d| d.path == path) {
            d.session = Some(session.to_string());
        }
    }

    pub fn unplug(&self, path: &str) {
        self.state.lock().unwrap().devices.retain(|d| d.path != path);
    }

    pub fn push_call_reply(&self, reply: Value) {
        self.state.lock().unwrap().call_replies.push_back(reply);
    }

    pub fn push_listen_reply(&self, reply: Value) {
        self.state.lock().unwrap().listen_replies.push_back(reply);
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// Paths like "/acquire//dev/hid0/null" do not fit axum's router, so parse by hand.
async fn handle(State(state): State<Shared>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    match route(&state, &method, uri.path(), &headers, &body) {
        Some(response) => response,
        None => {
            // Long-poll with nothing to say.
            tokio::time::sleep(Duration::from_secs(30)).await;
            error(StatusCode::REQUEST_TIMEOUT, "nothing happened")
        }
    }
}

fn route(state: &Shared, method: &Method, path: &str, headers: &HeaderMap, body: &Bytes) -> Option<Response> {
    state.lock().unwrap().hits.push(format!("{method} {path}"));

    if *method == Method::GET && path == "/devices" {
        return Some(desktop_devices(state, headers));
    }
    if *method != Method::POST {
        return Some(error(StatusCode::METHOD_NOT_ALLOWED, "POST only"));
    }
    if path == "/call" {
        return Some(desktop_call(state, headers, body));
    }

    let mut s = state.lock().unwrap();
    if path == "/enumerate" {
        let list: Vec<Value> = s
            .devices
            .iter()
            .map(|d| json!({ "path": d.path, "session": d.session, "vendor": 0x2B24, "product": 1 }))
            .collect();
        return Some(Json(list).into_response());
    }
    if let Some(rest) = path.strip_prefix("/acquire/") {
        let Some((device_path, previous)) = rest.rsplit_once('/') else {
            return Some(error(StatusCode::BAD_REQUEST, "malformed acquire"));
        };
        if s.reject_acquire {
            return Some(error(StatusCode::BAD_REQUEST, "acquire refused"));
        }
        s.next_session += 1;
        let fresh = s.next_session.to_string();
        let Some(device) = s.devices.iter_mut().find(|d| d.path == device_path) else {
            return Some(error(StatusCode::NOT_FOUND, "device not found"));
        };
        let previous = (previous != "null").then(|| previous.to_string());
        if device.session != previous {
            return Some(error(StatusCode::BAD_REQUEST, "wrong previous session"));
        }
        device.session = Some(fresh.clone());
        return Some(Json(json!({ "session": fresh })).into_response());
    }
    if let Some(session) = path.strip_prefix("/release/") {
        for d in s.devices.iter_mut().filter(|d| d.session.as_deref() == Some(session)) {
            d.session = None;
        }
        return Some(Json(json!({})).into_response());
    }
    if let Some(session) = path.strip_prefix("/call/") {
        if !s.devices.iter().any(|d| d.session.as_deref() == Some(session)) {
            return Some(error(StatusCode::BAD_REQUEST, "wrong session"));
        }
        s.calls.push(serde_json::from_slice(body).unwrap_or(Value::Null));
        return Some(match s.call_replies.pop_front() {
            Some(reply) => Json(reply).into_response(),
            None => error(StatusCode::INTERNAL_SERVER_ERROR, "no scripted reply"),
        });
    }
    if path.starts_with("/listen/") {
        return s.listen_replies.pop_front().map(|reply| Json(reply).into_response());
    }
    Some(error(StatusCode::NOT_FOUND, "unknown endpoint"))
}

fn authorized(state: &Shared, headers: &HeaderMap) -> bool {
    let expected = state.lock().unwrap().api_key.clone();
    match expected {
        None => true,
        Some(key) => headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v == format!("Bearer {key}")),
    }
}

fn desktop_devices(state: &Shared, headers: &HeaderMap) -> Response {
    if !authorized(state, headers) {
        return error(StatusCode::UNAUTHORIZED, "bad api key");
    }
    let s = state.lock().unwrap();
    let list: Vec<Value> = s
        .devices
        .iter()
        .map(|d| json!({ "deviceId": d.path, "label": "Test" }))
        .collect();
    Json(list).into_response()
}

fn desktop_call(state: &Shared, headers: &HeaderMap, body: &Bytes) -> Response {
    if !authorized(state, headers) {
        return error(StatusCode::UNAUTHORIZED, "bad api key");
    }
    let mut s = state.lock().unwrap();
    s.calls.push(serde_json::from_slice(body).unwrap_or(Value::Null));
    match s.call_replies.pop_front() {
        Some(reply) => Json(reply).into_response(),
        None => error(StatusCode::INTERNAL_SERVER_ERROR, "no scripted reply"),
    }
}

/// Emulated HID device: decodes each framed request with the protobuf codec,
/// checks it against the script and queues the scripted reply as reports.
pub struct HidEmulator {
    inbox: Reassembler,
    outbox: VecDeque<Vec<u8>>,
    script: VecDeque<(MessageType, ProtocolMessage)>,
    pub seen: Arc<Mutex<Vec<ProtocolMessage>>>,
}

impl HidEmulator {
    pub fn new(script: Vec<(MessageType, ProtocolMessage)>) -> Self {
        Self {
            inbox: Reassembler::new(),
            outbox: VecDeque::new(),
            script: script.into(),
            seen: Arc::default(),
        }
    }
}

impl HidChannel for HidEmulator {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        assert_eq!(report.len(), PACKET_SIZE, "reports are fixed size");
        let Some((code, payload)) = self.inbox.push(report)? else {
            return Ok(());
        };
        let message_type = MessageType::try_from_code(code)?;
        let request = ProtobufCodec.decode(message_type, &payload)?;
        self.seen.lock().unwrap().push(request);

        let (expected, reply) = self
            .script
            .pop_front()
            .ok_or_else(|| Error::Transport(format!("unscripted {message_type}")))?;
        assert_eq!(message_type, expected, "device received an unexpected request");
        let bytes = ProtobufCodec.encode(&reply)?;
        self.outbox
            .extend(framing::split_packets(reply.message_type.code(), &bytes, PACKET_SIZE)?);
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        match self.outbox.pop_front() {
            Some(report) => {
                buf[..report.len()].copy_from_slice(&report);
                Ok(report.len())
            }
            None => Ok(0),
        }
    }
}

/// Hands out one pre-built emulator.
pub struct EmulatorBackend {
    pub path: String,
    device: Mutex<Option<HidEmulator>>,
}

impl EmulatorBackend {
    pub fn new(path: &str, device: HidEmulator) -> Self {
        Self {
            path: path.to_string(),
            device: Mutex::new(Some(device)),
        }
    }
}

impl HidBackend for EmulatorBackend {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            path: self.path.clone(),
            vendor: Some(0x2B24),
            product: Some(0x0001),
            serial_number: Some("EMU0001".into()),
            ..Default::default()
        }])
    }

    fn open(&self, path: &str) -> Result<Box<dyn HidChannel>> {
        if path != self.path {
            return Err(Error::DeviceNotFound(Some(path.to_string())));
        }
        let device = self
            .device
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::ConnectionFailed("emulator already open".into()))?;
        Ok(Box::new(device))
    }
}

pub fn msg(message_type: MessageType, payload: Value) -> ProtocolMessage {
    ProtocolMessage::with_payload(message_type, &payload).unwrap()
}
