//! Transport through the local KeepKey bridge daemon.
//!
//! The daemon owns the USB device and leases it out as sessions:
//!
//! * `POST /enumerate` lists devices with their current session (or null)
//! * `POST /acquire/{path}/{previous|null}` leases a device and returns `{"session": ..}`
//! * `POST /call/{session}` sends one `{type, message}` envelope and returns the reply
//! * `POST /listen/{session}` long-polls for unsolicited device messages
//! * `POST /release/{session}` ends the lease
//!
//! Another client may steal the lease at any time, so every call first checks
//! the daemon's view of the session and re-acquires when it has rotated.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

use super::{http_client, read_json, select_device, timeout_aware, DeviceHandle, DeviceInfo, Transport};
use crate::{
    config::{trimmed_url, TransportKind},
    error::{Error, Result},
    events::{self, EventBus},
    messages::{MessageType, ProtocolMessage},
};

/// Back-off after a failed long-poll before trying again.
pub const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(1);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// A device path together with the session token leased for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSession {
    pub path: String,
    pub session: String,
}

#[derive(Deserialize)]
struct Acquired {
    session: String,
}

/// Stateless HTTP client for the daemon's endpoints.
#[derive(Debug, Clone)]
pub struct BridgeApi {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: trimmed_url(base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&ProtocolMessage>,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| timeout_aware(e, timeout))?;
        read_json(response, timeout).await
    }

    pub async fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        self.post("enumerate", None, Some(CONTROL_TIMEOUT)).await
    }

    pub async fn acquire(&self, path: &str, previous: Option<&str>) -> Result<String> {
        let endpoint = format!("acquire/{}/{}", path, previous.unwrap_or("null"));
        let acquired: Acquired = self.post(&endpoint, None, Some(CONTROL_TIMEOUT)).await?;
        if acquired.session.is_empty() {
            return Err(Error::SessionInvalid(format!("daemon returned an empty session for {path}")));
        }
        Ok(acquired.session)
    }

    pub async fn release(&self, session: &str) -> Result<()> {
        let _: Value = self
            .post(&format!("release/{session}"), None, Some(CONTROL_TIMEOUT))
            .await?;
        Ok(())
    }

    pub async fn call(&self, session: &str, request: &ProtocolMessage, timeout: Duration) -> Result<ProtocolMessage> {
        self.post(&format!("call/{session}"), Some(request), Some(timeout)).await
    }

    /// Blocks until the device emits something on `session`.
    pub async fn listen(&self, session: &str) -> Result<ProtocolMessage> {
        self.post(&format!("listen/{session}"), None, None).await
    }
}

/// Event name for an unsolicited message, if it is one the client cares about.
pub fn event_for(message_type: MessageType) -> Option<&'static str> {
    match message_type {
        MessageType::ButtonRequest => Some(events::BUTTON_REQUEST),
        MessageType::PinMatrixRequest => Some(events::PIN_REQUEST),
        MessageType::PassphraseRequest => Some(events::PASSPHRASE_REQUEST),
        MessageType::WordRequest => Some(events::WORD_REQUEST),
        MessageType::Failure => Some(events::DEVICE_FAILURE),
        MessageType::Success => Some(events::DEVICE_SUCCESS),
        _ => None,
    }
}

struct Listener {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct BridgeTransport {
    api: BridgeApi,
    events: Arc<EventBus>,
    session: Arc<Mutex<Option<BridgeSession>>>,
    /// Serialises device exchanges: one call or one long-poll at a time.
    wire: Arc<tokio::sync::Mutex<()>>,
    /// Asks an in-flight long-poll to step aside for a call.
    preempt: Arc<Notify>,
    listener: Option<Listener>,
}

impl BridgeTransport {
    pub fn new(base_url: &str, events: Arc<EventBus>) -> Result<Self> {
        Ok(Self {
            api: BridgeApi::new(base_url)?,
            events,
            session: Arc::new(Mutex::new(None)),
            wire: Arc::new(tokio::sync::Mutex::new(())),
            preempt: Arc::new(Notify::new()),
            listener: None,
        })
    }

    pub fn api(&self) -> &BridgeApi {
        &self.api
    }

    pub fn current_session(&self) -> Option<BridgeSession> {
        self.session.lock().ok().and_then(|s| s.clone())
    }

    fn set_session(&self, value: Option<BridgeSession>) {
        if let Ok(mut slot) = self.session.lock() {
            *slot = value;
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().map_or(false, |l| !l.task.is_finished())
    }

    /// Re-validates the held session against the daemon.
    ///
    /// A rotated session is re-acquired, passing the daemon-reported token as
    /// the previous one. A device that has vanished yields
    /// `DeviceDisconnected`; a failed re-acquire yields `SessionInvalid`.
    #[instrument(skip(self))]
    pub async fn refresh_session(&mut self) -> Result<BridgeSession> {
        let held = self.current_session().ok_or(Error::NotConnected)?;
        let devices = self.api.enumerate().await?;
        let Some(device) = devices.iter().find(|d| d.path == held.path) else {
            warn!(path = %held.path, "device no longer listed by bridge");
            self.set_session(None);
            return Err(Error::DeviceDisconnected(held.path));
        };
        if device.session.as_deref() == Some(held.session.as_str()) {
            return Ok(held);
        }

        info!(
            path = %held.path,
            held = %held.session,
            reported = ?device.session,
            "bridge session rotated, re-acquiring"
        );
        match self.api.acquire(&held.path, device.session.as_deref()).await {
            Ok(session) => {
                let fresh = BridgeSession {
                    path: held.path,
                    session,
                };
                self.set_session(Some(fresh.clone()));
                Ok(fresh)
            }
            Err(e) => {
                self.set_session(None);
                Err(Error::SessionInvalid(format!("re-acquire of {} failed: {e}", held.path)))
            }
        }
    }

    /// Starts the background long-poll loop. Idempotent.
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.current_session().is_none() {
            return Err(Error::NotConnected);
        }
        if self.is_listening() {
            return Ok(());
        }
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(listen_loop(
            self.api.clone(),
            Arc::clone(&self.session),
            Arc::clone(&self.wire),
            Arc::clone(&self.preempt),
            Arc::clone(&self.events),
            stop_rx,
        ));
        self.listener = Some(Listener { stop, task });
        Ok(())
    }

    /// Stops the loop and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            let _ = listener.stop.send(true);
            if let Err(e) = listener.task.await {
                warn!("bridge listener ended abnormally: {e}");
            }
        }
    }
}

async fn listen_loop(
    api: BridgeApi,
    session: Arc<Mutex<Option<BridgeSession>>>,
    wire: Arc<tokio::sync::Mutex<()>>,
    preempt: Arc<Notify>,
    events: Arc<EventBus>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("bridge listener started");
    loop {
        if *stop.borrow() {
            break;
        }
        let Some(current) = session.lock().ok().and_then(|s| s.clone()) else {
            break;
        };

        let guard = tokio::select! {
            _ = stop.changed() => break,
            guard = wire.lock() => guard,
        };
        let outcome = tokio::select! {
            _ = stop.changed() => break,
            _ = preempt.notified() => None,
            res = api.listen(&current.session) => Some(res),
        };
        drop(guard);

        match outcome {
            // A call wants the wire; it is already queued on the lock.
            None => tokio::task::yield_now().await,
            Some(Ok(message)) => match event_for(message.message_type) {
                Some(name) => events.emit(name, &message.payload_value()),
                None => debug!(message_type = %message.message_type, "ignoring unsolicited message"),
            },
            Some(Err(e)) => {
                warn!("bridge listen failed: {e}");
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(LISTEN_RETRY_DELAY) => {}
                }
            }
        }
    }
    debug!("bridge listener stopped");
}

#[async_trait]
impl Transport for BridgeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>> {
        self.api.enumerate().await
    }

    async fn connect(&mut self, selector: Option<&str>) -> Result<DeviceHandle> {
        if let Some(held) = self.current_session() {
            if selector.map_or(true, |s| s == held.path) {
                let fresh = self.refresh_session().await?;
                return DeviceHandle::open(TransportKind::Bridge, fresh.path, Some(fresh.session));
            }
            self.disconnect().await?;
        }

        let devices = self.api.enumerate().await?;
        let device = select_device(&devices, selector)?;
        let session = self
            .api
            .acquire(&device.path, device.session.as_deref())
            .await?;
        info!(bridge = %self.api.base_url, path = %device.path, %session, "acquired bridge session");

        let handle = DeviceHandle::open(TransportKind::Bridge, device.path.clone(), Some(session.clone()))?;
        self.set_session(Some(BridgeSession {
            path: device.path.clone(),
            session,
        }));
        Ok(handle)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop().await;
        let Some(held) = self.current_session() else {
            return Ok(());
        };
        self.set_session(None);
        if let Err(e) = self.api.release(&held.session).await {
            warn!(session = %held.session, "bridge release failed: {e}");
        }
        Ok(())
    }

    async fn call(&mut self, request: ProtocolMessage, timeout: Duration) -> Result<ProtocolMessage> {
        if self.current_session().is_none() {
            return Err(Error::NotConnected);
        }
        if self.is_listening() {
            self.preempt.notify_one();
        }
        let wire = Arc::clone(&self.wire);
        let _guard = wire.lock().await;

        let held = self.refresh_session().await?;
        debug!(message_type = %request.message_type, session = %held.session, "bridge call");
        self.api.call(&held.session, &request, timeout).await
    }

    fn is_connected(&self) -> bool {
        self.current_session().is_some()
    }

    fn session(&self) -> Option<String> {
        self.current_session().map(|held| held.session)
    }

    async fn listen(&mut self) -> Result<()> {
        self.start_listening().await
    }

    async fn stop_listening(&mut self) {
        self.stop().await
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.task.abort();
        }
    }
}
