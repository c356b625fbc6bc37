//! Device client: one connection, typed operations, and the confirmation
//! state machine that sits between them and the transport.

mod confirmation;

pub use confirmation::{ConfirmationKind, ConfirmationState};

use std::sync::Arc;

use rand::RngCore;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{TransportConfig, TransportKind},
    error::{Error, ErrorKind, Result},
    events::{self, EventBus, SubscriptionId},
    features::DeviceFeatures,
    messages::{schema, timeout_for, MessageType, ProtocolMessage},
    transport::{create_transport, DeviceHandle, DeviceInfo, Transport},
};
use confirmation::ConfirmationTracker;

/// Bytes of host entropy supplied when the device asks for it during reset.
pub const HOST_ENTROPY_LEN: usize = 32;

/// Façade over one transport and at most one connected device.
///
/// Every operation takes `&mut self`, so requests on a client are naturally
/// serialised; share it behind an async mutex if several tasks need it.
pub struct DeviceClient {
    config: TransportConfig,
    transport: Box<dyn Transport>,
    events: Arc<EventBus>,
    handle: Option<DeviceHandle>,
    confirmation: ConfirmationTracker,
}

impl std::fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("kind", &self.config.kind)
            .field("handle", &self.handle)
            .field("pending", &self.confirmation.current())
            .finish()
    }
}

impl DeviceClient {
    /// Builds a client over the transport selected by `config.kind`.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let events = EventBus::new();
        let transport = create_transport(&config, Arc::clone(&events))?;
        Ok(Self::with_transport(config, transport, events))
    }

    pub fn with_transport(config: TransportConfig, transport: Box<dyn Transport>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            transport,
            events,
            handle: None,
            confirmation: ConfirmationTracker::default(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn on_event<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, callback)
    }

    pub fn off_event(&self, event: &str, id: SubscriptionId) {
        self.events.off(event, id)
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some() && self.transport.is_connected()
    }

    pub fn get_device(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }

    pub fn pending_confirmation(&self) -> Option<&ConfirmationState> {
        self.confirmation.current()
    }

    /// Devices visible to the configured transport; does not need a connection.
    pub async fn list_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        self.transport.enumerate().await
    }

    /// Opens (or re-validates) the connection and initialises the device.
    ///
    /// If initialisation fails the transport is torn down again, so a failed
    /// connect never leaves a half-open channel behind.
    #[instrument(skip(self), fields(kind = %self.config.kind))]
    pub async fn connect(&mut self) -> Result<DeviceHandle> {
        let selector = self.config.device_path.clone();
        let mut handle = self.transport.connect(selector.as_deref()).await?;

        let features = match self.initialize().await {
            Ok(features) => features,
            Err(e) => {
                warn!("initialisation of {} failed: {e}", handle.path);
                self.teardown().await;
                return Err(e);
            }
        };
        info!(
            path = %handle.path,
            device_id = %features.device_id,
            firmware = %features.version,
            "device ready"
        );
        handle.features = Some(features);

        let newly_connected = self.handle.is_none();
        self.handle = Some(handle.clone());
        if newly_connected {
            self.events.emit(events::DEVICE_CONNECTED, &serde_json::to_value(&handle)?);
        }
        Ok(handle)
    }

    async fn initialize(&mut self) -> Result<DeviceFeatures> {
        self.confirmation.clear();
        let response = self
            .exchange(ProtocolMessage::empty(MessageType::Initialize), MessageType::Initialize)
            .await?;
        let response = match response.message_type {
            MessageType::Features => response,
            MessageType::Failure => return Err(response.into_failure()),
            other => {
                return Err(Error::InitializationFailed(format!(
                    "device answered Initialize with {other}"
                )))
            }
        };
        let features = DeviceFeatures::from_message(&response)?;
        if features.device_id.is_empty() {
            return Err(Error::InitializationFailed("device reported an empty device id".into()));
        }
        Ok(features)
    }

    /// Closes the connection. Never fails; a client that is already
    /// disconnected is left untouched.
    #[instrument(skip(self))]
    pub async fn disconnect(&mut self) {
        if self.handle.is_none() && !self.transport.is_connected() {
            return;
        }
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.confirmation.clear();
        self.transport.stop_listening().await;
        if let Err(e) = self.transport.disconnect().await {
            warn!("transport disconnect failed: {e}");
        }
        if let Some(handle) = self.handle.take() {
            info!(path = %handle.path, "device disconnected");
            self.events.emit(
                events::DEVICE_DISCONNECTED,
                &json!({ "path": handle.path, "kind": handle.kind }),
            );
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.handle.is_some() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Sends one message and returns the device's reply without interpreting it.
    ///
    /// Confirmation requests in the reply are still recorded, so they can be
    /// answered with `send_pin`, `send_button_ack` and friends.
    pub async fn call(&mut self, request: ProtocolMessage) -> Result<ProtocolMessage> {
        self.ensure_connected()?;
        let origin = request.message_type;
        self.exchange(request, origin).await
    }

    /// [`call`](Self::call) with a raw message code; unknown codes fail before
    /// anything is sent.
    pub async fn call_code(&mut self, code: u16, payload: Map<String, Value>) -> Result<ProtocolMessage> {
        let request = ProtocolMessage::from_code(code, payload)?;
        self.call(request).await
    }

    async fn exchange(&mut self, request: ProtocolMessage, origin: MessageType) -> Result<ProtocolMessage> {
        let timeout = timeout_for(request.message_type, self.config.timeout());
        debug!(request = %request.message_type, ?timeout, "-> device");
        let result = self.transport.call(request, timeout).await;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if e.kind() == ErrorKind::DeviceDisconnected {
                    self.teardown().await;
                }
                return Err(e);
            }
        };
        debug!(response = %response.message_type, "<- device");
        // The transport may have re-leased the device during the call.
        if let (Some(handle), Some(session)) = (self.handle.as_mut(), self.transport.session()) {
            if handle.session.as_deref() != Some(session.as_str()) {
                info!(path = %handle.path, %session, "session renewed");
                handle.session = Some(session);
            }
        }
        self.confirmation.observe(origin, &response);
        Ok(response)
    }

    /// Runs `request` and drives the device through button and entropy
    /// prompts. PIN, passphrase and word requests are announced on the event
    /// bus and handed back to the caller; `Failure` becomes an error.
    async fn interactive(&mut self, request: ProtocolMessage, origin: MessageType) -> Result<ProtocolMessage> {
        let mut response = self.exchange(request, origin).await?;
        loop {
            match response.message_type {
                MessageType::ButtonRequest => {
                    self.events.emit(events::BUTTON_REQUEST, &response.payload_value());
                    self.confirmation.take(ConfirmationKind::Button)?;
                    response = self
                        .exchange(ProtocolMessage::empty(MessageType::ButtonAck), origin)
                        .await?;
                }
                MessageType::EntropyRequest => {
                    let mut entropy = vec![0u8; HOST_ENTROPY_LEN];
                    rand::thread_rng().fill_bytes(&mut entropy);
                    let ack = ProtocolMessage::with_payload(
                        MessageType::EntropyAck,
                        &schema::EntropyAck {
                            entropy: Some(entropy),
                        },
                    )?;
                    response = self.exchange(ack, origin).await?;
                }
                MessageType::PinMatrixRequest | MessageType::PassphraseRequest | MessageType::WordRequest => {
                    if let Some(kind) = ConfirmationKind::from_message_type(response.message_type) {
                        info!(%kind, %origin, "device awaiting confirmation");
                        self.events.emit(kind.event_name(), &response.payload_value());
                    }
                    return Ok(response);
                }
                MessageType::Failure => {
                    let payload = response.payload_value();
                    self.events.emit(events::DEVICE_FAILURE, &payload);
                    return Err(response.into_failure());
                }
                _ => return Ok(response),
            }
        }
    }

    /// Like `interactive`, but the final reply must be `expected` (or a
    /// confirmation request the caller has to answer).
    async fn interactive_expecting(&mut self, request: ProtocolMessage, expected: MessageType) -> Result<ProtocolMessage> {
        self.ensure_connected()?;
        let origin = request.message_type;
        let response = self.interactive(request, origin).await?;
        if ConfirmationKind::from_message_type(response.message_type).is_some() {
            return Ok(response);
        }
        response.expect(expected)
    }

    /// Typed wrappers need the final reply; an outstanding confirmation is
    /// reported as unexpected but stays answerable.
    fn require(response: ProtocolMessage, expected: MessageType) -> Result<ProtocolMessage> {
        match ConfirmationKind::from_message_type(response.message_type) {
            Some(_) => Err(Error::unexpected(expected, response.message_type)),
            None => response.expect(expected),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_features(&mut self) -> Result<DeviceFeatures> {
        let response = self.call(ProtocolMessage::empty(MessageType::GetFeatures)).await?;
        let features = DeviceFeatures::from_message(&response.expect(MessageType::Features)?)?;
        if let Some(handle) = self.handle.as_mut() {
            handle.features = Some(features.clone());
        }
        Ok(features)
    }

    /// Round-trips `message` through the device; with `button_protection`
    /// the user has to confirm on the device first.
    #[instrument(skip(self))]
    pub async fn ping(&mut self, message: &str, button_protection: bool) -> Result<String> {
        let request = ProtocolMessage::with_payload(
            MessageType::Ping,
            &schema::Ping {
                message: Some(message.to_string()),
                button_protection: Some(button_protection),
                ..Default::default()
            },
        )?;
        let response = self.interactive_expecting(request, MessageType::Success).await?;
        let success: schema::Success = Self::require(response, MessageType::Success)?.parse_payload()?;
        Ok(success.message.unwrap_or_default())
    }

    /// Random bytes from the device's RNG.
    #[instrument(skip(self))]
    pub async fn get_entropy(&mut self, size: u32) -> Result<Vec<u8>> {
        let request = ProtocolMessage::with_payload(MessageType::GetEntropy, &schema::GetEntropy { size })?;
        let response = self.interactive_expecting(request, MessageType::Entropy).await?;
        let entropy: schema::Entropy = Self::require(response, MessageType::Entropy)?.parse_payload()?;
        Ok(entropy.entropy)
    }

    /// Forgets cached PIN/passphrase on the device and any pending confirmation here.
    #[instrument(skip(self))]
    pub async fn clear_session(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.confirmation.clear();
        self.call(ProtocolMessage::empty(MessageType::ClearSession))
            .await?
            .expect(MessageType::Success)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn apply_settings(&mut self, settings: &schema::ApplySettings) -> Result<ProtocolMessage> {
        let request = ProtocolMessage::with_payload(MessageType::ApplySettings, settings)?;
        self.interactive_expecting(request, MessageType::Success).await
    }

    #[instrument(skip(self))]
    pub async fn wipe_device(&mut self) -> Result<ProtocolMessage> {
        self.interactive_expecting(ProtocolMessage::empty(MessageType::WipeDevice), MessageType::Success)
            .await
    }

    #[instrument(skip(self))]
    pub async fn reset_device(&mut self, params: &schema::ResetDevice) -> Result<ProtocolMessage> {
        let request = ProtocolMessage::with_payload(MessageType::ResetDevice, params)?;
        self.interactive_expecting(request, MessageType::Success).await
    }

    #[instrument(skip(self))]
    pub async fn recover_device(&mut self, params: &schema::RecoveryDevice) -> Result<ProtocolMessage> {
        let request = ProtocolMessage::with_payload(MessageType::RecoveryDevice, params)?;
        self.interactive_expecting(request, MessageType::Success).await
    }

    /// Starts a PIN change (or removal). The device normally answers with a
    /// PIN request, which the caller completes with [`send_pin`](Self::send_pin).
    #[instrument(skip(self))]
    pub async fn change_pin(&mut self, remove: bool) -> Result<ProtocolMessage> {
        let request = ProtocolMessage::with_payload(
            MessageType::ChangePin,
            &schema::ChangePin { remove: Some(remove) },
        )?;
        self.interactive_expecting(request, MessageType::Success).await
    }

    async fn answer(&mut self, kind: ConfirmationKind, ack: ProtocolMessage) -> Result<ProtocolMessage> {
        self.ensure_connected()?;
        let state = self.confirmation.take(kind)?;
        debug!(%kind, origin = %state.origin, "answering confirmation");
        self.interactive(ack, state.origin).await
    }

    /// Answers an outstanding PIN request with matrix positions.
    #[instrument(skip(self, pin))]
    pub async fn send_pin(&mut self, pin: &str) -> Result<ProtocolMessage> {
        let ack = ProtocolMessage::with_payload(MessageType::PinMatrixAck, &schema::PinMatrixAck { pin: pin.to_string() })?;
        self.answer(ConfirmationKind::Pin, ack).await
    }

    #[instrument(skip(self, passphrase))]
    pub async fn send_passphrase(&mut self, passphrase: &str, on_device: bool) -> Result<ProtocolMessage> {
        let ack = ProtocolMessage::with_payload(
            MessageType::PassphraseAck,
            &schema::PassphraseAck {
                passphrase: passphrase.to_string(),
                on_device: on_device.then_some(true),
            },
        )?;
        self.answer(ConfirmationKind::Passphrase, ack).await
    }

    #[instrument(skip(self, word))]
    pub async fn send_word(&mut self, word: &str) -> Result<ProtocolMessage> {
        let ack = ProtocolMessage::with_payload(MessageType::WordAck, &schema::WordAck { word: word.to_string() })?;
        self.answer(ConfirmationKind::Word, ack).await
    }

    /// Acknowledges an outstanding button request left by a raw [`call`](Self::call).
    #[instrument(skip(self))]
    pub async fn send_button_ack(&mut self) -> Result<ProtocolMessage> {
        self.answer(ConfirmationKind::Button, ProtocolMessage::empty(MessageType::ButtonAck))
            .await
    }

    /// Aborts whatever the device is doing. Any pending confirmation is
    /// dropped; the device's reply is not checked.
    #[instrument(skip(self))]
    pub async fn cancel(&mut self) -> Result<()> {
        self.ensure_connected()?;
        if let Some(dropped) = self.confirmation.clear() {
            debug!(kind = %dropped.kind, "dropping pending confirmation");
        }
        let response = self
            .exchange(ProtocolMessage::empty(MessageType::Cancel), MessageType::Cancel)
            .await?;
        debug!(reply = %response.message_type, "cancel acknowledged");
        self.confirmation.clear();
        Ok(())
    }

    /// Starts the transport's background event stream (bridge only).
    pub async fn listen(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.transport.listen().await
    }

    pub async fn stop_listening(&mut self) {
        self.transport.stop_listening().await
    }
}
