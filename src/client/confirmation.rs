use std::time::Instant;

use serde::Serialize;

use crate::{
    error::{Error, Result},
    events,
    messages::{MessageType, ProtocolMessage},
};

/// What the device is waiting for before it will finish the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmationKind {
    Button,
    Pin,
    Passphrase,
    Word,
}

impl ConfirmationKind {
    pub fn from_message_type(message_type: MessageType) -> Option<Self> {
        match message_type {
            MessageType::ButtonRequest => Some(ConfirmationKind::Button),
            MessageType::PinMatrixRequest => Some(ConfirmationKind::Pin),
            MessageType::PassphraseRequest => Some(ConfirmationKind::Passphrase),
            MessageType::WordRequest => Some(ConfirmationKind::Word),
            _ => None,
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            ConfirmationKind::Button => events::BUTTON_REQUEST,
            ConfirmationKind::Pin => events::PIN_REQUEST,
            ConfirmationKind::Passphrase => events::PASSPHRASE_REQUEST,
            ConfirmationKind::Word => events::WORD_REQUEST,
        }
    }

    /// The message that answers this confirmation.
    pub fn ack_type(self) -> MessageType {
        match self {
            ConfirmationKind::Button => MessageType::ButtonAck,
            ConfirmationKind::Pin => MessageType::PinMatrixAck,
            ConfirmationKind::Passphrase => MessageType::PassphraseAck,
            ConfirmationKind::Word => MessageType::WordAck,
        }
    }
}

impl std::fmt::Display for ConfirmationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfirmationKind::Button => "button",
            ConfirmationKind::Pin => "pin",
            ConfirmationKind::Passphrase => "passphrase",
            ConfirmationKind::Word => "word",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationState {
    pub kind: ConfirmationKind,
    /// Request type of the operation that triggered the confirmation.
    pub origin: MessageType,
    pub created_at: Instant,
}

/// At most one outstanding confirmation per connection.
#[derive(Debug, Default)]
pub(crate) struct ConfirmationTracker {
    pending: Option<ConfirmationState>,
}

impl ConfirmationTracker {
    pub fn current(&self) -> Option<&ConfirmationState> {
        self.pending.as_ref()
    }

    /// Records the device's reply to a request made on behalf of `origin`.
    /// Any non-confirmation reply ends the pending state.
    pub fn observe(&mut self, origin: MessageType, response: &ProtocolMessage) {
        self.pending = ConfirmationKind::from_message_type(response.message_type).map(|kind| {
            ConfirmationState {
                kind,
                origin,
                created_at: Instant::now(),
            }
        });
    }

    /// Consumes the pending confirmation if it is of `expected` kind.
    pub fn take(&mut self, expected: ConfirmationKind) -> Result<ConfirmationState> {
        match self.pending.take() {
            Some(state) if state.kind == expected => Ok(state),
            other => {
                let pending = other.as_ref().map(|s| s.kind);
                self.pending = other;
                Err(Error::ConfirmationMismatch { expected, pending })
            }
        }
    }

    pub fn clear(&mut self) -> Option<ConfirmationState> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_latest_reply_only() {
        let mut tracker = ConfirmationTracker::default();
        tracker.observe(
            MessageType::ChangePin,
            &ProtocolMessage::empty(MessageType::PinMatrixRequest),
        );
        let state = tracker.current().unwrap();
        assert_eq!(state.kind, ConfirmationKind::Pin);
        assert_eq!(state.origin, MessageType::ChangePin);

        tracker.observe(MessageType::ChangePin, &ProtocolMessage::empty(MessageType::Success));
        assert!(tracker.current().is_none());
    }

    #[test]
    fn mismatched_take_keeps_state() {
        let mut tracker = ConfirmationTracker::default();
        tracker.observe(
            MessageType::GetAddress,
            &ProtocolMessage::empty(MessageType::PassphraseRequest),
        );
        match tracker.take(ConfirmationKind::Pin).unwrap_err() {
            Error::ConfirmationMismatch { expected, pending } => {
                assert_eq!(expected, ConfirmationKind::Pin);
                assert_eq!(pending, Some(ConfirmationKind::Passphrase));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(tracker.take(ConfirmationKind::Passphrase).is_ok());
        assert!(tracker.take(ConfirmationKind::Passphrase).is_err());
    }

    #[test]
    fn kinds_map_to_events_and_acks() {
        assert_eq!(ConfirmationKind::Word.event_name(), "device:word-request");
        assert_eq!(ConfirmationKind::Button.ack_type(), MessageType::ButtonAck);
        assert_eq!(ConfirmationKind::Passphrase.to_string(), "passphrase");
        assert_eq!(ConfirmationKind::from_message_type(MessageType::Features), None);
    }
}
