//! Session room error types.
//!
//! Errors never cross the UI boundary as values: a fatal `RoomError` is
//! rendered through [`RoomError::client_message`] into the snapshot's
//! `fatal_error` string. Internal details are logged but not exposed.

use crate::identity::PeerIdentity;
use thiserror::Error;

/// Session room error type.
///
/// Fatal variants (`Media`, `SessionActiveElsewhere`, `BrokerUnreachable`)
/// end the call and stop retrying; the session timer keeps running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    /// Camera / microphone could not be acquired.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Host identity collision persisted through every retry.
    #[error("Session already active elsewhere: {0}")]
    SessionActiveElsewhere(PeerIdentity),

    /// Signaling broker could not be reached at connect time.
    #[error("Broker unreachable: {0}")]
    BrokerUnreachable(String),

    /// The room has already been torn down.
    #[error("Room closed")]
    RoomClosed,

    /// Internal error (mailbox failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Local media acquisition failures. None of these are retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// Capture is only available over a confidentiality-protected transport.
    #[error("Insecure context")]
    InsecureContext,

    /// The user (or policy) refused camera/microphone access.
    #[error("Permission denied")]
    PermissionDenied,

    /// No camera or microphone is present.
    #[error("No capture device")]
    NoDevice,

    /// Any other capture failure (device busy, driver error...).
    #[error("Capture unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the signaling broker or a channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The dialed identity is not registered (host not joined yet).
    #[error("Identity unreachable: {0}")]
    IdentityUnreachable(PeerIdentity),

    /// The requested deterministic identity is held by another session.
    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(PeerIdentity),

    /// The broker itself cannot be reached.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Channel-level failure (negotiation, transport...).
    #[error("Channel error: {0}")]
    Channel(String),

    /// The session or channel was already closed.
    #[error("Closed")]
    Closed,
}

/// Coarse classification of a [`BrokerError`], used to pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// Expected during guest polling. Silent.
    Unreachable,
    /// Host identity collision. Retried, then fatal.
    Unavailable,
    /// Broker outage. Retried silently while polling, fatal at connect.
    Outage,
    /// Everything else. Retried by the normal loop.
    Transient,
}

impl BrokerError {
    /// Classify this error for retry policy.
    #[must_use]
    pub fn kind(&self) -> BrokerErrorKind {
        match self {
            BrokerError::IdentityUnreachable(_) => BrokerErrorKind::Unreachable,
            BrokerError::IdentityUnavailable(_) => BrokerErrorKind::Unavailable,
            BrokerError::BrokerUnavailable(_) => BrokerErrorKind::Outage,
            BrokerError::Channel(_) | BrokerError::Closed => BrokerErrorKind::Transient,
        }
    }

    /// Returns the error kind as a string for metric labels.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.kind() {
            BrokerErrorKind::Unreachable => "unreachable",
            BrokerErrorKind::Unavailable => "unavailable",
            BrokerErrorKind::Outage => "broker_outage",
            BrokerErrorKind::Transient => "transient",
        }
    }
}

impl RoomError {
    /// Whether this error ends the call for good (user action required).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RoomError::Media(_)
                | RoomError::SessionActiveElsewhere(_)
                | RoomError::BrokerUnreachable(_)
        )
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RoomError::Media(MediaError::InsecureContext) => "insecure_context",
            RoomError::Media(MediaError::PermissionDenied) => "permission_denied",
            RoomError::Media(MediaError::NoDevice) => "no_device",
            RoomError::Media(MediaError::Unavailable(_)) => "media_unavailable",
            RoomError::SessionActiveElsewhere(_) => "session_active_elsewhere",
            RoomError::BrokerUnreachable(_) => "broker_unreachable",
            RoomError::RoomClosed => "room_closed",
            RoomError::Internal(_) => "internal",
        }
    }

    /// Returns a human-readable message for the UI (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Media(MediaError::InsecureContext) => {
                "Camera and microphone are only available over a secure (HTTPS) connection."
                    .to_string()
            }
            RoomError::Media(MediaError::PermissionDenied) => {
                "Camera and microphone access was denied. Allow access in your browser settings and refresh the page."
                    .to_string()
            }
            RoomError::Media(MediaError::NoDevice) => {
                "No camera or microphone was found. Connect a device and refresh the page."
                    .to_string()
            }
            RoomError::Media(MediaError::Unavailable(_)) => {
                "Your camera or microphone could not be started. Close other apps using it and refresh the page."
                    .to_string()
            }
            RoomError::SessionActiveElsewhere(_) => {
                "This session is already active in another tab or device.".to_string()
            }
            RoomError::BrokerUnreachable(_) => {
                "The call service could not be reached. Check your connection and refresh the page."
                    .to_string()
            }
            RoomError::RoomClosed => "This room has been closed.".to_string(),
            RoomError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
