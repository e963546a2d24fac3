//! Message types for the room actor.
//!
//! `RoomCommand`s come from the UI shell through `RoomHandle`; `RoomEvent`s
//! are posted by the actor's own helper tasks when an async operation
//! completes. Both land in the same event loop, so every state transition
//! on a device is strictly ordered.

use crate::broker::{BrokerConnection, ChannelEvent, ChannelId, IncomingDial, PeerChannel};
use crate::dialer::AttemptNumber;
use crate::errors::{BrokerError, MediaError, RoomError};
use crate::media::MediaStream;

use tokio::sync::oneshot;

/// Intents sent by the UI shell.
#[derive(Debug)]
pub enum RoomCommand {
    /// Flip the local camera track. Replies with the new flag.
    ToggleVideo { respond_to: oneshot::Sender<bool> },

    /// Flip the local microphone track. Replies with the new flag.
    ToggleAudio { respond_to: oneshot::Sender<bool> },

    /// User pressed "end call".
    EndCall { respond_to: oneshot::Sender<()> },

    /// User asked for one manual dial. Replies whether it was placed.
    ForceConnect { respond_to: oneshot::Sender<bool> },
}

/// Completions posted back by helper tasks.
#[derive(Debug)]
pub enum RoomEvent {
    /// The media prompt resolved.
    MediaAcquired(Result<MediaStream, MediaError>),

    /// Broker connect (with identity retries) finished.
    BrokerConnected(Result<BrokerConnection, RoomError>),

    /// A guest dial returned.
    DialCompleted {
        attempt: AttemptNumber,
        result: Result<PeerChannel, BrokerError>,
    },

    /// The host received an inbound call.
    IncomingDial(IncomingDial),

    /// Event on a call channel.
    Channel {
        channel_id: ChannelId,
        event: ChannelEvent,
    },
}

impl RoomEvent {
    /// Release whatever resource this event carries. Used for completions
    /// that arrive after the room was torn down.
    pub fn release(self) {
        match self {
            RoomEvent::MediaAcquired(Ok(stream)) => stream.stop(),
            RoomEvent::BrokerConnected(Ok(connection)) => connection.session.destroy(),
            RoomEvent::DialCompleted {
                result: Ok(channel),
                ..
            } => channel.control.close(),
            RoomEvent::IncomingDial(dial) => dial.channel.control.close(),
            _ => {}
        }
    }
}
