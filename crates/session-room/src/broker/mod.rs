//! Signaling broker contract.
//!
//! The broker is an external rendezvous service: it maps identities to
//! sessions and relays call setup between them. The coordinator only needs
//! four things from it:
//!
//! - `connect` under a requested identity
//! - an inbound stream of [`IncomingDial`]s
//! - `dial` another identity with the local stream attached
//! - `destroy` to release the identity
//!
//! Media negotiation (SDP, ICE) lives behind [`ChannelControl`]; the room
//! only sees "remote stream arrived" and "channel closed".

pub mod memory;

use crate::errors::BrokerError;
use crate::identity::{IdentityRequest, PeerIdentity};
use crate::media::MediaStream;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier of one call channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events delivered on a call channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The remote media stream arrived (negotiation complete).
    Stream(MediaStream),
    /// The channel closed (remote hangup, network drop...).
    Close,
    /// The channel failed.
    Error(BrokerError),
}

/// Control surface of one call channel.
pub trait ChannelControl: Send + Sync + fmt::Debug {
    /// Answer an inbound call with the local stream.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Closed` if the channel is already closed.
    fn answer(&self, stream: MediaStream) -> Result<(), BrokerError>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// One call channel: control plus its event stream.
#[derive(Debug)]
pub struct PeerChannel {
    pub id: ChannelId,
    pub remote: PeerIdentity,
    pub control: Arc<dyn ChannelControl>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Cloneable half of a [`PeerChannel`], kept by the owner while the
/// event receiver is handed to a forwarder task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub id: ChannelId,
    pub remote: PeerIdentity,
    pub control: Arc<dyn ChannelControl>,
}

impl ChannelHandle {
    /// Close the underlying channel.
    pub fn close(&self) {
        self.control.close();
    }
}

impl PeerChannel {
    /// Split into the control handle and the event receiver.
    #[must_use]
    pub fn into_parts(self) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
        (
            ChannelHandle {
                id: self.id,
                remote: self.remote,
                control: self.control,
            },
            self.events,
        )
    }
}

/// An inbound call delivered to a connected session.
#[derive(Debug)]
pub struct IncomingDial {
    pub remote: PeerIdentity,
    pub channel: PeerChannel,
}

/// A live registration with the broker.
#[async_trait]
pub trait BrokerSession: Send + Sync + fmt::Debug {
    /// Identity this session is registered under.
    fn identity(&self) -> &PeerIdentity;

    /// Place a call to `remote`, attaching the local stream.
    ///
    /// # Errors
    ///
    /// `IdentityUnreachable` if nobody holds `remote`, `BrokerUnavailable`
    /// during an outage, `Closed` after `destroy`.
    async fn dial(
        &self,
        remote: &PeerIdentity,
        stream: MediaStream,
    ) -> Result<PeerChannel, BrokerError>;

    /// Release the identity and close every channel. Idempotent.
    fn destroy(&self);
}

/// Result of a successful connect.
#[derive(Debug)]
pub struct BrokerConnection {
    pub session: Arc<dyn BrokerSession>,
    pub incoming: mpsc::Receiver<IncomingDial>,
}

/// Signaling broker seam.
#[async_trait]
pub trait SignalingBroker: Send + Sync + fmt::Debug {
    /// Register under the requested identity.
    ///
    /// # Errors
    ///
    /// `IdentityUnavailable` if a deterministic identity is taken,
    /// `BrokerUnavailable` if the broker cannot be reached.
    async fn connect(&self, request: IdentityRequest) -> Result<BrokerConnection, BrokerError>;
}
