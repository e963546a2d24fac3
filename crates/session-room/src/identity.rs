//! Peer identity resolution.
//!
//! The host identity is a pure function of the room, so a guest can dial it
//! without any prior exchange. The guest identity is allocated by the broker
//! on connect and never derived locally.
//!
//! # Collision Policy
//!
//! If the host's deterministic identity is already held (another tab or
//! device is hosting the same room, or the previous tab's disconnect has not
//! propagated yet), the connect is retried with a fixed delay. When the
//! retries are exhausted the room fails with
//! [`RoomError::SessionActiveElsewhere`].

use crate::broker::{BrokerConnection, SignalingBroker};
use crate::config::Config;
use crate::errors::{BrokerErrorKind, RoomError};
use crate::observability::metrics;

use common::types::{ParticipantRole, RoomId, RoomKind};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A token unique within the signaling namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Wrap a raw identity token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the local participant asks the broker for on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRequest {
    /// Register exactly this identity (host).
    Deterministic(PeerIdentity),
    /// Let the broker allocate an ephemeral identity (guest).
    Ephemeral,
}

/// Retry policy for host identity collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityRetryPolicy {
    /// Retries after the first failure.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl From<&Config> for IdentityRetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            retries: config.identity_retries,
            delay: config.identity_retry_delay,
        }
    }
}

/// Derives identities for one room.
#[derive(Debug, Clone)]
pub struct PeerIdentityResolver {
    room_id: RoomId,
    kind: RoomKind,
}

impl PeerIdentityResolver {
    #[must_use]
    pub fn new(room_id: RoomId, kind: RoomKind) -> Self {
        Self { room_id, kind }
    }

    /// The deterministic host identity, e.g. `session-{room_id}-host`.
    #[must_use]
    pub fn host_identity(&self) -> PeerIdentity {
        PeerIdentity(format!("{}-{}-host", self.kind.namespace(), self.room_id))
    }

    /// Resolve the identity request for `role`.
    #[must_use]
    pub fn resolve(&self, role: ParticipantRole) -> IdentityRequest {
        match role {
            ParticipantRole::Host => IdentityRequest::Deterministic(self.host_identity()),
            ParticipantRole::Guest => IdentityRequest::Ephemeral,
        }
    }

    /// Connect to the broker under the identity resolved for `role`.
    ///
    /// Failed connects are retried `policy.retries` times with a fixed
    /// `policy.delay`. Exhausting the retries on a collision yields
    /// `SessionActiveElsewhere`; exhausting them on any other failure yields
    /// `BrokerUnreachable`. Cancellation yields `RoomClosed`.
    ///
    /// # Errors
    ///
    /// See above.
    #[instrument(skip_all, name = "room.identity.connect", fields(room_id = %self.room_id, role = %role))]
    pub async fn connect(
        &self,
        broker: &dyn SignalingBroker,
        role: ParticipantRole,
        policy: IdentityRetryPolicy,
        cancel_token: &CancellationToken,
    ) -> Result<BrokerConnection, RoomError> {
        let request = self.resolve(role);
        let mut failures: u32 = 0;

        loop {
            let result = tokio::select! {
                () = cancel_token.cancelled() => return Err(RoomError::RoomClosed),
                result = broker.connect(request.clone()) => result,
            };

            let error = match result {
                Ok(connection) => {
                    info!(
                        target: "room.identity",
                        room_id = %self.room_id,
                        identity = %connection.session.identity(),
                        failures,
                        "Connected to signaling broker"
                    );
                    return Ok(connection);
                }
                Err(error) => error,
            };

            failures += 1;
            let exhausted = failures > policy.retries;

            match error.kind() {
                BrokerErrorKind::Unavailable => {
                    warn!(
                        target: "room.identity",
                        room_id = %self.room_id,
                        failures,
                        max_retries = policy.retries,
                        "Host identity already taken"
                    );
                    if exhausted {
                        return Err(match request {
                            IdentityRequest::Deterministic(identity) => {
                                RoomError::SessionActiveElsewhere(identity)
                            }
                            IdentityRequest::Ephemeral => {
                                RoomError::BrokerUnreachable(error.to_string())
                            }
                        });
                    }
                }
                _ => {
                    debug!(
                        target: "room.identity",
                        room_id = %self.room_id,
                        failures,
                        error = %error,
                        "Broker connect failed"
                    );
                    if exhausted {
                        return Err(RoomError::BrokerUnreachable(error.to_string()));
                    }
                }
            }

            metrics::record_identity_retry();

            tokio::select! {
                () = cancel_token.cancelled() => return Err(RoomError::RoomClosed),
                () = tokio::time::sleep(policy.delay) => {}
            }
        }
    }
}
