//! In-process signaling broker.
//!
//! Implements the broker contract entirely in memory: identity registry,
//! collision detection, ephemeral `peer-{uuid}` allocation and paired call
//! channels. Used by the loopback binary and by tests, which can also
//! simulate an outage (`set_offline`) or a network drop (`sever`).

use super::{
    BrokerConnection, BrokerSession, ChannelControl, ChannelEvent, ChannelId, IncomingDial,
    PeerChannel, SignalingBroker,
};
use crate::errors::BrokerError;
use crate::identity::{IdentityRequest, PeerIdentity};
use crate::media::MediaStream;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Inbound dial buffer per session.
const INCOMING_CAPACITY: usize = 16;

/// Event buffer per channel side.
const CHANNEL_EVENT_CAPACITY: usize = 8;

/// Counters exposed for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Every `connect` call, successful or not.
    pub connect_attempts: u32,
    /// Every `dial` call, successful or not.
    pub dials: u32,
    /// Every `destroy` call, including repeated ones.
    pub sessions_destroyed: u32,
    /// Currently registered identities.
    pub active_sessions: usize,
}

/// In-memory signaling broker. Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    offline: bool,
    sessions: HashMap<PeerIdentity, Registration>,
    channels: Vec<Arc<ChannelPair>>,
    stats: BrokerStats,
}

#[derive(Debug)]
struct Registration {
    session_id: Uuid,
    incoming: mpsc::Sender<IncomingDial>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate a broker outage. While offline, `connect` and `dial` fail
    /// with `BrokerUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Simulate a network drop: close every channel of the session holding
    /// `identity`. The registration itself survives.
    pub fn sever(&self, identity: &PeerIdentity) {
        let pairs: Vec<Arc<ChannelPair>> = {
            let state = self.state();
            let Some(session_id) = state.sessions.get(identity).map(|r| r.session_id) else {
                return;
            };
            state
                .channels
                .iter()
                .filter(|pair| pair.involves(session_id))
                .cloned()
                .collect()
        };

        debug!(
            target: "room.broker",
            identity = %identity,
            channels = pairs.len(),
            "Severing channels"
        );
        for pair in pairs {
            pair.close();
        }
    }

    /// Whether `identity` is currently registered.
    #[must_use]
    pub fn is_registered(&self, identity: &PeerIdentity) -> bool {
        self.state().sessions.contains_key(identity)
    }

    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let state = self.state();
        BrokerStats {
            active_sessions: state.sessions.len(),
            ..state.stats
        }
    }

    fn dial_from(
        &self,
        caller: &PeerIdentity,
        caller_session: Uuid,
        remote: &PeerIdentity,
        stream: MediaStream,
    ) -> Result<PeerChannel, BrokerError> {
        let mut state = self.state();
        state.stats.dials += 1;

        if state.offline {
            return Err(BrokerError::BrokerUnavailable("broker offline".to_string()));
        }

        let Some(registration) = state.sessions.get(remote) else {
            trace!(target: "room.broker", remote = %remote, "Dial target not registered");
            return Err(BrokerError::IdentityUnreachable(remote.clone()));
        };

        let (caller_tx, caller_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        let (callee_tx, callee_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        let pair = Arc::new(ChannelPair {
            id: ChannelId::new(),
            caller_session,
            callee_session: registration.session_id,
            caller_stream: stream,
            caller_tx,
            callee_tx,
            state: Mutex::new(PairState::default()),
        });

        let incoming = IncomingDial {
            remote: caller.clone(),
            channel: PeerChannel {
                id: pair.id,
                remote: caller.clone(),
                control: Arc::new(MemoryChannelControl {
                    pair: Arc::clone(&pair),
                    side: Side::Callee,
                }),
                events: callee_rx,
            },
        };

        if registration.incoming.try_send(incoming).is_err() {
            // Registered but nobody is listening any more
            return Err(BrokerError::IdentityUnreachable(remote.clone()));
        }

        state.channels.retain(|existing| !existing.is_closed());
        state.channels.push(Arc::clone(&pair));

        debug!(
            target: "room.broker",
            channel_id = %pair.id,
            caller = %caller,
            remote = %remote,
            "Dial delivered"
        );

        Ok(PeerChannel {
            id: pair.id,
            remote: remote.clone(),
            control: Arc::new(MemoryChannelControl {
                pair,
                side: Side::Caller,
            }),
            events: caller_rx,
        })
    }

    fn destroy_session(&self, identity: &PeerIdentity, session_id: Uuid, first_call: bool) {
        let pairs: Vec<Arc<ChannelPair>> = {
            let mut state = self.state();
            state.stats.sessions_destroyed += 1;
            if !first_call {
                return;
            }

            if state
                .sessions
                .get(identity)
                .is_some_and(|r| r.session_id == session_id)
            {
                state.sessions.remove(identity);
            }

            let (closing, keep): (Vec<_>, Vec<_>) = state
                .channels
                .drain(..)
                .partition(|pair| pair.involves(session_id));
            state.channels = keep;
            closing
        };

        debug!(
            target: "room.broker",
            identity = %identity,
            channels = pairs.len(),
            "Session destroyed"
        );
        for pair in pairs {
            pair.close();
        }
    }
}

#[async_trait]
impl SignalingBroker for MemoryBroker {
    async fn connect(&self, request: IdentityRequest) -> Result<BrokerConnection, BrokerError> {
        let mut state = self.state();
        state.stats.connect_attempts += 1;

        if state.offline {
            return Err(BrokerError::BrokerUnavailable("broker offline".to_string()));
        }

        let identity = match request {
            IdentityRequest::Deterministic(identity) => {
                if state.sessions.contains_key(&identity) {
                    return Err(BrokerError::IdentityUnavailable(identity));
                }
                identity
            }
            IdentityRequest::Ephemeral => PeerIdentity::new(format!("peer-{}", Uuid::new_v4())),
        };

        let session_id = Uuid::new_v4();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        state.sessions.insert(
            identity.clone(),
            Registration {
                session_id,
                incoming: incoming_tx,
            },
        );

        Ok(BrokerConnection {
            session: Arc::new(MemorySession {
                broker: self.clone(),
                identity,
                session_id,
                destroyed: AtomicBool::new(false),
            }),
            incoming: incoming_rx,
        })
    }
}

#[derive(Debug)]
struct MemorySession {
    broker: MemoryBroker,
    identity: PeerIdentity,
    session_id: Uuid,
    destroyed: AtomicBool,
}

#[async_trait]
impl BrokerSession for MemorySession {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn dial(
        &self,
        remote: &PeerIdentity,
        stream: MediaStream,
    ) -> Result<PeerChannel, BrokerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.broker
            .dial_from(&self.identity, self.session_id, remote, stream)
    }

    fn destroy(&self) {
        let first_call = !self.destroyed.swap(true, Ordering::SeqCst);
        self.broker
            .destroy_session(&self.identity, self.session_id, first_call);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Caller,
    Callee,
}

#[derive(Debug, Default)]
struct PairState {
    answered: bool,
    closed: bool,
}

/// Both ends of one call.
#[derive(Debug)]
struct ChannelPair {
    id: ChannelId,
    caller_session: Uuid,
    callee_session: Uuid,
    caller_stream: MediaStream,
    caller_tx: mpsc::Sender<ChannelEvent>,
    callee_tx: mpsc::Sender<ChannelEvent>,
    state: Mutex<PairState>,
}

impl ChannelPair {
    fn lock(&self) -> MutexGuard<'_, PairState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn involves(&self, session_id: Uuid) -> bool {
        self.caller_session == session_id || self.callee_session == session_id
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn answer(&self, stream: MediaStream) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            if state.answered {
                return Err(BrokerError::Channel("already answered".to_string()));
            }
            state.answered = true;
        }

        let _ = self.caller_tx.try_send(ChannelEvent::Stream(stream));
        let _ = self
            .callee_tx
            .try_send(ChannelEvent::Stream(self.caller_stream.clone()));
        Ok(())
    }

    fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        let _ = self.caller_tx.try_send(ChannelEvent::Close);
        let _ = self.callee_tx.try_send(ChannelEvent::Close);
    }
}

#[derive(Debug)]
struct MemoryChannelControl {
    pair: Arc<ChannelPair>,
    side: Side,
}

impl ChannelControl for MemoryChannelControl {
    fn answer(&self, stream: MediaStream) -> Result<(), BrokerError> {
        match self.side {
            Side::Callee => self.pair.answer(stream),
            Side::Caller => Err(BrokerError::Channel(
                "outbound channel cannot be answered".to_string(),
            )),
        }
    }

    fn close(&self) {
        self.pair.close();
    }
}
