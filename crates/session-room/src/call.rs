//! Call lifecycle state machine.
//!
//! Tracks this device's view of the call:
//!
//! ```text
//! IDLE ──▶ CONNECTING ──(stream on active channel)──▶ CONNECTED ──(close)──▶ CALL_ENDED
//!              ▲                                                              │
//!              └──────────────(redial / new inbound, unless terminal)─────────┘
//! ```
//!
//! Only events for the *active* channel move the state. A stream or close
//! from a channel that was replaced or abandoned is stale and ignored.
//! Fatal errors and teardown make CALL_ENDED terminal.

use crate::broker::ChannelId;

/// Per-device connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    CallEnded,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::CallEnded => "call_ended",
        }
    }
}

/// Effect of a channel close on the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Not the active channel. Nothing changed.
    Stale,
    /// Active channel closed before it connected. Still connecting.
    Abandoned,
    /// Established call dropped. Now CALL_ENDED.
    Dropped,
}

#[derive(Debug)]
pub struct CallLifecycleStateMachine {
    state: ConnectionState,
    active_channel: Option<ChannelId>,
    terminal: bool,
}

impl Default for CallLifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallLifecycleStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            active_channel: None,
            terminal: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn active_channel(&self) -> Option<ChannelId> {
        self.active_channel
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True after a fatal error or teardown.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// A dial is about to be placed (guest), or the host starts listening.
    pub fn connecting(&mut self) -> bool {
        if self.terminal || self.state == ConnectionState::Connected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// A channel was opened (outbound dial accepted, or inbound call taken).
    ///
    /// Returns the channel it replaces, if any, so the caller can close it.
    pub fn channel_opened(&mut self, channel_id: ChannelId) -> Option<ChannelId> {
        if self.terminal {
            return None;
        }
        let previous = self.active_channel.replace(channel_id);
        if previous == Some(channel_id) {
            return None;
        }
        // Latest channel wins, even over an established call
        self.state = ConnectionState::Connecting;
        previous
    }

    /// A remote stream arrived. Returns `true` if this completed the call.
    pub fn stream_received(&mut self, channel_id: ChannelId) -> bool {
        if self.terminal
            || self.active_channel != Some(channel_id)
            || self.state != ConnectionState::Connecting
        {
            return false;
        }
        self.state = ConnectionState::Connected;
        true
    }

    /// A channel closed or errored.
    pub fn channel_closed(&mut self, channel_id: ChannelId) -> CloseOutcome {
        if self.active_channel != Some(channel_id) {
            return CloseOutcome::Stale;
        }
        self.active_channel = None;

        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::CallEnded;
            CloseOutcome::Dropped
        } else {
            CloseOutcome::Abandoned
        }
    }

    /// Forget the active channel without a state change (stale dial).
    pub fn abandon(&mut self, channel_id: ChannelId) -> bool {
        if self.active_channel == Some(channel_id) && self.state != ConnectionState::Connected {
            self.active_channel = None;
            return true;
        }
        false
    }

    /// Fatal media or identity error.
    pub fn fatal(&mut self) -> Option<ChannelId> {
        self.end()
    }

    /// Coordinator teardown.
    pub fn torn_down(&mut self) -> Option<ChannelId> {
        self.end()
    }

    fn end(&mut self) -> Option<ChannelId> {
        self.terminal = true;
        self.state = ConnectionState::CallEnded;
        self.active_channel.take()
    }
}
