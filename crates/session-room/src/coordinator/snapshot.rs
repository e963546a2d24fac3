//! Observable room state published to the UI shell.

use crate::call::ConnectionState;
use crate::media::MediaStream;
use crate::timer::TimerState;

/// Why the room was left. Set exactly once, by teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    /// The user pressed "end call".
    UserEnded,
    /// The scheduled session ended (after the grace window).
    SessionEnded,
    /// The UI navigated away or dropped the room.
    Navigated,
}

impl ExitReason {
    /// Returns the reason as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExitReason::UserEnded => "user_ended",
            ExitReason::SessionEnded => "session_ended",
            ExitReason::Navigated => "navigated",
        }
    }
}

/// Snapshot of one room, republished on every relevant transition.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub connection_state: ConnectionState,
    /// `None` for untimed (interview) rooms.
    pub timer_state: Option<TimerState>,
    /// `mm:ss`, `-mm:ss` past the end. `None` while waiting or untimed.
    pub time_left_display: Option<String>,
    pub is_video_on: bool,
    pub is_audio_on: bool,
    /// Human-readable fatal error, if any.
    pub fatal_error: Option<String>,
    /// Guest dial attempts so far (always 0 for the host).
    pub dial_attempts: u32,
    /// Whether the manual "force connect" action is offered.
    pub can_force_connect: bool,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    /// Set once the room is torn down; the shell should navigate away.
    pub exit: Option<ExitReason>,
}

impl RoomSnapshot {
    /// State before anything happened.
    #[must_use]
    pub fn initial(timed: bool) -> Self {
        Self {
            connection_state: ConnectionState::Idle,
            timer_state: timed.then_some(TimerState::Waiting),
            time_left_display: None,
            is_video_on: false,
            is_audio_on: false,
            fatal_error: None,
            dial_attempts: 0,
            can_force_connect: false,
            local_stream: None,
            remote_stream: None,
            exit: None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}
