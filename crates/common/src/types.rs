//! Common data types for session-room components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::DescriptorError;

/// Identifier of a room (one scheduled host/guest pairing).
///
/// Supplied by the booking collaborator; opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap an existing room identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random room ID
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of the local participant. Fixed for the lifetime of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Owns the deterministic, dialable identity (tutor / interviewer).
    Host,
    /// Dials the host.
    Guest,
}

impl ParticipantRole {
    /// Returns the role as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Guest => "guest",
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of room. Scheduled tutoring sessions run a wall-clock timer,
/// interview rooms do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Scheduled tutoring session with a timer.
    #[default]
    Scheduled,
    /// Untimed interview room.
    Interview,
}

impl RoomKind {
    /// Namespace prefix used for peer identities of this room kind.
    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        match self {
            RoomKind::Scheduled => "session",
            RoomKind::Interview => "interview",
        }
    }

    /// Whether rooms of this kind carry a session timer.
    #[must_use]
    pub const fn is_timed(&self) -> bool {
        matches!(self, RoomKind::Scheduled)
    }
}

/// Session metadata supplied once at room entry. Immutable afterwards.
///
/// Deserialization goes through [`SessionDescriptor::new`], so a decoded
/// descriptor always satisfies the window invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorRecord")]
pub struct SessionDescriptor {
    room_id: RoomId,
    host_display_name: String,
    guest_display_name: String,
    subject: String,
    scheduled_start: DateTime<Utc>,
    scheduled_end: DateTime<Utc>,
}

impl SessionDescriptor {
    /// Build a descriptor, enforcing `scheduled_end > scheduled_start`.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::EmptyRoomId` for a blank room ID and
    /// `DescriptorError::InvalidWindow` for an empty or inverted window.
    pub fn new(
        room_id: RoomId,
        host_display_name: impl Into<String>,
        guest_display_name: impl Into<String>,
        subject: impl Into<String>,
        scheduled_start: DateTime<Utc>,
        scheduled_end: DateTime<Utc>,
    ) -> Result<Self, DescriptorError> {
        if room_id.as_str().trim().is_empty() {
            return Err(DescriptorError::EmptyRoomId);
        }

        if scheduled_end <= scheduled_start {
            return Err(DescriptorError::InvalidWindow {
                start: scheduled_start.to_rfc3339(),
                end: scheduled_end.to_rfc3339(),
            });
        }

        Ok(Self {
            room_id,
            host_display_name: host_display_name.into(),
            guest_display_name: guest_display_name.into(),
            subject: subject.into(),
            scheduled_start,
            scheduled_end,
        })
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn host_display_name(&self) -> &str {
        &self.host_display_name
    }

    #[must_use]
    pub fn guest_display_name(&self) -> &str {
        &self.guest_display_name
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn scheduled_start(&self) -> DateTime<Utc> {
        self.scheduled_start
    }

    #[must_use]
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_end
    }

    /// Display name of the remote party as seen from `role`.
    #[must_use]
    pub fn remote_display_name(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Host => &self.guest_display_name,
            ParticipantRole::Guest => &self.host_display_name,
        }
    }
}

/// Wire shape of a descriptor before validation.
#[derive(Deserialize)]
struct DescriptorRecord {
    room_id: RoomId,
    host_display_name: String,
    guest_display_name: String,
    subject: String,
    scheduled_start: DateTime<Utc>,
    scheduled_end: DateTime<Utc>,
}

impl TryFrom<DescriptorRecord> for SessionDescriptor {
    type Error = DescriptorError;

    fn try_from(record: DescriptorRecord) -> Result<Self, Self::Error> {
        SessionDescriptor::new(
            record.room_id,
            record.host_display_name,
            record.guest_display_name,
            record.subject,
            record.scheduled_start,
            record.scheduled_end,
        )
    }
}
