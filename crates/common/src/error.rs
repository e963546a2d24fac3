//! Common error types for session-room components.

use thiserror::Error;

/// Errors raised while building a [`SessionDescriptor`](crate::types::SessionDescriptor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// The room identifier was empty or whitespace.
    #[error("Room ID must not be empty")]
    EmptyRoomId,

    /// The scheduled window is empty or inverted.
    #[error("Scheduled end ({end}) must be after scheduled start ({start})")]
    InvalidWindow {
        /// Scheduled start (RFC 3339).
        start: String,
        /// Scheduled end (RFC 3339).
        end: String,
    },
}
