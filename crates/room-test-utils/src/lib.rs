//! # Room Test Utilities
//!
//! Shared test utilities for the session room.
//!
//! This crate provides mock implementations and fixtures for testing the
//! coordinator without real capture devices or a real signaling service.
//!
//! ## Modules
//!
//! - `mock_media` - Configurable capture devices (grant, deny, never resolve...)
//! - `clock` - Wall clock that follows tokio's pausable time
//! - `fixtures` - Room descriptors and dependency bundles
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let clock = AnchoredClock::at(TestRoom::default_start() - chrono::Duration::minutes(5));
//!     let room = TestRoom::new("room-1");
//!     let broker = MemoryBroker::new();
//!     let devices = MockMediaDevices::granting();
//!
//!     let deps = room_dependencies(&broker, &devices, &clock);
//!     // Start coordinators with room.descriptor() and deps...
//! }
//! ```

pub mod clock;
pub mod fixtures;
pub mod mock_media;

// Re-export commonly used items
pub use clock::*;
pub use fixtures::*;
pub use mock_media::*;
