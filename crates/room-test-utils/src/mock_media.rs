//! Mock capture devices.
//!
//! `MockMediaDevices` answers `get_user_media` with a configured outcome and
//! remembers every stream it handed out, so tests can check that each one
//! was stopped exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockMediaDevices;
//!
//! let devices = MockMediaDevices::builder().deny_permission().build();
//! // ... start a room ...
//! assert_eq!(devices.request_count(), 1);
//! ```

use async_trait::async_trait;
use session_room::errors::MediaError;
use session_room::media::{MediaConstraints, MediaDevices, MediaStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockMediaResponse {
    /// Hand out a fresh camera + microphone stream.
    Grant,
    /// Grant after the user sits on the prompt for this long.
    GrantAfter(Duration),
    /// Fail with the given error.
    Fail(MediaError),
    /// Never resolve (user ignores the permission prompt).
    Pending,
}

/// Mock capture devices. Clones share counters and issued streams.
#[derive(Debug, Clone)]
pub struct MockMediaDevices {
    response: MockMediaResponse,
    requests: Arc<AtomicU32>,
    issued: Arc<Mutex<Vec<MediaStream>>>,
}

impl MockMediaDevices {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> MockMediaDevicesBuilder {
        MockMediaDevicesBuilder::default()
    }

    /// Devices that always grant.
    #[must_use]
    pub fn granting() -> Self {
        Self::builder().grant().build()
    }

    /// Devices that always refuse permission.
    #[must_use]
    pub fn denying() -> Self {
        Self::builder().deny_permission().build()
    }

    /// Number of `get_user_media` calls so far.
    #[must_use]
    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Every stream handed out so far.
    #[must_use]
    pub fn issued_streams(&self) -> Vec<MediaStream> {
        self.issued.lock().unwrap().clone()
    }

    /// The only stream handed out. Panics unless exactly one was issued.
    #[must_use]
    pub fn single_stream(&self) -> MediaStream {
        let issued = self.issued_streams();
        assert_eq!(issued.len(), 1, "expected exactly one issued stream");
        issued.into_iter().next().unwrap()
    }

    fn issue(&self) -> MediaStream {
        let stream = MediaStream::camera_and_microphone();
        self.issued.lock().unwrap().push(stream.clone());
        stream
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn get_user_media(
        &self,
        _constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        match &self.response {
            MockMediaResponse::Grant => Ok(self.issue()),
            MockMediaResponse::GrantAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(self.issue())
            }
            MockMediaResponse::Fail(error) => Err(error.clone()),
            MockMediaResponse::Pending => std::future::pending().await,
        }
    }
}

/// Builder for `MockMediaDevices`.
#[derive(Debug)]
pub struct MockMediaDevicesBuilder {
    response: MockMediaResponse,
}

impl Default for MockMediaDevicesBuilder {
    fn default() -> Self {
        Self {
            response: MockMediaResponse::Grant,
        }
    }
}

impl MockMediaDevicesBuilder {
    /// Grant camera + microphone.
    #[must_use]
    pub fn grant(mut self) -> Self {
        self.response = MockMediaResponse::Grant;
        self
    }

    /// Grant once `delay` has passed.
    #[must_use]
    pub fn grant_after(mut self, delay: Duration) -> Self {
        self.response = MockMediaResponse::GrantAfter(delay);
        self
    }

    /// Refuse permission.
    #[must_use]
    pub fn deny_permission(mut self) -> Self {
        self.response = MockMediaResponse::Fail(MediaError::PermissionDenied);
        self
    }

    /// Report no capture device.
    #[must_use]
    pub fn no_device(mut self) -> Self {
        self.response = MockMediaResponse::Fail(MediaError::NoDevice);
        self
    }

    /// Report an insecure transport context.
    #[must_use]
    pub fn insecure_context(mut self) -> Self {
        self.response = MockMediaResponse::Fail(MediaError::InsecureContext);
        self
    }

    /// Never resolve.
    #[must_use]
    pub fn pending(mut self) -> Self {
        self.response = MockMediaResponse::Pending;
        self
    }

    /// Build the mock.
    #[must_use]
    pub fn build(self) -> MockMediaDevices {
        MockMediaDevices {
            response: self.response,
            requests: Arc::new(AtomicU32::new(0)),
            issued: Arc::new(Mutex::new(Vec::new())),
        }
    }
}
