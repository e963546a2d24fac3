//! `SessionRoomCoordinator` - the per-device room actor.
//!
//! One actor owns all state for a room on this device and is the only thing
//! the UI shell talks to. It composes:
//!
//! - `MediaSessionManager` (local stream)
//! - `PeerIdentityResolver` (broker connect with collision retries)
//! - `ConnectionAttemptLoop` (guest only)
//! - `CallLifecycleStateMachine`
//! - `SessionTimerStateMachine` (scheduled rooms only)
//!
//! # Event Loop
//!
//! The actor's `run` loop selects over cancellation, the 1s timer tick, the
//! 4s dial tick, the grace deadline, UI commands and helper-task events.
//! Nothing in the loop blocks: the media prompt, broker connect, dials and
//! channel events run on helper tasks that post back into the mailbox.
//!
//! # Teardown
//!
//! Every exit (end call, timer ENDED + grace, navigation/cancel, dropped
//! handles) goes through [`SessionRoomCoordinator::teardown`], which runs at
//! most once: halt the dialer, release media, close the channel, destroy the
//! broker session, publish the exit reason and cancel helper tasks. Helper
//! results that arrive afterwards are released, never used.

mod messages;
mod snapshot;

pub use messages::{RoomCommand, RoomEvent};
pub use snapshot::{ExitReason, RoomSnapshot};

use crate::broker::{
    BrokerConnection, BrokerSession, ChannelEvent, ChannelHandle, ChannelId, IncomingDial,
    PeerChannel, SignalingBroker,
};
use crate::call::{CallLifecycleStateMachine, CloseOutcome};
use crate::clock::Clock;
use crate::config::Config;
use crate::dialer::{AttemptNumber, ConnectionAttemptLoop};
use crate::errors::{BrokerError, MediaError, RoomError};
use crate::identity::{IdentityRetryPolicy, PeerIdentity, PeerIdentityResolver};
use crate::media::{MediaDevices, MediaSessionManager, MediaStream};
use crate::observability::metrics;
use crate::timer::SessionTimerStateMachine;

use common::types::{ParticipantRole, RoomId, RoomKind, SessionDescriptor};
use std::sync::Arc;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Buffer size for UI commands.
const ROOM_COMMAND_BUFFER: usize = 32;

/// Buffer size for helper-task events.
const ROOM_EVENT_BUFFER: usize = 64;

/// External collaborators of a room.
#[derive(Debug, Clone)]
pub struct RoomDependencies {
    pub broker: Arc<dyn SignalingBroker>,
    pub devices: Arc<dyn MediaDevices>,
    pub clock: Arc<dyn Clock>,
}

/// Handle to a running room. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomCommand>,
    snapshot: watch::Receiver<RoomSnapshot>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// Flip the local camera track. Returns the new flag.
    ///
    /// # Errors
    ///
    /// `RoomError::RoomClosed` once the room is gone.
    pub async fn toggle_video(&self) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomCommand::ToggleVideo { respond_to })
            .await
    }

    /// Flip the local microphone track. Returns the new flag.
    ///
    /// # Errors
    ///
    /// `RoomError::RoomClosed` once the room is gone.
    pub async fn toggle_audio(&self) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomCommand::ToggleAudio { respond_to })
            .await
    }

    /// Place one manual dial. Returns `false` if not currently offered.
    ///
    /// # Errors
    ///
    /// `RoomError::RoomClosed` once the room is gone.
    pub async fn force_connect(&self) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomCommand::ForceConnect { respond_to })
            .await
    }

    /// End the call. Idempotent.
    ///
    /// # Errors
    ///
    /// Ending an already torn-down room returns `Ok(())`.
    pub async fn end_call(&self) -> Result<(), RoomError> {
        match self
            .request(|respond_to| RoomCommand::EndCall { respond_to })
            .await
        {
            Ok(()) | Err(RoomError::RoomClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait until the room is torn down and return why.
    ///
    /// # Errors
    ///
    /// `RoomError::Internal` if the actor vanished without publishing an exit.
    pub async fn wait_for_exit(&self) -> Result<ExitReason, RoomError> {
        let mut receiver = self.snapshot.clone();
        let exit = receiver
            .wait_for(|snapshot| snapshot.exit.is_some())
            .await
            .map_err(|e| RoomError::Internal(format!("snapshot channel closed: {e}")))?
            .exit;
        exit.ok_or_else(|| RoomError::Internal("exit reason missing".to_string()))
    }

    /// Leave the room (page navigation). Tears down asynchronously.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        rx.await.map_err(|_| RoomError::RoomClosed)
    }
}

/// The channel currently carrying (or setting up) the call.
#[derive(Debug)]
struct ActiveChannel {
    handle: ChannelHandle,
    /// Guest dial that produced it.
    attempt: Option<AttemptNumber>,
    /// Host: whether the inbound call was answered.
    answered: bool,
}

/// The room actor.
pub struct SessionRoomCoordinator {
    room_id: RoomId,
    role: ParticipantRole,
    kind: RoomKind,
    config: Config,
    broker: Arc<dyn SignalingBroker>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<RoomCommand>,
    events_tx: mpsc::Sender<RoomEvent>,
    events_rx: mpsc::Receiver<RoomEvent>,
    cancel_token: CancellationToken,
    snapshot_tx: watch::Sender<RoomSnapshot>,
    resolver: PeerIdentityResolver,
    host_identity: PeerIdentity,
    media: MediaSessionManager,
    call: CallLifecycleStateMachine,
    /// Guest only.
    dialer: Option<ConnectionAttemptLoop>,
    /// Scheduled rooms only.
    timer: Option<SessionTimerStateMachine>,
    dial_interval: Interval,
    timer_interval: Interval,
    grace_deadline: Option<Instant>,
    session: Option<Arc<dyn BrokerSession>>,
    channel: Option<ActiveChannel>,
    remote_stream: Option<MediaStream>,
    fatal_error: Option<RoomError>,
    exit: Option<ExitReason>,
}

impl SessionRoomCoordinator {
    /// Start a room on this device.
    ///
    /// Must be called inside a tokio runtime. Returns a handle and the
    /// actor's join handle.
    #[must_use]
    pub fn start(
        descriptor: SessionDescriptor,
        role: ParticipantRole,
        kind: RoomKind,
        deps: RoomDependencies,
        config: Config,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, commands) = mpsc::channel(ROOM_COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(ROOM_EVENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(RoomSnapshot::initial(kind.is_timed()));
        let cancel_token = CancellationToken::new();

        let room_id = descriptor.room_id().clone();
        let resolver = PeerIdentityResolver::new(room_id.clone(), kind);
        let host_identity = resolver.host_identity();

        let timer = kind.is_timed().then(|| {
            SessionTimerStateMachine::new(
                descriptor.scheduled_start(),
                descriptor.scheduled_end(),
                config.warning_threshold,
            )
        });
        let dialer = match role {
            ParticipantRole::Guest => Some(ConnectionAttemptLoop::from(&config)),
            ParticipantRole::Host => None,
        };

        let mut dial_interval = tokio::time::interval(config.dial_interval);
        dial_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timer_interval = tokio::time::interval(config.timer_tick);
        timer_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let actor = Self {
            room_id: room_id.clone(),
            role,
            kind,
            config,
            broker: deps.broker,
            clock: deps.clock,
            commands,
            events_tx,
            events_rx,
            cancel_token: cancel_token.clone(),
            snapshot_tx,
            resolver,
            host_identity,
            media: MediaSessionManager::new(deps.devices),
            call: CallLifecycleStateMachine::new(),
            dialer,
            timer,
            dial_interval,
            timer_interval,
            grace_deadline: None,
            session: None,
            channel: None,
            remote_stream: None,
            fatal_error: None,
            exit: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            snapshot: snapshot_rx,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor event loop.
    #[instrument(
        skip_all,
        name = "room.coordinator",
        fields(room_id = %self.room_id, role = %self.role, kind = self.kind.namespace())
    )]
    async fn run(mut self) {
        info!(
            target: "room.coordinator",
            room_id = %self.room_id,
            role = %self.role,
            "Room started"
        );

        self.spawn_media_request();
        self.spawn_broker_connect();

        loop {
            if self.exit.is_some() {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.teardown(ExitReason::Navigated);
                }

                _ = self.timer_interval.tick(), if self.timer.is_some() => {
                    self.on_timer_tick();
                }

                _ = self.dial_interval.tick(), if self.dialer_running() => {
                    self.on_dial_tick();
                }

                () = wait_until(self.grace_deadline), if self.grace_deadline.is_some() => {
                    info!(
                        target: "room.timer",
                        room_id = %self.room_id,
                        "Grace window elapsed"
                    );
                    self.teardown(ExitReason::SessionEnded);
                }

                msg = self.commands.recv() => match msg {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!(
                            target: "room.coordinator",
                            room_id = %self.room_id,
                            "All room handles dropped"
                        );
                        self.teardown(ExitReason::Navigated);
                    }
                },

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }
            }
        }

        // Anything still queued was produced for a room that no longer exists
        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            event.release();
        }

        info!(
            target: "room.coordinator",
            room_id = %self.room_id,
            exit = self.exit.map(|e| e.as_str()),
            "Room stopped"
        );
    }

    fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::ToggleVideo { respond_to } => {
                let enabled = self
                    .media
                    .toggle_video()
                    .unwrap_or_else(|| self.media.video_enabled());
                self.publish();
                let _ = respond_to.send(enabled);
            }

            RoomCommand::ToggleAudio { respond_to } => {
                let enabled = self
                    .media
                    .toggle_audio()
                    .unwrap_or_else(|| self.media.audio_enabled());
                self.publish();
                let _ = respond_to.send(enabled);
            }

            RoomCommand::EndCall { respond_to } => {
                self.teardown(ExitReason::UserEnded);
                let _ = respond_to.send(());
            }

            RoomCommand::ForceConnect { respond_to } => {
                let placed = self.force_connect();
                let _ = respond_to.send(placed);
            }
        }
    }

    fn handle_event(&mut self, event: RoomEvent) {
        if self.exit.is_some() {
            event.release();
            return;
        }

        match event {
            RoomEvent::MediaAcquired(result) => self.on_media_acquired(result),
            RoomEvent::BrokerConnected(result) => self.on_broker_connected(result),
            RoomEvent::DialCompleted { attempt, result } => self.on_dial_completed(attempt, result),
            RoomEvent::IncomingDial(dial) => self.on_incoming_dial(dial),
            RoomEvent::Channel { channel_id, event } => self.on_channel_event(channel_id, event),
        }
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    fn spawn_media_request(&self) {
        let request = self.media.request();
        let events = self.events_tx.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                result = request => {
                    if let Err(SendError(event)) = events.send(RoomEvent::MediaAcquired(result)).await {
                        event.release();
                    }
                }
            }
        });
    }

    fn on_media_acquired(&mut self, result: Result<MediaStream, MediaError>) {
        match result {
            Ok(stream) => {
                if !self.media.attach(stream) {
                    return;
                }
                self.answer_pending();
                self.maybe_start_dialing();
                self.publish();
            }
            Err(e) => self.fail(RoomError::Media(e)),
        }
    }

    // ------------------------------------------------------------------
    // Broker
    // ------------------------------------------------------------------

    fn spawn_broker_connect(&self) {
        let resolver = self.resolver.clone();
        let broker = Arc::clone(&self.broker);
        let role = self.role;
        let policy = IdentityRetryPolicy::from(&self.config);
        let events = self.events_tx.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            let result = resolver
                .connect(broker.as_ref(), role, policy, &cancel_token)
                .await;
            if let Err(SendError(event)) = events.send(RoomEvent::BrokerConnected(result)).await {
                event.release();
            }
        });
    }

    fn on_broker_connected(&mut self, result: Result<BrokerConnection, RoomError>) {
        let connection = match result {
            Ok(connection) => connection,
            Err(e) if e.is_fatal() => return self.fail(e),
            Err(e) => {
                debug!(
                    target: "room.coordinator",
                    room_id = %self.room_id,
                    error = %e,
                    "Broker connect abandoned"
                );
                return;
            }
        };

        if self.fatal_error.is_some() {
            // Keep the identity until teardown; just never use it
            self.session = Some(connection.session);
            return;
        }

        self.session = Some(connection.session);
        match self.role {
            ParticipantRole::Host => {
                self.spawn_incoming_forwarder(connection.incoming);
                self.call.connecting();
                info!(
                    target: "room.coordinator",
                    room_id = %self.room_id,
                    identity = %self.host_identity,
                    "Host listening for inbound calls"
                );
            }
            ParticipantRole::Guest => self.maybe_start_dialing(),
        }
        self.publish();
    }

    fn spawn_incoming_forwarder(&self, mut incoming: mpsc::Receiver<IncomingDial>) {
        let events = self.events_tx.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    dial = incoming.recv() => {
                        let Some(dial) = dial else { break };
                        if let Err(SendError(event)) = events.send(RoomEvent::IncomingDial(dial)).await {
                            event.release();
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_channel_forwarder(
        &self,
        channel_id: ChannelId,
        mut channel_events: mpsc::Receiver<ChannelEvent>,
    ) {
        let events = self.events_tx.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    event = channel_events.recv() => {
                        let Some(event) = event else { break };
                        if events.send(RoomEvent::Channel { channel_id, event }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Host: inbound calls
    // ------------------------------------------------------------------

    fn on_incoming_dial(&mut self, dial: IncomingDial) {
        if self.call.is_terminal() {
            dial.channel.control.close();
            return;
        }

        let (handle, channel_events) = dial.channel.into_parts();
        info!(
            target: "room.coordinator",
            room_id = %self.room_id,
            channel_id = %handle.id,
            "Inbound call"
        );

        if let Some(replaced) = self.call.channel_opened(handle.id) {
            debug!(
                target: "room.coordinator",
                room_id = %self.room_id,
                channel_id = %replaced,
                "Replacing previous channel with newer inbound call"
            );
        }
        self.close_active_channel();
        self.remote_stream = None;

        self.spawn_channel_forwarder(handle.id, channel_events);
        self.channel = Some(ActiveChannel {
            handle,
            attempt: None,
            answered: false,
        });
        self.answer_pending();
        self.publish();
    }

    /// Answer the pending inbound call once local media is available.
    fn answer_pending(&mut self) {
        let Some(stream) = self.media.stream().cloned() else {
            return;
        };
        let Some(active) = self.channel.as_mut() else {
            return;
        };
        if active.attempt.is_some() || active.answered {
            return;
        }

        match active.handle.control.answer(stream) {
            Ok(()) => {
                active.answered = true;
                debug!(
                    target: "room.coordinator",
                    room_id = %self.room_id,
                    channel_id = %active.handle.id,
                    "Inbound call answered"
                );
            }
            Err(e) => {
                debug!(
                    target: "room.coordinator",
                    room_id = %self.room_id,
                    channel_id = %active.handle.id,
                    error = %e,
                    "Answer failed"
                );
                let channel_id = active.handle.id;
                self.call.channel_closed(channel_id);
                self.close_active_channel();
            }
        }
    }

    // ------------------------------------------------------------------
    // Guest: dial loop
    // ------------------------------------------------------------------

    fn dialer_running(&self) -> bool {
        self.dialer.as_ref().is_some_and(ConnectionAttemptLoop::is_running)
    }

    fn ready_to_dial(&self) -> bool {
        self.session.is_some()
            && self.media.stream().is_some()
            && self.fatal_error.is_none()
            && !self.timer_ended()
    }

    fn timer_ended(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(SessionTimerStateMachine::has_ended)
    }

    /// Start (or resume) the guest loop with an immediate first tick.
    fn maybe_start_dialing(&mut self) {
        if !self.ready_to_dial() || self.call.is_connected() {
            return;
        }
        let Some(dialer) = self.dialer.as_mut() else {
            return;
        };
        if dialer.resume() {
            self.dial_interval.reset_immediately();
        }
    }

    fn on_dial_tick(&mut self) {
        let connected = self.call.is_connected();
        let Some(dialer) = self.dialer.as_mut() else {
            return;
        };
        let outcome = dialer.on_tick(connected);

        if let Some(stale) = outcome.abandoned {
            self.abandon_dial(stale);
        }
        if let Some(attempt) = outcome.dial {
            self.place_dial(attempt);
        }
        self.publish();
    }

    fn force_connect(&mut self) -> bool {
        if self.exit.is_some() || !self.ready_to_dial() {
            return false;
        }
        let connected = self.call.is_connected();
        let Some(attempt) = self
            .dialer
            .as_mut()
            .and_then(|dialer| dialer.force_connect(connected))
        else {
            return false;
        };

        info!(
            target: "room.dialer",
            room_id = %self.room_id,
            attempt,
            "Manual dial requested"
        );
        self.place_dial(attempt);
        self.publish();
        true
    }

    fn place_dial(&mut self, attempt: AttemptNumber) {
        let (Some(session), Some(stream)) = (self.session.clone(), self.media.stream().cloned())
        else {
            return;
        };
        self.call.connecting();

        let remote = self.host_identity.clone();
        let events = self.events_tx.clone();
        let cancel_token = self.cancel_token.clone();

        debug!(
            target: "room.dialer",
            room_id = %self.room_id,
            attempt,
            "Dialing host"
        );

        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancel_token.cancelled() => return,
                result = session.dial(&remote, stream) => result,
            };
            if let Err(SendError(event)) = events
                .send(RoomEvent::DialCompleted { attempt, result })
                .await
            {
                event.release();
            }
        });
    }

    fn abandon_dial(&mut self, attempt: AttemptNumber) {
        let is_current = self
            .channel
            .as_ref()
            .is_some_and(|active| active.attempt == Some(attempt));
        if !is_current {
            return;
        }
        if let Some(active) = self.channel.as_ref() {
            self.call.abandon(active.handle.id);
        }
        self.close_active_channel();
    }

    fn on_dial_completed(&mut self, attempt: AttemptNumber, result: Result<PeerChannel, BrokerError>) {
        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                if let Some(dialer) = self.dialer.as_mut() {
                    dialer.on_failed(attempt, &e);
                }
                self.publish();
                return;
            }
        };

        let current = self
            .dialer
            .as_ref()
            .is_some_and(|dialer| dialer.in_flight() == Some(attempt));
        if !current || self.call.is_connected() || self.call.is_terminal() {
            debug!(
                target: "room.dialer",
                room_id = %self.room_id,
                attempt,
                "Discarding late dial"
            );
            channel.control.close();
            return;
        }

        let (handle, channel_events) = channel.into_parts();
        self.call.channel_opened(handle.id);
        self.close_active_channel();
        self.spawn_channel_forwarder(handle.id, channel_events);
        self.channel = Some(ActiveChannel {
            handle,
            attempt: Some(attempt),
            answered: false,
        });
    }

    // ------------------------------------------------------------------
    // Channel events
    // ------------------------------------------------------------------

    fn on_channel_event(&mut self, channel_id: ChannelId, event: ChannelEvent) {
        match event {
            ChannelEvent::Stream(remote) => self.on_remote_stream(channel_id, remote),
            ChannelEvent::Close => self.on_channel_closed(channel_id, None),
            ChannelEvent::Error(e) => self.on_channel_closed(channel_id, Some(e)),
        }
    }

    fn on_remote_stream(&mut self, channel_id: ChannelId, remote: MediaStream) {
        if !self.call.stream_received(channel_id) {
            return;
        }

        self.remote_stream = Some(remote);
        if let (Some(dialer), Some(attempt)) = (
            self.dialer.as_mut(),
            self.channel.as_ref().and_then(|active| active.attempt),
        ) {
            dialer.on_connected(attempt);
        }

        metrics::record_call_connected(self.role.as_str());
        info!(
            target: "room.coordinator",
            room_id = %self.room_id,
            channel_id = %channel_id,
            "Call connected"
        );
        self.publish();
    }

    fn on_channel_closed(&mut self, channel_id: ChannelId, error: Option<BrokerError>) {
        let attempt = self
            .channel
            .as_ref()
            .filter(|active| active.handle.id == channel_id)
            .and_then(|active| active.attempt);

        match self.call.channel_closed(channel_id) {
            CloseOutcome::Stale => {}

            CloseOutcome::Abandoned => {
                self.close_active_channel();
                if let (Some(dialer), Some(attempt)) = (self.dialer.as_mut(), attempt) {
                    match &error {
                        Some(e) => dialer.on_failed(attempt, e),
                        None => dialer.on_closed(attempt),
                    }
                }
                self.publish();
            }

            CloseOutcome::Dropped => {
                self.close_active_channel();
                self.remote_stream = None;
                warn!(
                    target: "room.coordinator",
                    room_id = %self.room_id,
                    channel_id = %channel_id,
                    error = error.as_ref().map(tracing::field::display),
                    "Call dropped"
                );
                // Guest redials right away; host keeps listening
                self.maybe_start_dialing();
                self.publish();
            }
        }
    }

    fn close_active_channel(&mut self) {
        if let Some(active) = self.channel.take() {
            active.handle.close();
        }
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    fn on_timer_tick(&mut self) {
        let now = self.clock.now();
        let Some(timer) = self.timer.as_mut() else {
            return;
        };
        let previous = timer.state();
        let tick = timer.tick(now);

        if tick.state != previous {
            info!(
                target: "room.timer",
                room_id = %self.room_id,
                from = previous.as_str(),
                to = tick.state.as_str(),
                "Session timer transition"
            );
        }

        if tick.just_ended {
            self.grace_deadline = Some(Instant::now() + self.config.end_grace);
            if let Some(dialer) = self.dialer.as_mut() {
                dialer.halt();
            }
        }
        self.publish();
    }

    // ------------------------------------------------------------------
    // Errors and teardown
    // ------------------------------------------------------------------

    /// Record a fatal error: stop dialing and end the call. The timer keeps
    /// running and the room stays up until teardown.
    fn fail(&mut self, room_error: RoomError) {
        if self.fatal_error.is_some() {
            return;
        }

        error!(
            target: "room.coordinator",
            room_id = %self.room_id,
            kind = room_error.label(),
            error = %room_error,
            "Fatal room error"
        );
        metrics::record_fatal_error(room_error.label());

        if let Some(dialer) = self.dialer.as_mut() {
            dialer.halt();
        }
        self.call.fatal();
        self.close_active_channel();
        self.remote_stream = None;
        self.fatal_error = Some(room_error);
        self.publish();
    }

    /// The single exit path. Runs at most once.
    fn teardown(&mut self, reason: ExitReason) {
        if self.exit.is_some() {
            return;
        }

        info!(
            target: "room.coordinator",
            room_id = %self.room_id,
            reason = reason.as_str(),
            "Tearing down room"
        );

        if let Some(dialer) = self.dialer.as_mut() {
            dialer.halt();
        }
        self.grace_deadline = None;
        self.media.release();
        self.call.torn_down();
        self.close_active_channel();
        if let Some(session) = self.session.take() {
            session.destroy();
        }
        self.remote_stream = None;
        self.exit = Some(reason);

        metrics::record_teardown(reason.as_str());
        self.publish();
        self.cancel_token.cancel();
    }

    fn publish(&self) {
        let connected = self.call.is_connected();
        let can_force_connect = self.exit.is_none()
            && self.ready_to_dial()
            && self
                .dialer
                .as_ref()
                .is_some_and(|dialer| dialer.can_force_connect(connected));

        let snapshot = RoomSnapshot {
            connection_state: self.call.state(),
            timer_state: self.timer.as_ref().map(SessionTimerStateMachine::state),
            time_left_display: self
                .timer
                .as_ref()
                .and_then(|timer| timer.display().map(str::to_string)),
            is_video_on: self.media.video_enabled(),
            is_audio_on: self.media.audio_enabled(),
            fatal_error: self.fatal_error.as_ref().map(RoomError::client_message),
            dial_attempts: self
                .dialer
                .as_ref()
                .map_or(0, ConnectionAttemptLoop::attempts),
            can_force_connect,
            local_stream: self.media.stream().cloned(),
            remote_stream: self.remote_stream.clone(),
            exit: self.exit,
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
