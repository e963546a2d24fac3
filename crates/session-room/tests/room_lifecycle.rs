//! End-to-end room scenarios on paused time.
//!
//! Host and guest run as two coordinators against one `MemoryBroker`, with
//! an `AnchoredClock` so the session timer follows `tokio::time::advance`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::types::{ParticipantRole, RoomKind};
use room_test_utils::{
    room_dependencies, test_config, wait_for, AnchoredClock, MockMediaDevices, TestRoom,
};
use session_room::broker::memory::MemoryBroker;
use session_room::call::ConnectionState;
use session_room::clock::Clock;
use session_room::config::Config;
use session_room::timer::TimerState;
use session_room::ExitReason;
use tokio::time::Instant;

// ============================================================================
// Full session
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_session_connects_and_ends_after_grace() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start - ChronoDuration::minutes(5));
    let broker = MemoryBroker::new();
    let host_devices = MockMediaDevices::granting();
    let guest_devices = MockMediaDevices::granting();
    let config = test_config();

    // Host arrives at T0-5min
    let (host, host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &host_devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;

    // Guest arrives a minute later
    tokio::time::sleep(Duration::from_secs(60)).await;
    let (guest, guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &guest_devices, &clock),
    );

    let guest_snapshot = wait_for(&guest, |s| s.is_connected()).await;
    let host_snapshot = wait_for(&host, |s| s.is_connected()).await;

    assert!(guest_snapshot.dial_attempts <= 2);
    assert_eq!(host_snapshot.dial_attempts, 0);
    assert_eq!(guest_snapshot.timer_state, Some(TimerState::Waiting));
    assert!(guest_snapshot.time_left_display.is_none());

    // Each side sees the other's local stream
    assert!(guest_snapshot
        .remote_stream
        .as_ref()
        .unwrap()
        .same_stream(&host_devices.single_stream()));
    assert!(host_snapshot
        .remote_stream
        .as_ref()
        .unwrap()
        .same_stream(&guest_devices.single_stream()));

    let active = wait_for(&guest, |s| s.timer_state == Some(TimerState::Active)).await;
    assert!(clock.now() >= room.start);
    assert_eq!(active.time_left_display.as_deref(), Some("30:00"));

    let warning = wait_for(&guest, |s| s.timer_state == Some(TimerState::Warning)).await;
    assert_eq!(warning.time_left_display.as_deref(), Some("05:00"));

    // ENDED keeps the call up for the grace window
    let ended = wait_for(&guest, |s| s.timer_state == Some(TimerState::Ended)).await;
    let ended_at = Instant::now();
    assert!(ended.is_connected());
    assert!(ended.exit.is_none());
    assert!(!ended.can_force_connect);

    assert_eq!(guest.wait_for_exit().await.unwrap(), ExitReason::SessionEnded);
    assert_eq!(host.wait_for_exit().await.unwrap(), ExitReason::SessionEnded);
    assert!(ended_at.elapsed() <= config.end_grace);
    assert!(clock.now() <= room.end() + ChronoDuration::seconds(5));

    host_task.await.unwrap();
    guest_task.await.unwrap();

    let stats = broker.stats();
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.sessions_destroyed, 2);
    for devices in [&host_devices, &guest_devices] {
        for track in devices.single_stream().tracks() {
            assert_eq!(track.stop_count(), 1);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_guest_before_host_keeps_polling_until_host_joins() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start - ChronoDuration::minutes(2));
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );

    // 1 immediate dial + one per 4s tick
    tokio::time::sleep(Duration::from_secs(10)).await;
    let polling = guest.snapshot();
    assert_eq!(polling.connection_state, ConnectionState::Connecting);
    assert_eq!(polling.dial_attempts, 3);
    assert!(polling.fatal_error.is_none());

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );

    let connected = wait_for(&guest, |s| s.is_connected()).await;
    wait_for(&host, |s| s.is_connected()).await;
    assert_eq!(connected.dial_attempts, 4);
}

#[tokio::test(start_paused = true)]
async fn test_host_answers_once_late_media_arrives() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    // Host sits on the permission prompt for 5s, less than the stale window
    let host_devices = MockMediaDevices::builder()
        .grant_after(Duration::from_secs(5))
        .build();
    let guest_devices = MockMediaDevices::granting();
    let started = Instant::now();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &host_devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &guest_devices, &clock),
    );

    // Inbound call is pending, unanswered
    tokio::time::sleep(Duration::from_secs(1)).await;
    let pending_host = host.snapshot();
    let pending_guest = guest.snapshot();
    assert_eq!(pending_host.connection_state, ConnectionState::Connecting);
    assert!(pending_host.local_stream.is_none());
    assert!(pending_host.remote_stream.is_none());
    assert_eq!(pending_guest.connection_state, ConnectionState::Connecting);
    assert_eq!(pending_guest.dial_attempts, 1);
    assert!(host_devices.issued_streams().is_empty());

    let host_connected = wait_for(&host, |s| s.is_connected()).await;
    let guest_connected = wait_for(&guest, |s| s.is_connected()).await;
    assert!(started.elapsed() >= Duration::from_secs(5));

    // Answered with the late stream, on the first dial
    let host_stream = host_devices.single_stream();
    assert!(host_connected
        .local_stream
        .as_ref()
        .unwrap()
        .same_stream(&host_stream));
    assert!(guest_connected
        .remote_stream
        .as_ref()
        .unwrap()
        .same_stream(&host_stream));
    assert!(host_connected
        .remote_stream
        .as_ref()
        .unwrap()
        .same_stream(&guest_devices.single_stream()));
    assert_eq!(guest_connected.dial_attempts, 1);
}

// ============================================================================
// Retry suppression
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_no_dials_while_connected() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );

    let connected = wait_for(&guest, |s| s.is_connected()).await;
    let dials = broker.stats().dials;

    tokio::time::sleep(Duration::from_secs(120)).await;

    let later = guest.snapshot();
    assert!(later.is_connected());
    assert_eq!(later.dial_attempts, connected.dial_attempts);
    assert_eq!(broker.stats().dials, dials);
    assert!(!later.can_force_connect);
    assert!(!guest.force_connect().await.unwrap());
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_guest_redials_after_network_drop() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    let first = wait_for(&guest, |s| s.is_connected()).await;
    wait_for(&host, |s| s.is_connected()).await;

    broker.sever(&room.host_identity(RoomKind::Scheduled));

    let again = wait_for(&guest, |s| {
        s.is_connected() && s.dial_attempts > first.dial_attempts
    })
    .await;
    wait_for(&host, |s| s.is_connected()).await;

    assert_eq!(again.dial_attempts, first.dial_attempts + 1);
    assert!(again.remote_stream.is_some());
    assert!(again.fatal_error.is_none());
    // Local media survives the drop
    assert!(again
        .local_stream
        .as_ref()
        .unwrap()
        .same_stream(first.local_stream.as_ref().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn test_host_listens_again_after_guest_leaves() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;

    let (guest, guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&host, |s| s.is_connected()).await;

    // Guest closes the tab
    guest.cancel();
    guest_task.await.unwrap();
    assert_eq!(guest.wait_for_exit().await.unwrap(), ExitReason::Navigated);

    let dropped = wait_for(&host, |s| !s.is_connected()).await;
    assert_eq!(dropped.connection_state, ConnectionState::CallEnded);
    assert!(dropped.remote_stream.is_none());
    assert!(dropped.exit.is_none());

    // Guest comes back in a fresh tab
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&guest, |s| s.is_connected()).await;
    wait_for(&host, |s| s.is_connected()).await;
}

// ============================================================================
// Timer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timer_never_regresses_when_clock_jumps_back() {
    let room = TestRoom::random().lasting(ChronoDuration::minutes(10));
    let clock = AnchoredClock::at(room.start + ChronoDuration::minutes(6));
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&host, |s| s.timer_state == Some(TimerState::Warning)).await;

    // Wall clock corrected back before the scheduled start
    clock.shift(-ChronoDuration::minutes(10));
    tokio::time::sleep(Duration::from_secs(5)).await;

    let snapshot = host.snapshot();
    assert_eq!(snapshot.timer_state, Some(TimerState::Warning));
    assert!(snapshot.time_left_display.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_timer_keeps_running_after_session_end_until_grace() {
    let room = TestRoom::random().lasting(ChronoDuration::minutes(1));
    let clock = AnchoredClock::at(room.end() - ChronoDuration::seconds(2));
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();
    let config = Config {
        end_grace: Duration::from_secs(10),
        ..test_config()
    };

    let (host, _host_task) = room.join_with(
        ParticipantRole::Host,
        RoomKind::Scheduled,
        room_dependencies(&broker, &devices, &clock),
        config,
    );

    wait_for(&host, |s| s.timer_state == Some(TimerState::Ended)).await;
    let overrun = wait_for(&host, |s| {
        s.time_left_display
            .as_deref()
            .is_some_and(|display| display.starts_with('-'))
    })
    .await;
    assert_eq!(overrun.timer_state, Some(TimerState::Ended));
    assert!(overrun.exit.is_none());

    assert_eq!(host.wait_for_exit().await.unwrap(), ExitReason::SessionEnded);
}

#[tokio::test(start_paused = true)]
async fn test_interview_room_has_no_timer() {
    let room = TestRoom::random().lasting(ChronoDuration::minutes(1));
    // Well past the scheduled end
    let clock = AnchoredClock::at(room.end() + ChronoDuration::hours(1));
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join_with(
        ParticipantRole::Host,
        RoomKind::Interview,
        room_dependencies(&broker, &devices, &clock),
        test_config(),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, _guest_task) = room.join_with(
        ParticipantRole::Guest,
        RoomKind::Interview,
        room_dependencies(&broker, &devices, &clock),
        test_config(),
    );
    wait_for(&guest, |s| s.is_connected()).await;

    assert!(broker.is_registered(&room.host_identity(RoomKind::Interview)));
    assert!(!broker.is_registered(&room.host_identity(RoomKind::Scheduled)));

    tokio::time::sleep(Duration::from_secs(600)).await;
    let snapshot = guest.snapshot();
    assert!(snapshot.is_connected());
    assert!(snapshot.timer_state.is_none());
    assert!(snapshot.time_left_display.is_none());
    assert!(snapshot.exit.is_none());
}

// ============================================================================
// Local media controls
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_toggles_flip_local_tracks_only() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let host_devices = MockMediaDevices::granting();
    let guest_devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &host_devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &guest_devices, &clock),
    );
    let connected = wait_for(&guest, |s| s.is_connected()).await;
    assert!(connected.is_video_on);
    assert!(connected.is_audio_on);

    assert!(!guest.toggle_video().await.unwrap());
    assert!(!guest.toggle_audio().await.unwrap());
    let muted = guest.snapshot();
    assert!(!muted.is_video_on);
    assert!(!muted.is_audio_on);
    assert!(muted.is_connected());

    // Host's own tracks are untouched
    let host_snapshot = host.snapshot();
    assert!(host_snapshot.is_video_on);
    assert!(host_snapshot.is_audio_on);

    assert!(guest.toggle_video().await.unwrap());
    assert!(guest.snapshot().is_video_on);
    assert!(!guest.snapshot().is_audio_on);

    // Muting never stops a track
    for track in guest_devices.single_stream().tracks() {
        assert_eq!(track.stop_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_toggle_before_media_reports_off() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::builder().pending().build();

    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );

    assert!(!guest.toggle_video().await.unwrap());
    assert!(!guest.toggle_audio().await.unwrap());

    // No stream means nothing to dial with
    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = guest.snapshot();
    assert_eq!(snapshot.dial_attempts, 0);
    assert!(snapshot.local_stream.is_none());
    assert_eq!(broker.stats().dials, 0);
}
