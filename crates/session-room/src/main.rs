//! Session Room loopback
//!
//! Runs a host and a guest coordinator in one process against the in-memory
//! broker and synthetic capture devices. Useful for watching the dial loop,
//! call lifecycle and session timer interact end to end.
//!
//! # Environment
//!
//! - `ROOM_ID`: room identifier (default: random)
//! - `ROOM_SESSION_SECONDS`: length of the scheduled window starting now (default: 90)
//! - `ROOM_LOG_JSON`: `true` for JSON logs
//! - `RUST_LOG`: log filter (default: `session_room=debug`)
//! - `ROOM_*` tunables, see `session_room::config`

#![warn(clippy::pedantic)]

use std::env;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::types::{ParticipantRole, RoomId, RoomKind, SessionDescriptor};
use session_room::broker::memory::MemoryBroker;
use session_room::clock::SystemClock;
use session_room::config::Config;
use session_room::media::SyntheticDevices;
use session_room::{RoomDependencies, RoomHandle, SessionRoomCoordinator};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default loopback session length in seconds.
const DEFAULT_SESSION_SECONDS: i64 = 90;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let room_id = env::var("ROOM_ID").map_or_else(|_| RoomId::random(), RoomId::new);
    let session_seconds = match env::var("ROOM_SESSION_SECONDS") {
        Ok(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("invalid ROOM_SESSION_SECONDS: {raw}"))?,
        Err(_) => DEFAULT_SESSION_SECONDS,
    };

    let start = Utc::now();
    let end = session_end(start, session_seconds)?;
    let descriptor = SessionDescriptor::new(
        room_id.clone(),
        "Host",
        "Guest",
        "Loopback session",
        start,
        end,
    )
    .context("invalid session window")?;

    info!(
        room_id = %room_id,
        session_seconds,
        dial_interval_ms = config.dial_interval.as_millis(),
        warning_threshold_s = config.warning_threshold.as_secs(),
        "Starting loopback room"
    );

    let broker = MemoryBroker::new();
    let deps = RoomDependencies {
        broker: Arc::new(broker.clone()),
        devices: Arc::new(SyntheticDevices),
        clock: Arc::new(SystemClock),
    };

    let (host, host_task) = SessionRoomCoordinator::start(
        descriptor.clone(),
        ParticipantRole::Host,
        RoomKind::Scheduled,
        deps.clone(),
        config.clone(),
    );
    let (guest, guest_task) = SessionRoomCoordinator::start(
        descriptor,
        ParticipantRole::Guest,
        RoomKind::Scheduled,
        deps,
        config,
    );

    tokio::spawn(report_transitions("host", host.clone()));
    tokio::spawn(report_transitions("guest", guest.clone()));

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Interrupted, leaving room");
            host.cancel();
            guest.cancel();
        }
        (host_exit, guest_exit) = async { tokio::join!(host.wait_for_exit(), guest.wait_for_exit()) } => {
            info!(
                host_exit = ?host_exit,
                guest_exit = ?guest_exit,
                "Both sides left the room"
            );
        }
    }

    host_task.await.context("host task failed")?;
    guest_task.await.context("guest task failed")?;

    let stats = broker.stats();
    info!(
        connects = stats.connect_attempts,
        dials = stats.dials,
        destroyed = stats.sessions_destroyed,
        active = stats.active_sessions,
        "Loopback finished"
    );
    Ok(())
}

/// Scheduled end `session_seconds` after `start`.
fn session_end(start: DateTime<Utc>, session_seconds: i64) -> anyhow::Result<DateTime<Utc>> {
    ChronoDuration::try_seconds(session_seconds)
        .and_then(|length| start.checked_add_signed(length))
        .with_context(|| format!("ROOM_SESSION_SECONDS out of range: {session_seconds}"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "session_room=debug".into());
    let json = env::var("ROOM_LOG_JSON").is_ok_and(|v| v.eq_ignore_ascii_case("true"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Log every connection/timer change seen by one side.
async fn report_transitions(side: &'static str, handle: RoomHandle) {
    let mut snapshots = handle.subscribe();
    let mut last = None;

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let current = (snapshot.connection_state, snapshot.timer_state);
        if last == Some(current) {
            continue;
        }
        last = Some(current);

        info!(
            side,
            connection = snapshot.connection_state.as_str(),
            timer = snapshot.timer_state.map(|t| t.as_str()),
            time_left = snapshot.time_left_display.as_deref(),
            attempts = snapshot.dial_attempts,
            fatal = snapshot.fatal_error.as_deref(),
            "Room state"
        );

        if snapshot.exit.is_some() {
            break;
        }
    }
}
