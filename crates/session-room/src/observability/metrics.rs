//! Metrics definitions for the session room.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters

use metrics::counter;

/// Record the result of one guest dial attempt.
///
/// Metric: `room_dial_attempts_total`
/// Labels: `outcome`
pub fn record_dial_attempt(outcome: &'static str) {
    counter!("room_dial_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a broker connect retry (identity collision or outage).
///
/// Metric: `room_identity_retries_total`
pub fn record_identity_retry() {
    counter!("room_identity_retries_total").increment(1);
}

/// Record a call reaching CONNECTED.
///
/// Metric: `room_calls_connected_total`
/// Labels: `role` (host, guest)
pub fn record_call_connected(role: &'static str) {
    counter!("room_calls_connected_total", "role" => role).increment(1);
}

/// Record a room teardown.
///
/// Metric: `room_teardowns_total`
/// Labels: `reason` (user_ended, session_ended, navigated)
pub fn record_teardown(reason: &'static str) {
    counter!("room_teardowns_total", "reason" => reason).increment(1);
}

/// Record a fatal error surfaced to the user.
///
/// Metric: `room_fatal_errors_total`
/// Labels: `kind`
pub fn record_fatal_error(kind: &'static str) {
    counter!("room_fatal_errors_total", "kind" => kind).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    fn counter_value(
        metrics: &[(
            metrics_util::CompositeKey,
            Option<metrics::Unit>,
            Option<metrics::SharedString>,
            DebugValue,
        )],
        name: &str,
        label: Option<(&str, &str)>,
    ) -> u64 {
        metrics
            .iter()
            .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter)
            .filter(|(key, _, _, _)| key.key().name() == name)
            .filter(|(key, _, _, _)| match label {
                Some((k, v)) => key.key().labels().any(|l| l.key() == k && l.value() == v),
                None => true,
            })
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(n) => *n,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_counters_recorded_with_bounded_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_dial_attempt("unreachable");
            record_dial_attempt("unreachable");
            record_dial_attempt("connected");
            record_identity_retry();
            record_call_connected("guest");
            record_teardown("user_ended");
            record_fatal_error("permission_denied");
        });

        let metrics = snapshotter.snapshot().into_vec();

        assert_eq!(
            counter_value(&metrics, "room_dial_attempts_total", Some(("outcome", "unreachable"))),
            2
        );
        assert_eq!(
            counter_value(&metrics, "room_dial_attempts_total", Some(("outcome", "connected"))),
            1
        );
        assert_eq!(counter_value(&metrics, "room_identity_retries_total", None), 1);
        assert_eq!(
            counter_value(&metrics, "room_calls_connected_total", Some(("role", "guest"))),
            1
        );
        assert_eq!(
            counter_value(&metrics, "room_teardowns_total", Some(("reason", "user_ended"))),
            1
        );
        assert_eq!(
            counter_value(&metrics, "room_fatal_errors_total", Some(("kind", "permission_denied"))),
            1
        );
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_dial_attempt("transient");
        record_identity_retry();
        record_call_connected("host");
        record_teardown("navigated");
        record_fatal_error("no_device");
    }
}
