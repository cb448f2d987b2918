// Lease lifecycle across controllers: conflict inside the TTL window,
// takeover after expiry, and self-renewal.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use plenum_common::error::PollError;
use plenum_common::types::{LiveState, LiveStatus};
use plenum_daemon::lease::{reset_round, set_status};
use plenum_daemon::store::{DocPath, DocStore};

const CONTROLLER_A: &str = "c_ctrl_aaaa";
const CONTROLLER_B: &str = "c_ctrl_bbbb";

fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().expect("timestamp should be valid")
}

fn seeded_store(now: DateTime<Utc>) -> DocStore {
    let store = DocStore::open_in_memory().expect("store should open");
    let state = LiveState::seeded("session-1", CONTROLLER_A, now);
    store
        .create_if_absent(
            &DocPath::live_state("session-1"),
            serde_json::to_value(&state).expect("state should serialize"),
            now,
        )
        .expect("seed should succeed");
    store
}

#[test]
fn second_controller_waits_out_the_lease() {
    let t0 = ts(1_700_000_000);
    let store = seeded_store(t0);

    // 10 seconds in: the lease is still active, B is refused.
    let err = set_status(&store, "session-1", CONTROLLER_B, LiveStatus::Paused, t0 + Duration::seconds(10))
        .expect_err("B should conflict while A's lease is active");
    assert!(matches!(err, PollError::LeaseConflict { .. }));

    // 61 seconds in: the lease has expired, B takes over and inherits it.
    set_status(&store, "session-1", CONTROLLER_B, LiveStatus::Paused, t0 + Duration::seconds(61))
        .expect("B should take over the expired lease");

    let body = store
        .get(&DocPath::live_state("session-1"))
        .expect("get should succeed")
        .expect("live state should exist");
    assert_eq!(body["controller_id"], json!(CONTROLLER_B));
    assert_eq!(body["status"], json!("paused"));

    // A is now the outsider.
    let err = set_status(&store, "session-1", CONTROLLER_A, LiveStatus::Idle, t0 + Duration::seconds(70))
        .expect_err("A should conflict after the takeover");
    assert!(matches!(err, PollError::LeaseConflict { .. }));
}

#[test]
fn holder_keeps_renewing_through_activity() {
    let t0 = ts(1_700_000_000);
    let store = seeded_store(t0);

    // A keeps acting every 45 seconds; each write renews the lease, so B
    // never finds an expired window.
    for step in 1..=4 {
        let at = t0 + Duration::seconds(45 * step);
        reset_round(&store, "session-1", CONTROLLER_A, at).expect("A's renewal should succeed");

        let err = set_status(&store, "session-1", CONTROLLER_B, LiveStatus::Paused, at + Duration::seconds(30))
            .expect_err("B should stay locked out while A is active");
        assert!(matches!(err, PollError::LeaseConflict { .. }));
    }
}

#[test]
fn each_round_reset_mints_a_new_round() {
    let t0 = ts(1_700_000_000);
    let store = seeded_store(t0);

    let first = reset_round(&store, "session-1", CONTROLLER_A, t0 + Duration::seconds(1))
        .expect("first reset should succeed");
    let second = reset_round(&store, "session-1", CONTROLLER_A, t0 + Duration::seconds(2))
        .expect("second reset should succeed");

    assert_ne!(first, second);
    let body = store
        .get(&DocPath::live_state("session-1"))
        .expect("get should succeed")
        .expect("live state should exist");
    assert_eq!(body["round_id"], json!(second));
    assert_eq!(body["status"], json!("collect"));
}
