// End-to-end polling flow: controller starts a session, participants
// join by code and vote, the trigger worker materializes the aggregate,
// and feeds stream both live state and aggregate to observers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

use plenum_daemon::auth::StaticAuth;
use plenum_daemon::directory::resolve_join_code;
use plenum_daemon::feed::{subscribe, DocFeed, FeedEvent};
use plenum_daemon::identity::ClientIdentity;
use plenum_daemon::lease::start_question;
use plenum_daemon::session::{start_or_replace_session, StartOptions};
use plenum_daemon::store::{DocPath, DocStore};
use plenum_daemon::trigger::spawn_vote_trigger;
use plenum_daemon::votes::submit_vote_once;
use plenum_common::types::AnswerMode;

async fn next_data(feed: &mut DocFeed) -> Option<Value> {
    let event = tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .expect("feed should deliver within the timeout")
        .expect("feed should stay open");
    match event {
        FeedEvent::Data(body) => body,
        FeedEvent::Error(message) => panic!("unexpected feed error: {message}"),
    }
}

/// Wait until the aggregate feed reports `n` samples.
async fn wait_for_n(feed: &mut DocFeed, n: u64) -> Value {
    loop {
        if let Some(body) = next_data(feed).await {
            if body["n"].as_u64() == Some(n) {
                return body;
            }
        }
    }
}

#[tokio::test]
async fn controller_round_trip_with_two_participants() {
    let store = Arc::new(DocStore::open_in_memory().expect("store should open"));
    let _trigger = spawn_vote_trigger(Arc::clone(&store));

    let auth = StaticAuth::signed_in("owner-1");
    let controller = ClientIdentity { client_id: "c_ctrl_a1b2".into() };
    let mut rng = StdRng::seed_from_u64(42);

    // Controller starts a session; the join code routes to it.
    let info = start_or_replace_session(
        &store,
        &auth,
        &controller,
        StartOptions::default(),
        &mut rng,
        Utc::now(),
    )
    .expect("session start should succeed");
    let route = resolve_join_code(&store, &info.join_code).expect("join code should route");
    assert_eq!(route.session_id, info.session_id);

    // A participant display follows the live state.
    let mut live_feed = subscribe(Arc::clone(&store), DocPath::live_state(&info.session_id));
    let snapshot = next_data(&mut live_feed).await.expect("live state should exist");
    assert_eq!(snapshot["status"], json!("idle"));
    assert_eq!(snapshot["round_id"], json!(null));

    // Controller opens a multi round.
    let question = json!({"choices": [
        {"id": "yes", "label": "Yes"},
        {"id": "no", "label": "No"},
    ]});
    let round_id = start_question(
        &store,
        &info.session_id,
        &controller.client_id,
        AnswerMode::Multi,
        Some(&question),
        Utc::now(),
    )
    .expect("start question should succeed");

    let update = next_data(&mut live_feed).await.expect("live update should arrive");
    assert_eq!(update["status"], json!("collect"));
    assert_eq!(update["round_id"], json!(round_id));
    assert_eq!(update["mode"], json!("multi"));

    // Two participants vote through the ledger.
    let mut agg_feed =
        subscribe(Arc::clone(&store), DocPath::aggregate(&info.session_id, &round_id));
    let initial = next_data(&mut agg_feed).await;
    assert!(initial.is_none(), "no aggregate exists before the first vote");

    submit_vote_once(
        &store,
        &info.session_id,
        Some(&round_id),
        "multi",
        json!({"choice": "yes"}),
        "c_part_0001",
        Utc::now(),
    )
    .expect("vote 1 should succeed");
    submit_vote_once(
        &store,
        &info.session_id,
        Some(&round_id),
        "multi",
        json!({"choice": "no"}),
        "c_part_0002",
        Utc::now(),
    )
    .expect("vote 2 should succeed");

    let agg = wait_for_n(&mut agg_feed, 2).await;
    assert_eq!(agg["mode"], json!("multi"));
    assert_eq!(agg["counts"]["yes"], json!(1));
    assert_eq!(agg["counts"]["no"], json!(1));

    // An identical resubmission changes nothing.
    let receipt = submit_vote_once(
        &store,
        &info.session_id,
        Some(&round_id),
        "multi",
        json!({"choice": "yes"}),
        "c_part_0001",
        Utc::now(),
    )
    .expect("resubmit should succeed");
    assert!(receipt.already);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let body = store
        .get(&DocPath::aggregate(&info.session_id, &round_id))
        .expect("get should succeed")
        .expect("aggregate should exist");
    assert_eq!(body["n"], json!(2));
    assert_eq!(body["counts"]["yes"], json!(1));
}

#[tokio::test]
async fn replacing_a_session_invalidates_the_old_join_code() {
    let store = Arc::new(DocStore::open_in_memory().expect("store should open"));
    let auth = StaticAuth::signed_in("owner-1");
    let controller = ClientIdentity { client_id: "c_ctrl_a1b2".into() };
    let mut rng = StdRng::seed_from_u64(43);

    let first = start_or_replace_session(
        &store,
        &auth,
        &controller,
        StartOptions::default(),
        &mut rng,
        Utc::now(),
    )
    .expect("first session should start");
    let second = start_or_replace_session(
        &store,
        &auth,
        &controller,
        StartOptions::default(),
        &mut rng,
        Utc::now(),
    )
    .expect("second session should start");

    assert!(resolve_join_code(&store, &first.join_code).is_err());
    let route = resolve_join_code(&store, &second.join_code).expect("new code should route");
    assert_eq!(route.session_id, second.session_id);
}
