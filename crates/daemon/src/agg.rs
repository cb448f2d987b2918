// Aggregation engine: folds vote-created events into per-round summaries.
//
// Invoked once per created vote (at-least-once, unordered across votes).
// Each event runs one atomic read-modify-write on the round's aggregate
// singleton, so concurrent bursts never lose updates. The `seen` set of
// client ids makes redelivery a no-op. When no mode can be determined
// safely the event is dropped: under-aggregating beats mis-aggregating.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use plenum_common::error::{PollError, PollResult};
use plenum_common::types::{
    AggregateData, AggregateRecord, AnswerMode, LiveState, OPEN_TEXTS_CAP,
};
use plenum_common::wordcloud;

use crate::store::{Decision, DocPath, DocStore, VoteCreated};

/// What an event did to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOutcome {
    /// Folded into the aggregate.
    Applied,
    /// This client was already counted (redelivered event).
    Duplicate,
    /// No safe mode could be determined; nothing written.
    Dropped,
}

/// Handle one vote-created event.
pub fn apply_vote_created(
    store: &DocStore,
    event: &VoteCreated,
    now: DateTime<Utc>,
) -> PollResult<AggOutcome> {
    let mode = match vote_mode(&event.body) {
        Some(mode) => Some(mode),
        None => resolve_mode_fallback(store, &event.session_id, &event.round_id)?,
    };
    let Some(mode) = mode else {
        debug!(
            session_id = %event.session_id,
            round_id = %event.round_id,
            "dropping vote event with unresolvable mode"
        );
        return Ok(AggOutcome::Dropped);
    };

    let value = event.body.get("value").cloned().unwrap_or(Value::Null);
    let client_id = event.client_id.clone();
    let path = DocPath::aggregate(&event.session_id, &event.round_id);

    store.transform(&path, now, move |current| {
        let mut agg = match current {
            Some(body) => serde_json::from_value::<AggregateRecord>(body).map_err(|e| {
                PollError::Malformed(format!(
                    "aggregate for round `{}` is unreadable: {e}",
                    event.round_id
                ))
            })?,
            None => AggregateRecord::empty(mode, now),
        };

        if agg.data.mode() != mode {
            // A stale vote tagged with a different mode than the round's
            // aggregate. Folding it in would corrupt the summary shape.
            return Ok(Decision::Keep(AggOutcome::Dropped));
        }
        if !agg.seen.insert(client_id) {
            return Ok(Decision::Keep(AggOutcome::Duplicate));
        }

        merge_value(&mut agg.data, &value);
        agg.n += 1;
        agg.updated_at = now;

        let body = serde_json::to_value(&agg).map_err(|e| PollError::Store(e.to_string()))?;
        Ok(Decision::Write(body, AggOutcome::Applied))
    })
}

/// The mode stamped on the vote itself, if valid.
fn vote_mode(body: &Value) -> Option<AnswerMode> {
    body.get("mode").and_then(Value::as_str).and_then(AnswerMode::parse)
}

/// Fallback: the live state's mode, trusted only while its current round
/// matches the vote's round (a stale vote must not inherit a newer
/// round's mode).
fn resolve_mode_fallback(
    store: &DocStore,
    session_id: &str,
    round_id: &str,
) -> PollResult<Option<AnswerMode>> {
    let Some(body) = store.get(&DocPath::live_state(session_id))? else {
        return Ok(None);
    };
    let Ok(state) = serde_json::from_value::<LiveState>(body) else {
        return Ok(None);
    };
    if state.round_id.as_deref() != Some(round_id) {
        return Ok(None);
    }
    Ok(state.mode)
}

fn merge_value(data: &mut AggregateData, value: &Value) {
    match data {
        AggregateData::Multi { counts } => {
            let key = choice_key(value);
            *counts.entry(key).or_insert(0) += 1;
        }
        AggregateData::Likert { sum, count } => {
            // Non-numeric answers contribute 0 but still count, so the
            // downstream average reflects every submission.
            *sum += numeric_value(value).unwrap_or(0.0);
            *count += 1;
        }
        AggregateData::Open { texts } => {
            if let Some(text) = free_text(value) {
                if texts.len() < OPEN_TEXTS_CAP {
                    texts.push(text);
                }
            }
        }
        AggregateData::Wordcloud { freq } => {
            if let Some(text) = free_text(value) {
                for token in wordcloud::tokenize(&text) {
                    *freq.entry(token).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Counting key for a multi answer: the choice id, however the client
/// shaped the payload.
fn choice_key(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("choice").and_then(Value::as_str) {
            Some(choice) => choice.to_string(),
            None => Value::Object(map.clone()).to_string(),
        },
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) => value.to_string(),
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|n| n.is_finite()),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn free_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp should be valid")
    }

    fn store() -> DocStore {
        DocStore::open_in_memory().expect("store should open")
    }

    fn vote_event(round_id: &str, client_id: &str, mode: Option<&str>, value: Value) -> VoteCreated {
        let mut body = json!({
            "client_id": client_id,
            "value": value,
            "created_at": "2026-01-05T10:00:00Z",
        });
        if let Some(mode) = mode {
            body["mode"] = json!(mode);
        }
        VoteCreated {
            session_id: "s1".to_string(),
            round_id: round_id.to_string(),
            client_id: client_id.to_string(),
            body,
        }
    }

    fn read_agg(store: &DocStore, round_id: &str) -> AggregateRecord {
        let body = store
            .get(&DocPath::aggregate("s1", round_id))
            .expect("get should succeed")
            .expect("aggregate should exist");
        serde_json::from_value(body).expect("aggregate should deserialize")
    }

    #[test]
    fn multi_counts_per_choice_regardless_of_interleaving() {
        let store = store();
        let now = ts(1_700_000_000);

        // 3 yes, 2 no, submitted in a shuffled order.
        let submissions = [
            ("c_aaaa_01", "yes"),
            ("c_aaaa_02", "no"),
            ("c_aaaa_03", "yes"),
            ("c_aaaa_04", "yes"),
            ("c_aaaa_05", "no"),
        ];
        for (client, choice) in submissions {
            let event = vote_event("r_1", client, Some("multi"), json!({"choice": choice}));
            let outcome =
                apply_vote_created(&store, &event, now).expect("apply should succeed");
            assert_eq!(outcome, AggOutcome::Applied);
        }

        let agg = read_agg(&store, "r_1");
        assert_eq!(agg.n, 5);
        let AggregateData::Multi { counts } = &agg.data else {
            panic!("expected a multi aggregate");
        };
        assert_eq!(counts.get("yes"), Some(&3));
        assert_eq!(counts.get("no"), Some(&2));
    }

    #[test]
    fn multi_accepts_bare_string_choices() {
        let store = store();
        let now = ts(1_700_000_000);
        let event = vote_event("r_1", "c_aaaa_01", Some("multi"), json!("yes"));
        apply_vote_created(&store, &event, now).expect("apply should succeed");

        let agg = read_agg(&store, "r_1");
        let AggregateData::Multi { counts } = &agg.data else {
            panic!("expected a multi aggregate");
        };
        assert_eq!(counts.get("yes"), Some(&1));
    }

    #[test]
    fn likert_accumulates_sum_and_count_with_zero_for_non_numeric() {
        let store = store();
        let now = ts(1_700_000_000);

        for (client, value) in [
            ("c_aaaa_01", json!(4)),
            ("c_aaaa_02", json!("5")),
            ("c_aaaa_03", json!("not a number")),
        ] {
            let event = vote_event("r_1", client, Some("likert"), value);
            apply_vote_created(&store, &event, now).expect("apply should succeed");
        }

        let agg = read_agg(&store, "r_1");
        assert_eq!(agg.n, 3);
        let AggregateData::Likert { sum, count } = agg.data else {
            panic!("expected a likert aggregate");
        };
        assert_eq!(sum, 9.0);
        assert_eq!(count, 3);
    }

    #[test]
    fn open_keeps_trimmed_non_empty_texts() {
        let store = store();
        let now = ts(1_700_000_000);

        for (client, value) in [
            ("c_aaaa_01", json!("  more breaks  ")),
            ("c_aaaa_02", json!("   ")),
            ("c_aaaa_03", json!("shorter sprints")),
        ] {
            let event = vote_event("r_1", client, Some("open"), value);
            apply_vote_created(&store, &event, now).expect("apply should succeed");
        }

        let agg = read_agg(&store, "r_1");
        assert_eq!(agg.n, 3);
        let AggregateData::Open { texts } = &agg.data else {
            panic!("expected an open aggregate");
        };
        assert_eq!(texts, &vec!["more breaks".to_string(), "shorter sprints".to_string()]);
    }

    #[test]
    fn wordcloud_folds_token_frequencies() {
        let store = store();
        let now = ts(1_700_000_000);

        for (client, value) in [
            ("c_aaaa_01", json!("Rust, rust and MORE rust!")),
            ("c_aaaa_02", json!("more tests")),
        ] {
            let event = vote_event("r_1", client, Some("wordcloud"), value);
            apply_vote_created(&store, &event, now).expect("apply should succeed");
        }

        let agg = read_agg(&store, "r_1");
        assert_eq!(agg.n, 2);
        let AggregateData::Wordcloud { freq } = &agg.data else {
            panic!("expected a wordcloud aggregate");
        };
        assert_eq!(freq.get("rust"), Some(&3));
        assert_eq!(freq.get("more"), Some(&2));
        assert_eq!(freq.get("and"), Some(&1));
        assert_eq!(freq.get("tests"), Some(&1));
    }

    #[test]
    fn redelivered_event_is_a_no_op() {
        let store = store();
        let now = ts(1_700_000_000);
        let event = vote_event("r_1", "c_aaaa_01", Some("multi"), json!({"choice": "yes"}));

        assert_eq!(
            apply_vote_created(&store, &event, now).expect("first apply should succeed"),
            AggOutcome::Applied
        );
        assert_eq!(
            apply_vote_created(&store, &event, ts(1_700_000_030))
                .expect("redelivery should succeed"),
            AggOutcome::Duplicate
        );

        let agg = read_agg(&store, "r_1");
        assert_eq!(agg.n, 1);
        let AggregateData::Multi { counts } = &agg.data else {
            panic!("expected a multi aggregate");
        };
        assert_eq!(counts.get("yes"), Some(&1));
    }

    #[test]
    fn missing_mode_falls_back_to_live_state_for_matching_round() {
        let store = store();
        let now = ts(1_700_000_000);
        let state = json!({
            "session_id": "s1",
            "status": "collect",
            "mode": "multi",
            "round_id": "r_1",
        });
        store
            .create_if_absent(&DocPath::live_state("s1"), state, now)
            .expect("seed should succeed");

        let event = vote_event("r_1", "c_aaaa_01", None, json!("yes"));
        assert_eq!(
            apply_vote_created(&store, &event, now).expect("apply should succeed"),
            AggOutcome::Applied
        );
        assert_eq!(read_agg(&store, "r_1").data.mode(), AnswerMode::Multi);
    }

    #[test]
    fn stale_round_does_not_inherit_the_newer_rounds_mode() {
        let store = store();
        let now = ts(1_700_000_000);
        let state = json!({
            "session_id": "s1",
            "status": "collect",
            "mode": "wordcloud",
            "round_id": "r_2",
        });
        store
            .create_if_absent(&DocPath::live_state("s1"), state, now)
            .expect("seed should succeed");

        // Vote for the superseded round r_1, with no mode of its own.
        let event = vote_event("r_1", "c_aaaa_01", None, json!("stale"));
        assert_eq!(
            apply_vote_created(&store, &event, now).expect("apply should succeed"),
            AggOutcome::Dropped
        );
        assert!(store
            .get(&DocPath::aggregate("s1", "r_1"))
            .expect("get should succeed")
            .is_none());
    }

    #[test]
    fn unresolvable_mode_drops_the_event_silently() {
        let store = store();
        let event = vote_event("r_1", "c_aaaa_01", Some("ranked"), json!("yes"));
        assert_eq!(
            apply_vote_created(&store, &event, ts(1_700_000_000))
                .expect("apply should succeed"),
            AggOutcome::Dropped
        );
        assert!(store
            .get(&DocPath::aggregate("s1", "r_1"))
            .expect("get should succeed")
            .is_none());
    }

    #[test]
    fn mode_mismatch_with_existing_aggregate_is_dropped() {
        let store = store();
        let now = ts(1_700_000_000);
        let multi = vote_event("r_1", "c_aaaa_01", Some("multi"), json!("yes"));
        apply_vote_created(&store, &multi, now).expect("apply should succeed");

        let stray = vote_event("r_1", "c_aaaa_02", Some("open"), json!("free text"));
        assert_eq!(
            apply_vote_created(&store, &stray, now).expect("apply should succeed"),
            AggOutcome::Dropped
        );
        let agg = read_agg(&store, "r_1");
        assert_eq!(agg.n, 1);
        assert_eq!(agg.data.mode(), AnswerMode::Multi);
    }

    #[test]
    fn rounds_aggregate_independently() {
        let store = store();
        let now = ts(1_700_000_000);
        apply_vote_created(
            &store,
            &vote_event("r_1", "c_aaaa_01", Some("multi"), json!("yes")),
            now,
        )
        .expect("apply should succeed");
        apply_vote_created(
            &store,
            &vote_event("r_2", "c_aaaa_01", Some("multi"), json!("no")),
            now,
        )
        .expect("apply should succeed");

        assert_eq!(read_agg(&store, "r_1").n, 1);
        assert_eq!(read_agg(&store, "r_2").n, 1);
    }
}
