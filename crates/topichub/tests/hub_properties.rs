//! Behavioural properties of the hub.
//!
//! Matching breadth and depth, specificity ordering, removal, error
//! aggregation and stop propagation, checked through the public API only.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use topichub::{
    EmitOptions, HubError, Hub, Listener, ListenerError, Strategy, ValidationError,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Listener that records `name` and the emitted topic, returning `name`
fn recording(log: &Log, name: &str) -> Listener {
    let log = log.clone();
    let name = name.to_string();
    let label = name.clone();
    Listener::new(move |delivery| {
        log.borrow_mut()
            .push(format!("{}@{}", name, delivery.topic()));
        Ok(Some(json!(name)))
    })
    .named(label)
}

/// Listener that fails with `message`
fn failing(message: &str) -> Listener {
    let message = message.to_string();
    Listener::new(move |_| Err(ListenerError::new(message.clone())))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

fn concat() -> EmitOptions {
    EmitOptions::new().with_strategy(Strategy::Concat)
}

// ============================================================================
// MATCHING
// ============================================================================

#[test]
fn test_exact_match_invokes_every_callback_once() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("app.start", recording(&log, "one")).unwrap();
    hub.on("app.start", recording(&log, "two")).unwrap();
    hub.on("app.stop", recording(&log, "other")).unwrap();

    hub.emit("app.start", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["one@app.start", "two@app.start"]);
}

#[test]
fn test_single_wildcard_matches_one_segment() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("a.*", recording(&log, "f")).unwrap();

    hub.emit("a.b", vec![]).unwrap();
    hub.emit("c.b", vec![]).unwrap();
    hub.emit("a.b.c", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["f@a.b"]);
}

#[test]
fn test_double_wildcard_matches_many_segments() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("a.**", recording(&log, "f")).unwrap();
    hub.on("a.*", recording(&log, "g")).unwrap();

    hub.emit("a.b.c", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["f@a.b.c"]);
}

#[test]
fn test_same_listener_sees_each_topic() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("test.*", recording(&log, "f")).unwrap();

    hub.emit("test.a", vec![]).unwrap();
    hub.emit("test.b", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["f@test.a", "f@test.b"]);
}

#[test]
fn test_broadcast_respects_depth() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("a.b.c.d", recording(&log, "f")).unwrap();

    hub.emit("a.b.c.*", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["f@a.b.c.*"]);

    hub.emit("a.b.*", vec![]).unwrap();
    assert_eq!(entries(&log).len(), 1);

    hub.emit("a.**", vec![]).unwrap();
    assert_eq!(entries(&log).len(), 2);
}

#[test]
fn test_broadcast_reaches_each_entry_once() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("a.b", recording(&log, "exact")).unwrap();
    hub.on("a.*", recording(&log, "single")).unwrap();
    hub.on("**", recording(&log, "everything")).unwrap();

    let result = hub.emit_with_options("a.*", vec![], concat()).unwrap();

    assert_eq!(result, Some(json!(["exact", "single", "everything"])));
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_specific_pattern_runs_first_in_either_registration_order() {
    for specific_first in [true, false] {
        let hub = Hub::new();
        let log = new_log();
        let f = recording(&log, "f");
        let g = recording(&log, "g");
        if specific_first {
            hub.on("foo.bar", f).unwrap();
            hub.on("foo.*", g).unwrap();
        } else {
            hub.on("foo.*", g).unwrap();
            hub.on("foo.bar", f).unwrap();
        }

        hub.emit("foo.bar", vec![]).unwrap();

        assert_eq!(entries(&log), vec!["f@foo.bar", "g@foo.bar"]);
    }
}

#[test]
fn test_insertion_order_within_one_pattern() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("x.y", recording(&log, "f1")).unwrap();
    hub.on("x.y", recording(&log, "f2")).unwrap();

    hub.emit("x.y", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["f1@x.y", "f2@x.y"]);
}

#[test]
fn test_later_wildcard_is_more_specific() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("**", recording(&log, "all")).unwrap();
    hub.on("*.b.c", recording(&log, "leading")).unwrap();
    hub.on("a.**", recording(&log, "deep")).unwrap();
    hub.on("a.b.*", recording(&log, "late")).unwrap();

    hub.emit("a.b.c", vec![]).unwrap();

    assert_eq!(
        entries(&log),
        vec!["late@a.b.c", "deep@a.b.c", "leading@a.b.c", "all@a.b.c"]
    );
}

// ============================================================================
// REMOVAL
// ============================================================================

#[test]
fn test_removed_listener_is_not_invoked() {
    let hub = Hub::new();
    let log = new_log();
    let f = recording(&log, "f");
    hub.on("p", f.clone()).unwrap();

    assert!(hub.un("p", Some(&f)).unwrap());
    hub.emit("p", vec![]).unwrap();

    assert!(entries(&log).is_empty());
    assert!(!hub.un("p", Some(&f)).unwrap());
    assert!(!hub.un("never.registered", Some(&f)).unwrap());
}

#[test]
fn test_removal_keeps_other_patterns_reachable() {
    let hub = Hub::new();
    let log = new_log();
    let middle = recording(&log, "middle");
    hub.on("a.**", recording(&log, "outer")).unwrap();
    hub.on("a.*", middle.clone()).unwrap();
    hub.on("a.b", recording(&log, "inner")).unwrap();

    hub.un("a.*", Some(&middle)).unwrap();
    hub.emit("a.b", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["inner@a.b", "outer@a.b"]);
}

#[test]
fn test_malformed_pattern_is_a_validation_error() {
    let hub = Hub::new();
    let f = Listener::new(|_| Ok(None));

    for pattern in ["", ".a", "a.", "a..b", "a.b c", "a*", "a.***"] {
        let err = hub.on(pattern, f.clone()).unwrap_err();
        assert!(
            matches!(err, HubError::Validation(_)),
            "{pattern:?} gave {err:?}"
        );
    }
    assert!(matches!(
        hub.un("a..b", None),
        Err(HubError::Validation(ValidationError::EmptySegment { .. }))
    ));
}

// ============================================================================
// RESULTS AND ERRORS
// ============================================================================

#[test]
fn test_last_defined_value_wins() {
    let hub = Hub::new();
    hub.on("v", Listener::new(|_| Ok(Some(json!(1))))).unwrap();
    hub.on("v", Listener::new(|_| Ok(Some(json!(2))))).unwrap();
    hub.on("v", Listener::new(|_| Ok(None))).unwrap();

    assert_eq!(hub.emit("v", vec![]).unwrap(), Some(json!(2)));
    assert_eq!(
        hub.emit_with_options("v", vec![], concat()).unwrap(),
        Some(json!([1, 2]))
    );
}

#[test]
fn test_custom_strategy_receives_positions() {
    let hub = Hub::new();
    hub.on("v", Listener::new(|_| Ok(None))).unwrap();
    hub.on("v", Listener::new(|_| Ok(Some(json!(5))))).unwrap();

    let positions = Strategy::custom(|values| {
        Some(Value::Array(
            values
                .iter()
                .map(|v| v.clone().unwrap_or(json!("missing")))
                .collect(),
        ))
    });
    let options = EmitOptions::new().with_strategy(positions);

    assert_eq!(
        hub.emit_with_options("v", vec![], options).unwrap(),
        Some(json!(["missing", 5]))
    );
}

#[test]
fn test_single_error_is_returned_unchanged() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("e", failing("only")).unwrap();
    hub.on("e", recording(&log, "after")).unwrap();

    let err = hub.emit("e", vec![]).unwrap_err();

    match err {
        HubError::Listener(e) => assert_eq!(e.message(), "only"),
        other => panic!("expected listener error, got {other:?}"),
    }
    assert_eq!(entries(&log), vec!["after@e"]);
}

#[test]
fn test_two_errors_are_aggregated_in_order() {
    let hub = Hub::new();
    hub.on("e", failing("first")).unwrap();
    hub.on("e", Listener::new(|_| Ok(Some(json!("fine"))))).unwrap();
    hub.on("e.*", failing("wildcard")).unwrap();
    hub.on("*", failing("second")).unwrap();

    let err = hub.emit("e", vec![]).unwrap_err();

    let HubError::Aggregate(aggregate) = &err else {
        panic!("expected aggregate error, got {err:?}");
    };
    let messages: Vec<_> = aggregate.errors().iter().map(|e| e.message()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert_eq!(
        err.to_string(),
        "Multiple listeners failed:\n- first\n- second"
    );
}

#[test]
fn test_emit_with_delivers_errors_to_callback() {
    let hub = Hub::new();
    let log = new_log();
    hub.on(
        "test",
        Listener::new(|_| Err(anyhow::anyhow!("x").into())),
    )
    .unwrap();
    hub.on("test", recording(&log, "f2")).unwrap();

    let received = Rc::new(RefCell::new(None));
    let sink = received.clone();
    hub.emit_with("test", vec![], EmitOptions::new(), move |result| {
        *sink.borrow_mut() = Some(result);
    })
    .unwrap();

    assert_eq!(entries(&log), vec!["f2@test"]);
    let result = received.borrow_mut().take().expect("callback ran");
    assert_eq!(result.unwrap_err().to_string(), "x");
}

#[test]
fn test_emit_with_reports_validation_synchronously() {
    let hub = Hub::new();
    let called = Rc::new(RefCell::new(false));
    let flag = called.clone();

    let err = hub
        .emit_with("bad..topic", vec![], EmitOptions::new(), move |_| {
            *flag.borrow_mut() = true;
        })
        .unwrap_err();

    assert!(matches!(err, HubError::Validation(_)));
    assert!(!*called.borrow());
}

// ============================================================================
// CHAIN PROTOCOL
// ============================================================================

#[test]
fn test_stop_propagation_keeps_earlier_results() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("c", recording(&log, "first")).unwrap();
    hub.on(
        "c",
        Listener::new(|delivery| {
            delivery.stop_propagation();
            Ok(None)
        }),
    )
    .unwrap();
    hub.on("c", recording(&log, "never")).unwrap();

    let outcome = hub.publish_with("c", vec![], concat()).unwrap();

    assert_eq!(entries(&log), vec!["first@c"]);
    assert_eq!(outcome.result().unwrap().unwrap(), Some(json!(["first"])));
}

#[test]
fn test_stop_with_replaces_result() {
    let hub = Hub::new();
    hub.on("c", Listener::new(|_| Ok(Some(json!("merged"))))).unwrap();
    hub.on(
        "c.*",
        Listener::new(|delivery| {
            delivery.stop_with(json!({"handled": true}));
            Ok(None)
        }),
    )
    .unwrap();
    hub.on("**", failing("unreached")).unwrap();

    let outcome = hub.publish("c.x", vec![]).unwrap();

    assert_eq!(
        outcome.result().unwrap().unwrap(),
        Some(json!({"handled": true}))
    );
}

#[test]
fn test_publish_collects_errors_without_stopping() {
    let hub = Hub::new();
    let log = new_log();
    hub.on("c", failing("broken")).unwrap();
    hub.on("c", recording(&log, "still runs")).unwrap();

    let outcome = hub.publish("c", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["still runs@c"]);
    assert_eq!(
        outcome.result().unwrap().unwrap_err().to_string(),
        "broken"
    );
}

#[test]
fn test_propagate_wraps_later_listeners() {
    let hub = Hub::new();
    let log = new_log();
    let outer_log = log.clone();
    hub.on(
        "around.*",
        Listener::new(move |delivery| {
            outer_log.borrow_mut().push("open".into());
            delivery.propagate();
            outer_log.borrow_mut().push("close".into());
            Ok(None)
        }),
    )
    .unwrap();
    hub.on("around.**", recording(&log, "body")).unwrap();

    hub.publish("around.x", vec![]).unwrap();

    assert_eq!(entries(&log), vec!["open", "body@around.x", "close"]);
}

#[test]
fn test_arguments_reach_listeners() {
    let hub = Hub::new();
    hub.on(
        "sum",
        Listener::new(|delivery| {
            let total: i64 = delivery.args().iter().filter_map(Value::as_i64).sum();
            Ok(Some(json!(total)))
        }),
    )
    .unwrap();

    assert_eq!(
        hub.emit("sum", vec![json!(1), json!(2), json!(3)]).unwrap(),
        Some(json!(6))
    );
}

#[test]
fn test_emit_without_listeners() {
    let hub = Hub::new();
    assert_eq!(hub.emit("nobody.home", vec![]).unwrap(), None);
    assert_eq!(
        hub.emit_with_options("nobody.home", vec![], concat()).unwrap(),
        Some(json!([]))
    );
}
