//! Integration Tests for the State Container
//!
//! These tests verify that states, snapshots, actions and subscriptions work
//! together correctly.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use serde_json::json;
use staty_core::{
    ActionName, CreateOptions, Error, Filter, Key, Ref, Snapshot, State, Store, StoreConfig,
    SubscribeOptions, Symbol, Value,
};

fn counter(state: &State, options: SubscribeOptions) -> Rc<Cell<u32>> {
    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    state
        .subscribe(move |_| seen.set(seen.get() + 1), options)
        .unwrap();
    calls
}

fn child(state: &State, key: &str) -> State {
    state.get(key).as_state().unwrap().clone()
}

/// Test a single write outside any action.
#[test]
fn counter_increment_notifies_once() {
    let store = Store::new();
    let state = store.create(json!({ "count": 0 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());

    let count = state.get("count").as_f64().unwrap();
    state.set("count", count + 1.0).unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(store.snapshot(&state).unwrap(), json!({ "count": 1 }));
}

/// Test that several appends inside one action notify once.
#[test]
fn appends_inside_action_notify_once() {
    let store = Store::new();
    let state = store.create(json!({ "arr": [] })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());
    let arr = child(&state, "arr");

    store
        .action(|_| {
            arr.push([1])?;
            arr.push([2])?;
            Ok(())
        })
        .unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(store.snapshot_path(&state, "arr").unwrap(), json!([1, 2]));
}

/// Test path subscriptions across replacement of an ancestor.
#[test]
fn path_subscription_follows_replacement() {
    let store = Store::new();
    let state = store.create(json!({ "a": { "b": 1 } })).unwrap();
    let calls = counter(&state, SubscribeOptions::new().prop("a.b"));

    let old_a = child(&state, "a");
    old_a.set("b", 2).unwrap();
    assert_eq!(calls.get(), 1);

    state.set("a", json!({ "b": 2 })).unwrap();
    child(&state, "a").set("b", 3).unwrap();
    assert_eq!(calls.get(), 3);

    // The replaced node is detached and no longer reaches the root.
    old_a.set("b", 9).unwrap();
    assert_eq!(calls.get(), 3);
    assert_eq!(state.snapshot().unwrap(), json!({ "a": { "b": 3 } }));
}

struct Point {
    x: i64,
}

fn doubled(point: &Point) -> Snapshot {
    Snapshot::from_json(json!({ "x": point.x * 2 }))
}

/// Test that a ref's projection is cached until its slot is reassigned.
#[test]
fn ref_snapshot_waits_for_reassignment() {
    let store = Store::new();
    let r = Ref::with_snapshot(Point { x: 1 }, doubled, false);
    let state = store
        .create(Value::object([("r", Value::from(r.clone()))]))
        .unwrap();

    let first = store.snapshot(&state).unwrap();
    assert_eq!(*first.get("r").unwrap(), json!({ "x": 2 }));

    r.with_mut(|p: &mut Point| p.x = 5).unwrap();
    let second = store.snapshot(&state).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(*second.get("r").unwrap(), json!({ "x": 2 }));

    state.replace_ref("r", Point { x: 7 }).unwrap();
    let third = store.snapshot(&state).unwrap();
    assert_eq!(*third.get("r").unwrap(), json!({ "x": 14 }));
}

/// Test that wrapping a state returns the same state.
#[test]
fn wrapping_is_idempotent() {
    let store = Store::new();
    let state = store.create(json!({ "a": [1] })).unwrap();
    assert_eq!(store.create(&state).unwrap(), state);
    assert_eq!(store.create(state.get("a")).unwrap(), child(&state, "a"));
}

/// Test that snapshots reproduce the wrapped data.
#[test]
fn snapshot_round_trip() {
    let store = Store::new();
    let source = json!({
        "name": "staty",
        "tags": ["a", "b"],
        "nested": { "deep": { "n": 1.5, "ok": true, "none": null } },
        "list": [{ "id": 1 }, { "id": 2 }]
    });
    let state = store.create(source.clone()).unwrap();
    assert_eq!(store.snapshot(&state).unwrap(), source);
    assert_eq!(store.snapshot(&state).unwrap().to_json(), source);
}

/// Test cache identity and structural sharing.
#[test]
fn cached_snapshots_share_untouched_branches() {
    let store = Store::new();
    let state = store
        .create(json!({ "a": { "x": 1 }, "b": { "y": 2 } }))
        .unwrap();

    let s1 = store.snapshot(&state).unwrap();
    let s2 = store.snapshot(&state).unwrap();
    assert!(s1.ptr_eq(&s2));

    child(&state, "a").set("x", 2).unwrap();
    let s3 = store.snapshot(&state).unwrap();

    assert!(!s1.ptr_eq(&s3));
    assert!(!s1.get("a").unwrap().ptr_eq(s3.get("a").unwrap()));
    assert!(s1.get("b").unwrap().ptr_eq(s3.get("b").unwrap()));
    assert_eq!(s1, json!({ "a": { "x": 1 }, "b": { "y": 2 } }));
}

/// Test that a path subscription ignores sibling paths.
#[test]
fn path_subscription_ignores_siblings() {
    let store = Store::new();
    let state = store
        .create(json!({ "a": { "b": { "c": 1 }, "c": 1 } }))
        .unwrap();
    let calls = counter(&state, SubscribeOptions::new().prop("a.b"));
    let a = child(&state, "a");

    child(&a, "b").set("c", 2).unwrap();
    assert_eq!(calls.get(), 1);

    a.set("c", 2).unwrap();
    assert_eq!(calls.get(), 1);

    a.set("b", json!({ "c": 3 })).unwrap();
    assert_eq!(calls.get(), 2);
}

/// Test that many mutations in one action notify each subscriber once.
#[test]
fn action_batches_notifications() {
    let store = Store::new();
    let state = store.create(json!({ "a": { "x": 0 }, "b": [] })).unwrap();
    let root = counter(&state, SubscribeOptions::new());
    let nested = counter(&child(&state, "a"), SubscribeOptions::new());

    store
        .action(|_| {
            state.set("c", 1)?;
            child(&state, "a").set("x", 1)?;
            child(&state, "a").set("y", 2)?;
            child(&state, "b").push(["z"])?;
            assert_eq!(root.get(), 0);
            Ok(())
        })
        .unwrap();

    assert_eq!(root.get(), 1);
    assert_eq!(nested.get(), 1);
}

/// Test that a failing action restores every slot and notifies nobody.
#[test]
fn failing_action_rolls_back() {
    let store = Store::new();
    let source = json!({ "a": { "x": 1 }, "list": [1, 2], "keep": true });
    let state = store.create(source.clone()).unwrap();
    let calls = counter(&state, SubscribeOptions::new());
    let old_a = child(&state, "a");

    let result: staty_core::Result<()> = store.action(|_| {
        state.set("a", json!({ "y": 1 }))?;
        child(&state, "list").push([3])?;
        child(&state, "list").reverse()?;
        state.delete("keep")?;
        state.set("added", "value")?;
        Err(Error::validation("nope"))
    });

    assert!(matches!(result, Err(Error::Validation { .. })));
    assert_eq!(calls.get(), 0);
    assert_eq!(store.snapshot(&state).unwrap(), source);
    assert_eq!(
        state.keys(),
        vec![Key::from("a"), Key::from("list"), Key::from("keep")]
    );

    // Links are restored too: the old child reaches the root again.
    old_a.set("x", 5).unwrap();
    assert_eq!(calls.get(), 1);
}

/// Test that a panicking action is rolled back and leaves the stack clean.
#[test]
fn panicking_action_rolls_back() {
    let store = Store::new();
    let state = store.create(json!({ "a": 0 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        store.action(|_| -> staty_core::Result<()> {
            state.set("a", 1)?;
            panic!("boom");
        })
    }));
    assert!(outcome.is_err());
    assert_eq!(state.get("a"), Value::from(0));
    assert_eq!(calls.get(), 0);

    state.set("a", 2).unwrap();
    assert_eq!(calls.get(), 1);
}

/// Test that cycles are rejected and leave the graph untouched.
#[test]
fn cycles_are_rejected() {
    let store = Store::new();
    let state = store.create(json!({ "a": { "b": {} } })).unwrap();
    let a = child(&state, "a");
    let b = child(&a, "b");
    let before = store.snapshot(&state).unwrap();

    let err = b.set("loop", &state).unwrap_err();
    match &err {
        Error::CircularReference { path, value } => {
            assert_eq!(path.to_string(), "a.b.loop");
            assert_eq!(*value, json!({ "a": { "b": {} } }));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = state.set("me", &state).unwrap_err();
    assert!(err.is_circular_reference());

    let wrapped = Value::object([("inner", Value::from(&a))]);
    match b.set("x", wrapped).unwrap_err() {
        Error::CircularReference { path, .. } => assert_eq!(path.to_string(), "b.x.inner"),
        other => panic!("unexpected error {other:?}"),
    }

    assert!(!b.has("loop"));
    assert!(!state.has("me"));
    assert!(store.snapshot(&state).unwrap().ptr_eq(&before));

    // Sharing a node under two parents is fine.
    state.set("alias", &b).unwrap();
    let calls = counter(&state, SubscribeOptions::new().prop("alias"));
    b.set("z", 1).unwrap();
    assert_eq!(calls.get(), 1);
}

/// Test that a `before` handler can veto an action.
#[test]
fn before_handler_vetoes() {
    let store = Store::new();
    let state = store.create(json!({ "count": 0 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());

    let reader = state.clone();
    state
        .subscribe(
            move |_| {
                let count = reader.get("count").as_f64().unwrap_or_default();
                if count > 10.0 {
                    Err(Error::validation("count must stay below 10"))
                } else {
                    Ok(())
                }
            },
            SubscribeOptions::new().before(),
        )
        .unwrap();

    state.set("count", 5).unwrap();
    assert_eq!(calls.get(), 1);

    let err = state.set("count", 11).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(state.get("count"), Value::from(5));
    assert_eq!(calls.get(), 1);
}

/// Test the creation gate.
#[test]
fn on_action_gate_sees_every_action() {
    let store = Store::new();
    let names = Rc::new(RefCell::new(Vec::new()));
    let log = names.clone();

    let options = CreateOptions::new().on_action(move |_, name: Option<&ActionName>| {
        let label = name.map_or("<created>".to_owned(), ToString::to_string);
        log.borrow_mut().push(label);
        match name.and_then(ActionName::as_str) {
            Some("forbidden") => Err(Error::validation("forbidden")),
            _ => Ok(()),
        }
    });
    let state = store.create_with(json!({ "a": { "b": 0 } }), options).unwrap();

    store
        .action_named("allowed", |_| child(&state, "a").set("b", 1))
        .unwrap();
    let err = store.action_named("forbidden", |_| state.set("c", 1));
    assert!(err.is_err());
    assert!(!state.has("c"));

    assert_eq!(*names.borrow(), vec!["<created>", "allowed", "forbidden"]);
}

/// Test action-name filters.
#[test]
fn filters_select_actions() {
    let store = Store::new();
    let state = store.create(json!({ "n": 0 })).unwrap();
    let users = counter(
        &state,
        SubscribeOptions::new().filter(Filter::pattern("^user/").unwrap()),
    );
    let rules = counter(
        &state,
        SubscribeOptions::new().filter(Filter::rules(["^user/"], ["rename$"]).unwrap()),
    );
    let special = Symbol::new("special");
    let by_symbol = counter(
        &state,
        SubscribeOptions::new().filter(Filter::Symbol(special.clone())),
    );

    store.action_named("user/create", |_| state.set("n", 1)).unwrap();
    store.action_named("user/rename", |_| state.set("n", 2)).unwrap();
    store.action_named("system", |_| state.set("n", 3)).unwrap();
    state.set("n", 4).unwrap();
    store.action_named(special, |_| state.set("n", 5)).unwrap();

    assert_eq!(users.get(), 2);
    assert_eq!(rules.get(), 1);
    assert_eq!(by_symbol.get(), 1);
}

/// Test batched handlers run once per tick with the latest name.
#[test]
fn batched_handlers_wait_for_tick() {
    let store = Store::new();
    let state = store.create(json!({ "a": 0 })).unwrap();
    let names = Rc::new(RefCell::new(Vec::new()));
    let log = names.clone();
    state
        .subscribe(
            move |name: &ActionName| log.borrow_mut().push(name.to_string()),
            SubscribeOptions::new().batch(),
        )
        .unwrap();

    store.action_named("first", |_| state.set("a", 1)).unwrap();
    store.action_named("second", |_| state.set("a", 2)).unwrap();
    assert!(names.borrow().is_empty());
    assert_eq!(store.pending_ticks(), 1);

    assert_eq!(store.tick(), 1);
    assert_eq!(*names.borrow(), vec!["second"]);

    assert_eq!(store.tick(), 0);
    assert_eq!(names.borrow().len(), 1);
}

/// Test that one handler on several paths runs once per action.
#[test]
fn multi_path_subscription_coalesces() {
    let store = Store::new();
    let state = store.create(json!({ "a": 0, "b": 0, "c": 0 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new().props(["a", "b"]));

    store
        .action(|_| {
            state.set("a", 1)?;
            state.set("b", 1)?;
            state.set("c", 1)
        })
        .unwrap();
    assert_eq!(calls.get(), 1);

    state.set("c", 2).unwrap();
    assert_eq!(calls.get(), 1);
}

/// Test cancel inside an action body.
#[test]
fn cancel_discards_work_so_far() {
    let store = Store::new();
    let state = store.create(json!({ "a": 0, "b": 0 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());

    store
        .action(|cx| {
            state.set("a", 1)?;
            cx.cancel();
            assert!(cx.is_cancelled());
            assert_eq!(state.get("a"), Value::from(0));
            state.set("b", 1)
        })
        .unwrap();

    assert_eq!(state.get("a"), Value::from(0));
    assert_eq!(state.get("b"), Value::from(1));
    assert_eq!(calls.get(), 1);
}

/// Test that inner actions hand their work to the outer one.
#[test]
fn nested_actions_dispatch_at_the_outermost() {
    let store = Store::new();
    let state = store.create(json!({ "a": 0, "b": 0 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());

    store
        .action_named("outer", |_| {
            state.set("a", 1)?;
            store.action_named("inner", |_| state.set("b", 1))?;
            assert_eq!(calls.get(), 0);
            Ok(())
        })
        .unwrap();
    assert_eq!(calls.get(), 1);

    let result = store.action_named("outer", |_| {
        store.action_named("inner", |_| state.set("b", 2))?;
        Err::<(), _>(Error::validation("abort"))
    });
    assert!(result.is_err());
    assert_eq!(state.get("b"), Value::from(1));
    assert_eq!(calls.get(), 1);
}

/// Test that nested explicit actions can be forbidden.
#[test]
fn concurrent_actions_can_be_rejected() {
    let store = Store::with_config(StoreConfig::new().nested_actions(false));
    let state = store.create(json!({ "a": 0 })).unwrap();

    let err = store
        .action_named("outer", |_| {
            state.set("a", 1)?;
            store.action_named("inner", |_| Ok(()))
        })
        .unwrap_err();

    match err {
        Error::ConcurrentAction { running, requested } => {
            assert_eq!(running, "outer");
            assert_eq!(requested, "inner");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(state.get("a"), Value::from(0));
}

/// Test that handler failures go to the error sink and do not stop siblings.
#[test]
fn subscriber_errors_reach_the_sink() {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let store = Store::with_config(
        StoreConfig::new().on_subscriber_error(move |err: &Error| sink.borrow_mut().push(err.to_string())),
    );
    let state = store.create(json!({ "a": 0 })).unwrap();

    state
        .subscribe(|_| Err::<(), _>(Error::validation("boom")), SubscribeOptions::new())
        .unwrap();
    let calls = counter(&state, SubscribeOptions::new());

    state.set("a", 1).unwrap();
    assert_eq!(state.get("a"), Value::from(1));
    assert_eq!(calls.get(), 1);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("boom"));
}

/// Test the listener report and unsubscribing.
#[test]
fn listeners_report_and_unsubscribe() {
    let store = Store::new();
    let state = store.create(json!({ "a": { "b": 1 } })).unwrap();

    let root = state.subscribe(|_| (), SubscribeOptions::new()).unwrap();
    let _by_path = state.subscribe(|_| (), SubscribeOptions::new().props(["a", "a.b"])).unwrap();
    let _nested = child(&state, "a").subscribe(|_| (), SubscribeOptions::new()).unwrap();

    let report = store.listeners(&state).unwrap();
    assert_eq!(report.count, 4);
    assert_eq!(report.default, 1);
    assert_eq!(report.props.get("a.b"), Some(&1));
    assert_eq!(report.children["a"].default, 1);

    assert!(root.unsubscribe());
    assert!(!root.unsubscribe());
    assert_eq!(store.listeners(&state).unwrap().count, 3);

    assert!(matches!(
        store.listeners(Value::from(1)),
        Err(Error::InvalidState { .. })
    ));
}

/// Test autorun.
#[test]
fn autorun_calls_immediately() {
    let store = Store::new();
    let state = store.create(json!({})).unwrap();
    let calls = counter(&state, SubscribeOptions::new().autorun());
    assert_eq!(calls.get(), 1);
}

/// Test that snapshot writes are reported and discarded.
#[test]
fn snapshot_writes_hit_the_read_only_hook() {
    let attempts = Rc::new(RefCell::new(Vec::new()));
    let log = attempts.clone();
    let store = Store::with_config(
        StoreConfig::new().on_read_only(move |write| log.borrow_mut().push(write.prop.clone())),
    );
    let state = store.create(json!({ "a": 1, "list": [] })).unwrap();

    let snapshot = store.snapshot(&state).unwrap();
    snapshot.set("a", 2);
    snapshot.get("list").unwrap().push(1);

    assert_eq!(*attempts.borrow(), vec!["a", "push"]);
    assert_eq!(snapshot, json!({ "a": 1, "list": [] }));
}

/// Test per-root cache policy.
#[test]
fn disabled_cache_rebuilds_snapshots() {
    let store = Store::new();
    let state = store
        .create_with(json!({ "a": { "b": 1 } }), CreateOptions::new().disable_cache(true))
        .unwrap();
    let first = store.snapshot(&state).unwrap();
    let second = store.snapshot(&state).unwrap();
    assert!(!first.ptr_eq(&second));
    assert_eq!(first, second);
}

/// Test that a handler may mutate the store it was called from.
#[test]
fn handlers_can_mutate_during_dispatch() {
    let store = Store::new();
    let state = store.create(json!({ "a": 1, "b": 0 })).unwrap();
    let writer = state.clone();
    state
        .subscribe(
            move |_| {
                let a = writer.get("a").as_f64().unwrap_or_default();
                writer.set("b", a * 2.0)
            },
            SubscribeOptions::new().prop("a"),
        )
        .unwrap();
    let on_b = counter(&state, SubscribeOptions::new().prop("b"));

    state.set("a", 4).unwrap();
    assert_eq!(state.get("b"), Value::from(8));
    assert_eq!(on_b.get(), 1);
}

/// Test path snapshots through refs.
#[test]
fn snapshot_paths_enter_refs() {
    let store = Store::new();
    let r = Ref::with_snapshot(3_i64, |n: &i64| Snapshot::from_json(json!({ "inner": { "v": n } })), true);
    let state = store
        .create(Value::object([("r", Value::from(r)), ("n", Value::from(1))]))
        .unwrap();

    let all = store
        .snapshot_paths(&state, ["r.inner.v", "n", "r.missing"])
        .unwrap();
    assert_eq!(all[0], json!(3));
    assert_eq!(all[1], json!(1));
    assert!(all[2].is_null());
}

/// Test maps and sets end to end.
#[test]
fn maps_and_sets_notify_and_snapshot() {
    let store = Store::new();
    let state = store
        .create(Value::object([
            ("scores", Value::map([("ann", 1), ("bob", 2)])),
            ("tags", Value::set(["x"])),
        ]))
        .unwrap();
    let scores = counter(&state, SubscribeOptions::new().prop("scores"));
    let tags = counter(&state, SubscribeOptions::new().prop("tags.y"));

    child(&state, "scores").insert_entry("cy", 3).unwrap();
    child(&state, "tags").add("y").unwrap();
    child(&state, "scores").clear().unwrap();

    assert_eq!(scores.get(), 2);
    assert_eq!(tags.get(), 1);

    let snapshot = store.snapshot(&state).unwrap();
    assert!(snapshot.get("scores").unwrap().is_empty());
    assert!(snapshot.get("tags").unwrap().contains("y"));
}

/// Test that a replaced child no longer reaches its former parent.
#[test]
fn replaced_children_stop_notifying_their_old_parent() {
    let store = Store::new();
    let state = store.create(json!({ "list": [{ "n": 1 }], "byId": { "7": { "n": 1 } } })).unwrap();
    let list = child(&state, "list");
    let by_id = child(&state, "byId");
    let old_item = list.get(0).as_state().unwrap().clone();
    let old_entry = child(&by_id, "7");

    list.set("0", json!({ "n": 2 })).unwrap();
    by_id.set(7, json!({ "n": 2 })).unwrap();
    let calls = counter(&state, SubscribeOptions::new());
    let before = state.snapshot().unwrap();

    old_item.set("n", 10).unwrap();
    old_entry.set("n", 10).unwrap();
    assert_eq!(calls.get(), 0);
    assert!(state.snapshot().unwrap().ptr_eq(&before));
    assert_eq!(
        before,
        json!({ "list": [{ "n": 2 }], "byId": { "7": { "n": 2 } } })
    );
}

/// Test that sets of objects are reactive per member.
#[test]
fn sets_of_objects_track_their_members() {
    let store = Store::new();
    let state = store.create(Value::object([("seen", Value::set(Vec::<Value>::new()))])).unwrap();
    let seen = child(&state, "seen");
    let calls = counter(&state, SubscribeOptions::new());

    let user = store.create(json!({ "name": "ada" })).unwrap();
    assert!(seen.add(user.clone()).unwrap());
    assert!(!seen.add(user.clone()).unwrap());
    assert_eq!(calls.get(), 1);

    user.set("name", "grace").unwrap();
    assert_eq!(calls.get(), 2);
    assert_eq!(state.snapshot().unwrap(), json!({ "seen": [{ "name": "grace" }] }));

    assert!(seen.delete(&user).unwrap());
    assert!(!seen.contains(&user));
    user.set("name", "alan").unwrap();
    assert_eq!(calls.get(), 3);
}
