//! Integration Tests for the Reactive Engine
//!
//! These tests verify that observable state, watchers and the scheduler work
//! together correctly across a tick.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use trellis_core::config;
use trellis_core::observe::{reactive, toggle_observing, ReactiveObject, Value};
use trellis_core::reactive::{render_watcher, watch, Computed, Owner, WatchOptions};
use trellis_core::schedule::{next_tick, tick};
use trellis_core::ReactiveError;

fn state(json: serde_json::Value) -> ReactiveObject {
    reactive(Value::from_json(json))
        .as_object()
        .cloned()
        .expect("root state is an object")
}

fn number(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

/// Watch `key` of `data`, counting runs of the getter and recording
/// callback arguments.
struct Probe {
    runs: Rc<Cell<u32>>,
    calls: Rc<RefCell<Vec<(Value, Value)>>>,
    _handle: trellis_core::reactive::Unwatch,
}

fn probe(data: &ReactiveObject, key: &'static str, options: WatchOptions) -> Probe {
    let runs = Rc::new(Cell::new(0));
    let calls = Rc::new(RefCell::new(Vec::new()));

    let d = data.clone();
    let counter = runs.clone();
    let sink = calls.clone();
    let handle = watch(
        None,
        move || {
            counter.set(counter.get() + 1);
            Ok(d.get(key))
        },
        move |new, old| {
            sink.borrow_mut().push((new.clone(), old.clone()));
            Ok(())
        },
        options,
    );

    Probe {
        runs,
        calls,
        _handle: handle,
    }
}

/// Test the basic "write, tick, react" cycle.
#[test]
fn write_then_tick_runs_watcher_once() {
    let data = state(json!({ "a": 1 }));
    let p = probe(&data, "a", WatchOptions::default());
    assert_eq!(p.runs.get(), 1);

    data.set("a", 2);

    // Nothing happens until the tick.
    assert_eq!(p.runs.get(), 1);
    assert!(tick::is_pending());

    tick::flush_pending();
    assert_eq!(p.runs.get(), 2);
    assert_eq!(
        p.calls.borrow().as_slice(),
        &[(Value::from(2), Value::from(1))]
    );
}

/// Test that many writes in one turn collapse into one run per watcher.
#[test]
fn writes_in_one_turn_are_batched() {
    let data = state(json!({ "a": 1, "b": 1 }));
    let pa = probe(&data, "a", WatchOptions::default());
    let pb = probe(&data, "b", WatchOptions::default());

    for i in 2..12 {
        data.set("a", i);
        data.set("b", i);
    }
    assert_eq!(tick::drain(), 1);

    assert_eq!(pa.runs.get(), 2);
    assert_eq!(pb.runs.get(), 2);
    assert_eq!(
        pa.calls.borrow().as_slice(),
        &[(Value::from(11), Value::from(1))]
    );
}

/// Test that a branch no longer taken stops triggering the watcher.
#[test]
fn stale_dependencies_stop_triggering() {
    let data = state(json!({ "useA": true, "a": 1, "b": 2 }));
    let runs = Rc::new(Cell::new(0));

    let d = data.clone();
    let counter = runs.clone();
    let _handle = watch(
        None,
        move || {
            counter.set(counter.get() + 1);
            if d.get("useA").as_bool().unwrap_or(false) {
                Ok(d.get("a"))
            } else {
                Ok(d.get("b"))
            }
        },
        |_, _| Ok(()),
        WatchOptions::default(),
    );

    data.set("useA", false);
    tick::drain();
    assert_eq!(runs.get(), 2);

    data.set("a", 100);
    assert!(!tick::is_pending());
    tick::drain();
    assert_eq!(runs.get(), 2);

    data.set("b", 100);
    tick::drain();
    assert_eq!(runs.get(), 3);
}

/// Test that writing the same value (including NaN over NaN) is silent.
#[test]
fn equal_writes_do_not_notify() {
    let data = state(json!({ "a": 1 }));
    data.set("nan", f64::NAN);
    let pa = probe(&data, "a", WatchOptions::default());
    let pn = probe(&data, "nan", WatchOptions::default());

    data.set("a", 1);
    data.set("nan", f64::NAN);
    assert!(!tick::is_pending());

    tick::drain();
    assert_eq!(pa.runs.get(), 1);
    assert_eq!(pn.runs.get(), 1);
}

/// Test that a parent created first runs first, whatever the trigger order.
#[test]
fn parents_flush_before_children() {
    let data = state(json!({ "parent": 0, "child": 0 }));
    let order = Rc::new(RefCell::new(Vec::new()));

    let make = |key: &'static str| {
        let d = data.clone();
        let order = order.clone();
        watch(
            None,
            move || Ok(d.get(key)),
            move |_, _| {
                order.borrow_mut().push(key);
                Ok(())
            },
            WatchOptions::default(),
        )
    };
    let _parent = make("parent");
    let _child = make("child");

    data.set("child", 1);
    data.set("parent", 1);
    tick::drain();

    assert_eq!(order.borrow().as_slice(), &["parent", "child"]);
}

/// Test that two watchers feeding each other terminate and warn.
#[test]
fn mutual_updates_terminate() {
    let warnings = Rc::new(RefCell::new(Vec::new()));
    let sink = warnings.clone();
    config::configure(|c| {
        c.warn_handler = Some(Rc::new(move |message: &str| {
            sink.borrow_mut().push(message.to_string());
        }));
    });

    let data = state(json!({ "a": 0, "b": 0 }));

    let (d1, d2) = (data.clone(), data.clone());
    let _a = watch(
        None,
        move || Ok(d1.get("a")),
        move |new, _| {
            d2.set("b", number(new) + 1.0);
            Ok(())
        },
        WatchOptions::default(),
    );

    let (d3, d4) = (data.clone(), data.clone());
    let _b = watch(
        None,
        move || Ok(d3.get("b")),
        move |new, _| {
            d4.set("a", number(new) + 1.0);
            Ok(())
        },
        WatchOptions::default(),
    );

    data.set("a", 1);
    tick::drain();

    assert!(!warnings.borrow().is_empty());
    assert!(warnings.borrow()[0].contains("infinite update loop"));
    let a = number(&data.get_untracked("a"));
    assert!(a > 100.0 && a < 1000.0, "stopped after a bounded number of rounds, a = {a}");
    config::reset();
}

/// Test that a computed value is cached and recomputed lazily.
#[test]
fn computed_recomputes_on_demand() {
    let data = state(json!({ "first": "Ada", "last": "Lovelace" }));
    let runs = Rc::new(Cell::new(0));

    let d = data.clone();
    let counter = runs.clone();
    let full = Computed::new(move || {
        counter.set(counter.get() + 1);
        Ok(Value::string(format!("{} {}", d.get("first"), d.get("last"))))
    });

    assert_eq!(full.get().unwrap(), Value::from("Ada Lovelace"));
    assert_eq!(full.get().unwrap(), Value::from("Ada Lovelace"));
    assert_eq!(runs.get(), 1);

    data.set("last", "King");
    assert_eq!(runs.get(), 1);
    assert_eq!(full.get().unwrap(), Value::from("Ada King"));
    assert_eq!(runs.get(), 2);
}

/// Test that a watcher on a computed value reacts to the underlying cells.
#[test]
fn watcher_over_computed() {
    let data = state(json!({ "items": [1, 2, 3] }));

    let d = data.clone();
    let total = Computed::new(move || {
        let items = d.get("items");
        let sum = items
            .as_array()
            .map(|arr| arr.to_vec().iter().map(number).sum::<f64>())
            .unwrap_or(0.0);
        Ok(Value::from(sum))
    });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let t = total.clone();
    let _handle = watch(
        None,
        move || Ok(t.get()?),
        move |new, _| {
            sink.borrow_mut().push(number(new));
            Ok(())
        },
        WatchOptions::default(),
    );

    let items = data.get_untracked("items");
    items.as_array().unwrap().push(4);
    tick::drain();

    assert_eq!(seen.borrow().as_slice(), &[10.0]);
}

/// Test array mutations notify watchers reading the array.
#[test]
fn array_mutations_notify() {
    let data = state(json!({ "list": [] }));
    let lengths = Rc::new(RefCell::new(Vec::new()));

    let d = data.clone();
    let sink = lengths.clone();
    let _handle = watch(
        None,
        move || Ok(Value::from(d.get("list").as_array().map_or(0, |a| a.len()) as f64)),
        move |new, _| {
            sink.borrow_mut().push(number(new));
            Ok(())
        },
        WatchOptions::default(),
    );

    let list = data.get_untracked("list");
    let list = list.as_array().unwrap();

    list.push("x");
    tick::drain();
    list.push("y");
    list.pop();
    tick::drain();

    assert_eq!(lengths.borrow().as_slice(), &[1.0]);

    list.clear();
    tick::drain();
    assert_eq!(lengths.borrow().as_slice(), &[1.0, 0.0]);
}

/// Test that adding and removing keys notifies key enumeration.
#[test]
fn shape_changes_notify() {
    let data = state(json!({ "bag": { "a": 1 } }));
    let counts = Rc::new(RefCell::new(Vec::new()));

    let d = data.clone();
    let sink = counts.clone();
    let _handle = watch(
        None,
        move || Ok(Value::from(d.get("bag").as_object().map_or(0, |o| o.keys().len()) as f64)),
        move |new, _| {
            sink.borrow_mut().push(number(new));
            Ok(())
        },
        WatchOptions::default(),
    );

    let bag = data.get_untracked("bag");
    let bag = bag.as_object().unwrap();

    bag.set("b", 2);
    tick::drain();
    bag.remove("a");
    tick::drain();

    assert_eq!(counts.borrow().as_slice(), &[2.0, 1.0]);
}

/// Test deep watching through nested containers.
#[test]
fn deep_watch_sees_nested_mutation() {
    let data = state(json!({ "config": { "theme": { "color": "red" } } }));
    let calls = probe(&data, "config", WatchOptions::default().deep());

    let config = data.get_untracked("config");
    let theme = config.as_object().unwrap().get_untracked("theme");
    theme.as_object().unwrap().set("color", "blue");
    tick::drain();

    assert_eq!(calls.calls.borrow().len(), 1);
}

/// Test that frozen properties and non-extensible containers are not tracked.
#[test]
fn frozen_state_is_not_tracked() {
    let plain = ReactiveObject::new();
    plain.set("a", 1);
    plain.define_frozen("id", 7);

    let sealed = Value::from_json(json!({ "x": 1 }));
    sealed.as_object().unwrap().prevent_extensions();
    plain.set("sealed", sealed.clone());

    let data = reactive(Value::Object(plain.clone()))
        .as_object()
        .cloned()
        .unwrap();

    assert!(data.is_reactive("a"));
    assert!(!data.is_reactive("id"));
    assert!(sealed.observer().is_none());
}

/// Test that toggling observation off leaves new values plain.
#[test]
fn observation_can_be_suspended() {
    let data = state(json!({ "slot": null }));

    toggle_observing(false);
    let payload = Value::from_json(json!({ "big": [1, 2, 3] }));
    data.set("slot", payload.clone());
    toggle_observing(true);

    assert!(payload.observer().is_none());
}

/// Test owner lifecycle hooks around the primary watcher.
#[test]
fn owner_hooks_wrap_primary_updates() {
    let data = state(json!({ "title": "a" }));
    let owner = Owner::new("page");
    let log = Rc::new(RefCell::new(Vec::new()));

    let sink = log.clone();
    owner.on_before_update(move || sink.borrow_mut().push("before_update"));
    let sink = log.clone();
    owner.on_updated(move || sink.borrow_mut().push("updated"));

    let d = data.clone();
    let sink = log.clone();
    let _render = render_watcher(&owner, move || {
        d.get("title");
        sink.borrow_mut().push("render");
        Ok(())
    })
    .unwrap();
    owner.mount();

    data.set("title", "b");
    tick::drain();

    assert_eq!(
        log.borrow().as_slice(),
        &["render", "before_update", "render", "updated"]
    );
}

/// Test that destroying an owner stops all of its watchers.
#[test]
fn destroyed_owner_stops_reacting() {
    let data = state(json!({ "a": 1 }));
    let owner = Owner::new("widget");
    let runs = Rc::new(Cell::new(0));

    let d = data.clone();
    let counter = runs.clone();
    render_watcher(&owner, move || {
        counter.set(counter.get() + 1);
        d.get("a");
        Ok(())
    })
    .unwrap();
    let d = data.clone();
    watch(Some(&owner), move || Ok(d.get("a")), |_, _| Ok(()), WatchOptions::default());
    assert_eq!(owner.watcher_count(), 2);

    owner.destroy();
    data.set("a", 2);

    assert!(!tick::is_pending());
    assert_eq!(runs.get(), 1);
    assert_eq!(data.cell("a").unwrap().dep().subscriber_count(), 0);
}

/// Test that a render failure is reported without stopping other watchers.
#[test]
fn render_errors_are_reported_after_the_flush() {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    config::configure(|c| {
        c.error_handler = Some(Rc::new(move |err: &ReactiveError| {
            sink.borrow_mut().push(err.to_string());
        }));
    });

    let data = state(json!({ "fail": false, "a": 1 }));
    let owner = Owner::new("fragile");

    let d = data.clone();
    render_watcher(&owner, move || {
        if d.get("fail").as_bool().unwrap_or(false) {
            return Err("render exploded".into());
        }
        Ok(())
    })
    .unwrap();
    let p = probe(&data, "fail", WatchOptions::default());

    data.set("fail", true);
    tick::drain();

    assert_eq!(p.runs.get(), 2);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("render exploded"));
    config::reset();
}

/// Test that synchronous mode bypasses the tick entirely.
#[test]
fn synchronous_mode() {
    config::configure(|c| c.settings.async_mode = false);

    let data = state(json!({ "a": 1 }));
    let p = probe(&data, "a", WatchOptions::default());
    data.set("a", 2);

    assert_eq!(p.runs.get(), 2);
    assert!(!tick::is_pending());
    config::reset();
}

/// Test settings loaded from JSON.
#[test]
fn settings_from_json() {
    let settings = trellis_core::Settings::from_json(r#"{ "max_update_count": 10 }"#).unwrap();
    assert_eq!(settings.max_update_count, 10);
    assert!(settings.async_mode);

    assert!(matches!(
        trellis_core::Settings::from_json("{ nope"),
        Err(ReactiveError::InvalidSettings(_))
    ));
}

/// Test the tokio-driven tick with `next_tick`.
#[tokio::test]
async fn next_tick_resolves_after_the_flush() {
    let data = state(json!({ "a": 1 }));
    let p = probe(&data, "a", WatchOptions::default());

    data.set("a", 2);
    data.set("a", 3);
    next_tick().await;

    assert_eq!(p.runs.get(), 2);
    assert_eq!(
        p.calls.borrow().as_slice(),
        &[(Value::from(3), Value::from(1))]
    );
}
