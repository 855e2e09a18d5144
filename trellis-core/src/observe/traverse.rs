//! Traverse-for-dependencies.
//!
//! Deep watchers walk their result after evaluation so that every nested
//! cell and container registers a dependency, even though the evaluator
//! itself only read the top level. The walk exists only for its `depend()`
//! side effects; it is not a serialization or equality pass.

use std::collections::HashSet;

use super::Value;

/// Touch every nested cell of `value` for dependency registration.
///
/// Non-extensible containers are skipped, and each container is visited
/// once, so cyclic structures terminate.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(obj) => {
            if !obj.is_extensible() || !seen.insert(address_of(value)) {
                return;
            }
            for key in obj.keys() {
                walk(&obj.get(&key), seen);
            }
        }
        Value::Array(arr) => {
            if !arr.is_extensible() || !seen.insert(address_of(value)) {
                return;
            }
            for item in arr.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}

fn address_of(value: &Value) -> usize {
    match value {
        Value::Object(obj) => obj.identity(),
        Value::Array(arr) => arr.identity(),
        _ => 0,
    }
}
