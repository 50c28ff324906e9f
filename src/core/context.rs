//! Transition context and dotted-path property access.

use serde_json::Value;

/// Machine-wide data handed to conditions, settings, and hooks.
pub type Context = Value;

/// Look up a dotted property path such as `"user.profile.age"`.
///
/// Array elements are addressed by index segments (`"items.0"`). An empty
/// path addresses the whole context.
pub fn lookup<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(context);
    }
    path.split('.').try_fold(context, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Whether any watched path differs between two context snapshots.
///
/// An empty watch list treats every mutation as relevant. A path that is
/// missing on one side and present on the other counts as a change.
pub fn watched_changed(previous: &Context, next: &Context, watch: &[String]) -> bool {
    if watch.is_empty() {
        return true;
    }
    watch
        .iter()
        .any(|path| lookup(previous, path) != lookup(next, path))
}

/// Shallow-merge a patch into the context.
///
/// Top-level keys of an object patch overwrite the matching keys of an object
/// context. Any other combination replaces the context with the patch.
pub fn merge(context: &mut Context, patch: Value) {
    match (context, patch) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
        (context, patch) => *context = patch,
    }
}
