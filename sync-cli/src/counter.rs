//! Counter merge policy used by the CLI.
//!
//! State is `{"total": n}`. Payloads are `{"type": "add", "value": n}` or
//! `{"type": "sub", "value": n}`; a missing type means `add`.

use optisync_types::Event;
use serde_json::{json, Value};

/// The same policy in the form registered with a backend.
pub const COUNTER_DEFINITION: &str = "(state, event) => ({ total: ((state && state.total) || 0) + \
     (event.payload.type === 'sub' ? -event.payload.value : event.payload.value) })";

fn delta(payload: &Value) -> i64 {
    let value = payload["value"].as_i64().unwrap_or(0);
    match payload["type"].as_str() {
        Some("sub") => value.saturating_neg(),
        _ => value,
    }
}

fn fold(state: &Value, payload: &Value) -> Value {
    let total = state["total"].as_i64().unwrap_or(0);
    json!({ "total": total.saturating_add(delta(payload)) })
}

/// Client-side merge.
pub fn merge(state: &Value, event: &Event<Value>) -> Value {
    fold(state, &event.payload)
}

/// Server-side merge over the JSON event body.
pub fn merge_json(state: &Value, event: &Value) -> Value {
    fold(state, &event["payload"])
}
