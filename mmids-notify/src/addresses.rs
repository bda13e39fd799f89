//! Normalizes the two ways a control service can point a player at upstream origins into one
//! ordered candidate list. A redirect carries a single address in its `Location` header, while
//! a successful response can carry a JSON document of the form
//! `{"state": 0, "content": {"addrs": [{"addr": "rtmp://..."}, ...]}}`.

use serde_json::{Map, Value};
use tracing::warn;

/// Strings shorter than this can't be a usable origin uri (e.g. `rtmp://`) and are ignored
pub const MIN_ADDRESS_LENGTH: usize = 7;

const STATE_FIELD: &str = "state";
const CONTENT_FIELD: &str = "content";
const ADDRESS_LIST_FIELD: &str = "addrs";
const ADDRESS_FIELD: &str = "addr";

/// Extracts the candidate address list from a JSON response body. Returns `None` if the body
/// isn't valid JSON, carries a `state` other than `0`, or contains no usable addresses.
pub fn from_json_body(body: &[u8]) -> Option<Vec<String>> {
    let document: Value = match serde_json::from_slice(body) {
        Ok(document) => document,
        Err(error) => {
            warn!("Response body was not valid json: {}", error);
            return None;
        }
    };

    if let Some(state) = find_field(&document, STATE_FIELD) {
        if state.as_i64() != Some(0) {
            return None;
        }
    }

    let content = find_field(&document, CONTENT_FIELD)?;
    let address_list = find_field(content, ADDRESS_LIST_FIELD)?;

    let mut addresses = Vec::new();
    match address_list {
        Value::Object(object) => collect_addresses(object, &mut addresses),
        Value::Array(items) => {
            for item in items {
                if let Value::Object(object) = item {
                    collect_addresses(object, &mut addresses);
                }
            }
        }

        _ => (),
    }

    if addresses.is_empty() {
        None
    } else {
        Some(addresses)
    }
}

/// A redirect's `Location` value is a one element candidate list
pub fn from_redirect(location: Option<String>) -> Option<Vec<String>> {
    location
        .filter(|location| !location.is_empty())
        .map(|location| vec![location])
}

/// Depth first search for the first field with the given name (ignoring case)
fn find_field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Object(object) => {
            for (key, child) in object {
                if key.eq_ignore_ascii_case(name) {
                    return Some(child);
                }

                if let Some(found) = find_field(child, name) {
                    return Some(found);
                }
            }

            None
        }

        Value::Array(items) => items.iter().find_map(|item| find_field(item, name)),
        _ => None,
    }
}

fn collect_addresses(object: &Map<String, Value>, addresses: &mut Vec<String>) {
    for (key, value) in object {
        match value {
            Value::String(address) if key.eq_ignore_ascii_case(ADDRESS_FIELD) => {
                if address.len() >= MIN_ADDRESS_LENGTH {
                    addresses.push(address.clone());
                }
            }

            Value::Object(child) => collect_addresses(child, addresses),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(child) = item {
                        collect_addresses(child, addresses);
                    }
                }
            }

            _ => (),
        }
    }
}
