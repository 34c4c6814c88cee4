//! Field access on the JSON projection of messages.
//!
//! Bundling, paging and transcoding address request and response fields by
//! name. Names are dot-separated paths; each segment matches the member as
//! written, or failing that its lowerCamelCase or snake_case spelling, so
//! `page_token` finds `pageToken` in a message serialized with camelCase
//! field names.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::GaxError;

/// Messages the runtime can carry.
///
/// Any `serde` type that is cheap enough to clone and can cross task
/// boundaries qualifies; the blanket impl means callers never implement
/// this by hand.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

pub(crate) fn to_value<T: Serialize>(message: &T) -> Result<Value, GaxError> {
    serde_json::to_value(message)
        .map_err(|e| GaxError::Encode(format!("JSON encoding failed: {}", e)))
}

pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, GaxError> {
    serde_json::from_value(value)
        .map_err(|e| GaxError::Decode(format!("JSON decoding failed: {}", e)))
}

/// Convert `snake_case` to `lowerCamelCase`.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert `lowerCamelCase` to `snake_case`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Resolve the member name actually used in `object` for `segment`.
fn member_key(object: &Map<String, Value>, segment: &str) -> Option<String> {
    if object.contains_key(segment) {
        return Some(segment.to_string());
    }
    let camel = to_camel_case(segment);
    if object.contains_key(&camel) {
        return Some(camel);
    }
    let snake = to_snake_case(segment);
    object.contains_key(&snake).then_some(snake)
}

/// Look up a dot-path. `null` members count as absent.
pub fn get_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(value, path).filter(|found| !found.is_null())
}

/// Like [`get_field`], but an explicit `null` is returned rather than
/// treated as absent.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        let object = current.as_object()?;
        let key = member_key(object, segment)?;
        current = object.get(&key)?;
    }
    Some(current)
}

/// Set a dot-path, creating intermediate objects as needed.
///
/// An existing member is overwritten under whichever spelling it already
/// uses; a new member is created with the last segment as written.
pub fn set_field(value: &mut Value, path: &str, new_value: Value) {
    let mut current = value;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(object) = current else {
            return;
        };
        let key = member_key(object, segment).unwrap_or_else(|| segment.to_string());
        if segments.peek().is_none() {
            object.insert(key, new_value);
            return;
        }
        current = object.entry(key).or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Remove a dot-path, returning the removed value.
pub fn remove_field(value: &mut Value, path: &str) -> Option<Value> {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (get_field_mut(value, parent)?, last),
        None => (value, path),
    };
    let object = parent.as_object_mut()?;
    let key = member_key(object, last)?;
    object.remove(&key)
}

fn get_field_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.split('.') {
        let object = current.as_object_mut()?;
        let key = member_key(object, segment)?;
        current = object.get_mut(&key)?;
    }
    Some(current)
}

/// Render a scalar field as the string used in URLs and query strings.
///
/// Objects, arrays and `null` have no scalar form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
