//! Accessors for loosely-typed D-Bus variant values
//!
//! NetworkManager sometimes nests a value inside one or more `v` wrappers,
//! so every accessor looks through those first.

use std::collections::HashMap;
use zbus::zvariant::Value;

/// Strip any number of `v` wrappers
pub(crate) fn peel<'v, 'a>(value: &'v Value<'a>) -> &'v Value<'a> {
    match value {
        Value::Value(inner) => peel(inner),
        other => other,
    }
}

pub(crate) fn as_str<'v>(value: &'v Value<'_>) -> Option<&'v str> {
    match peel(value) {
        Value::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

pub(crate) fn as_bool(value: &Value<'_>) -> Option<bool> {
    match peel(value) {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

/// Unsigned integer of any width that fits in a `u32`
pub(crate) fn as_u32(value: &Value<'_>) -> Option<u32> {
    match peel(value) {
        Value::U8(n) => Some(u32::from(*n)),
        Value::U16(n) => Some(u32::from(*n)),
        Value::U32(n) => Some(*n),
        Value::I32(n) => u32::try_from(*n).ok(),
        Value::U64(n) => u32::try_from(*n).ok(),
        Value::I64(n) => u32::try_from(*n).ok(),
        Value::Str(s) => s.as_str().trim().parse().ok(),
        _ => None,
    }
}

/// Decode an `a{ss}` dictionary. Entries whose key or value is not a string
/// are dropped.
pub(crate) fn string_map(value: &Value<'_>) -> Option<HashMap<String, String>> {
    match peel(value) {
        Value::Dict(dict) => Some(
            dict.iter()
                .filter_map(|(key, value)| Some((as_str(key)?.to_string(), as_str(value)?.to_string())))
                .collect(),
        ),
        _ => None,
    }
}

/// Decode an `a{sv}` dictionary into borrowed key/value pairs
pub(crate) fn variant_map<'v, 'a>(value: &'v Value<'a>) -> Option<Vec<(&'v str, &'v Value<'a>)>> {
    match peel(value) {
        Value::Dict(dict) => Some(
            dict.iter()
                .filter_map(|(key, value)| Some((as_str(key)?, value)))
                .collect(),
        ),
        _ => None,
    }
}

/// Elements of an array value
pub(crate) fn elements<'v, 'a>(value: &'v Value<'a>) -> Option<Vec<&'v Value<'a>>> {
    match peel(value) {
        Value::Array(array) => Some(array.iter().collect()),
        _ => None,
    }
}
