//! `/`-delimited paths into JSON documents
//!
//! `"/"` (or `""`) addresses the whole document. Numeric segments index into
//! arrays; when a missing container has to be created for a numeric segment
//! it is created as an array, otherwise as an object. Arrays only grow by
//! appending, an index past the end is an error.

use std::cmp::Ordering;

use serde_json::{Map, Value};

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("index {index} is past the end of an array of length {len} at segment {segment}")]
    IndexOutOfBounds {
        segment: usize,
        index: usize,
        len: usize,
    },
}

fn parse_index(segment: &str) -> Option<usize> {
    segment.parse().ok()
}

pub fn deep_get<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Mutable slot for `segment` inside `container`, creating the container
/// and the slot as needed
///
/// Fails with the index and the array length when `segment` indexes past
/// the end.
fn slot_mut<'a>(container: &'a mut Value, segment: &str) -> Result<&'a mut Value, (usize, usize)> {
    match parse_index(segment) {
        Some(index) if !container.is_object() => {
            let mut items = match container.take() {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let len = items.len();
            match index.cmp(&len) {
                Ordering::Less => {}
                Ordering::Equal => items.push(Value::Null),
                Ordering::Greater => {
                    *container = Value::Array(items);
                    return Err((index, len));
                }
            }
            *container = Value::Array(items);
            Ok(&mut container[index])
        }
        _ => {
            if !container.is_object() {
                *container = Value::Object(Map::new());
            }
            Ok(&mut container[segment])
        }
    }
}

/// Write `value` at `path`, replacing whatever was there
///
/// On error `document` may hold containers created for the leading
/// segments, callers write into a copy.
pub fn deep_set(document: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let mut current = document;
    for (position, segment) in segments(path).enumerate() {
        current = slot_mut(current, segment).map_err(|(index, len)| PathError::IndexOutOfBounds {
            segment: position,
            index,
            len,
        })?;
    }
    *current = value;
    Ok(())
}
