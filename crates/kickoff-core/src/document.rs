//! The upstream match document.
//!
//! A payload is parsed once into an insertion-ordered JSON tree. Every
//! top-level field other than `matches` is kept verbatim, and each match is
//! kept as its original JSON value next to the two keys the filter reads.
//! Per-connection output is rendered through [`FilteredDocument`], which
//! borrows the parsed tree instead of cloning it.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::criteria::FilterCriteria;
use crate::errors::PayloadError;

/// Top-level key holding the match array.
pub const MATCHES_KEY: &str = "matches";

/// One element of the `matches` array.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    competition_code: String,
    status: String,
    value: Value,
}

impl MatchRecord {
    /// Wrap a JSON value. Returns `None` unless it is an object.
    ///
    /// The league code is read from `competition.code`, falling back to a
    /// flat `competitionCode` string. Missing keys extract as `""`.
    pub fn from_value(value: Value) -> Option<Self> {
        let object = value.as_object()?;
        let competition_code = object
            .get("competition")
            .and_then(|c| c.get("code"))
            .and_then(Value::as_str)
            .or_else(|| object.get("competitionCode").and_then(Value::as_str))
            .unwrap_or_default()
            .to_owned();
        let status = object
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        Some(Self {
            competition_code,
            status,
            value,
        })
    }

    /// Build a minimal record in the upstream shape.
    pub fn from_parts(competition_code: &str, status: &str) -> Self {
        let value = serde_json::json!({
            "competition": { "code": competition_code },
            "status": status,
        });
        Self {
            competition_code: competition_code.to_owned(),
            status: status.to_owned(),
            value,
        }
    }

    pub fn competition_code(&self) -> &str {
        &self.competition_code
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// The record exactly as received.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Serialize for MatchRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

/// A parsed upstream payload.
#[derive(Clone, Debug)]
pub struct Document {
    // All top-level fields in original order. The `matches` slot, when
    // present, holds `null`; its records live in `matches`.
    root: Map<String, Value>,
    matches: Vec<MatchRecord>,
}

impl Document {
    pub fn parse(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let Value::Object(mut root) = value else {
            return Err(PayloadError::NotAnObject);
        };

        let matches = match root.get_mut(MATCHES_KEY).map(Value::take) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    MatchRecord::from_value(item).ok_or(PayloadError::MatchNotObject { index })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(PayloadError::MatchesNotArray),
        };

        Ok(Self { root, matches })
    }

    pub fn matches(&self) -> &[MatchRecord] {
        &self.matches
    }

    /// A top-level field other than `matches`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        if key == MATCHES_KEY {
            return None;
        }
        self.root.get(key)
    }

    /// Select the records `criteria` accepts, keeping their original order.
    pub fn filter(&self, criteria: &FilterCriteria) -> FilteredDocument<'_> {
        let selected = if criteria.is_wildcard() {
            self.matches.iter().collect()
        } else {
            self.matches.iter().filter(|m| criteria.matches(m)).collect()
        };
        FilteredDocument {
            document: self,
            selected,
        }
    }
}

/// A borrowed view of a [`Document`] whose `matches` array is replaced by a
/// subsequence. Serializes to the original document shape.
#[derive(Debug)]
pub struct FilteredDocument<'a> {
    document: &'a Document,
    selected: Vec<&'a MatchRecord>,
}

impl<'a> FilteredDocument<'a> {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &'a MatchRecord> + '_ {
        self.selected.iter().copied()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for FilteredDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.document.root.len()))?;
        for (key, value) in &self.document.root {
            if key == MATCHES_KEY {
                map.serialize_entry(key, &self.selected)?;
            } else {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}
