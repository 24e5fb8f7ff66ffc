//! Core data structures for subgraph ingestion
//!
//! A [`Subgraph`] is an ordered batch of [`Triple`]s. Values are built once per
//! decoded record or network message and never mutated afterwards; downstream
//! stages only ever read them.

use serde::{Deserialize, Deserializer, Serialize};

/// An ordered batch of triples exchanged as one ingestion unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subgraph {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub triples: Vec<Triple>,
}

/// JSON `null` for a repeated field means "no elements".
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single (subject, predicate, object) statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Triple {
    pub subject: Subject,
    pub predicate: Predicate,
    pub object: Object,
}

/// A graph entity. Two subjects denote the same entity iff `kind` and `tuid`
/// are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subject {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub tuid: String,
}

/// Edge label. Not part of any identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    #[serde(default)]
    pub name: String,
}

/// The object of a triple: either a literal or a reference to another subject.
///
/// Serialized as a single-key JSON object, `{"string": ..}` or
/// `{"subject": {..}}`, so an object with no value or with both is rejected
/// at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Object {
    String(String),
    Subject(Subject),
}

/// Identity key of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectKey<'a> {
    pub kind: &'a str,
    pub tuid: &'a str,
}

impl Subgraph {
    pub fn new(triples: Vec<Triple>) -> Self {
        Self { triples }
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

impl Triple {
    pub fn new(subject: Subject, predicate: Predicate, object: Object) -> Self {
        Self { subject, predicate, object }
    }
}

impl Subject {
    pub fn new(kind: &str, tuid: &str) -> Self {
        Self { kind: kind.to_string(), tuid: tuid.to_string() }
    }

    pub fn key(&self) -> SubjectKey<'_> {
        SubjectKey { kind: &self.kind, tuid: &self.tuid }
    }
}

impl Predicate {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl Object {
    pub fn string(value: &str) -> Self {
        Object::String(value.to_string())
    }

    pub fn subject(kind: &str, tuid: &str) -> Self {
        Object::Subject(Subject::new(kind, tuid))
    }

    /// The nested subject reference, if this object is one.
    pub fn as_subject(&self) -> Option<&Subject> {
        match self {
            Object::Subject(subject) => Some(subject),
            Object::String(_) => None,
        }
    }
}

pub mod encoding;
pub mod proto;
pub use encoding::*;
