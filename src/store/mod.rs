//! The centralized application store and the records persisted in it.
//!
//! The store is a single JSON-like document ([`AppDb`]) shared by the whole
//! application; each FSM instance owns exactly one slice of it, addressed by
//! its [`InstanceId`] and holding an [`Envelope`]. How an id maps to a slice
//! is the adapter's business; see [`adapter`].

pub mod adapter;

pub use adapter::{DocumentAdapter, StoreAdapter};

use crate::engine::StateNode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of an FSM runtime instance.
///
/// The shape of the id is the type tag the store adapter dispatches on: a
/// `Key` addresses a flat top-level entry, a `Path` addresses a nested
/// location in the store document. Callers with normalized or indexed stores
/// supply their own [`StoreAdapter`] and may interpret either shape freely.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceId {
    /// Flat key into the store document.
    Key(String),
    /// Path of keys into a nested store document.
    Path(Vec<String>),
}

impl InstanceId {
    /// Create a flat-key id.
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    /// Create a nested-path id.
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Path(segments.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for InstanceId {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Path(segments) => f.write_str(&segments.join("/")),
        }
    }
}

/// The persisted record for one FSM instance.
///
/// `current` is fully owned by the statechart engine's output; `epoch` is
/// owned and mutated only by the runtime; `ext` holds engine-specific
/// extension fields, flattened into the same record and preserved across
/// transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Current state node, as computed by the engine.
    pub current: StateNode,

    /// Epoch stamped at the most recent init or restart.
    pub epoch: u64,

    /// When this envelope was last written.
    pub updated_at: DateTime<Utc>,

    /// Engine-specific extension fields.
    #[serde(flatten)]
    pub ext: Map<String, Value>,
}

impl Envelope {
    /// Create a fresh envelope for a newly initialized instance.
    pub fn new(current: StateNode, epoch: u64) -> Self {
        Self {
            current,
            epoch,
            updated_at: Utc::now(),
            ext: Map::new(),
        }
    }
}

/// The single in-process application store: one JSON object document.
///
/// The runtime never writes it directly: all envelope reads and writes go
/// through a [`StoreAdapter`]. The host application may keep its own data in
/// the same document; routers only touch the slice their adapter addresses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppDb {
    root: Map<String, Value>,
}

impl AppDb {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a top-level entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Write a top-level entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// Remove a top-level entry.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.root.remove(key)
    }

    /// Read a nested entry by path.
    pub fn get_path(&self, segments: &[String]) -> Option<&Value> {
        let (first, rest) = segments.split_first()?;
        let mut value = self.root.get(first)?;
        for segment in rest {
            value = value.as_object()?.get(segment)?;
        }
        Some(value)
    }

    /// Write (or, with `None`, remove) a nested entry by path, creating
    /// intermediate objects as needed. Removal of a missing path is a no-op.
    pub fn set_path(&mut self, segments: &[String], value: Option<Value>) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        if rest.is_empty() {
            match value {
                Some(v) => {
                    self.root.insert(first.clone(), v);
                }
                None => {
                    self.root.remove(first);
                }
            }
            return;
        }
        match value {
            Some(v) => {
                let entry = self
                    .root
                    .entry(first.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                set_in_value(entry, rest, v);
            }
            None => {
                if let Some(entry) = self.root.get_mut(first) {
                    remove_in_value(entry, rest);
                }
            }
        }
    }

    /// The underlying document, for host reads.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }
}

fn set_in_value(target: &mut Value, segments: &[String], value: Value) {
    // A non-object intermediate is replaced wholesale.
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let map = target.as_object_mut().expect("just ensured object");
    match segments {
        [last] => {
            map.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            set_in_value(entry, rest, value);
        }
        [] => {}
    }
}

fn remove_in_value(target: &mut Value, segments: &[String]) {
    let Some(map) = target.as_object_mut() else {
        return;
    };
    match segments {
        [last] => {
            map.remove(last);
        }
        [head, rest @ ..] => {
            if let Some(entry) = map.get_mut(head) {
                remove_in_value(entry, rest);
            }
        }
        [] => {}
    }
}
