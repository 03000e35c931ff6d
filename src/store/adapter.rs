//! Pluggable read/write of an instance's persisted envelope.
//!
//! The runtime addresses an instance's store slice exclusively through this
//! boundary, so callers with normalized or indexed stores can substitute
//! their own mapping at configuration time. The default adapter dispatches on
//! the shape of the id: flat keys live at the top level of the document,
//! paths traverse nested objects.

use super::{AppDb, Envelope, InstanceId};
use tracing::warn;

/// Read/write boundary between the runtime and the application store.
///
/// Implementations must be pure functions of the store document: no I/O, no
/// hidden state. `set_state(.., None)` deletes the slice.
pub trait StoreAdapter: Send + Sync {
    /// Read the persisted envelope for `id`, if any.
    fn get_state(&self, db: &AppDb, id: &InstanceId) -> Option<Envelope>;

    /// Write the envelope for `id`, or delete it with `None`.
    fn set_state(&self, db: &mut AppDb, id: &InstanceId, envelope: Option<Envelope>);
}

/// Default adapter: keyed lookup in the store document.
///
/// `Key` ids map to a top-level entry named after the key; `Path` ids map to
/// a nested entry, with intermediate objects created on write.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentAdapter;

impl DocumentAdapter {
    fn decode(id: &InstanceId, value: &serde_json::Value) -> Option<Envelope> {
        match serde_json::from_value(value.clone()) {
            Ok(envelope) => Some(envelope),
            Err(error) => {
                warn!(%id, %error, "store slice is not a valid envelope");
                None
            }
        }
    }
}

impl StoreAdapter for DocumentAdapter {
    fn get_state(&self, db: &AppDb, id: &InstanceId) -> Option<Envelope> {
        let value = match id {
            InstanceId::Key(key) => db.get(key)?,
            InstanceId::Path(segments) => db.get_path(segments)?,
        };
        Self::decode(id, value)
    }

    fn set_state(&self, db: &mut AppDb, id: &InstanceId, envelope: Option<Envelope>) {
        let value = envelope.map(|envelope| {
            serde_json::to_value(envelope).expect("envelope serializes to a JSON object")
        });
        match id {
            InstanceId::Key(key) => match value {
                Some(value) => db.insert(key.clone(), value),
                None => {
                    db.remove(key);
                }
            },
            InstanceId::Path(segments) => db.set_path(segments, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StateNode;
    use serde_json::json;

    #[test]
    fn keyed_roundtrip() {
        let adapter = DocumentAdapter;
        let mut db = AppDb::new();
        let id = InstanceId::key("doc");

        assert_eq!(adapter.get_state(&db, &id), None);

        let envelope = Envelope::new(StateNode::from("clean"), 1);
        adapter.set_state(&mut db, &id, Some(envelope.clone()));
        assert_eq!(adapter.get_state(&db, &id), Some(envelope));

        adapter.set_state(&mut db, &id, None);
        assert_eq!(adapter.get_state(&db, &id), None);
    }

    #[test]
    fn path_ids_nest_in_the_document() {
        let adapter = DocumentAdapter;
        let mut db = AppDb::new();
        let id = InstanceId::path(["ui", "editor"]);

        let envelope = Envelope::new(StateNode::from("editing"), 2);
        adapter.set_state(&mut db, &id, Some(envelope.clone()));

        assert_eq!(adapter.get_state(&db, &id), Some(envelope));
        assert!(db.get("ui").is_some());
        assert_eq!(db.get("editing"), None);
    }

    #[test]
    fn malformed_slice_reads_as_absent() {
        let adapter = DocumentAdapter;
        let mut db = AppDb::new();
        db.insert("doc", json!("not an envelope"));

        assert_eq!(adapter.get_state(&db, &InstanceId::key("doc")), None);
    }

    #[test]
    fn adapters_leave_unrelated_slices_alone() {
        let adapter = DocumentAdapter;
        let mut db = AppDb::new();
        db.insert("counter", json!(41));

        adapter.set_state(
            &mut db,
            &InstanceId::key("doc"),
            Some(Envelope::new(StateNode::from("clean"), 1)),
        );
        adapter.set_state(&mut db, &InstanceId::key("doc"), None);

        assert_eq!(db.get("counter"), Some(&json!(41)));
    }
}
