use bson::{Bson, Document, Timestamp, doc};

use crate::types::{DELETE_OP, INSERT_OP, UPDATE_OP};

fn entry(namespace: &str, time: u32, op: &str) -> Document {
    let ts = Timestamp { time, increment: 1 };

    doc! {
        "ts": ts,
        "h": 0i64,
        "v": 2,
        "op": op,
        "ns": namespace,
    }
}

/// A raw insert entry written at `time` (epoch seconds).
pub fn insert_entry(namespace: &str, time: u32, document: Document) -> Document {
    let mut entry = entry(namespace, time, INSERT_OP);
    entry.insert("o", document);
    entry
}

/// A raw update entry; `update` is either a modifier or a replacement document.
pub fn update_entry(namespace: &str, time: u32, id: impl Into<Bson>, update: Document) -> Document {
    let mut entry = entry(namespace, time, UPDATE_OP);
    entry.insert("o2", doc! { "_id": id.into() });
    entry.insert("o", update);
    entry
}

pub fn delete_entry(namespace: &str, time: u32, id: impl Into<Bson>) -> Document {
    let mut entry = entry(namespace, time, DELETE_OP);
    entry.insert("o", doc! { "_id": id.into() });
    entry
}

/// A no-op entry, as written periodically by an idle primary.
pub fn noop_entry(namespace: &str, time: u32) -> Document {
    let mut entry = entry(namespace, time, "n");
    entry.insert("o", doc! { "msg": "periodic noop" });
    entry
}

/// Marks an entry as written by a chunk migration.
pub fn migrated(mut entry: Document) -> Document {
    entry.insert("fromMigrate", true);
    entry
}
