use bson::{Bson, Document, Timestamp};
use chrono::{DateTime, Utc};

use crate::bail;
use crate::error::{ErrorKind, EtlError, EtlResult};

/// Operation tag of an insert entry.
pub const INSERT_OP: &str = "i";
/// Operation tag of an update entry.
pub const UPDATE_OP: &str = "u";
/// Operation tag of a delete entry.
pub const DELETE_OP: &str = "d";

/// Operation tags the tailer forwards. No-ops and commands are never replicated.
pub const CRUD_OPS: [&str; 3] = [INSERT_OP, UPDATE_OP, DELETE_OP];

/// A parsed replica-set oplog entry for one of the replicated operations.
#[derive(Debug, Clone, PartialEq)]
pub struct OplogEntry {
    /// Ordering timestamp of the entry.
    pub ts: Timestamp,
    /// `<db>.<collection>` the entry applies to.
    pub namespace: String,
    /// Sequence hash, only written by older servers.
    pub hash: Option<i64>,
    /// Oplog format version.
    pub version: Option<i32>,
    pub operation: OplogOperation,
}

/// The operation carried by an [`OplogEntry`], discriminated by its `op` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum OplogOperation {
    /// A new document, including its `_id`.
    Insert { document: Document },
    /// An update of the document identified by `id` (taken from `o2._id`).
    ///
    /// `update` is either a replacement document or a modifier document; see
    /// [`UpdateDescription::parse`].
    Update { id: Bson, update: Document },
    /// A removal of the document identified by `id`.
    Delete { id: Bson },
}

impl OplogEntry {
    /// The wall-clock second the entry was written, as UTC.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.ts.time), 0).unwrap_or_default()
    }

    /// Identifier of the affected document.
    pub fn document_id(&self) -> Option<&Bson> {
        match &self.operation {
            OplogOperation::Insert { document } => document.get("_id"),
            OplogOperation::Update { id, .. } | OplogOperation::Delete { id } => Some(id),
        }
    }

    pub fn op_tag(&self) -> &'static str {
        match self.operation {
            OplogOperation::Insert { .. } => INSERT_OP,
            OplogOperation::Update { .. } => UPDATE_OP,
            OplogOperation::Delete { .. } => DELETE_OP,
        }
    }
}

/// Returns `true` when the raw entry was written by a chunk migration between shards.
///
/// Such entries describe data moving around the cluster, not user changes.
pub fn is_from_migrate(raw: &Document) -> bool {
    !matches!(raw.get("fromMigrate"), None | Some(Bson::Boolean(false)))
}

/// Returns the `op` tag of a raw entry, if any.
pub fn raw_op_tag(raw: &Document) -> Option<&str> {
    raw.get_str("op").ok()
}

impl TryFrom<Document> for OplogEntry {
    type Error = EtlError;

    fn try_from(mut raw: Document) -> EtlResult<Self> {
        let ts = match raw.get("ts") {
            Some(Bson::Timestamp(ts)) => *ts,
            _ => bail!(
                ErrorKind::InvalidData,
                "Change-log entry has no timestamp"
            ),
        };

        let namespace = match raw.get_str("ns") {
            Ok(namespace) => namespace.to_owned(),
            Err(_) => bail!(
                ErrorKind::InvalidData,
                "Change-log entry has no namespace"
            ),
        };

        let hash = match raw.get("h") {
            Some(Bson::Int64(hash)) => Some(*hash),
            Some(Bson::Int32(hash)) => Some(i64::from(*hash)),
            _ => None,
        };

        let version = match raw.get("v") {
            Some(Bson::Int32(version)) => Some(*version),
            Some(Bson::Int64(version)) => i32::try_from(*version).ok(),
            _ => None,
        };

        let op = match raw_op_tag(&raw) {
            Some(op) => op.to_owned(),
            None => bail!(
                ErrorKind::InvalidData,
                "Change-log entry has no operation tag"
            ),
        };

        let operation = match op.as_str() {
            INSERT_OP => {
                let document = take_document(&mut raw, "o")?;
                if !document.contains_key("_id") {
                    bail!(
                        ErrorKind::InvalidData,
                        "Inserted document has no _id",
                        namespace
                    );
                }

                OplogOperation::Insert { document }
            }
            UPDATE_OP => {
                let selector = take_document(&mut raw, "o2")?;
                let Some(id) = selector.get("_id").cloned() else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Update entry selector has no _id",
                        namespace
                    );
                };

                OplogOperation::Update {
                    id,
                    update: take_document(&mut raw, "o")?,
                }
            }
            DELETE_OP => {
                let selector = take_document(&mut raw, "o")?;
                let Some(id) = selector.get("_id").cloned() else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Delete entry has no _id",
                        namespace
                    );
                };

                OplogOperation::Delete { id }
            }
            other => bail!(
                ErrorKind::InvalidData,
                "Unsupported change-log operation",
                format!("op `{other}` in {namespace}")
            ),
        };

        Ok(OplogEntry {
            ts,
            namespace,
            hash,
            version,
            operation,
        })
    }
}

fn take_document(raw: &mut Document, key: &'static str) -> EtlResult<Document> {
    match raw.remove(key) {
        Some(Bson::Document(document)) => Ok(document),
        _ => bail!(
            ErrorKind::InvalidData,
            "Change-log entry field is missing or not a document",
            key
        ),
    }
}

/// What an update entry changed.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDescription {
    /// The whole document was replaced.
    Replacement(Document),
    /// Individual fields were set or removed.
    ///
    /// `set` keys are dotted paths relative to the document root.
    Modifiers { set: Document, unset: Vec<String> },
}

impl UpdateDescription {
    /// Interprets the `o` field of an update entry.
    ///
    /// Handles classic `$set`/`$unset` modifiers and the `$v: 2` diff format. Array sub-diffs
    /// of the diff format only record positional changes, so they are not reported.
    pub fn parse(update: &Document) -> Self {
        if let Ok(diff) = update.get_document("diff") {
            let mut set = Document::new();
            let mut unset = Vec::new();
            collect_diff("", diff, &mut set, &mut unset);
            return UpdateDescription::Modifiers { set, unset };
        }

        if !update.keys().any(|key| key.starts_with('$')) {
            return UpdateDescription::Replacement(update.clone());
        }

        let set = update.get_document("$set").cloned().unwrap_or_default();
        let unset = update
            .get_document("$unset")
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default();

        UpdateDescription::Modifiers { set, unset }
    }
}

fn collect_diff(prefix: &str, diff: &Document, set: &mut Document, unset: &mut Vec<String>) {
    for (key, value) in diff {
        let Bson::Document(section) = value else {
            continue;
        };

        match key.as_str() {
            "u" | "i" => {
                for (field, value) in section {
                    set.insert(format!("{prefix}{field}"), value.clone());
                }
            }
            "d" => {
                unset.extend(section.keys().map(|field| format!("{prefix}{field}")));
            }
            nested if nested.len() > 1 && nested.starts_with('s') => {
                if matches!(section.get("a"), Some(Bson::Boolean(true))) {
                    continue;
                }

                collect_diff(&format!("{prefix}{}.", &nested[1..]), section, set, unset);
            }
            _ => {}
        }
    }
}
