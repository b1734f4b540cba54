use bson::{Bson, Document};
use etl_config::shared::{TaskConfig, TransformConfig};
use serde_json::{Map, Value};
use tracing::warn;

use crate::conversions::document::{bson_to_json, id_to_string, lookup_path, parent_to_string};
use crate::transform::Transformer;
use crate::types::{Mutation, OplogEntry, OplogOperation, UpdateDescription};

/// Field-mapping transformer driven by a task's `transform` section.
///
/// Mapped fields are copied from their source path to their target name; with an empty
/// mapping every top-level field except `_id` is copied. Updates only carry the mapped fields
/// they touch, removed fields become `null` and an update touching none is dropped. A full
/// replacement re-indexes the whole document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingTransformer;

impl MappingTransformer {
    pub fn new() -> Self {
        Self
    }
}

/// Builds the index body of a full document.
fn map_document(transform: &TransformConfig, document: &Document) -> Value {
    if transform.mapping.is_empty() {
        let map: Map<String, Value> = document
            .iter()
            .filter(|(key, _)| key.as_str() != "_id")
            .map(|(key, value)| (key.clone(), bson_to_json(value)))
            .collect();
        return Value::Object(map);
    }

    let map: Map<String, Value> = transform
        .mapping
        .iter()
        .filter_map(|(source, target)| {
            lookup_path(document, source).map(|value| (target.clone(), bson_to_json(value)))
        })
        .collect();

    Value::Object(map)
}

fn document_parent(transform: &TransformConfig, document: &Document) -> Option<String> {
    let field = transform.parent.as_deref()?;
    lookup_path(document, field).and_then(parent_to_string)
}

/// Inserts `value` at a dotted path, creating intermediate objects.
fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Finds the value an update assigns to `path`, directly or through a parent object.
fn updated_value<'a>(set: &'a Document, path: &str) -> Option<Option<&'a Bson>> {
    if let Some(value) = set.get(path) {
        return Some(Some(value));
    }

    let mut prefix_end = path.len();
    while let Some(dot) = path[..prefix_end].rfind('.') {
        let (prefix, rest) = (&path[..dot], &path[dot + 1..]);
        if let Some(value) = set.get(prefix) {
            // The parent object was replaced; the field may be gone from it.
            return Some(match value {
                Bson::Document(inner) => lookup_path(inner, rest),
                _ => None,
            });
        }
        prefix_end = dot;
    }

    None
}

fn is_unset(unset: &[String], path: &str) -> bool {
    unset.iter().any(|field| {
        field == path
            || path
                .strip_prefix(field.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

/// Builds the partial body of a modifier update.
fn map_modifiers(
    transform: &TransformConfig,
    set: &Document,
    unset: &[String],
) -> Map<String, Value> {
    let mut data = Map::new();

    if transform.mapping.is_empty() {
        for (field, value) in set {
            if field != "_id" {
                insert_path(&mut data, field, bson_to_json(value));
            }
        }
        for field in unset {
            insert_path(&mut data, field, Value::Null);
        }

        return data;
    }

    for (source, target) in &transform.mapping {
        if let Some(value) = updated_value(set, source) {
            let value = value.map(bson_to_json).unwrap_or(Value::Null);
            data.insert(target.clone(), value);
        } else if is_unset(unset, source) {
            data.insert(target.clone(), Value::Null);
        }
    }

    data
}

impl Transformer for MappingTransformer {
    fn document(&self, task: &TaskConfig, document: Document) -> Option<Mutation> {
        let Some(id) = document.get("_id") else {
            warn!(index = %task.load.index, "dropping document without _id");
            return None;
        };

        let data = map_document(&task.transform, &document);
        let parent = document_parent(&task.transform, &document);

        Some(Mutation::create(id_to_string(id), data).with_parent(parent))
    }

    async fn oplog(&self, task: &TaskConfig, entry: OplogEntry) -> Option<Mutation> {
        match entry.operation {
            OplogOperation::Insert { document } => self.document(task, document),
            OplogOperation::Delete { id } => Some(Mutation::delete(id_to_string(&id))),
            OplogOperation::Update { id, update } => match UpdateDescription::parse(&update) {
                UpdateDescription::Replacement(mut document) => {
                    if !document.contains_key("_id") {
                        document.insert("_id", id);
                    }
                    self.document(task, document)
                }
                UpdateDescription::Modifiers { set, unset } => {
                    let data = map_modifiers(&task.transform, &set, &unset);
                    if data.is_empty() {
                        return None;
                    }

                    let parent = task
                        .transform
                        .parent
                        .as_deref()
                        .and_then(|field| updated_value(&set, field).flatten())
                        .and_then(parent_to_string);

                    Some(
                        Mutation::update(id_to_string(&id), Value::Object(data))
                            .with_parent(parent),
                    )
                }
            },
        }
    }
}
