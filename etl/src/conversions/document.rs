use bson::{Bson, Document};
use serde_json::{Map, Number, Value};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// Converts a BSON value into the JSON shape indexed by the destination.
///
/// Object ids become their hex string and dates become RFC 3339 strings so they can be
/// mapped as keywords and dates. Types without a natural JSON form fall back to relaxed
/// extended JSON.
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(value) => Value::Bool(*value),
        Bson::Int32(value) => Value::from(*value),
        Bson::Int64(value) => Value::from(*value),
        Bson::Double(value) => Number::from_f64(*value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(value) | Bson::Symbol(value) => Value::String(value.clone()),
        Bson::ObjectId(id) => Value::String(id.to_hex()),
        Bson::DateTime(datetime) => datetime
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| Value::from(datetime.timestamp_millis())),
        Bson::Timestamp(ts) => Value::from(ts.time),
        Bson::Array(values) => Value::Array(values.iter().map(bson_to_json).collect()),
        Bson::Document(document) => document_to_json(document),
        other => other.clone().into_relaxed_extjson(),
    }
}

/// Converts every field of `document` with [`bson_to_json`].
pub fn document_to_json(document: &Document) -> Value {
    let map: Map<String, Value> = document
        .iter()
        .map(|(key, value)| (key.clone(), bson_to_json(value)))
        .collect();

    Value::Object(map)
}

/// Renders a document identifier as the string used for the target document id.
pub fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(id) => id.to_hex(),
        Bson::String(id) => id.clone(),
        Bson::Int32(id) => id.to_string(),
        Bson::Int64(id) => id.to_string(),
        other => bson_to_json(other).to_string(),
    }
}

/// Renders a parent reference as a routing key, skipping nulls.
pub fn parent_to_string(parent: &Bson) -> Option<String> {
    match parent {
        Bson::Null | Bson::Undefined => None,
        other => Some(id_to_string(other)),
    }
}

/// Looks up a field by dotted path.
///
/// A literal key containing dots wins over the nested walk, which is how update entries
/// name nested fields (`"address.city"`).
pub fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = document.get(path) {
        return Some(value);
    }

    let (head, rest) = path.split_once('.')?;
    match document.get(head)? {
        Bson::Document(inner) => lookup_path(inner, rest),
        _ => None,
    }
}

/// Parses a JSON object written in MongoDB extended JSON into a BSON document.
///
/// This lets configured queries express object ids and dates (`{"$oid": ...}`,
/// `{"$date": ...}`).
pub fn json_to_document(value: &Value) -> EtlResult<Document> {
    let converted = Bson::try_from(value.clone()).map_err(|err| {
        etl_error!(
            ErrorKind::ConversionError,
            "Extended JSON could not be converted to BSON",
            err
        )
    })?;

    match converted {
        Bson::Document(document) => Ok(document),
        other => bail!(
            ErrorKind::ConversionError,
            "Expected a JSON object",
            format!("got {:?}", other.element_type())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;
    use serde_json::json;

    #[test]
    fn object_ids_and_dates_become_strings() {
        let id = ObjectId::parse_str("5f1e3c2b9d1e8a0012345678").unwrap();
        let created = bson::DateTime::from_millis(0);
        let document = doc! { "_id": id, "created": created, "score": 1.5, "tags": ["a"] };

        assert_eq!(
            document_to_json(&document),
            json!({
                "_id": "5f1e3c2b9d1e8a0012345678",
                "created": "1970-01-01T00:00:00Z",
                "score": 1.5,
                "tags": ["a"],
            })
        );
    }

    #[test]
    fn ids_render_without_quotes() {
        assert_eq!(id_to_string(&Bson::String("abc".into())), "abc");
        assert_eq!(id_to_string(&Bson::Int64(7)), "7");
        assert_eq!(parent_to_string(&Bson::Null), None);
    }

    #[test]
    fn lookup_prefers_literal_dotted_keys() {
        let document = doc! { "address.city": "Oslo", "address": { "city": "Paris" } };
        let nested = doc! { "address": { "city": "Paris" } };

        assert_eq!(
            lookup_path(&document, "address.city"),
            Some(&Bson::String("Oslo".into()))
        );
        assert_eq!(
            lookup_path(&nested, "address.city"),
            Some(&Bson::String("Paris".into()))
        );
        assert_eq!(lookup_path(&nested, "address.zip"), None);
    }

    #[test]
    fn extended_json_queries_are_parsed() {
        let query = json!({ "owner": { "$oid": "5f1e3c2b9d1e8a0012345678" }, "active": true });

        let document = json_to_document(&query).unwrap();

        assert!(matches!(document.get("owner"), Some(Bson::ObjectId(_))));
        assert_eq!(document.get_bool("active").unwrap(), true);
        assert!(json_to_document(&json!([1, 2])).is_err());
    }
}
