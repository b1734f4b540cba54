use bson::oid::ObjectId;
use bson::{Bson, Document, Timestamp, doc};
use chrono::{DateTime, Utc};
use etl_config::shared::{ExtractConfig, MongoConfig};
use futures::StreamExt;
use mongodb::options::{ClientOptions, CursorType, FindOptions};
use mongodb::{Client, Collection};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info};

use crate::conversions::document::json_to_document;
use crate::error::{EtlError, EtlResult};
use crate::source::{DocumentStream, Source};
use crate::types::CRUD_OPS;

/// Database holding the replica-set change log.
pub const OPLOG_DB: &str = "local";
/// Collection holding the replica-set change log.
pub const OPLOG_COLLECTION: &str = "oplog.rs";

/// Source reading a MongoDB replica set through the official driver.
#[derive(Debug, Clone)]
pub struct MongoSource {
    client: Client,
}

impl MongoSource {
    /// Connects to the deployment and checks that it answers a `ping`.
    pub async fn connect(config: &MongoConfig) -> EtlResult<Self> {
        let mut options = ClientOptions::parse(config.url.expose_secret().as_str()).await?;
        if let Some(app_name) = &config.options.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(max_pool_size) = config.options.max_pool_size {
            options.max_pool_size = Some(max_pool_size);
        }
        if let Some(connect_timeout_ms) = config.options.connect_timeout_ms {
            options.connect_timeout = Some(Duration::from_millis(connect_timeout_ms));
        }

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        info!("connected to mongodb");

        Ok(Self { client })
    }

    fn collection(&self, db: &str, collection: &str) -> Collection<Document> {
        self.client.database(db).collection(collection)
    }
}

/// Builds the snapshot filter: the task query with `_id` bounded by `upper_bound`.
///
/// The bound replaces any `_id` condition of the query.
pub fn scan_filter(extract: &ExtractConfig, upper_bound: ObjectId) -> EtlResult<Document> {
    let mut filter = json_to_document(&extract.query)?;
    filter.insert("_id", doc! { "$lte": upper_bound });

    Ok(filter)
}

/// Builds the change-log filter for the task's namespace, starting at the second of `from`.
pub fn tail_filter(extract: &ExtractConfig, from: DateTime<Utc>) -> Document {
    let time = u32::try_from(from.timestamp().max(0)).unwrap_or(u32::MAX);
    let start = Timestamp { time, increment: 0 };
    let ops: Vec<Bson> = CRUD_OPS.iter().map(|op| Bson::from(*op)).collect();

    doc! {
        "ns": extract.namespace(),
        "ts": { "$gte": start },
        "fromMigrate": { "$exists": false },
        "op": { "$in": ops },
    }
}

/// Cursor options of the change-log tail.
///
/// `oplog_replay` lets servers older than 4.4 seek on `ts` instead of walking the whole oplog.
pub fn tail_options() -> FindOptions {
    FindOptions::builder()
        .cursor_type(CursorType::TailableAwait)
        .oplog_replay(true)
        .no_cursor_timeout(true)
        .build()
}

impl Source for MongoSource {
    fn name() -> &'static str {
        "mongodb"
    }

    async fn scan(
        &self,
        extract: &ExtractConfig,
        upper_bound: ObjectId,
    ) -> EtlResult<DocumentStream> {
        let filter = scan_filter(extract, upper_bound)?;
        let projection = json_to_document(&extract.projection)?;
        debug!(namespace = %extract.namespace(), %filter, "opening snapshot cursor");

        let collection = self.collection(&extract.db, &extract.collection);
        let mut find = collection.find(filter).sort(doc! { "$natural": -1 });
        if !projection.is_empty() {
            find = find.projection(projection);
        }
        let cursor = find.await?;

        Ok(cursor.map(|item| item.map_err(EtlError::from)).boxed())
    }

    async fn tail(
        &self,
        extract: &ExtractConfig,
        from: DateTime<Utc>,
    ) -> EtlResult<DocumentStream> {
        let filter = tail_filter(extract, from);
        debug!(namespace = %extract.namespace(), %filter, "opening change-log cursor");

        let cursor = self
            .collection(OPLOG_DB, OPLOG_COLLECTION)
            .find(filter)
            .with_options(tail_options())
            .await?;

        Ok(cursor.map(|item| item.map_err(EtlError::from)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(query: serde_json::Value) -> ExtractConfig {
        ExtractConfig {
            db: "app".to_string(),
            collection: "users".to_string(),
            query,
            projection: json!({}),
        }
    }

    #[test]
    fn scan_filter_bounds_the_id_over_the_query() {
        let bound = ObjectId::parse_str("5f1e3c2b9d1e8a0012345678").unwrap();
        let extract = extract(json!({ "active": true, "_id": { "$gt": 1 } }));

        let filter = scan_filter(&extract, bound).unwrap();

        assert_eq!(filter, doc! { "active": true, "_id": { "$lte": bound } });
    }

    #[test]
    fn tail_cursor_awaits_and_replays_the_oplog() {
        let options = tail_options();

        assert!(matches!(options.cursor_type, Some(CursorType::TailableAwait)));
        assert_eq!(options.oplog_replay, Some(true));
        assert_eq!(options.no_cursor_timeout, Some(true));
    }

    #[test]
    fn tail_filter_targets_the_namespace_from_the_given_second() {
        let from = DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap();

        let start = Timestamp {
            time: 1_700_000_000,
            increment: 0,
        };

        let filter = tail_filter(&extract(json!({})), from);

        assert_eq!(
            filter,
            doc! {
                "ns": "app.users",
                "ts": { "$gte": start },
                "fromMigrate": { "$exists": false },
                "op": { "$in": ["i", "u", "d"] },
            }
        );
    }
}
