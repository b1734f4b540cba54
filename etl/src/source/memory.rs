use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use etl_config::shared::ExtractConfig;
use futures::StreamExt;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::info;

use crate::conversions::document::json_to_document;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::source::{DocumentStream, Source};

/// How a scripted change-log session ends once its entries are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailSessionEnd {
    /// Waits forever, like an idle tailable cursor.
    Pending,
    /// Ends normally, like a cursor the server closed.
    Complete,
    /// Yields a read error.
    Fail,
}

/// Entries returned by one [`Source::tail`] call of a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct TailSession {
    pub entries: Vec<Document>,
    pub end: TailSessionEnd,
}

impl TailSession {
    pub fn new(entries: Vec<Document>, end: TailSessionEnd) -> Self {
        Self { entries, end }
    }
}

struct Inner {
    collections: HashMap<String, Vec<Document>>,
    scan_failure_after: Option<usize>,
    tail_sessions: HashMap<String, VecDeque<TailSession>>,
    scan_calls: Vec<(String, ObjectId)>,
    tail_calls: Vec<(String, DateTime<Utc>)>,
    tail_conditions: Vec<(usize, Arc<Notify>)>,
}

/// In-memory source for tests.
///
/// Collections are kept in insertion order. Change-log reads replay the [`TailSession`]s
/// scripted for the tailed namespace without any server-side filtering, so the client-side
/// filters of the tailer see every entry. Once the scripted sessions run out a tail call waits
/// forever.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        let inner = Inner {
            collections: HashMap::new(),
            scan_failure_after: None,
            tail_sessions: HashMap::new(),
            scan_calls: Vec::new(),
            tail_calls: Vec::new(),
            tail_conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Appends documents to the `<db>.<collection>` namespace, in insertion order.
    pub async fn insert_documents(&self, namespace: &str, documents: Vec<Document>) {
        let mut inner = self.inner.lock().await;
        inner
            .collections
            .entry(namespace.to_string())
            .or_default()
            .extend(documents);
    }

    /// Makes scans fail after delivering `count` documents.
    pub async fn fail_scan_after(&self, count: usize) {
        let mut inner = self.inner.lock().await;
        inner.scan_failure_after = Some(count);
    }

    /// Queues a session served by the next [`Source::tail`] call on `namespace`.
    pub async fn push_tail_session(&self, namespace: &str, session: TailSession) {
        let mut inner = self.inner.lock().await;
        inner
            .tail_sessions
            .entry(namespace.to_string())
            .or_default()
            .push_back(session);
    }

    /// Returns the namespace and upper bound of every scan, in call order.
    pub async fn scan_calls(&self) -> Vec<(String, ObjectId)> {
        let inner = self.inner.lock().await;
        inner.scan_calls.clone()
    }

    /// Returns the namespace and start time of every tail, in call order.
    pub async fn tail_calls(&self) -> Vec<(String, DateTime<Utc>)> {
        let inner = self.inner.lock().await;
        inner.tail_calls.clone()
    }

    /// Returns a [`Notify`] that fires once the source was tailed at least `count` times.
    pub async fn notify_on_tail_calls(&self, count: usize) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        if inner.tail_calls.len() >= count {
            notify.notify_one();
        } else {
            inner.tail_conditions.push((count, notify.clone()));
        }

        notify
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level equality match, enough to exercise task queries.
fn matches_query(document: &Document, query: &Document) -> bool {
    query
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}

/// Inclusion projection over top-level fields. `_id` is always kept.
fn project(document: Document, projection: &Document) -> Document {
    let included: Vec<&String> = projection
        .iter()
        .filter(|(_, value)| {
            !matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false))
        })
        .map(|(key, _)| key)
        .collect();
    if included.is_empty() {
        return document;
    }

    document
        .into_iter()
        .filter(|(key, _)| key == "_id" || included.contains(&key))
        .collect()
}

/// `$lte` on an ObjectId only matches ObjectIds, so other `_id` types are never in bound.
fn within_bound(document: &Document, upper_bound: &ObjectId) -> bool {
    matches!(document.get("_id"), Some(Bson::ObjectId(id)) if id <= upper_bound)
}

impl Source for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn scan(
        &self,
        extract: &ExtractConfig,
        upper_bound: ObjectId,
    ) -> EtlResult<DocumentStream> {
        let query = json_to_document(&extract.query)?;
        let projection = json_to_document(&extract.projection)?;
        let namespace = extract.namespace();

        let mut inner = self.inner.lock().await;
        inner.scan_calls.push((namespace.clone(), upper_bound));

        let documents: Vec<EtlResult<Document>> = inner
            .collections
            .get(&namespace)
            .map(|documents| {
                documents
                    .iter()
                    .rev()
                    .filter(|document| within_bound(document, &upper_bound))
                    .filter(|document| matches_query(document, &query))
                    .map(|document| Ok(project(document.clone(), &projection)))
                    .collect()
            })
            .unwrap_or_default();

        info!(%namespace, count = documents.len(), "serving in-memory scan");

        let mut documents = documents;
        if let Some(count) = inner.scan_failure_after {
            documents.truncate(count);
            documents.push(Err(etl_error!(
                ErrorKind::SourceQueryFailed,
                "Scan cursor failed",
                namespace
            )));
        }

        Ok(stream::iter(documents).boxed())
    }

    async fn tail(
        &self,
        extract: &ExtractConfig,
        from: DateTime<Utc>,
    ) -> EtlResult<DocumentStream> {
        let namespace = extract.namespace();

        let mut inner = self.inner.lock().await;
        inner.tail_calls.push((namespace.clone(), from));

        let calls = inner.tail_calls.len();
        inner.tail_conditions.retain(|(count, notify)| {
            let reached = calls >= *count;
            if reached {
                notify.notify_one();
            }
            !reached
        });

        let session = inner
            .tail_sessions
            .get_mut(&namespace)
            .and_then(VecDeque::pop_front);
        let Some(session) = session else {
            return Ok(stream::pending().boxed());
        };

        info!(%namespace, %from, count = session.entries.len(), "serving in-memory tail session");

        let entries = stream::iter(session.entries.into_iter().map(Ok));
        let stream = match session.end {
            TailSessionEnd::Pending => entries.chain(stream::pending()).boxed(),
            TailSessionEnd::Complete => entries.boxed(),
            TailSessionEnd::Fail => entries
                .chain(stream::once(async move {
                    Err(etl_error!(
                        ErrorKind::SourceStreamClosed,
                        "Change-log cursor failed",
                        namespace
                    ))
                }))
                .boxed(),
        };

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    fn extract() -> ExtractConfig {
        ExtractConfig {
            db: "app".to_string(),
            collection: "users".to_string(),
            query: json!({ "active": true }),
            projection: json!({ "name": 1 }),
        }
    }

    #[tokio::test]
    async fn scan_is_bounded_newest_first_and_projected() {
        let ids: Vec<ObjectId> = (1..=3u8)
            .map(|n| ObjectId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, n]))
            .collect();
        let source = MemorySource::new();
        source
            .insert_documents(
                "app.users",
                vec![
                    doc! { "_id": ids[0], "name": "a", "active": true },
                    doc! { "_id": ids[1], "name": "b", "active": false },
                    doc! { "_id": ids[2], "name": "c", "active": true },
                ],
            )
            .await;

        let documents: Vec<Document> = source
            .scan(&extract(), ids[1])
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(documents, vec![doc! { "_id": ids[0], "name": "a" }]);
    }

    #[tokio::test]
    async fn scan_skips_ids_that_are_not_object_ids() {
        let id = ObjectId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let source = MemorySource::new();
        source
            .insert_documents(
                "app.users",
                vec![
                    doc! { "_id": "legacy-user", "name": "a", "active": true },
                    doc! { "_id": 42, "name": "b", "active": true },
                    doc! { "_id": id, "name": "c", "active": true },
                ],
            )
            .await;

        let documents: Vec<Document> = source
            .scan(&extract(), ObjectId::parse_str("ffffffffffffffffffffffff").unwrap())
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(documents, vec![doc! { "_id": id, "name": "c" }]);
    }

    #[tokio::test]
    async fn tail_sessions_are_served_in_order() {
        let source = MemorySource::new();
        source
            .push_tail_session(
                "app.users",
                TailSession::new(vec![doc! { "op": "n" }], TailSessionEnd::Fail),
            )
            .await;
        source
            .push_tail_session(
                "app.orders",
                TailSession::new(Vec::new(), TailSessionEnd::Complete),
            )
            .await;

        let items: Vec<EtlResult<Document>> = source
            .tail(&extract(), Utc::now())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(
            items[1].as_ref().unwrap_err().kind(),
            ErrorKind::SourceStreamClosed
        );
        assert_eq!(source.tail_calls().await.len(), 1);
    }
}
