use bson::Document;
use bson::oid::ObjectId;
use core::pin::Pin;
use core::task::{Context, Poll};
use etl_config::shared::ExtractConfig;
use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tracing::info;

use crate::concurrency::rate::RateLimitedStream;
use crate::error::EtlResult;
use crate::source::{DocumentStream, Source};

pin_project! {
    /// A governed snapshot of one collection.
    ///
    /// Documents come newest insertion first. The stream ends when the cursor is exhausted or
    /// right after the first read error, which is yielded as an `Err` item.
    #[must_use = "streams do nothing unless polled"]
    pub struct ScanStream {
        #[pin]
        stream: RateLimitedStream<DocumentStream>,
        failed: bool,
    }
}

impl ScanStream {
    /// Wraps a source cursor with a governor delivering at most `read_capacity` documents per
    /// second. A capacity of zero disables the governor.
    pub fn wrap(stream: DocumentStream, read_capacity: u32) -> Self {
        Self {
            stream: RateLimitedStream::wrap(stream, read_capacity),
            failed: false,
        }
    }
}

impl Stream for ScanStream {
    type Item = EtlResult<Document>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.failed {
            return Poll::Ready(None);
        }

        match ready!(this.stream.poll_next(cx)) {
            Some(Err(err)) => {
                *this.failed = true;
                Poll::Ready(Some(Err(err)))
            }
            item => Poll::Ready(item),
        }
    }
}

/// Starts a snapshot scan of the task's collection bounded by `upper_bound`.
///
/// Each call owns a fresh governor, so concurrent scans never share read capacity.
pub async fn scan<S>(
    source: &S,
    extract: &ExtractConfig,
    upper_bound: ObjectId,
    read_capacity: u32,
) -> EtlResult<ScanStream>
where
    S: Source,
{
    let cursor = source.scan(extract, upper_bound).await?;

    info!(
        namespace = %extract.namespace(),
        upper_bound = %upper_bound,
        read_capacity,
        "snapshot scan started"
    );

    Ok(ScanStream::wrap(cursor, read_capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, EtlError};
    use crate::source::memory::MemorySource;
    use bson::doc;
    use futures::StreamExt;
    use serde_json::json;
    use tokio::time::Instant;

    fn extract() -> ExtractConfig {
        ExtractConfig {
            db: "app".to_string(),
            collection: "users".to_string(),
            query: json!({}),
            projection: json!({}),
        }
    }

    fn id(n: u8) -> ObjectId {
        ObjectId::from_bytes([0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, n])
    }

    async fn source_with(count: u8) -> MemorySource {
        let source = MemorySource::new();
        let documents = (1..=count).map(|n| doc! { "_id": id(n), "n": i32::from(n) }).collect();
        source.insert_documents("app.users", documents).await;
        source
    }

    async fn scanned_ids(source: &MemorySource, upper_bound: ObjectId) -> Vec<ObjectId> {
        scan(source, &extract(), upper_bound, 0)
            .await
            .unwrap()
            .map(|item| item.unwrap().get_object_id("_id").unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn scan_is_deterministic_and_bounded() {
        let source = source_with(5).await;

        let first = scanned_ids(&source, id(3)).await;
        let second = scanned_ids(&source, id(3)).await;

        assert_eq!(first, vec![id(3), id(2), id(1)]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn resuming_never_re_emits_newer_documents() {
        let source = source_with(6).await;

        let full = scanned_ids(&source, ObjectId::from_bytes([0xff; 12])).await;
        let resumed = scanned_ids(&source, full[2]).await;

        assert_eq!(resumed, full[2..].to_vec());
    }

    #[tokio::test]
    async fn stream_ends_after_the_first_error() {
        let cursor = futures::stream::iter(vec![
            Ok(doc! { "_id": id(2) }),
            Err(EtlError::from((ErrorKind::SourceQueryFailed, "cursor died"))),
            Ok(doc! { "_id": id(1) }),
        ])
        .boxed();

        let items: Vec<EtlResult<Document>> = ScanStream::wrap(cursor, 0).collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_is_governed_by_the_read_capacity() {
        let source = source_with(12).await;
        let start = Instant::now();

        let count = scan(&source, &extract(), id(12), 5)
            .await
            .unwrap()
            .count()
            .await;

        assert_eq!(count, 12);
        // Two full windows must elapse before the last two documents are delivered.
        assert!(start.elapsed().as_secs() >= 2);
    }
}
