use chrono::{DateTime, Utc};
use core::pin::Pin;
use core::task::{Context, Poll};
use etl_config::shared::ExtractConfig;
use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tracing::{debug, info};

use crate::error::EtlResult;
use crate::source::{DocumentStream, Source};
use crate::types::{CRUD_OPS, OplogEntry, is_from_migrate, raw_op_tag};

pin_project! {
    /// Change-log entries of one namespace, parsed into [`OplogEntry`] values.
    ///
    /// Entries written by chunk migrations, entries of other namespaces and non-CRUD entries
    /// are dropped even when the source already filters them. The stream ends right after the
    /// first read or parse error, which is yielded as an `Err` item.
    #[must_use = "streams do nothing unless polled"]
    pub struct OplogStream {
        #[pin]
        stream: DocumentStream,
        namespace: String,
        failed: bool,
        skipped: u64,
    }
}

impl OplogStream {
    pub fn wrap(stream: DocumentStream, namespace: impl Into<String>) -> Self {
        Self {
            stream,
            namespace: namespace.into(),
            failed: false,
            skipped: 0,
        }
    }

    /// Number of raw entries dropped by the client-side filters so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl Stream for OplogStream {
    type Item = EtlResult<OplogEntry>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.failed {
            return Poll::Ready(None);
        }

        loop {
            let raw = match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(raw)) => raw,
                Some(Err(err)) => {
                    *this.failed = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => return Poll::Ready(None),
            };

            if is_from_migrate(&raw) {
                debug!(namespace = %this.namespace, "dropping migration entry");
                *this.skipped += 1;
                continue;
            }

            if raw.get_str("ns").ok() != Some(this.namespace.as_str()) {
                *this.skipped += 1;
                continue;
            }

            if !raw_op_tag(&raw).is_some_and(|op| CRUD_OPS.contains(&op)) {
                *this.skipped += 1;
                continue;
            }

            return match OplogEntry::try_from(raw) {
                Ok(entry) => Poll::Ready(Some(Ok(entry))),
                Err(err) => {
                    *this.failed = true;
                    Poll::Ready(Some(Err(err)))
                }
            };
        }
    }
}

/// Starts following the change log of the task's collection from `from`.
///
/// The returned stream waits for new entries and is not expected to end on its own.
pub async fn tail<S>(
    source: &S,
    extract: &ExtractConfig,
    from: DateTime<Utc>,
) -> EtlResult<OplogStream>
where
    S: Source,
{
    let namespace = extract.namespace();
    let cursor = source.tail(extract, from).await?;

    info!(%namespace, %from, "change-log tail started");

    Ok(OplogStream::wrap(cursor, namespace))
}
