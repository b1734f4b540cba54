use core::pin::Pin;
use core::task::{Context, Poll};
use etl_config::shared::BatchConfig;
use futures::{Future, Stream, ready};
use pin_project_lite::pin_project;
use tokio::time::Sleep;

// Implementation adapted from:
//  https://github.com/tokio-rs/tokio/blob/master/tokio-stream/src/stream_ext/chunks_timeout.rs.
pin_project! {
    /// A stream adapter that groups items into time-or-count batches.
    ///
    /// A batch is emitted when either:
    /// - it holds `max_size` items
    /// - `max_fill_ms` elapsed since its first item arrived
    ///
    /// Items keep their order within and across batches, an idle stream emits nothing and the
    /// last partial batch is emitted when the inner stream ends.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct BatchStream<B, S: Stream<Item = B>> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Option<Sleep>,
        items: Vec<B>,
        batch_config: BatchConfig,
        inner_stream_ended: bool,
    }
}

impl<B, S: Stream<Item = B>> BatchStream<B, S> {
    /// Creates a new [`BatchStream`].
    ///
    /// A `max_size` of zero is treated as one so every item still gets emitted.
    pub fn wrap(stream: S, batch_config: BatchConfig) -> Self {
        let batch_config = BatchConfig::new(batch_config.max_size.max(1), batch_config.max_fill_ms);

        BatchStream {
            stream,
            deadline: None,
            items: Vec::new(),
            batch_config,
            inner_stream_ended: false,
        }
    }
}

impl<B, S: Stream<Item = B>> Stream for BatchStream<B, S> {
    type Item = Vec<B>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.inner_stream_ended {
            return Poll::Ready(None);
        }

        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => break,
                Poll::Ready(Some(item)) => {
                    // The fill window opens with the first item of a batch.
                    if this.items.is_empty() {
                        this.items.reserve_exact(this.batch_config.max_size);
                        this.deadline
                            .set(Some(tokio::time::sleep(this.batch_config.max_fill())));
                    }

                    this.items.push(item);

                    if this.items.len() >= this.batch_config.max_size {
                        this.deadline.set(None);
                        return Poll::Ready(Some(std::mem::take(this.items)));
                    }
                }
                Poll::Ready(None) => {
                    *this.inner_stream_ended = true;
                    this.deadline.set(None);

                    let last = if this.items.is_empty() {
                        None
                    } else {
                        Some(std::mem::take(this.items))
                    };

                    return Poll::Ready(last);
                }
            }
        }

        if this.items.is_empty() {
            return Poll::Pending;
        }

        if let Some(deadline) = this.deadline.as_mut().as_pin_mut() {
            ready!(deadline.poll(cx));
        }
        this.deadline.set(None);

        Poll::Ready(Some(std::mem::take(this.items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::channel::mpsc;
    use futures::future::poll_fn;
    use std::time::Duration;
    use tokio::time::Instant;

    fn assert_waited(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "waited {elapsed:?}, expected about {expected:?}"
        );
    }

    #[tokio::test]
    async fn emits_full_batches_then_the_remainder() {
        let batches: Vec<Vec<i32>> =
            BatchStream::wrap(futures::stream::iter(1..=7), BatchConfig::new(3, 10_000))
                .collect()
                .await;

        assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[tokio::test]
    async fn empty_stream_emits_nothing() {
        let batches: Vec<Vec<i32>> =
            BatchStream::wrap(futures::stream::iter(Vec::<i32>::new()), BatchConfig::new(3, 10))
                .collect()
                .await;

        assert!(batches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_is_emitted_when_the_window_closes() {
        let (tx, rx) = mpsc::unbounded();
        let mut stream = Box::pin(BatchStream::wrap(rx, BatchConfig::new(50, 1000)));

        let start = Instant::now();
        tx.unbounded_send(1).unwrap();
        tx.unbounded_send(2).unwrap();

        let batch = stream.next().await.unwrap();

        assert_eq!(batch, vec![1, 2]);
        assert_waited(start, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn window_starts_with_the_first_item() {
        let (tx, rx) = mpsc::unbounded();
        let mut stream = Box::pin(BatchStream::wrap(rx, BatchConfig::new(50, 1000)));

        // Nothing is pending, so the stream must stay idle however long we wait.
        poll_fn(|cx| match stream.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Ready(()),
            _ => panic!("expected pending on an idle stream"),
        })
        .await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let first_item_at = Instant::now();
        tx.unbounded_send(1).unwrap();
        let batch = stream.next().await.unwrap();

        assert_eq!(batch, vec![1]);
        assert_waited(first_item_at, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_does_not_wait_for_the_window() {
        let (tx, rx) = mpsc::unbounded();
        let mut stream = Box::pin(BatchStream::wrap(rx, BatchConfig::new(2, 1000)));

        let start = Instant::now();
        for item in 0..3 {
            tx.unbounded_send(item).unwrap();
        }

        assert_eq!(stream.next().await.unwrap(), vec![0, 1]);
        assert_waited(start, Duration::ZERO);
        assert_eq!(stream.next().await.unwrap(), vec![2]);
        assert_waited(start, Duration::from_millis(1000));
    }
}
