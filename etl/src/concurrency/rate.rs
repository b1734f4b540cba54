use core::pin::Pin;
use core::task::{Context, Poll};
use futures::{Future, Stream, ready};
use pin_project_lite::pin_project;
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tracing::debug;

/// Length of the window the read ceiling applies to.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

pin_project! {
    /// A stream adapter that delivers at most `ceiling` items per one-second window.
    ///
    /// Once the ceiling is reached the wrapped stream is not polled again until the window
    /// rolls over, so the producer is suspended rather than buffered. Each instance owns its
    /// counter. A ceiling of zero disables throttling.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct RateLimitedStream<S> {
        #[pin]
        stream: S,
        #[pin]
        window: Option<Sleep>,
        ceiling: u32,
        delivered: u32,
        paused: bool,
    }
}

impl<S: Stream> RateLimitedStream<S> {
    /// Creates a new [`RateLimitedStream`]; the first window opens on the first poll.
    pub fn wrap(stream: S, ceiling: u32) -> Self {
        Self {
            stream,
            window: None,
            ceiling,
            delivered: 0,
            paused: false,
        }
    }

    /// Number of items delivered in the current window.
    pub fn delivered_in_window(&self) -> u32 {
        self.delivered
    }
}

impl<S: Stream> Stream for RateLimitedStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.ceiling == 0 {
            return this.stream.poll_next(cx);
        }

        if this.window.is_none() {
            this.window.set(Some(tokio::time::sleep(RATE_WINDOW)));
        }

        if let Some(mut window) = this.window.as_mut().as_pin_mut() {
            if window.deadline() <= Instant::now() {
                *this.delivered = 0;
                window.as_mut().reset(Instant::now() + RATE_WINDOW);
            } else if *this.delivered >= *this.ceiling {
                if !*this.paused {
                    debug!(ceiling = *this.ceiling, "read ceiling reached, stream paused");
                    *this.paused = true;
                }

                ready!(window.as_mut().poll(cx));

                debug!("rate window rolled over, stream resumed");
                *this.paused = false;
                *this.delivered = 0;
                window.as_mut().reset(Instant::now() + RATE_WINDOW);
            }
        }

        match ready!(this.stream.poll_next(cx)) {
            Some(item) => {
                *this.delivered += 1;
                Poll::Ready(Some(item))
            }
            None => {
                // Release the timer once the producer is done.
                this.window.set(None);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::BTreeMap;

    /// Collects the stream and groups delivery instants by whole seconds since `start`.
    async fn deliveries_per_second<S: Stream + Unpin>(
        mut stream: S,
        start: Instant,
    ) -> BTreeMap<u64, usize> {
        let mut per_second = BTreeMap::new();
        while stream.next().await.is_some() {
            *per_second.entry(start.elapsed().as_secs()).or_default() += 1;
        }

        per_second
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_ceiling_per_window() {
        let start = Instant::now();
        let stream = RateLimitedStream::wrap(futures::stream::iter(0..25), 10);

        let per_second = deliveries_per_second(Box::pin(stream), start).await;

        assert_eq!(per_second, BTreeMap::from([(0, 10), (1, 10), (2, 5)]));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ceiling_never_pauses() {
        let start = Instant::now();
        let stream = RateLimitedStream::wrap(futures::stream::iter(0..10_000), 0);

        let per_second = deliveries_per_second(Box::pin(stream), start).await;

        assert_eq!(per_second, BTreeMap::from([(0, 10_000)]));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_when_the_window_rolls_over_unpaused() {
        let mut stream = Box::pin(RateLimitedStream::wrap(futures::stream::iter(0..6), 4));

        for _ in 0..3 {
            stream.next().await.unwrap();
        }
        assert_eq!(stream.delivered_in_window(), 3);

        // Sleeping past the window must not carry the old count over.
        tokio::time::sleep(RATE_WINDOW * 2).await;
        let start = Instant::now();
        let rest: Vec<_> = stream.as_mut().collect().await;

        assert_eq!(rest, vec![3, 4, 5]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn stream_end_releases_the_window() {
        let mut stream = Box::pin(RateLimitedStream::wrap(futures::stream::iter(0..2), 5));

        while stream.next().await.is_some() {}

        assert!(stream.window.is_none());
    }
}
