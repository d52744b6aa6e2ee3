//! Async stream sources.
//!
//! [`StreamSource`] turns any `futures` stream into a [`PushSource`], so an
//! async feed can back a [`ForeignStreamAdapter`](super::ForeignStreamAdapter).
//! Each subscription builds a fresh stream and drives it on a local tokio
//! task; dropping the subscription aborts the task.
//!
//! Subscribing must happen inside a [`tokio::task::LocalSet`], since graph
//! nodes are not `Send`.

use std::fmt;

use futures_util::stream::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::trace;

use super::adapter::PushSource;

/// A push source backed by a stream factory.
pub struct StreamSource<F> {
    make_stream: F,
}

impl<F> StreamSource<F> {
    /// `make_stream` is called once per subscription.
    pub fn new(make_stream: F) -> Self {
        Self { make_stream }
    }
}

impl<T, S, F> PushSource<T> for StreamSource<F>
where
    T: 'static,
    S: Stream<Item = T> + 'static,
    F: Fn() -> S,
{
    type Subscription = StreamSubscription;

    fn subscribe(&self, mut push: Box<dyn FnMut(T)>) -> Self::Subscription {
        let stream = (self.make_stream)();
        let task = tokio::task::spawn_local(async move {
            futures_util::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                push(item);
            }
            trace!("stream source finished");
        });
        StreamSubscription { task: Some(task) }
    }
}

impl<F> fmt::Debug for StreamSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").finish_non_exhaustive()
    }
}

/// The task driving a subscribed stream. Dropping it aborts the task.
#[derive(Debug)]
pub struct StreamSubscription {
    task: Option<JoinHandle<()>>,
}

impl StreamSubscription {
    /// Whether the stream has been exhausted.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
