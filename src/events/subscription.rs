//! Read side of a topic subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Receiving end handed out by [`EventBus::subscribe`](crate::EventBus::subscribe).
///
/// Reads return `None` once the bus is closed (or the subscription was
/// removed) and every buffered message has been drained.
#[derive(Debug)]
pub struct Subscription<T> {
    pub(crate) id: u64,
    topic: String,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(id: u64, topic: &str, rx: mpsc::Receiver<T>) -> Self {
        Self {
            id,
            topic: topic.to_string(),
            rx,
        }
    }

    /// Topic this subscription was created for.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receives the next message; `None` when closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Number of buffered, unread messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// `true` if no message is buffered.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// `true` once every sender is gone (bus closed or subscription removed).
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
