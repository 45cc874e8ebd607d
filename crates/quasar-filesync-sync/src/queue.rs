//! FIFO message queue between the transport and the engine.
//!
//! The transport pushes from a synchronous callback; the engine awaits
//! [`MessageQueue::next`]. Consumers waiting at the same time are served in
//! the order they asked, and messages come out in the order they went in.

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue was closed.
    #[error("queue closed")]
    Closed,
    /// A bounded queue is at capacity; the message was dropped.
    #[error("queue full")]
    Full,
}

enum Sender<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>),
}

enum Receiver<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

impl<T> Receiver<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Receiver::Unbounded(rx) => rx.recv().await,
            Receiver::Bounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<T> {
        match self {
            Receiver::Unbounded(rx) => rx.try_recv().ok(),
            Receiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Async FIFO queue with close semantics.
///
/// Unbounded by default. A bounded queue drops the newest message when full.
pub struct MessageQueue<T> {
    sender: Sender<T>,
    // tokio's Mutex hands out the lock in request order, which keeps
    // concurrent consumers FIFO.
    receiver: Mutex<Receiver<T>>,
    closed: CancellationToken,
    capacity: Option<usize>,
}

impl<T: Send> MessageQueue<T> {
    /// Create a queue with no capacity limit.
    pub fn unbounded() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Sender::Unbounded(tx),
            receiver: Mutex::new(Receiver::Unbounded(rx)),
            closed: CancellationToken::new(),
            capacity: None,
        }
    }

    /// Create a queue holding at most `capacity` messages (minimum one).
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: Sender::Bounded(tx),
            receiver: Mutex::new(Receiver::Bounded(rx)),
            closed: CancellationToken::new(),
            capacity: Some(capacity),
        }
    }

    /// Create a queue from an optional capacity.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Capacity limit, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Enqueue a message without blocking.
    ///
    /// Wakes the longest-waiting consumer if one is parked.
    pub fn push(&self, message: T) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        match &self.sender {
            Sender::Unbounded(tx) => tx.send(message).map_err(|_| QueueError::Closed),
            Sender::Bounded(tx) => tx.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }),
        }
    }

    /// Wait for the oldest message.
    ///
    /// Returns `None` once the queue is closed, including for consumers
    /// already parked when [`close`](Self::close) is called.
    pub async fn next(&self) -> Option<T> {
        let mut receiver = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return None,
            guard = self.receiver.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            message = receiver.recv() => message,
        }
    }

    /// Take the oldest message if one is ready.
    pub fn try_next(&self) -> Option<T> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.receiver.try_lock().ok()?.try_recv()
    }

    /// Close the queue. Buffered messages are discarded.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
