// SPDX-License-Identifier: Apache-2.0

//! Bounded MPSC channel used to carry tailer events to the source runner.
//!
//! Thin wrapper over flume so callers can both await capacity (tailers, which
//! must not drop entries) and try a non-blocking send (best-effort notices).

use flume::{Receiver, Sender, TrySendError};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// Receiver was dropped
    Disconnected,
    /// Channel is at capacity (only returned by `try_send`)
    Full,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
            SendError::Full => write!(f, "channel full"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> BoundedSender<T> {
    /// Waits for capacity, then sends.
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Sends without waiting. The item is lost when the channel is full.
    pub fn try_send(&self, item: T) -> Result<(), SendError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Next item, or `None` once every sender is gone and the queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn send_then_receive_in_order() {
        let (tx, mut rx) = bounded(4);

        assert_ok!(tx.send(1).await);
        assert_ok!(tx.send(2).await);
        drop(tx);

        assert_eq!(rx.next().await, Some(1));
        assert_eq!(rx.next().await, Some(2));
        // all senders dropped and queue drained
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn send_waits_for_capacity() {
        let (tx, mut rx) = bounded(1);

        assert_ok!(tx.send(10).await);

        let mut blocked = spawn(async { tx.send(11).await });
        assert_pending!(blocked.poll());

        assert_eq!(rx.next().await, Some(10));
        assert_ok!(assert_ready!(blocked.poll()));
    }

    #[test]
    fn try_send_reports_full_and_disconnected() {
        let (tx, rx) = bounded(1);

        assert_eq!(tx.try_send(1), Ok(()));
        assert_eq!(tx.try_send(2), Err(SendError::Full));
        assert_eq!(rx.try_recv(), Some(1));

        drop(rx);
        assert_eq!(tx.try_send(3), Err(SendError::Disconnected));
        assert!(tx.is_disconnected());
    }
}
