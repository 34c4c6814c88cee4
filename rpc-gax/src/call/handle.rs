//! Call handles and cancellation.
//!
//! Every invocation runs as one spawned task whose result is published once
//! on a oneshot channel. The [`CallHandle`] awaits that channel; a callback
//! registered with [`CallHandle::on_complete`] observes the same result, so
//! both delivery styles share one execution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{oneshot, watch};

use crate::GaxError;

/// Cooperative cancellation signal shared by a call and its handle.
///
/// Cancelling is idempotent; cancelling a settled call has no effect.
#[derive(Clone, Debug)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

impl Canceller {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// The pending result of one invocation.
///
/// Awaiting the handle yields the call's result. Dropping it does not stop
/// the call; use [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct CallHandle<T> {
    rx: oneshot::Receiver<Result<T, GaxError>>,
    canceller: Canceller,
}

impl<T: Send + 'static> CallHandle<T> {
    /// Run `execution` on its own task, racing it against cancellation.
    ///
    /// A cancel that lands before the task first runs wins, so the
    /// execution never starts.
    pub(crate) fn spawn<Fut>(execution: Fut) -> Self
    where
        Fut: Future<Output = Result<T, GaxError>> + Send + 'static,
    {
        let canceller = Canceller::new();
        let (tx, rx) = oneshot::channel();
        let signal = canceller.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = signal.cancelled() => Err(GaxError::cancelled("call cancelled")),
                result = execution => result,
            };
            let _ = tx.send(result);
        });
        Self { rx, canceller }
    }

    /// A handle that is already settled with `err`.
    pub(crate) fn failed(err: GaxError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self {
            rx,
            canceller: Canceller::new(),
        }
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Deliver the result to `callback` instead of awaiting it.
    ///
    /// The callback runs exactly once, on a spawned task. The returned
    /// canceller still cancels the call.
    pub fn on_complete<F>(self, callback: F) -> Canceller
    where
        F: FnOnce(Result<T, GaxError>) + Send + 'static,
    {
        let canceller = self.canceller.clone();
        tokio::spawn(async move {
            callback(self.await);
        });
        canceller
    }
}

impl<T> Future for CallHandle<T> {
    type Output = Result<T, GaxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(GaxError::cancelled("call task ended without a result")),
        })
    }
}
