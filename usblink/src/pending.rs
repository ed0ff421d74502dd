//! One-shot completion handles returned by session operations.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, sync_channel};
use std::time::Duration;

use crate::error::{Error, Result};

/// Create a connected reply/pending pair.
pub(crate) fn completion<T>() -> (Reply<T>, Pending<T>) {
    let (tx, rx) = sync_channel(1);
    (Reply { tx }, Pending { rx })
}

/// Worker-side half: resolves the caller's operation exactly once.
pub(crate) struct Reply<T> {
    tx: SyncSender<Result<T>>,
}

impl<T> Reply<T> {
    /// Deliver the result. A caller that stopped waiting is ignored.
    pub(crate) fn send(self, result: Result<T>) {
        let _ = self.tx.try_send(result);
    }
}

/// Caller-side half of an operation submitted to a session.
///
/// The operation runs on the session worker whether or not anyone waits; a
/// dropped `Pending` simply discards the result.
#[must_use = "the operation result is only observable through this handle"]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// Block until the operation completes.
    ///
    /// Note that `connect` may stay pending indefinitely while a permission
    /// prompt is outstanding.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(Error::Closed))
    }

    /// Block for at most `timeout`. Returns `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::Closed)),
        }
    }

    /// Poll without blocking. Returns `None` if still pending.
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::Closed)),
        }
    }
}
