//! Completion-signalled backend operations.
//!
//! Backend factories (manifest negotiation, file permission lookup, audio graph and
//! node creation) finish on backend-owned threads. They hand back an
//! [`AsyncOperation`] that the controller blocks on with `pollster`, so `load_content`
//! keeps its "returns once the backend is done" contract while the operation itself
//! stays an ordinary future.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::PlaybackError;

/// Terminal status of an asynchronous backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Completed,
    Canceled,
    Error,
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsyncStatus::Completed => "completed",
            AsyncStatus::Canceled => "canceled",
            AsyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status attached to a completed creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStatus {
    Success,
    UnknownFailure,
    DeviceNotAvailable,
    FormatNotSupported,
    ManifestDownloadFailure,
    ManifestParseFailure,
    UnsupportedManifest,
    AccessDenied,
}

/// Result payload of a creation operation: a status plus the created object on success.
#[derive(Debug)]
pub struct CreationResult<T> {
    pub status: CreationStatus,
    pub value: Option<T>,
}

impl<T> CreationResult<T> {
    pub fn success(value: T) -> Self {
        Self {
            status: CreationStatus::Success,
            value: Some(value),
        }
    }

    pub fn failure(status: CreationStatus) -> Self {
        Self {
            status,
            value: None,
        }
    }

    pub fn into_value(self) -> Result<T, CreationStatus> {
        match (self.status, self.value) {
            (CreationStatus::Success, Some(v)) => Ok(v),
            (CreationStatus::Success, None) => Err(CreationStatus::UnknownFailure),
            (status, _) => Err(status),
        }
    }
}

type Outcome<T> = Result<T, AsyncStatus>;

/// A backend operation that resolves once its [`Completer`] fires.
pub struct AsyncOperation<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    finished: Option<Outcome<T>>,
}

// Fields are never structurally pinned.
impl<T> Unpin for AsyncOperation<T> {}

/// Completion side of an [`AsyncOperation`]. Dropping it unfired cancels the operation.
pub struct Completer<T> {
    tx: oneshot::Sender<Outcome<T>>,
}

/// Create a linked operation/completer pair.
pub fn pending<T>() -> (AsyncOperation<T>, Completer<T>) {
    let (tx, rx) = oneshot::channel();
    (AsyncOperation { rx, finished: None }, Completer { tx })
}

impl<T> AsyncOperation<T> {
    /// An operation that has already completed with `value`.
    pub fn ready(value: T) -> Self {
        let (op, completer) = pending();
        completer.complete(value);
        op
    }

    /// An operation that has already finished with a non-success status.
    pub fn failed(status: AsyncStatus) -> Self {
        let (op, completer) = pending();
        completer.fail(status);
        op
    }

    /// Run `work` on a named worker thread and complete with its result.
    pub fn spawn<F>(name: &str, work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (op, completer) = pending();
        let spawned = thread::Builder::new()
            .name(name.into())
            .spawn(move || completer.complete(work()));
        if let Err(e) = spawned {
            // The completer moved into the closure and was dropped, which cancels `op`.
            log::error!("Failed to spawn backend worker '{name}': {e}");
        }
        op
    }

    /// Whether the operation has finished, successfully or not. Never blocks.
    pub fn is_finished(&mut self) -> bool {
        if self.finished.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.finished = Some(outcome),
            Err(TryRecvError::Closed) => self.finished = Some(Err(AsyncStatus::Canceled)),
            Err(TryRecvError::Empty) => return false,
        }
        true
    }

    /// Block the calling thread until the operation finishes.
    pub fn wait(self) -> Outcome<T> {
        pollster::block_on(self)
    }
}

impl<T> Future for AsyncOperation<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.finished.take() {
            return Poll::Ready(outcome);
        }
        // A sender dropped without firing closes the channel.
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(AsyncStatus::Canceled)))
    }
}

impl<T> Completer<T> {
    pub fn complete(self, value: T) {
        self.finish(Ok(value));
    }

    pub fn fail(self, status: AsyncStatus) {
        self.finish(Err(status));
    }

    fn finish(self, outcome: Outcome<T>) {
        if self.tx.send(outcome).is_err() {
            log::trace!("Operation was dropped before it completed");
        }
    }
}

/// Block on `op` and map a non-completed status to [`PlaybackError::AsyncFailure`].
pub fn wait_for<T>(op: AsyncOperation<T>, operation: &'static str) -> Result<T, PlaybackError> {
    op.wait().map_err(|status| PlaybackError::AsyncFailure {
        operation,
        status: status.to_string(),
    })
}

/// Block on a creation request; both the async status and the creation status must succeed.
pub fn wait_for_creation<T>(
    op: AsyncOperation<CreationResult<T>>,
    operation: &'static str,
) -> Result<T, PlaybackError> {
    wait_for(op, operation)?
        .into_value()
        .map_err(|status| PlaybackError::AsyncFailure {
            operation,
            status: format!("{status:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ready_operation_resolves_immediately() {
        let mut op = AsyncOperation::ready(7u32);
        assert!(op.is_finished());
        assert_eq!(op.wait(), Ok(7));
    }

    #[test]
    fn completion_from_another_thread_unblocks_wait() {
        let (op, completer) = pending::<&'static str>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete("graph");
        });
        assert_eq!(op.wait(), Ok("graph"));
        handle.join().unwrap();
    }

    #[test]
    fn dropped_completer_cancels() {
        let (op, completer) = pending::<u8>();
        drop(completer);
        assert_eq!(op.wait(), Err(AsyncStatus::Canceled));
    }

    #[test]
    fn unfinished_operation_reports_pending() {
        let (mut op, completer) = pending::<u8>();
        assert!(!op.is_finished());
        completer.fail(AsyncStatus::Error);
        assert!(op.is_finished());
        assert_eq!(op.wait(), Err(AsyncStatus::Error));
    }

    #[test]
    fn spawned_work_completes() {
        let op = AsyncOperation::spawn("test-worker", || 2 + 2);
        assert_eq!(op.wait(), Ok(4));
    }

    #[test]
    fn creation_status_failure_maps_to_async_failure() {
        let op = AsyncOperation::ready(CreationResult::<u8>::failure(
            CreationStatus::DeviceNotAvailable,
        ));
        match wait_for_creation(op, "output node") {
            Err(PlaybackError::AsyncFailure { operation, status }) => {
                assert_eq!(operation, "output node");
                assert_eq!(status, "DeviceNotAvailable");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn failed_status_maps_to_async_failure() {
        let op = AsyncOperation::<u8>::failed(AsyncStatus::Error);
        assert!(matches!(
            wait_for(op, "graph"),
            Err(PlaybackError::AsyncFailure { .. })
        ));
    }

    #[test]
    fn success_without_value_is_a_failure() {
        let r = CreationResult::<u8> {
            status: CreationStatus::Success,
            value: None,
        };
        assert_eq!(r.into_value(), Err(CreationStatus::UnknownFailure));
    }
}
