use std::error::Error as StdError;
use std::fmt;

use super::TaskPacket;
use tokio::sync::{mpsc, oneshot};

type Cause = Box<dyn StdError + Send + Sync>;

/// An error that can occur while interacting with the worker.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
enum Kind {
    Send,
    Recv,
    /// A BEP3-level failure carried back to the client as a bencoded
    /// `failure reason`; not an HTTP error.
    Failure(&'static str),
}

impl From<mpsc::error::SendError<TaskPacket>> for Error {
    fn from(err: mpsc::error::SendError<TaskPacket>) -> Self {
        Self {
            inner: Box::new(ErrorImpl {
                kind: Kind::Send,
                cause: Some(Box::new(err)),
            }),
        }
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(err: oneshot::error::RecvError) -> Self {
        Self {
            inner: Box::new(ErrorImpl {
                kind: Kind::Recv,
                cause: Some(Box::new(err)),
            }),
        }
    }
}

impl From<&'static str> for Error {
    fn from(reason: &'static str) -> Self {
        Self {
            inner: Box::new(ErrorImpl {
                kind: Kind::Failure(reason),
                cause: None,
            }),
        }
    }
}

impl Error {
    /// The bencodable failure reason, when this error is one.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self.inner.kind {
            Kind::Failure(reason) => Some(reason),
            _ => None,
        }
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Send => "failed to send task to worker",
            Kind::Recv => "failed to receive result from worker",
            Kind::Failure(reason) => reason,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_ref().map(|cause| &**cause as _)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("worker::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

/// Alias for the return type of a worker task.
pub type Result<T> = std::result::Result<T, Error>;
