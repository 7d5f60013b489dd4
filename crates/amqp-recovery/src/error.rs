use thiserror::Error;

/// Errors surfaced to callers of the client.
///
/// Channel-invalid and transient connection failures are absorbed by the
/// recovery loop and never appear here.
#[derive(Debug, Error)]
pub enum ClientError<E> {
    /// The broker refused the request. The client stays usable.
    #[error("broker rejected {operation}: {source}")]
    Rejected {
        /// Name of the operation that was refused.
        operation: &'static str,
        /// The broker's error.
        #[source]
        source: E,
    },

    /// Closing a connection failed for a reason other than it already being closed.
    #[error("failed to close connection: {0}")]
    Close(#[source] E),

    /// An explicit connect attempt failed. Never returned by recovering operations.
    #[error("failed to connect: {0}")]
    Connect(#[source] E),

    /// The delivery came from a channel that has since closed, so its tag
    /// cannot be sent. The broker requeued the message when that channel
    /// closed and will deliver it again.
    #[error("cannot {operation} delivery {tag}: channel generation {generation} is gone")]
    StaleHandle {
        /// `"ack"` or `"nack"`.
        operation: &'static str,
        /// Delivery tag on the closed channel.
        tag: u64,
        /// Generation of the closed channel.
        generation: u64,
    },
}

impl<E> ClientError<E> {
    /// Returns `true` if the broker refused the request.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::Rejected { .. })
    }

    /// Returns `true` if a settlement targeted a channel that no longer exists.
    pub fn is_stale_handle(&self) -> bool {
        matches!(self, ClientError::StaleHandle { .. })
    }

    /// Name of the failed operation, for rejections and stale handles.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            ClientError::Rejected { operation, .. } | ClientError::StaleHandle { operation, .. } => {
                Some(*operation)
            }
            _ => None,
        }
    }

    /// Returns the underlying transport error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            ClientError::Rejected { source, .. } => Some(source),
            ClientError::Close(e) | ClientError::Connect(e) => Some(e),
            ClientError::StaleHandle { .. } => None,
        }
    }
}
