//! Failure classification for recovery decisions.
//!
//! Every error surfaced by a transport is sorted into exactly one
//! [`ErrorKind`]. The kind decides what the client does next:
//!
//! | Kind | Action |
//! |------|--------|
//! | [`ErrorKind::ChannelInvalid`] | rebuild connection and channel, retry |
//! | [`ErrorKind::BrokerRejected`] | propagate to the caller, no reconnect |
//! | [`ErrorKind::TransientConnectionFailure`] | close best-effort, reconnect, retry |
//!
//! Predicates are checked in that order, so an error that reports both an
//! unusable channel and a broker rejection is treated as a channel problem,
//! and anything that matches neither is transient.

use std::fmt;

/// Error surface a transport exposes to the recovery policy.
///
/// # Example
///
/// ```rust
/// use amqp_recovery::{classify, BrokerError, ErrorKind};
///
/// #[derive(Debug)]
/// enum WireError {
///     Reset,
///     AccessRefused,
/// }
///
/// impl std::fmt::Display for WireError {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{:?}", self)
///     }
/// }
///
/// impl std::error::Error for WireError {}
///
/// impl BrokerError for WireError {
///     fn is_channel_invalid(&self) -> bool {
///         false
///     }
///
///     fn is_broker_rejected(&self) -> bool {
///         matches!(self, WireError::AccessRefused)
///     }
/// }
///
/// assert_eq!(classify(&WireError::Reset), ErrorKind::TransientConnectionFailure);
/// assert_eq!(classify(&WireError::AccessRefused), ErrorKind::BrokerRejected);
/// ```
pub trait BrokerError: std::error::Error + Send + Sync + 'static {
    /// The channel object is unusable, e.g. left closed by an earlier failure.
    fn is_channel_invalid(&self) -> bool;

    /// The broker deliberately closed the connection or channel because it
    /// refuses the request.
    fn is_broker_rejected(&self) -> bool;

    /// Returned by `close()` on a connection that is already closed or broken.
    fn is_already_closed(&self) -> bool {
        false
    }
}

/// The three failure kinds the recovery policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The channel is unusable; rebuild and retry.
    ChannelInvalid,
    /// The broker refused the request; never retried.
    BrokerRejected,
    /// Any other connection-level failure; reconnect and retry.
    TransientConnectionFailure,
}

impl ErrorKind {
    /// Returns `true` if operations failing with this kind are retried.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::BrokerRejected)
    }

    /// Stable label used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ChannelInvalid => "channel_invalid",
            ErrorKind::BrokerRejected => "broker_rejected",
            ErrorKind::TransientConnectionFailure => "transient",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorts an error into its [`ErrorKind`].
pub fn classify<E>(error: &E) -> ErrorKind
where
    E: BrokerError + ?Sized,
{
    if error.is_channel_invalid() {
        ErrorKind::ChannelInvalid
    } else if error.is_broker_rejected() {
        ErrorKind::BrokerRejected
    } else {
        ErrorKind::TransientConnectionFailure
    }
}
