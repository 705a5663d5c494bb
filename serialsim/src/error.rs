//! Error types for the serial simulator.

use std::fmt;
use std::io;

/// Result type alias for serialsim.
pub type Result<T> = std::result::Result<T, Error>;

/// Result returned by event handlers.
///
/// Any error (or a panic) raised by a handler disables its channel.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Notification channel of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Fired per satisfied buffer policy evaluation, from the transfer step.
    Ready,
    /// Fired once per host tick when a ready event is pending.
    Available,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Ready => write!(f, "on-ready"),
            Channel::Available => write!(f, "on-poll-available"),
        }
    }
}

/// Error type for serialsim operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// More bytes were requested from a queue than it holds.
    #[error("insufficient data: requested {requested}, available {available}")]
    InsufficientData { requested: usize, available: usize },

    /// Destination slice is too small for the matched span.
    #[error("destination too small: need {needed} bytes, have {capacity}")]
    Overflow { needed: usize, capacity: usize },

    /// An event handler returned an error or panicked.
    #[error("{channel} handler failed: {reason}")]
    HandlerFailure { channel: Channel, reason: String },

    /// The channel was disabled after a handler failure.
    #[error("{0} channel is disabled")]
    ChannelDisabled(Channel),

    /// The producer is already running.
    #[error("producer already running")]
    AlreadyRunning,

    /// The producer thread could not be spawned.
    #[error("spawn producer: {0}")]
    Spawn(#[source] io::Error),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
