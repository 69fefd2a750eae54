//! Crate-wide error taxonomy.
//!
//! Mirrors the result-code taxonomy described in the specification's error
//! handling section: nothing here is meant to unwind across the audio
//! callback boundary, every fallible operation returns a `Result`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("channel {0} not found")]
    ChannelNotFound(u32),

    #[error("too many channels (max {max})")]
    TooManyChannels { max: u32 },

    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    #[error("pipeline not initialized")]
    NotInitialized,

    #[error("pipeline not running")]
    NotRunning,

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("device failure: {0}")]
    DeviceFailure(String),

    #[cfg(feature = "std")]
    #[error("audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "std")]
    #[error("failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "std")]
    #[error("failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "std")]
    #[error("failed to enumerate devices")]
    DevicesError(#[from] cpal::DevicesError),

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`], independent of its message, so
/// callers can branch on kind without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfiguration,
    ChannelNotFound,
    TooManyChannels,
    BufferTooSmall,
    FormatMismatch,
    NotInitialized,
    NotRunning,
    InvalidArg,
    DeviceFailure,
    LockPoisoned,
    NotImplemented,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::ChannelNotFound(_) => ErrorKind::ChannelNotFound,
            Error::TooManyChannels { .. } => ErrorKind::TooManyChannels,
            Error::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Error::FormatMismatch(_) => ErrorKind::FormatMismatch,
            Error::NotInitialized => ErrorKind::NotInitialized,
            Error::NotRunning => ErrorKind::NotRunning,
            Error::InvalidArg(_) => ErrorKind::InvalidArg,
            Error::DeviceFailure(_) => ErrorKind::DeviceFailure,
            #[cfg(feature = "std")]
            Error::DeviceNotAvailable(_)
            | Error::BuildStream(_)
            | Error::PlayStream(_)
            | Error::DevicesError(_) => ErrorKind::DeviceFailure,
            Error::LockPoisoned => ErrorKind::LockPoisoned,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}

/// Tagged, programmatically-inspectable `last_error` slot.
///
/// Replaces the source's bare `std::string last_error_` with a
/// `(kind, message)` pair per the redesign note: callers that only care
/// about the kind don't need to parse a human-readable string.
#[derive(Debug, Clone, Default)]
pub struct LastError {
    inner: Option<(ErrorKind, String)>,
}

impl LastError {
    pub fn set(&mut self, err: &Error) {
        self.inner = Some((err.kind(), err.to_string()));
    }

    pub fn clear(&mut self) {
        self.inner = None;
    }

    pub fn get(&self) -> Option<(ErrorKind, &str)> {
        self.inner.as_ref().map(|(k, m)| (*k, m.as_str()))
    }

    pub fn message(&self) -> Option<&str> {
        self.inner.as_ref().map(|(_, m)| m.as_str())
    }
}
