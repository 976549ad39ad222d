// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::error::Error as StdError;
use std::sync::Arc;

/// An error from a cache retrieval.
///
/// The same result may be delivered to many waiters of one computation, so
/// the error is cheaply cloneable; generator errors are shared behind an
/// [`Arc`] while preserving the ability to extract the original typed error.
///
/// # Examples
///
/// ```
/// use memoflight::Error;
///
/// let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "backend missing");
/// let error = Error::from_source(io_err);
///
/// assert!(error.is_source::<std::io::Error>());
/// ```
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The retrieval handle's wait exceeded the configured `get_timeout`.
    ///
    /// The in-flight computation is unaffected; later callers may still
    /// observe its result.
    #[error("generation timed out")]
    TimedOut,

    /// A generator fault was swallowed because `recover` is enabled.
    #[error("Unknown Error")]
    Unknown,

    /// The generator panicked and `recover` is disabled.
    #[error("generator panicked: {0}")]
    Panicked(Arc<str>),

    /// The generator returned an error.
    #[error(transparent)]
    Generation(Arc<dyn StdError + Send + Sync>),
}

impl Error {
    /// Creates a generation error wrapping a source error.
    ///
    /// This preserves the original error type for later extraction via
    /// [`source_as`](Self::source_as).
    pub fn from_source(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Generation(Arc::from(source.into()))
    }

    /// Creates a generation error from a message string.
    ///
    /// Use [`from_source`](Self::from_source) instead when wrapping an
    /// existing error.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::Generation(Arc::from(Box::<dyn StdError + Send + Sync>::from(message.into())))
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked(Arc::from(text))
    }

    /// Returns `true` if the wrapped generator error is of type `T`.
    #[must_use]
    pub fn is_source<T: StdError + 'static>(&self) -> bool {
        self.source_as::<T>().is_some()
    }

    /// Returns the wrapped generator error as type `T` if it matches.
    ///
    /// # Examples
    ///
    /// ```
    /// use memoflight::Error;
    ///
    /// let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
    /// let error = Error::from_source(io_err);
    ///
    /// if let Some(io_err) = error.source_as::<std::io::Error>() {
    ///     assert_eq!(io_err.kind(), std::io::ErrorKind::NotFound);
    /// }
    /// ```
    #[must_use]
    pub fn source_as<T: StdError + 'static>(&self) -> Option<&T> {
        match self {
            Self::Generation(source) => source.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
