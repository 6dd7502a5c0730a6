use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across channel traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Attachment bytes could not be retrieved.
    #[error("could not fetch attachment: {message}")]
    Fetch { message: String },

    /// A reply or document could not be sent.
    #[error("could not deliver message: {message}")]
    Delivery { message: String },

    /// Operation is currently unavailable (not connected/ready).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn fetch(message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn delivery(message: impl std::fmt::Display) -> Self {
        Self::Delivery {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
