#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no images to assemble")]
    NoImages,

    /// `index` is zero-based; the message shows it one-based for users.
    #[error("image {} is not a readable {tried} file", .index + 1)]
    UndecodableImage { index: usize, tried: String },

    #[error("failed to encode document: {message}")]
    Encode { message: String },

    #[error("{context}: {source}")]
    Write {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    #[must_use]
    pub fn encode(message: impl std::fmt::Display) -> Self {
        Self::Encode {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn write(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Write {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
