use thiserror::Error;

/// Failures of the assembly-and-delivery cycle and of the dispatcher.
///
/// `Display` is the short cause shown to users in the failure reply.
#[derive(Debug, Error)]
pub enum Error {
    /// Decoding, encoding or staging the document failed.
    #[error(transparent)]
    Media(#[from] lembar_media::Error),

    #[error("{0}")]
    Delivery(#[source] lembar_channels::Error),

    #[error("assembly task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The transport lost its credentials; the process cannot continue.
    #[error("channel account {account_id} logged out: {reason}")]
    LoggedOut { account_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
