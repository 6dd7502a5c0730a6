use bytes::Bytes;

use lembar_common::MessageId;

/// Coarse phase of a session, for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CollectingImages,
    AwaitingFileName,
}

/// Images received in the current batch, in receipt order.
///
/// A batch always holds at least one image: it is created from the first one.
#[derive(Debug, Clone)]
pub struct Batch {
    images: Vec<Bytes>,
    anchor: MessageId,
}

impl Batch {
    fn new(first: Bytes, anchor: MessageId) -> Self {
        Self {
            images: vec![first],
            anchor,
        }
    }

    fn push(&mut self, image: Bytes, message_id: MessageId) {
        self.images.push(image);
        self.anchor = message_id;
    }

    pub fn images(&self) -> &[Bytes] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Most recently received image message of the batch.
    pub fn anchor(&self) -> &MessageId {
        &self.anchor
    }

    pub fn into_parts(self) -> (Vec<Bytes>, MessageId) {
        (self.images, self.anchor)
    }
}

/// State of one conversation.
///
/// `Idle` carries no images, and the other two phases always carry a
/// non-empty batch, so neither invariant can be broken by construction.
#[derive(Debug, Clone, Default)]
pub enum Session {
    #[default]
    Idle,
    CollectingImages(Batch),
    AwaitingFileName(Batch),
}

impl Session {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::CollectingImages(_) => Phase::CollectingImages,
            Self::AwaitingFileName(_) => Phase::AwaitingFileName,
        }
    }

    pub fn batch(&self) -> Option<&Batch> {
        match self {
            Self::Idle => None,
            Self::CollectingImages(batch) | Self::AwaitingFileName(batch) => Some(batch),
        }
    }

    pub fn images(&self) -> &[Bytes] {
        self.batch().map(Batch::images).unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.batch().map_or(0, Batch::len)
    }

    pub fn anchor(&self) -> Option<&MessageId> {
        self.batch().map(Batch::anchor)
    }

    /// Append an image and move to `CollectingImages`. Returns the new count.
    pub fn push_image(&mut self, image: Bytes, message_id: MessageId) -> usize {
        let batch = match std::mem::take(self) {
            Self::Idle => Batch::new(image, message_id),
            Self::CollectingImages(mut batch) | Self::AwaitingFileName(mut batch) => {
                batch.push(image, message_id);
                batch
            },
        };
        let count = batch.len();
        *self = Self::CollectingImages(batch);
        count
    }

    /// Ask for a file name. Returns `false` when there is nothing to name.
    ///
    /// Asking again while already awaiting a name keeps the batch as is.
    pub fn await_file_name(&mut self) -> bool {
        match std::mem::take(self) {
            Self::Idle => false,
            Self::CollectingImages(batch) | Self::AwaitingFileName(batch) => {
                *self = Self::AwaitingFileName(batch);
                true
            },
        }
    }

    /// Take the batch that is waiting for a name, leaving the session idle.
    ///
    /// Returns `None` (and leaves the session untouched) in any other phase.
    pub fn take_named_batch(&mut self) -> Option<Batch> {
        match std::mem::take(self) {
            Self::AwaitingFileName(batch) => Some(batch),
            other => {
                *self = other;
                None
            },
        }
    }
}
