//! Media pipeline: decode raster images, assemble them into a PDF, and stage
//! the result on disk for delivery.

pub mod assembler;
pub mod error;
pub mod tempstore;

pub use {
    assembler::{DocumentAssembler, PDF_EXTENSION, PDF_MIME_TYPE},
    error::{Error, Result},
    tempstore::{TempStore, TemporaryArtifact},
};
