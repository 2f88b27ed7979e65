//! File processing collaborator.
//!
//! [`TransferPipeline`] is the production [`crate::dispatch::FileProcessor`]:
//! it downloads the source through a [`FileTransfer`], transforms it locally
//! inside the request's [`Scratch`] directory, and uploads the result.

mod files;
mod pipeline;
mod scratch;

use thiserror::Error;

pub use files::{part_path, split_file, zip_file};
pub use pipeline::{FileTransfer, TransferError, TransferLimits, TransferPipeline, Upload};
pub use scratch::{sanitize_file_name, Scratch};

/// Errors raised while producing or delivering an output.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("File is too large: {size} bytes (max: {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
