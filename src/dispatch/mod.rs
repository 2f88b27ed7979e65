//! Quota-gated action dispatch.
//!
//! Maps an inbound [`ActionRequest`] to a permission check and, if allowed,
//! to the [`FileProcessor`] collaborator. Usage is counted and the action is
//! logged only after the collaborator reports success.

mod dispatcher;
mod request;

use async_trait::async_trait;

pub use dispatcher::{ActionDispatcher, Admission, Completion, DispatchError, LIMIT_REACHED_MESSAGE};
pub use request::{
    ActionKind, ActionParams, ActionRequest, DerivedMetadata, FileRef, ProcessedFile,
    RequestState, SentFile,
};

use crate::processing::{ProcessingError, Scratch};

/// External subsystem that produces and delivers the output of an action.
///
/// Implementations write temporary files only through `scratch`, and return
/// `Ok` only once every output is fully written and delivered.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn perform(
        &self,
        kind: ActionKind,
        file: &FileRef,
        params: &ActionParams,
        scratch: &mut Scratch,
    ) -> Result<ProcessedFile, ProcessingError>;
}
