//! Moving staged request files into durable storage.
//!
//! Files arrive on local transient storage via [`intake`], get pushed to the
//! remote object store by [`UploadPipeline`], and every upload made on behalf
//! of one account operation is tracked by an [`UploadScope`] so the operation
//! can undo them if a later step fails.

mod intake;
mod pipeline;
mod scope;

pub use intake::{stage_multipart, StagedFile};
pub use pipeline::UploadPipeline;
pub use scope::UploadScope;
