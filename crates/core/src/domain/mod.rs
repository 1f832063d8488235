// Domain Layer - Pure business logic and entities

pub mod error;
pub mod policy;
pub mod queue;
pub mod queue_item;
pub mod upload;

// Re-exports
pub use error::{DomainError, UploadError};
pub use policy::{BoxError, ItemContext, PathPolicy, PolicyFn};
pub use queue::{AdmissionCeiling, QueueConfig};
pub use queue_item::{
    Completion, ItemId, ItemSnapshot, QueueItem, QueueItemState, UploadOutcome,
};
pub use upload::{ByteStream, FileMeta, Payload, RequestMeta, StoredFile, UploadFile};
