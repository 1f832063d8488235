// Application Layer - Use Cases and Business Logic

pub mod scheduler;
pub mod storage;
pub(crate) mod write_queue;
pub mod write_task;

// Re-exports
pub use scheduler::UploadQueue;
pub use storage::{PendingUpload, StorageEngine, StorageOptions};
pub use write_queue::PassSummary;
pub use write_task::WritePlan;
