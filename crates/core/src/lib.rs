// Stowage Core - Upload queue, admission control & ports
// NO infrastructure dependencies: filesystem access goes through port::WriteSink

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{PendingUpload, StorageEngine, StorageOptions, UploadQueue};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
