// Stowage Infrastructure - Filesystem Adapter
// Implements: WriteSink

pub mod fs_write_sink;

pub use fs_write_sink::FsWriteSink;
