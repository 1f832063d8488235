// Port Layer - Interfaces for external dependencies

pub mod time_provider; // For deterministic ids and timestamps
pub mod timer;
pub mod write_sink;

// Re-exports
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use timer::{IntervalTimer, TimerFactory, TokioTimerFactory};
pub use write_sink::WriteSink;
