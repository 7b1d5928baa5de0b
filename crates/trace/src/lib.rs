//! Lifecycle tracing for purchase transactions and blocks
//!
//! Each event is written as one CSV line by a background writer thread, so
//! the schedulers that emit events never wait on file I/O.

mod event;
mod tracer;
mod utils;

pub use event::LifecycleEvent;
pub use tracer::LifecycleTracer;
pub use utils::format_hash_hex;
