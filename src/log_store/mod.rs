//! Persistence targets for execution log batches.
//!
//! The worker only ever appends; reading logs back is left to the operators'
//! tooling for the chosen backend.

mod error;
mod memory;
mod tracing_sink;
mod traits;

pub use error::LogStoreError;
pub use memory::MemoryLogStore;
pub use tracing_sink::TracingLogStore;
pub use traits::LogStore;
