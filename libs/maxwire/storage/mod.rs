//! Credential store implementations
//!
//! - [`MemoryStore`]: process-local, for tests and throwaway sessions
//! - [`FileStore`]: `session.json` in the client's work directory

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
