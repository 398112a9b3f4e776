//! cbt-store: durable result storage.
//!
//! Both stores implement `ResultStore` and `UsageSink` from `cbt-core`:
//! [`FileStore`] keeps JSON files under a directory, [`MemoryStore`] keeps
//! everything in process.

pub mod file;
pub mod memory;
pub mod profile;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use profile::{Profile, ProfileBook, UsageLedger};
