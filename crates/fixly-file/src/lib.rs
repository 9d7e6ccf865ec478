//! fixly-file - File-backed credential storage.

mod store;

pub use store::FileStorage;
