//! Storage topology: which mounted device backs a path, and whether two
//! participants see the same one.

pub mod entry;
pub mod view;

pub use entry::{pack_storage_entry, unpack_storage_entry, StorageEntry};
pub use view::{StorageView, PROC_MOUNTS};
