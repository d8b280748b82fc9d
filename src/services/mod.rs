//! Service layer: the file-lifecycle engine and its collaborators.

pub mod blob_store;
pub mod cache;
pub mod lifecycle;
pub mod path;
pub mod quota;
