//! Service layer: upload/download orchestration and chunk reclamation.

pub mod file_storage;
pub mod gc;

pub use file_storage::FileStorageService;
pub use gc::{GarbageCollector, GcReport};
