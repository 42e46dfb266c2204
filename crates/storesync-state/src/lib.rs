pub mod checkpoint;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointPatch, SyncStatus};
pub use store::CheckpointStore;
