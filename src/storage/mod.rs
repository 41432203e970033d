mod engine;
pub mod paths;
mod temp;

pub use engine::{DirEntryInfo, StorageEngine};
pub use paths::{ArchiveKind, ArchiveTree, PathBuilder, normalize_relative, safe_join};
pub use temp::{TempDirHandle, TempDirManager};
