mod build;
mod unpack;

pub use build::{ArchiveBuilder, ArchiveEntry, BuiltArchives};
pub use unpack::{MAX_UNPACKED_BYTES, UploadFormat, unpack_upload};
