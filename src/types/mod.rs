mod models;
mod policy;
pub mod validation;
pub mod version;

pub use models::*;
pub use policy::{HostingMode, NamespaceKind, ReindexMode, SubmoduleKind};
