mod registry;
mod server;

pub use registry::RegistryConfig;
pub use server::{ServerConfig, db_path};
