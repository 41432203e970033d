//! # tfhost
//!
//! A private Terraform module registry: the indexing pipeline, archive
//! storage and the HTTP surface, usable as a standalone binary or as a
//! library.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tfhost::config::{RegistryConfig, ServerConfig};
//! use tfhost::server::{AppState, create_router};
//! use tfhost::store::{SqliteStore, Store};
//!
//! let server = ServerConfig::default();
//! let store = SqliteStore::new(server.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let config = RegistryConfig::from_env().unwrap();
//! let state = Arc::new(AppState::new(Arc::new(store), &server, config));
//! let router = create_router(state);
//! // Serve with axum...
//! ```

pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod extractor;
pub mod git;
pub mod indexing;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;
pub mod webhook;
