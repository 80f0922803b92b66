//! # Benchlog
//!
//! A research experiment tracker: users record experiments, attach protocol
//! and data files, tag them, and share them with other users at view or edit
//! level. Usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! benchlog = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use benchlog::config::ServerConfig;
//! use benchlog::server::{AppState, create_router};
//! use benchlog::storage::FsObjectStore;
//! use benchlog::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path())?;
//! store.initialize()?;
//! let objects = FsObjectStore::new(&config.objects_dir(), config.base_url());
//!
//! let state = Arc::new(AppState::new(
//!     Arc::new(store),
//!     Arc::new(objects),
//!     config.max_upload_bytes,
//! )?);
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `benchlog` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod service;
pub mod storage;
pub mod store;
pub mod types;
