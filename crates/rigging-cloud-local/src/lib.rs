//! Local filesystem provider for Rigging
//!
//! This crate implements the `ResourceProvider` trait for objects on the
//! local machine, so desired-state documents can be planned and applied
//! without any cloud account.
//!
//! # Resource types
//!
//! - `local_file`: `path` (immutable), `content`, optional `mode` ("0644").
//!   Reports `size` after apply.
//! - `local_directory`: `path` (immutable), optional `mode`.
//!
//! Relative paths are resolved against the provider root.
//!
//! # Example
//!
//! ```ignore
//! use rigging_cloud::ProviderRegistry;
//! use rigging_cloud_local::LocalProvider;
//! use std::sync::Arc;
//!
//! let registry = ProviderRegistry::new().with(Arc::new(LocalProvider::new(".")));
//! ```

pub mod error;
pub mod provider;

pub use error::{LocalError, Result};
pub use provider::{LOCAL_DIRECTORY, LOCAL_FILE, LocalProvider};
