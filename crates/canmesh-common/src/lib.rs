//! # canmesh-common
//!
//! Shared utilities and types for canmesh.
//!
//! This crate provides common functionality used by the network crate
//! and by whatever plugin transport drives it:
//! - Network, endpoint and namespace identifiers
//! - Kernel interface names and their derivation
//! - Driver configuration
//! - Common error types

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod id;

pub use config::MeshConfig;
pub use error::{MeshError, MeshResult};
pub use id::{EndpointId, IfName, NamespaceId, NetworkId};
