//! Repository engine for kvrepo
//!
//! This crate composes the key scheme, store client and entity codec into
//! typed repositories:
//! - Layout: Value / Hash / ValueInHash strategies behind one generic type
//! - Scripts: catalog of compare-and-act scripts, loaded lazily per repository
//! - Mutation: single-attempt conditional update/delete and the
//!   equality-gated script family
//! - Repository: the public CRUD, expiry and conditional API
//! - Config: validated repository configuration and its TOML file form
//!
//! Logging uses `tracing` with the targets `kvrepo::engine` and
//! `kvrepo::scripts`; no subscriber is installed here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod layout;
pub mod mutation;
pub mod observer;
pub mod repository;
pub mod scripts;

pub use config::{RepositoryConfig, RepositorySettings, CONFIG_FILE_NAME};
pub use layout::{Capabilities, Layout, LayoutStrategy, Location, RawEntity};
pub use mutation::MutationEngine;
pub use observer::StoreErrorObserver;
pub use repository::Repository;
pub use scripts::{ScriptId, ScriptRunner};
