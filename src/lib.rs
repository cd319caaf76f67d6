//! viewser: queryset client and input drift detection for the views data
//! service.
//!
//! - [`remote`]: fetch, publish, list and delete querysets over HTTP
//! - [`queryset`]: build queryset definitions
//! - [`drift`]: integrity checks that gate freshly fetched data
//! - [`config`]: persisted client settings

#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod drift;
pub mod error;
pub mod queryset;
pub mod remote;

pub use error::{Error, Result};
