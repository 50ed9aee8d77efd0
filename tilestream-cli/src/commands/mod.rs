//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`fetch`] - Single tile download
//! - [`purge`] - Disk cache purge

pub mod fetch;
pub mod purge;
