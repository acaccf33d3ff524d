//! Shared building blocks for ContentFlow components
//!
//! This crate carries the pieces every ContentFlow component needs:
//! the error taxonomy, content hashing, and logging bootstrap.

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{FlowError, Result};
