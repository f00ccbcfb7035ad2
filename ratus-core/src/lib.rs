//! # Ratus Core
//!
//! Engine layer for the Ratus task queue, providing the error taxonomy,
//! ingress normalization, the storage engine contract, and its backends.
//!
//! ## Architecture
//!
//! - [`error`]: typed error kinds shared by engines and controllers
//! - [`nonce`]: random tokens backing optimistic concurrency control
//! - [`normalize`]: validation and defaulting of externally supplied data
//! - [`engine`]: the [`engine::Engine`] trait and the `memdb` and `mongodb`
//!   backends
//! - [`api`]: versioned route path definitions shared with the server

pub mod api;
pub mod engine;
pub mod error;
pub mod nonce;
pub mod normalize;

pub use error::{Error, Result};
