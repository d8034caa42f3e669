//! Elasticsearch REST engine for modelsync.
//!
//! [`EsEngine`] implements [`modelsync::SearchEngine`] for every connection
//! of a [`modelsync::ConnectionRegistry`].

pub mod client;
pub mod error;
pub mod wire;

pub use client::EsEngine;
pub use error::{EsError, Result};
