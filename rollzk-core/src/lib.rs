//! rollzk-core: session orchestration for the rollzk proving pipeline.
//!
//! Provides the [`Session`] type, which drives a constraint system through
//! compression, key setup, proving and verification over one segment store,
//! and the TOML [`Config`] that shapes it.

pub mod circuit;
pub mod config;
pub mod pipeline;
pub mod types;

pub use circuit::TransferBatch;
pub use config::Config;
pub use pipeline::Session;
pub use types::*;
