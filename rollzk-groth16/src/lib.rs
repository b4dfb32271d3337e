//! Groth16 over lazily compressed constraint systems.
//!
//! [`groth16::setup_with_dump`] produces proving-key segments one at a time
//! and [`groth16::RollProver`] consumes them one at a time, so neither side
//! holds more than one point vector in memory. Segments are published through
//! a [`rollzk_cs::SegmentStore`] in the [`rollzk_cs::codec`] format.

pub mod domain;
pub mod error;
pub mod groth16;
pub mod multiexp;

pub use error::{DomainError, ProverError, SetupError, VerifyError};

pub use ff;
pub use group;
pub use pairing;
