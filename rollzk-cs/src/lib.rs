//! Lazy R1CS constraint systems for batched circuits.
//!
//! A rollup-style circuit repeats the same sub-circuit for every transaction
//! in a batch, so most of its `L · R = O` rows are copies of a few rows with
//! shifted wire ids. This crate stores such systems compactly and keeps every
//! consumer working on the logical (fully expanded) constraint list:
//!
//! 1. **Build**: [`CircuitBuilder`] (or [`RecordingCS`] for bellpepper
//!    circuits) produces a [`ConstraintSystem`] with dependency levels and
//!    an interned [`CoeffTable`].
//!
//! 2. **Compress**: [`lazify`] replaces groups of structurally identical
//!    constraints with one [`LazyConstraint`] template each. The logical
//!    constraint count is unchanged; [`ConstraintSystem::fetch`] expands any
//!    position on demand.
//!
//! 3. **Solve**: [`solve`] computes internal wires level by level and fills the
//!    `a`, `b`, `c` evaluation vectors the prover consumes; [`evaluate`] does the
//!    same for fully assigned witnesses.
//!
//! 4. **Persist**: `cs.save`, `cs.ct.save` and witness segments
//!    ([`disk`]) are self-delimiting, versioned segments ([`codec`]) published
//!    atomically through a [`SegmentStore`].

pub mod builder;
pub mod codec;
pub mod coeff;
pub mod csr;
pub mod density;
pub mod disk;
pub mod error;
pub mod eval;
pub mod lazy;
pub mod recording_cs;
pub mod registry;
pub mod solver;
pub mod store;
pub mod system;

pub use builder::{CircuitBuilder, Wire};
pub use coeff::{CoeffId, CoeffTable};
pub use csr::{Constraint, LinearExpression, Side, Term};
pub use density::WireDensity;
pub use disk::{load_system, load_witness, save_system, save_witness, WitnessVariant};
pub use error::{CodecError, CsError, RowOrigin, SolverError};
pub use eval::{evaluate, Solution};
pub use lazy::{lazify, LazifyConfig, LazifyReport, LazyConstraint, LazyIndexMap};
pub use recording_cs::{extract_inputs, extract_system, RecordingCS, WitnessCS};
pub use registry::{HintFn, HintRegistry, TemplateFactory, TemplateKey, TemplateRegistry};
pub use solver::solve;
pub use store::{SegmentBatch, SegmentStore};
pub use system::{ConstraintSystem, Level, WireKind, WirePartition};
