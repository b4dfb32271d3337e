//! Error types for constraint-system construction, solving and persistence.

use std::fmt;
use std::io;

/// Structural faults in a constraint system or its construction.
#[derive(Debug, thiserror::Error)]
pub enum CsError {
    #[error("wire {wire} out of range (system has {nb_wires} wires)")]
    WireOutOfRange { wire: u64, nb_wires: u64 },

    #[error("unknown coefficient id {id} (table holds {len} coefficients)")]
    UnknownCoefficient { id: u32, len: usize },

    #[error("template {template}: occurrence {occurrence} shifts wire {wire} past {nb_wires}")]
    ShiftOverflow {
        template: u32,
        occurrence: u64,
        wire: u64,
        nb_wires: u64,
    },

    #[error("template {template} out of range ({nb_templates} templates)")]
    TemplateOutOfRange { template: u32, nb_templates: usize },

    #[error("constraint {pos} out of range ({total} constraints)")]
    ConstraintOutOfRange { pos: u64, total: u64 },

    #[error("constraint {constraint} has {count} unsolved wires; at most one is allowed")]
    TooManyUnknowns { constraint: usize, count: usize },

    #[error("constraint {constraint}: unsolved wire {wire} appears on more than one side")]
    NonLinearUnknown { constraint: usize, wire: u32 },

    #[error("hint {key:?} reads unsolved wire {wire}")]
    HintInputUnsolved { key: String, wire: u32 },

    #[error("no template factory registered under {0:?}")]
    UnknownTemplate(String),

    #[error("template factory {0:?} is already registered")]
    DuplicateTemplate(String),

    #[error("coefficient table entry {index} duplicates entry {first}")]
    DuplicateCoefficient { index: usize, first: u32 },

    #[error("reserved coefficient id {id} holds an unexpected value")]
    ReservedCoefficient { id: u32 },

    #[error("lazy index map is inconsistent: {0}")]
    LazyMap(String),

    #[error("level {level} references {what} {index} out of range")]
    LevelIndex {
        level: usize,
        what: &'static str,
        index: u32,
    },

    #[error("{what} {index} is scheduled in {times} levels; exactly one is required")]
    LevelCoverage {
        what: &'static str,
        index: u32,
        times: usize,
    },

    #[error("template {template} is scheduled in level {level} but belongs to level {expected}")]
    TemplateLevel {
        template: u32,
        level: usize,
        expected: u32,
    },

    #[error("system has {nb_wires} wires; wire ids are limited to 32 bits")]
    TooManyWires { nb_wires: u64 },
}

/// Where a solver fault happened: logical constraint position and, for rows
/// expanded from a template, which template produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowOrigin {
    pub pos: u64,
    pub template: Option<u32>,
}

impl fmt::Display for RowOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.template {
            Some(t) => write!(f, "constraint {} (template {})", self.pos, t),
            None => write!(f, "constraint {}", self.pos),
        }
    }
}

/// Faults raised while solving or evaluating a system against a witness.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("witness has {got} values, expected {expected}")]
    WitnessLength { expected: usize, got: usize },

    #[error("no hint registered under {key:?}")]
    MissingHint { key: String },

    #[error("hint {key:?} failed: {message}")]
    Hint { key: String, message: String },

    #[error("{at}: L·R != O")]
    Unsatisfied { at: RowOrigin },

    #[error("{at}: division by zero while solving wire {wire}")]
    DivisionByZero { at: RowOrigin, wire: u32 },

    #[error("{at}: cannot resolve wire {wire}")]
    Unresolved { at: RowOrigin, wire: u32 },

    #[error("{at}: wire {wire} out of range")]
    WireOutOfRange { at: RowOrigin, wire: u32 },

    #[error("wire {wire} still unsolved after the last level")]
    Incomplete { wire: u32 },

    #[error("levels produced {written} rows, system has {expected} constraints")]
    RowCount { written: u64, expected: u64 },

    #[error(transparent)]
    Cs(#[from] CsError),
}

/// Faults raised while encoding or decoding a segment.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{segment}: I/O error at byte {offset}: {source}")]
    Io {
        segment: String,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("{segment}: bad magic {found:?}")]
    BadMagic { segment: String, found: [u8; 4] },

    #[error("{segment}: unsupported format version {found} (expected {expected})")]
    Version {
        segment: String,
        expected: u32,
        found: u32,
    },

    #[error("{segment}: expected a {expected} segment, found kind tag {found}")]
    KindMismatch {
        segment: String,
        expected: crate::codec::SegmentKind,
        found: u32,
    },

    #[error("{segment}: point {index} lies outside the prime-order subgroup")]
    Subgroup { segment: String, index: u64 },

    #[error("{segment}: malformed payload at byte {offset}: {reason}")]
    Malformed {
        segment: String,
        offset: u64,
        reason: String,
    },

    #[error("{segment}: {source}")]
    Invalid {
        segment: String,
        #[source]
        source: CsError,
    },
}

impl CodecError {
    /// Name of the segment the fault belongs to.
    pub fn segment(&self) -> &str {
        match self {
            CodecError::Io { segment, .. }
            | CodecError::BadMagic { segment, .. }
            | CodecError::Version { segment, .. }
            | CodecError::KindMismatch { segment, .. }
            | CodecError::Subgroup { segment, .. }
            | CodecError::Malformed { segment, .. }
            | CodecError::Invalid { segment, .. } => segment,
        }
    }
}
