use rollzk_cs::{CodecError, CsError, SolverError};

use crate::groth16::KeyPart;

#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("{size} rows exceed the largest evaluation domain (2^{max_log})")]
    TooLarge { size: u64, max_log: u32 },
    #[error("domain size {size} is not a power of two")]
    NotPowerOfTwo { size: usize },
    #[error("monomial SRS holds {have} points, {need} required")]
    ShortSrs { have: usize, need: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cs(#[from] CsError),
    #[error("sampled tau lies in the evaluation domain")]
    TauInDomain,
    #[error("trapdoor element {0} is zero")]
    ZeroTrapdoor(&'static str),
    #[error("key generation produced an unexpected {0:?} chunk")]
    UnexpectedPart(KeyPart),
}

#[derive(thiserror::Error, Debug)]
pub enum ProverError {
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{segment}: expected {expected} points, found {got}")]
    SegmentLength {
        segment: String,
        expected: usize,
        got: usize,
    },
    #[error("witness covers {got} wires and {rows} rows, key expects {expected_wires} wires and at most {domain} rows")]
    Shape {
        got: usize,
        rows: usize,
        expected_wires: u64,
        domain: u64,
    },
    #[error("key segment {0:?} folded twice")]
    AlreadyFolded(KeyPart),
    #[error("key segments {0:?} were never folded")]
    Incomplete(Vec<KeyPart>),
    #[error("{0:?} is not a G1 or G2 point segment")]
    WrongGroup(KeyPart),
    // delta at infinity means a subverted key
    #[error("verifying key delta is the identity")]
    UnexpectedIdentity,
}

#[derive(thiserror::Error, Debug)]
pub enum VerifyError {
    #[error("expected {expected} public inputs, got {got}")]
    InputLength { expected: usize, got: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type ProverResult<T> = std::result::Result<T, ProverError>;
