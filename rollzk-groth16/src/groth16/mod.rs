//! The [Groth16] proving system over segmented keys.
//!
//! [Groth16]: https://eprint.iacr.org/2016/260

mod ext;
mod generator;
pub mod keys;
pub mod points;
mod proof;
pub mod prover;
mod verifier;

pub use self::ext::*;
pub use self::generator::*;
pub use self::keys::{
    load_proving_key, load_verifying_key, save_proving_key, save_verifying_key, KeyMeta, KeyPart,
    KeySource, ProvingKey, StoreKeySource, VerifyingKey, FOLD_PARTS,
};
pub use self::points::{DecodePolicy, Encoding};
pub use self::proof::*;
pub use self::prover::{roll, RollProver};
pub use self::verifier::*;
