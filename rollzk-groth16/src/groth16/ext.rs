use ff::PrimeFieldBits;
use pairing::Engine;
use rand_core::RngCore;
use rollzk_cs::{solve, ConstraintSystem, HintRegistry};

use super::keys::{KeySource, FOLD_PARTS};
use super::prover::{roll, RollProver};
use super::Proof;
use crate::error::ProverResult;

/// Solve `cs` from `inputs` and roll a proof where the randomization is
/// already predefined.
pub fn create_proof<E, S>(
    cs: &ConstraintSystem<E::Fr>,
    hints: &HintRegistry<E::Fr>,
    inputs: &[E::Fr],
    source: &S,
    r: E::Fr,
    s: E::Fr,
) -> ProverResult<Proof<E>>
where
    E: Engine,
    E::Fr: PrimeFieldBits,
    S: KeySource<E> + ?Sized,
{
    let solution = solve(cs, inputs, hints)?;
    let prover = RollProver::new(source.meta()?, solution, r, s)?;
    roll(prover, source, &FOLD_PARTS)
}

/// Solve `cs` from `inputs` and roll a proof.
pub fn create_random_proof<E, S, R>(
    cs: &ConstraintSystem<E::Fr>,
    hints: &HintRegistry<E::Fr>,
    inputs: &[E::Fr],
    source: &S,
    rng: &mut R,
) -> ProverResult<Proof<E>>
where
    E: Engine,
    E::Fr: PrimeFieldBits,
    S: KeySource<E> + ?Sized,
    R: RngCore,
{
    let solution = solve(cs, inputs, hints)?;
    let prover = RollProver::random(source.meta()?, solution, rng)?;
    roll(prover, source, &FOLD_PARTS)
}
