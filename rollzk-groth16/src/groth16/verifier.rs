use std::ops::Neg;

use ff::PrimeFieldBits;
use group::Curve;
use pairing::{MillerLoopResult, MultiMillerLoop};
use tracing::debug;

use super::{Proof, VerifyingKey};
use crate::error::VerifyError;
use crate::multiexp::multiexp;

/// Verifying key with the pairing-side values precomputed.
pub struct PreparedVerifyingKey<E: MultiMillerLoop> {
    pub alpha_g1_beta_g2: E::Gt,
    pub neg_gamma_g2: E::G2Prepared,
    pub neg_delta_g2: E::G2Prepared,
    pub ic: Vec<E::G1Affine>,
}

pub fn prepare_verifying_key<E: MultiMillerLoop>(vk: &VerifyingKey<E>) -> PreparedVerifyingKey<E> {
    PreparedVerifyingKey {
        alpha_g1_beta_g2: E::pairing(&vk.alpha_g1, &vk.beta_g2),
        neg_gamma_g2: vk.gamma_g2.neg().into(),
        neg_delta_g2: vk.delta_g2.neg().into(),
        ic: vk.ic.clone(),
    }
}

/// Check `e(A, B) · e(IC, -γ) · e(C, -δ) = e(α, β)` where
/// `IC = ic[0] + Σ public_inputs[i] · ic[i + 1]`.
pub fn verify_proof<E>(
    pvk: &PreparedVerifyingKey<E>,
    proof: &Proof<E>,
    public_inputs: &[E::Fr],
) -> Result<bool, VerifyError>
where
    E: MultiMillerLoop,
    E::Fr: PrimeFieldBits,
{
    if public_inputs.len() + 1 != pvk.ic.len() {
        return Err(VerifyError::InputLength {
            expected: pvk.ic.len().saturating_sub(1),
            got: public_inputs.len(),
        });
    }

    let acc = (multiexp(&pvk.ic[1..], public_inputs) + pvk.ic[0]).to_affine();
    let b: E::G2Prepared = proof.b.into();
    let result = E::multi_miller_loop(&[
        (&proof.a, &b),
        (&acc, &pvk.neg_gamma_g2),
        (&proof.c, &pvk.neg_delta_g2),
    ])
    .final_exponentiation();

    let ok = result == pvk.alpha_g1_beta_g2;
    debug!(inputs = public_inputs.len(), ok, "proof verified");
    Ok(ok)
}
