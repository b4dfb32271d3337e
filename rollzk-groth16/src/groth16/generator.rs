//! Key generation from sampled toxic waste.
//!
//! Setup walks every logical constraint once through
//! [`ConstraintSystem::for_each_row_term`], so a lazified system is never
//! expanded in memory. Each key part is computed, handed to the sink and
//! dropped before the next one is built; with [`setup_with_dump`] the peak
//! point memory is one part.

use std::time::Instant;

use ff::{Field, PrimeField};
use group::prime::{PrimeCurve, PrimeCurveAffine};
use group::{Curve, Group};
use pairing::Engine;
use rand_core::RngCore;
use rayon::prelude::*;
use rollzk_cs::csr::Side;
use rollzk_cs::store::{self, SegmentStore};
use rollzk_cs::{ConstraintSystem, WireDensity};
use tracing::{debug, info};

use super::keys::{
    write_meta, write_part, write_verifying_key, KeyMeta, KeyPart, ProvingKey, VerifyingKey,
};
use super::points::Encoding;
use crate::domain::{domain_size, lagrange_basis};
use crate::error::SetupError;

const SCALAR_MUL_CHUNK: usize = 1 << 12;

/// Toxic waste of one setup run.
#[derive(Clone, Copy, Debug)]
pub struct Trapdoor<F> {
    pub alpha: F,
    pub beta: F,
    pub gamma: F,
    pub delta: F,
    pub tau: F,
}

impl<F: PrimeField> Trapdoor<F> {
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut nonzero = || loop {
            let v = F::random(&mut *rng);
            if !bool::from(v.is_zero()) {
                return v;
            }
        };
        Self {
            alpha: nonzero(),
            beta: nonzero(),
            gamma: nonzero(),
            delta: nonzero(),
            tau: nonzero(),
        }
    }
}

/// One finished piece of key material.
pub enum KeyChunk<E: Engine> {
    G1(KeyPart, Vec<E::G1Affine>),
    G2(KeyPart, Vec<E::G2Affine>),
    Meta(KeyMeta<E>),
}

/// Per-wire QAP polynomials evaluated at tau.
struct WireEvals<F> {
    u: Vec<F>,
    v: Vec<F>,
    w: Vec<F>,
}

fn wire_evals<F: PrimeField>(cs: &ConstraintSystem<F>, lagrange: &[F]) -> WireEvals<F> {
    let nb_wires = cs.nb_wires() as usize;
    let coeffs = cs.coeffs();
    let mut evals = WireEvals {
        u: vec![F::ZERO; nb_wires],
        v: vec![F::ZERO; nb_wires],
        w: vec![F::ZERO; nb_wires],
    };
    cs.for_each_row_term(|pos, side, wire, coeff| {
        let t = *coeffs.get(coeff) * lagrange[pos as usize];
        let slot = match side {
            Side::L => &mut evals.u[wire as usize],
            Side::R => &mut evals.v[wire as usize],
            Side::O => &mut evals.w[wire as usize],
        };
        *slot += t;
    });

    // binding rows: constant and public wires on L
    let m = cs.nb_constraints() as usize;
    for wire in 0..cs.wires().first_secret() as usize {
        evals.u[wire] += lagrange[m + wire];
    }
    evals
}

/// `[s] base` for every scalar, normalized in chunks.
fn batch_mul<G: PrimeCurve>(base: G, scalars: &[G::Scalar]) -> Vec<G::Affine> {
    let mut out = vec![G::Affine::identity(); scalars.len()];
    out.par_chunks_mut(SCALAR_MUL_CHUNK)
        .zip(scalars.par_chunks(SCALAR_MUL_CHUNK))
        .for_each(|(out, scalars)| {
            let proj: Vec<G> = scalars.iter().map(|s| base * *s).collect();
            G::batch_normalize(&proj, out);
        });
    out
}

/// Generate key material for `cs` under `trapdoor`, handing each part to
/// `sink` in the order A, B1, B2, K, Z, E. Returns the verifying key.
pub fn generate_with<E, S>(
    cs: &ConstraintSystem<E::Fr>,
    trapdoor: &Trapdoor<E::Fr>,
    mut sink: S,
) -> Result<VerifyingKey<E>, SetupError>
where
    E: Engine,
    S: FnMut(KeyChunk<E>) -> Result<(), SetupError>,
{
    let start = Instant::now();
    let first_secret = cs.wires().first_secret() as usize;
    let m = cs.nb_constraints();
    let (n, exp) = domain_size::<E::Fr>(m + first_secret as u64)?;
    info!(constraints = m, wires = cs.nb_wires(), domain = n, exp, "setup starting");

    let Trapdoor {
        alpha,
        beta,
        gamma,
        delta,
        tau,
    } = *trapdoor;
    let lagrange = lagrange_basis::<E::Fr>(n, tau)?.ok_or(SetupError::TauInDomain)?;
    let evals = wire_evals(cs, &lagrange);
    drop(lagrange);
    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "wire polynomials evaluated");

    let g1 = E::G1::generator();
    let g2 = E::G2::generator();
    let density = WireDensity::from_system(cs);

    sink(KeyChunk::G1(KeyPart::A, batch_mul(g1, &WireDensity::filter(&density.a, &evals.u))))?;
    let v_dense = WireDensity::filter(&density.b, &evals.v);
    sink(KeyChunk::G1(KeyPart::B1, batch_mul(g1, &v_dense)))?;
    sink(KeyChunk::G2(KeyPart::B2, batch_mul(g2, &v_dense)))?;
    drop(v_dense);

    // private wires over delta, public wires over gamma
    let gamma_inv = Option::<E::Fr>::from(gamma.invert()).ok_or(SetupError::ZeroTrapdoor("gamma"))?;
    let delta_inv = Option::<E::Fr>::from(delta.invert()).ok_or(SetupError::ZeroTrapdoor("delta"))?;
    let combined: Vec<E::Fr> = (0..cs.nb_wires() as usize)
        .into_par_iter()
        .map(|i| beta * evals.u[i] + alpha * evals.v[i] + evals.w[i])
        .collect();
    drop(evals);
    let k: Vec<E::Fr> = combined[first_secret..].par_iter().map(|x| *x * delta_inv).collect();
    sink(KeyChunk::G1(KeyPart::K, batch_mul(g1, &k)))?;
    drop(k);
    let ic: Vec<E::Fr> = combined[..first_secret].iter().map(|x| *x * gamma_inv).collect();
    drop(combined);

    // tau^i Z(tau) / delta for the n - 1 quotient coefficients
    let zt = (tau.pow_vartime([n as u64]) - E::Fr::ONE) * delta_inv;
    let mut z = vec![E::Fr::ZERO; n - 1];
    let chunk = SCALAR_MUL_CHUNK;
    z.par_chunks_mut(chunk).enumerate().for_each(|(i, part)| {
        let mut p = tau.pow_vartime([(i * chunk) as u64]) * zt;
        for slot in part {
            *slot = p;
            p *= tau;
        }
    });
    sink(KeyChunk::G1(KeyPart::Z, batch_mul(g1, &z)))?;
    drop(z);

    let meta = KeyMeta::<E> {
        domain_size: n as u64,
        nb_constraints: m,
        nb_wires: cs.nb_wires(),
        nb_public: cs.nb_public(),
        alpha_g1: (g1 * alpha).to_affine(),
        beta_g1: (g1 * beta).to_affine(),
        beta_g2: (g2 * beta).to_affine(),
        delta_g1: (g1 * delta).to_affine(),
        delta_g2: (g2 * delta).to_affine(),
        infinity_a: density.a_infinity(),
        infinity_b: density.b_infinity(),
    };
    let vk = VerifyingKey {
        alpha_g1: meta.alpha_g1,
        beta_g1: meta.beta_g1,
        beta_g2: meta.beta_g2,
        gamma_g2: (g2 * gamma).to_affine(),
        delta_g1: meta.delta_g1,
        delta_g2: meta.delta_g2,
        ic: batch_mul(g1, &ic),
    };
    sink(KeyChunk::Meta(meta))?;

    info!(
        domain = n,
        ic = vk.ic.len(),
        setup_ms = start.elapsed().as_millis() as u64,
        "setup finished"
    );
    Ok(vk)
}

/// Generate an in-memory proving and verifying key.
pub fn generate_parameters<E, R>(
    cs: &ConstraintSystem<E::Fr>,
    rng: &mut R,
) -> Result<(ProvingKey<E>, VerifyingKey<E>), SetupError>
where
    E: Engine,
    R: RngCore,
{
    generate_parameters_with(cs, &Trapdoor::random(rng))
}

pub fn generate_parameters_with<E: Engine>(
    cs: &ConstraintSystem<E::Fr>,
    trapdoor: &Trapdoor<E::Fr>,
) -> Result<(ProvingKey<E>, VerifyingKey<E>), SetupError> {
    let mut meta = None;
    let (mut a, mut b_g1, mut b_g2, mut z, mut k) = (vec![], vec![], vec![], vec![], vec![]);
    let vk = generate_with(cs, trapdoor, |chunk| {
        match chunk {
            KeyChunk::G1(KeyPart::A, p) => a = p,
            KeyChunk::G1(KeyPart::B1, p) => b_g1 = p,
            KeyChunk::G1(KeyPart::Z, p) => z = p,
            KeyChunk::G1(KeyPart::K, p) => k = p,
            KeyChunk::G2(_, p) => b_g2 = p,
            KeyChunk::Meta(m) => meta = Some(m),
            KeyChunk::G1(part, _) => return Err(SetupError::UnexpectedPart(part)),
        }
        Ok(())
    })?;
    let meta = meta.ok_or(SetupError::UnexpectedPart(KeyPart::E))?;
    Ok((
        ProvingKey {
            meta,
            a,
            b_g1,
            b_g2,
            z,
            k,
        },
        vk,
    ))
}

/// Run setup and stage every key segment of `session` as soon as it is
/// computed: `pk.{A,B1,B2,K,Z,E}.<session>.save`, then `vk.<session>.save`.
/// Nothing becomes visible until the last segment is written, and a commit
/// that fails part way removes every segment of the session.
pub fn setup_with_dump<E, R>(
    cs: &ConstraintSystem<E::Fr>,
    store: &SegmentStore,
    session: &str,
    encoding: Encoding,
    rng: &mut R,
) -> Result<VerifyingKey<E>, SetupError>
where
    E: Engine,
    R: RngCore,
{
    let trapdoor = Trapdoor::random(rng);
    let mut batch = store.batch();
    let vk = generate_with::<E, _>(cs, &trapdoor, |chunk| {
        match chunk {
            KeyChunk::G1(part, points) => {
                let name = part.segment(session);
                batch.stage(&name, |w| write_part(w, &name, part, &points, encoding))?;
            }
            KeyChunk::G2(part, points) => {
                let name = part.segment(session);
                batch.stage(&name, |w| write_part(w, &name, part, &points, encoding))?;
            }
            KeyChunk::Meta(meta) => {
                let name = KeyPart::E.segment(session);
                batch.stage(&name, |w| write_meta(w, &name, &meta, encoding))?;
            }
        }
        Ok(())
    })?;
    let name = store::vk_segment(session);
    batch.stage(&name, |w| write_verifying_key(w, &name, &vk, encoding))?;
    batch.commit()?;
    Ok(vk)
}
