//! The roll prover: key segments are folded into partial accumulators one at
//! a time, in any order.

use std::time::Instant;

use bitvec::prelude::*;
use ff::{Field, PrimeFieldBits};
use group::prime::PrimeCurveAffine;
use group::Curve;
use pairing::Engine;
use rand_core::RngCore;
use rollzk_cs::{Solution, WireDensity};
use tracing::{debug, info};

use super::ProvingAssignment;
use crate::error::{ProverError, ProverResult};
use crate::groth16::keys::{check_len, KeyMeta, KeyPart, KeySource, FOLD_PARTS};
use crate::groth16::Proof;
use crate::multiexp::multiexp;

/// In-progress proof. Created from a solved witness and the `E` segment;
/// each of A, B1, B2, Z and K must be folded exactly once before
/// [`RollProver::finish`].
pub struct RollProver<E: Engine> {
    meta: KeyMeta<E>,
    values: Vec<E::Fr>,
    h: Vec<E::Fr>,
    r: E::Fr,
    s: E::Fr,

    a: Option<E::G1>,
    b1: Option<E::G1>,
    b2: Option<E::G2>,
    z: Option<E::G1>,
    k: Option<E::G1>,
}

impl<E> RollProver<E>
where
    E: Engine,
    E::Fr: PrimeFieldBits,
{
    /// Lay the solution out over the key's domain and compute the quotient.
    pub fn new(
        meta: KeyMeta<E>,
        solution: Solution<E::Fr>,
        r: E::Fr,
        s: E::Fr,
    ) -> ProverResult<Self> {
        // delta at infinity means a subverted key
        if bool::from(meta.delta_g1.is_identity() | meta.delta_g2.is_identity()) {
            return Err(ProverError::UnexpectedIdentity);
        }
        if solution.a.len() as u64 != meta.nb_constraints {
            return Err(ProverError::Shape {
                got: solution.values.len(),
                rows: solution.a.len(),
                expected_wires: meta.nb_wires,
                domain: meta.domain_size,
            });
        }
        let mut pa = ProvingAssignment::from_solution(
            solution,
            meta.nb_public,
            meta.nb_wires,
            meta.domain_size,
        )?;
        let h = pa.quotient()?;
        Ok(Self {
            values: pa.values,
            meta,
            h,
            r,
            s,
            a: None,
            b1: None,
            b2: None,
            z: None,
            k: None,
        })
    }

    pub fn random<R: RngCore>(
        meta: KeyMeta<E>,
        solution: Solution<E::Fr>,
        rng: &mut R,
    ) -> ProverResult<Self> {
        let r = E::Fr::random(&mut *rng);
        let s = E::Fr::random(&mut *rng);
        Self::new(meta, solution, r, s)
    }

    pub fn meta(&self) -> &KeyMeta<E> {
        &self.meta
    }

    fn slot_g1(&mut self, part: KeyPart) -> ProverResult<&mut Option<E::G1>> {
        match part {
            KeyPart::A => Ok(&mut self.a),
            KeyPart::B1 => Ok(&mut self.b1),
            KeyPart::Z => Ok(&mut self.z),
            KeyPart::K => Ok(&mut self.k),
            KeyPart::E | KeyPart::B2 => Err(ProverError::WrongGroup(part)),
        }
    }

    fn is_folded(&self, part: KeyPart) -> bool {
        match part {
            KeyPart::A => self.a.is_some(),
            KeyPart::B1 => self.b1.is_some(),
            KeyPart::B2 => self.b2.is_some(),
            KeyPart::Z => self.z.is_some(),
            KeyPart::K => self.k.is_some(),
            KeyPart::E => true,
        }
    }

    /// Parts not folded yet.
    pub fn pending(&self) -> Vec<KeyPart> {
        FOLD_PARTS.into_iter().filter(|p| !self.is_folded(*p)).collect()
    }

    /// Load `part` from `source`, fold it and drop the points.
    pub fn fold<S>(&mut self, source: &S, part: KeyPart) -> ProverResult<()>
    where
        S: KeySource<E> + ?Sized,
    {
        if part == KeyPart::E {
            return Err(ProverError::WrongGroup(part));
        }
        if self.is_folded(part) {
            return Err(ProverError::AlreadyFolded(part));
        }
        if part.is_g2() {
            let points = source.load_g2(part)?;
            self.fold_b2(&points)
        } else {
            let points = source.load_g1(part)?;
            self.fold_g1(part, &points)
        }
    }

    /// Fold an already resident G1 segment.
    pub fn fold_g1(&mut self, part: KeyPart, points: &[E::G1Affine]) -> ProverResult<()> {
        if self.is_folded(part) {
            return Err(ProverError::AlreadyFolded(part));
        }
        let start = Instant::now();
        check_len(&self.meta, part, &part.to_string(), points.len())?;
        let acc = match part {
            KeyPart::A => multiexp(points, &self.dense_values(&self.meta.infinity_a)),
            KeyPart::B1 => multiexp(points, &self.dense_values(&self.meta.infinity_b)),
            KeyPart::Z => multiexp(points, &self.h),
            KeyPart::K => multiexp(points, &self.values[self.meta.first_private() as usize..]),
            KeyPart::E | KeyPart::B2 => return Err(ProverError::WrongGroup(part)),
        };
        *self.slot_g1(part)? = Some(acc);
        debug!(
            part = part.name(),
            points = points.len(),
            fold_ms = start.elapsed().as_millis() as u64,
            "segment folded"
        );
        Ok(())
    }

    /// Fold the B2 segment.
    pub fn fold_b2(&mut self, points: &[E::G2Affine]) -> ProverResult<()> {
        if self.b2.is_some() {
            return Err(ProverError::AlreadyFolded(KeyPart::B2));
        }
        let start = Instant::now();
        check_len(&self.meta, KeyPart::B2, KeyPart::B2.name(), points.len())?;
        self.b2 = Some(multiexp(points, &self.dense_values(&self.meta.infinity_b)));
        debug!(
            part = "B2",
            points = points.len(),
            fold_ms = start.elapsed().as_millis() as u64,
            "segment folded"
        );
        Ok(())
    }

    /// Witness values of the wires that have a point, given the wires that do not.
    fn dense_values(&self, infinity: &BitSlice<u64, Lsb0>) -> Vec<E::Fr> {
        let dense = !infinity.to_bitvec();
        WireDensity::filter(&dense, &self.values)
    }

    /// Combine the accumulators into a proof. Fails with the list of parts
    /// still missing; no partial proof is produced.
    pub fn finish(self) -> ProverResult<Proof<E>> {
        let pending = self.pending();
        let (Some(a), Some(b1), Some(b2), Some(z), Some(k)) =
            (self.a, self.b1, self.b2, self.z, self.k)
        else {
            return Err(ProverError::Incomplete(pending));
        };
        let meta = &self.meta;
        let (r, s) = (self.r, self.s);

        let g_a = meta.delta_g1 * r + meta.alpha_g1 + a;
        let g_b = meta.delta_g2 * s + meta.beta_g2 + b2;
        let b1 = meta.delta_g1 * s + meta.beta_g1 + b1;
        let g_c = g_a * s + b1 * r - meta.delta_g1 * (r * s) + z + k;

        Ok(Proof {
            a: g_a.to_affine(),
            b: g_b.to_affine(),
            c: g_c.to_affine(),
        })
    }
}

/// Fold every part from `source` in the given order and finish.
pub fn roll<E, S>(
    mut prover: RollProver<E>,
    source: &S,
    order: &[KeyPart],
) -> ProverResult<Proof<E>>
where
    E: Engine,
    E::Fr: PrimeFieldBits,
    S: KeySource<E> + ?Sized,
{
    let start = Instant::now();
    for part in order {
        prover.fold(source, *part)?;
    }
    let proof = prover.finish()?;
    info!(prove_ms = start.elapsed().as_millis() as u64, "proof rolled");
    Ok(proof)
}
