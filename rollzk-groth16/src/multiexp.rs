//! Multi-scalar multiplication: `sum_i scalars[i] * bases[i]`.
//!
//! Bucketed Pippenger. The input is split into one chunk per rayon thread,
//! each chunk is reduced independently and the partial sums are added.

use bitvec::field::BitField;
use ff::{PrimeField, PrimeFieldBits};
use group::prime::PrimeCurveAffine;
use group::Group;
use rayon::prelude::*;

/// Window width for `n` terms.
fn window_size(n: usize) -> usize {
    if n < 32 {
        3
    } else {
        (n as f64).ln().ceil() as usize
    }
}

fn pippenger<G>(bases: &[G], scalars: &[G::Scalar]) -> G::Curve
where
    G: PrimeCurveAffine,
    G::Scalar: PrimeFieldBits,
{
    let c = window_size(bases.len());
    let num_bits = G::Scalar::NUM_BITS as usize;
    let windows = num_bits.div_ceil(c);
    let bits: Vec<_> = scalars.iter().map(|s| s.to_le_bits()).collect();

    let mut acc = G::Curve::identity();
    let mut buckets = vec![G::Curve::identity(); (1 << c) - 1];
    for w in (0..windows).rev() {
        for _ in 0..c {
            acc = acc.double();
        }
        let lo = w * c;
        let hi = (lo + c).min(num_bits);
        buckets.iter_mut().for_each(|b| *b = G::Curve::identity());

        for (base, b) in bases.iter().zip(&bits) {
            let digit: usize = b[lo..hi].load_le();
            if digit != 0 {
                buckets[digit - 1] += *base;
            }
        }

        let mut running = G::Curve::identity();
        let mut sum = G::Curve::identity();
        for b in buckets.iter().rev() {
            running += b;
            sum += &running;
        }
        acc += sum;
    }
    acc
}

/// Compute `sum_i scalars[i] * bases[i]`; extra elements of the longer
/// input are ignored.
pub fn multiexp<G>(bases: &[G], scalars: &[G::Scalar]) -> G::Curve
where
    G: PrimeCurveAffine,
    G::Scalar: PrimeFieldBits,
{
    let n = bases.len().min(scalars.len());
    if n == 0 {
        return G::Curve::identity();
    }
    let chunk = n.div_ceil(rayon::current_num_threads()).max(1024);
    bases[..n]
        .par_chunks(chunk)
        .zip(scalars[..n].par_chunks(chunk))
        .map(|(b, s)| pippenger(b, s))
        .reduce(G::Curve::identity, |a, b| a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::{G1Affine, G1Projective, G2Affine, Scalar as Fr};
    use ff::Field;
    use group::Curve;
    use rand_core::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn naive<G: PrimeCurveAffine>(bases: &[G], scalars: &[G::Scalar]) -> G::Curve {
        bases
            .iter()
            .zip(scalars)
            .fold(G::Curve::identity(), |acc, (b, s)| acc + *b * *s)
    }

    #[test]
    fn test_multiexp_matches_naive() {
        let mut rng = XorShiftRng::from_seed([
            0x59, 0x62, 0xbe, 0x5d, 0x76, 0x3d, 0x31, 0x8d, 0x17, 0xdb, 0x37, 0x32, 0x54, 0x06,
            0xbc, 0xe5,
        ]);
        for n in [1usize, 7, 100, 3000] {
            let proj: Vec<G1Projective> = (0..n).map(|_| G1Projective::random(&mut rng)).collect();
            let mut bases = vec![G1Affine::identity(); n];
            G1Projective::batch_normalize(&proj, &mut bases);
            let mut scalars: Vec<Fr> = (0..n).map(|_| Fr::random(&mut rng)).collect();
            scalars[0] = Fr::ZERO;
            if n > 1 {
                scalars[1] = -Fr::ONE;
            }
            assert_eq!(multiexp(&bases, &scalars), naive(&bases, &scalars));
        }
    }

    #[test]
    fn test_multiexp_g2_and_empty() {
        let g = G2Affine::generator();
        let bases = vec![g; 5];
        let scalars: Vec<Fr> = (1..=5u64).map(Fr::from).collect();
        assert_eq!(multiexp(&bases, &scalars), g * Fr::from(15u64));
        assert_eq!(multiexp::<G2Affine>(&[], &[]), G2Affine::identity().to_curve());
    }
}
