//! Radix-2 evaluation domains over the scalar field.
//!
//! An [`EvaluationDomain`] holds `2^exp` elements and the matching root of
//! unity. Elements are either scalars (polynomial arithmetic in the prover)
//! or group elements ([`build_lagrange_srs`]), so transforms are generic over
//! anything that can be added and scaled by a scalar.

use std::ops::{AddAssign, MulAssign, SubAssign};

use ff::{BatchInvert, Field, PrimeField};
use group::Group;
use rayon::prelude::*;

use crate::error::DomainError;

/// An element an FFT can operate on.
pub trait FftElement<F>: Copy + Send + Sync + AddAssign + SubAssign + MulAssign<F> {}

impl<F, T> FftElement<F> for T where T: Copy + Send + Sync + AddAssign + SubAssign + MulAssign<F> {}

pub struct EvaluationDomain<F: PrimeField, T: FftElement<F> = F> {
    coeffs: Vec<T>,
    exp: u32,
    omega: F,
    omegainv: F,
    geninv: F,
    minv: F,
}

/// Smallest power of two holding `rows` elements, as `(size, log2(size))`.
pub fn domain_size<F: PrimeField>(rows: u64) -> Result<(usize, u32), DomainError> {
    let size = rows.max(1).next_power_of_two();
    let exp = size.trailing_zeros();
    if exp > F::S {
        return Err(DomainError::TooLarge {
            size: rows,
            max_log: F::S,
        });
    }
    Ok((size as usize, exp))
}

fn root_of_unity<F: PrimeField>(exp: u32) -> F {
    let mut omega = F::ROOT_OF_UNITY;
    for _ in exp..F::S {
        omega = omega.square();
    }
    omega
}

impl<F: PrimeField, T: FftElement<F>> EvaluationDomain<F, T> {
    /// Domain over `coeffs`, whose length must already be a power of two.
    pub fn from_coeffs(coeffs: Vec<T>) -> Result<Self, DomainError> {
        let size = coeffs.len();
        if !size.is_power_of_two() {
            return Err(DomainError::NotPowerOfTwo { size });
        }
        let exp = size.trailing_zeros();
        if exp > F::S {
            return Err(DomainError::TooLarge {
                size: size as u64,
                max_log: F::S,
            });
        }
        let omega = root_of_unity::<F>(exp);
        // field inversions of non-zero constants
        let omegainv = Option::<F>::from(omega.invert()).unwrap_or(F::ONE);
        let geninv = Option::<F>::from(F::MULTIPLICATIVE_GENERATOR.invert()).unwrap_or(F::ONE);
        let minv = Option::<F>::from(F::from(size as u64).invert()).unwrap_or(F::ONE);
        Ok(Self {
            coeffs,
            exp,
            omega,
            omegainv,
            geninv,
            minv,
        })
    }

    pub fn size(&self) -> usize {
        self.coeffs.len()
    }

    pub fn omega(&self) -> F {
        self.omega
    }

    pub fn as_ref(&self) -> &[T] {
        &self.coeffs
    }

    pub fn as_mut(&mut self) -> &mut [T] {
        &mut self.coeffs
    }

    pub fn into_coeffs(self) -> Vec<T> {
        self.coeffs
    }

    pub fn fft(&mut self) {
        best_fft(&mut self.coeffs, &self.omega, self.exp);
    }

    pub fn ifft(&mut self) {
        best_fft(&mut self.coeffs, &self.omegainv, self.exp);
        let minv = self.minv;
        self.coeffs.par_iter_mut().for_each(|v| *v *= minv);
    }

    /// Multiply element `i` by `g^i`.
    pub fn distribute_powers(&mut self, g: F) {
        let chunk = chunk_size(self.coeffs.len());
        self.coeffs
            .par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(i, part)| {
                let mut u = g.pow_vartime([(i * chunk) as u64]);
                for v in part {
                    *v *= u;
                    u *= g;
                }
            });
    }

    pub fn coset_fft(&mut self) {
        self.distribute_powers(F::MULTIPLICATIVE_GENERATOR);
        self.fft();
    }

    pub fn icoset_fft(&mut self) {
        let geninv = self.geninv;
        self.ifft();
        self.distribute_powers(geninv);
    }

    /// `Z(tau) = tau^n - 1`, the vanishing polynomial of the domain.
    pub fn z(&self, tau: &F) -> F {
        tau.pow_vartime([self.coeffs.len() as u64]) - F::ONE
    }

    /// Divide every element by `Z` evaluated on the coset, which is the same
    /// constant `g^n - 1` everywhere.
    pub fn divide_by_z_on_coset(&mut self) {
        let i = Option::<F>::from(self.z(&F::MULTIPLICATIVE_GENERATOR).invert()).unwrap_or(F::ZERO);
        self.coeffs.par_iter_mut().for_each(|v| *v *= i);
    }
}

impl<F: PrimeField> EvaluationDomain<F, F> {
    /// Pointwise product.
    pub fn mul_assign(&mut self, other: &Self) {
        self.coeffs
            .par_iter_mut()
            .zip(other.coeffs.par_iter())
            .for_each(|(a, b)| *a *= b);
    }

    /// Pointwise difference.
    pub fn sub_assign(&mut self, other: &Self) {
        self.coeffs
            .par_iter_mut()
            .zip(other.coeffs.par_iter())
            .for_each(|(a, b)| *a -= b);
    }
}

/// Lagrange basis of the size-`n` domain evaluated at `tau`:
/// `L_i(tau) = omega^i (tau^n - 1) / (n (tau - omega^i))`.
///
/// Returns `None` when `tau` lies in the domain.
pub fn lagrange_basis<F: PrimeField>(n: usize, tau: F) -> Result<Option<Vec<F>>, DomainError> {
    if !n.is_power_of_two() {
        return Err(DomainError::NotPowerOfTwo { size: n });
    }
    let exp = n.trailing_zeros();
    if exp > F::S {
        return Err(DomainError::TooLarge {
            size: n as u64,
            max_log: F::S,
        });
    }
    let omega = root_of_unity::<F>(exp);
    let zt = tau.pow_vartime([n as u64]) - F::ONE;
    if bool::from(zt.is_zero()) {
        return Ok(None);
    }
    let ninv = Option::<F>::from(F::from(n as u64).invert()).unwrap_or(F::ONE);

    let mut powers = Vec::with_capacity(n);
    let mut w = F::ONE;
    for _ in 0..n {
        powers.push(w);
        w *= omega;
    }
    let mut denoms: Vec<F> = powers.par_iter().map(|w| tau - w).collect();
    denoms.iter_mut().batch_invert();

    let scale = zt * ninv;
    Ok(Some(
        powers
            .par_iter()
            .zip(denoms.par_iter())
            .map(|(w, d)| *w * d * scale)
            .collect(),
    ))
}

/// Turn a monomial SRS `[tau^i] G` into its Lagrange form `[L_i(tau)] G` over
/// the size-`size` domain.
pub fn build_lagrange_srs<G>(monomial: &[G], size: usize) -> Result<Vec<G>, DomainError>
where
    G: Group + Send + Sync,
{
    if monomial.len() < size {
        return Err(DomainError::ShortSrs {
            have: monomial.len(),
            need: size,
        });
    }
    let mut domain = EvaluationDomain::<G::Scalar, G>::from_coeffs(monomial[..size].to_vec())?;
    domain.ifft();
    Ok(domain.into_coeffs())
}

fn chunk_size(len: usize) -> usize {
    (len / rayon::current_num_threads()).max(1024)
}

fn log2_floor(n: usize) -> u32 {
    usize::BITS - 1 - n.max(1).leading_zeros()
}

fn best_fft<F: PrimeField, T: FftElement<F>>(a: &mut [T], omega: &F, log_n: u32) {
    let log_threads = log2_floor(rayon::current_num_threads());
    if log_n <= log_threads || log_n < 10 {
        serial_fft(a, omega, log_n);
    } else {
        parallel_fft(a, omega, log_n, log_threads);
    }
}

fn bitreverse(mut n: u32, l: u32) -> u32 {
    let mut r = 0;
    for _ in 0..l {
        r = (r << 1) | (n & 1);
        n >>= 1;
    }
    r
}

fn serial_fft<F: PrimeField, T: FftElement<F>>(a: &mut [T], omega: &F, log_n: u32) {
    let n = a.len() as u32;
    debug_assert_eq!(n, 1 << log_n);

    for k in 0..n {
        let rk = bitreverse(k, log_n);
        if k < rk {
            a.swap(rk as usize, k as usize);
        }
    }

    let mut m = 1;
    for _ in 0..log_n {
        let w_m = omega.pow_vartime([(n / (2 * m)) as u64]);
        let mut k = 0;
        while k < n {
            let mut w = F::ONE;
            for j in 0..m {
                let mut t = a[(k + j + m) as usize];
                t *= w;
                let mut tmp = a[(k + j) as usize];
                tmp -= t;
                a[(k + j + m) as usize] = tmp;
                a[(k + j) as usize] += t;
                w *= w_m;
            }
            k += 2 * m;
        }
        m *= 2;
    }
}

fn parallel_fft<F: PrimeField, T: FftElement<F>>(
    a: &mut [T],
    omega: &F,
    log_n: u32,
    log_threads: u32,
) {
    let num_threads = 1usize << log_threads;
    let log_new_n = log_n - log_threads;
    let new_n = 1usize << log_new_n;
    let new_omega = omega.pow_vartime([num_threads as u64]);
    let mask = (1usize << log_n) - 1;

    let src: &[T] = a;
    let tmp: Vec<Vec<T>> = (0..num_threads)
        .into_par_iter()
        .map(|j| {
            // shuffle into sub-FFT j
            let omega_j = omega.pow_vartime([j as u64]);
            let omega_step = omega.pow_vartime([(j as u64) << log_new_n]);
            let mut out = src[..new_n].to_vec();
            let mut elt = F::ONE;
            for (i, slot) in out.iter_mut().enumerate() {
                for s in 0..num_threads {
                    let idx = (i + (s << log_new_n)) & mask;
                    let mut t = src[idx];
                    t *= elt;
                    if s == 0 {
                        *slot = t;
                    } else {
                        *slot += t;
                    }
                    elt *= omega_step;
                }
                elt *= omega_j;
            }
            serial_fft(&mut out, &new_omega, log_new_n);
            out
        })
        .collect();

    // unshuffle
    let lane = num_threads - 1;
    a.par_chunks_mut(new_n).enumerate().for_each(|(c, part)| {
        let mut idx = c * new_n;
        for v in part {
            *v = tmp[idx & lane][idx >> log_threads];
            idx += 1;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::{G1Projective, Scalar as Fr};
    use ff::Field;
    use rand_core::SeedableRng;
    use rand_xorshift::XorShiftRng;

    fn rng() -> XorShiftRng {
        XorShiftRng::from_seed([
            0x59, 0x62, 0xbe, 0x5d, 0x76, 0x3d, 0x31, 0x8d, 0x17, 0xdb, 0x37, 0x32, 0x54, 0x06,
            0xbc, 0xe5,
        ])
    }

    fn eval(poly: &[Fr], x: Fr) -> Fr {
        poly.iter().rev().fold(Fr::ZERO, |acc, c| acc * x + c)
    }

    #[test]
    fn test_fft_evaluates_polynomial() {
        let mut rng = rng();
        for log_n in [1, 4, 12] {
            let n = 1 << log_n;
            let poly: Vec<Fr> = (0..n).map(|_| Fr::random(&mut rng)).collect();
            let mut d = EvaluationDomain::<Fr>::from_coeffs(poly.clone()).unwrap();
            d.fft();
            let omega = d.omega();
            for i in [0usize, 1, n / 2, n - 1] {
                assert_eq!(d.as_ref()[i], eval(&poly, omega.pow_vartime([i as u64])));
            }
            d.ifft();
            assert_eq!(d.into_coeffs(), poly);
        }
    }

    #[test]
    fn test_coset_roundtrip() {
        let mut rng = rng();
        let poly: Vec<Fr> = (0..2048).map(|_| Fr::random(&mut rng)).collect();
        let mut d = EvaluationDomain::<Fr>::from_coeffs(poly.clone()).unwrap();
        d.coset_fft();
        assert_eq!(
            d.as_ref()[1],
            eval(&poly, Fr::MULTIPLICATIVE_GENERATOR * d.omega())
        );
        d.icoset_fft();
        assert_eq!(d.into_coeffs(), poly);
    }

    #[test]
    fn test_lagrange_basis_interpolates() {
        let mut rng = rng();
        let n = 16;
        let tau = Fr::random(&mut rng);
        let basis = lagrange_basis(n, tau).unwrap().unwrap();

        let values: Vec<Fr> = (0..n).map(|_| Fr::random(&mut rng)).collect();
        let mut d = EvaluationDomain::<Fr>::from_coeffs(values.clone()).unwrap();
        d.ifft();
        let at_tau: Fr = values.iter().zip(&basis).map(|(v, l)| *v * l).sum();
        assert_eq!(at_tau, eval(d.as_ref(), tau));

        let omega = EvaluationDomain::<Fr>::from_coeffs(vec![Fr::ZERO; n]).unwrap().omega();
        assert!(lagrange_basis(n, omega.pow_vartime([3])).unwrap().is_none());
    }

    #[test]
    fn test_lagrange_srs_matches_scalar_basis() {
        let mut rng = rng();
        let n = 8;
        let tau = Fr::random(&mut rng);
        let g = G1Projective::generator();
        let mut monomial = Vec::new();
        let mut p = Fr::ONE;
        for _ in 0..n + 3 {
            monomial.push(g * p);
            p *= tau;
        }
        let srs = build_lagrange_srs(&monomial, n).unwrap();
        let basis = lagrange_basis(n, tau).unwrap().unwrap();
        for (point, l) in srs.iter().zip(&basis) {
            assert_eq!(*point, g * l);
        }
        assert!(matches!(
            build_lagrange_srs(&monomial, 16),
            Err(DomainError::ShortSrs { have: 11, need: 16 })
        ));
    }

    #[test]
    fn test_domain_size() {
        assert_eq!(domain_size::<Fr>(0).unwrap(), (1, 0));
        assert_eq!(domain_size::<Fr>(305 + 3).unwrap(), (512, 9));
        assert!(matches!(
            domain_size::<Fr>(1 << 40),
            Err(DomainError::TooLarge { max_log: 32, .. })
        ));
    }
}
