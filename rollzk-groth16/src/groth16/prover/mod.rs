mod native;

use std::time::Instant;

use ff::PrimeField;
use rollzk_cs::Solution;
use tracing::debug;

use crate::domain::EvaluationDomain;
use crate::error::{ProverError, ProverResult};

pub use self::native::{roll, RollProver};

/// Witness values and the A, B, C evaluations laid out over the proving
/// domain: solved rows first, then one binding row per public wire (the wire
/// on L), then zero padding.
pub struct ProvingAssignment<F: PrimeField> {
    pub values: Vec<F>,
    pub a: Vec<F>,
    pub b: Vec<F>,
    pub c: Vec<F>,
}

impl<F: PrimeField> std::fmt::Debug for ProvingAssignment<F> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("ProvingAssignment")
            .field("values", &self.values.len())
            .field("rows", &self.a.len())
            .finish()
    }
}

impl<F: PrimeField> ProvingAssignment<F> {
    pub fn from_solution(
        solution: Solution<F>,
        nb_public: u32,
        nb_wires: u64,
        domain_size: u64,
    ) -> ProverResult<Self> {
        let Solution { values, mut a, mut b, mut c } = solution;
        let bound = nb_public as usize + 1;
        let rows = a.len();
        if values.len() as u64 != nb_wires
            || b.len() != rows
            || c.len() != rows
            || (rows + bound) as u64 > domain_size
            || values.len() < bound
        {
            return Err(ProverError::Shape {
                got: values.len(),
                rows,
                expected_wires: nb_wires,
                domain: domain_size,
            });
        }

        let n = domain_size as usize;
        a.extend_from_slice(&values[..bound]);
        a.resize(n, F::ZERO);
        b.resize(n, F::ZERO);
        c.resize(n, F::ZERO);
        Ok(Self { values, a, b, c })
    }

    /// Coefficients of `H = (A·B - C) / Z`, of which there are `n - 1`.
    pub fn quotient(&mut self) -> ProverResult<Vec<F>> {
        let start = Instant::now();
        let mut a = EvaluationDomain::<F>::from_coeffs(std::mem::take(&mut self.a))?;
        let mut b = EvaluationDomain::<F>::from_coeffs(std::mem::take(&mut self.b))?;
        let mut c = EvaluationDomain::<F>::from_coeffs(std::mem::take(&mut self.c))?;

        rayon::join(
            || {
                a.ifft();
                a.coset_fft();
            },
            || {
                rayon::join(
                    || {
                        b.ifft();
                        b.coset_fft();
                    },
                    || {
                        c.ifft();
                        c.coset_fft();
                    },
                )
            },
        );

        a.mul_assign(&b);
        drop(b);
        a.sub_assign(&c);
        drop(c);

        a.divide_by_z_on_coset();
        a.icoset_fft();

        let mut h = a.into_coeffs();
        h.truncate(h.len().saturating_sub(1));
        debug!(coeffs = h.len(), fft_ms = start.elapsed().as_millis() as u64, "quotient computed");
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::Scalar as Fr;
    use ff::Field;

    // x * x = y with x = 3, y = 9 public, one constraint
    fn solution() -> Solution<Fr> {
        let x = Fr::from(3u64);
        let y = Fr::from(9u64);
        Solution {
            values: vec![Fr::ONE, y, x],
            a: vec![x],
            b: vec![x],
            c: vec![y],
        }
    }

    #[test]
    fn test_binding_rows_and_padding() {
        let pa = ProvingAssignment::from_solution(solution(), 1, 3, 4).unwrap();
        assert_eq!(pa.a, vec![Fr::from(3u64), Fr::ONE, Fr::from(9u64), Fr::ZERO]);
        assert_eq!(pa.b, vec![Fr::from(3u64), Fr::ZERO, Fr::ZERO, Fr::ZERO]);
        assert_eq!(pa.c.len(), 4);
    }

    #[test]
    fn test_quotient_vanishes_times_z() {
        // A·B - C is zero on the domain, so H·Z reproduces it off the domain
        let mut pa = ProvingAssignment::from_solution(solution(), 1, 3, 4).unwrap();
        let (a, b, c) = (pa.a.clone(), pa.b.clone(), pa.c.clone());
        let h = pa.quotient().unwrap();
        assert_eq!(h.len(), 3);

        let interp = |evals: Vec<Fr>| {
            let mut d = EvaluationDomain::<Fr>::from_coeffs(evals).unwrap();
            d.ifft();
            d.into_coeffs()
        };
        let eval = |coeffs: &[Fr], x: Fr| coeffs.iter().rev().fold(Fr::ZERO, |acc, c| acc * x + c);
        let (pa_, pb, pc) = (interp(a), interp(b), interp(c));
        let x = Fr::from(1234567u64);
        let lhs = eval(&pa_, x) * eval(&pb, x) - eval(&pc, x);
        let z = x.pow_vartime([4u64]) - Fr::ONE;
        assert_eq!(lhs, eval(&h, x) * z);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = ProvingAssignment::from_solution(solution(), 1, 3, 1).unwrap_err();
        assert!(matches!(err, ProverError::Shape { rows: 1, domain: 1, .. }));
        let err = ProvingAssignment::from_solution(solution(), 1, 4, 4).unwrap_err();
        assert!(matches!(err, ProverError::Shape { got: 3, .. }));
    }
}
