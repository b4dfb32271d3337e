//! Row-parallel evaluation of a constraint system against a full witness.
//!
//! Computes `a[i] = L_i · w`, `b[i] = R_i · w`, `c[i] = O_i · w` for every
//! logical constraint `i`, expanding templates on the fly. The output vectors
//! are split into fixed-size chunks of consecutive positions and each chunk
//! is filled by one rayon task, so threads write disjoint ranges.

use std::time::Instant;

use ff::PrimeField;
use rayon::prelude::*;
use tracing::info;

use crate::coeff::{mul_by_coeff, CoeffId, CoeffTable};
use crate::csr::{Side, Term};
use crate::error::SolverError;
use crate::lazy::LazyConstraint;
use crate::system::ConstraintSystem;

/// ~256 KiB of output per chunk at 32 bytes per scalar.
const CHUNK_SIZE: usize = 8192;

/// One logical constraint, borrowed from the system.
#[derive(Clone, Copy)]
pub(crate) enum Row<'a> {
    Explicit([&'a [Term]; 3]),
    Lazy(&'a LazyConstraint, u32),
}

impl<'a> Row<'a> {
    #[inline]
    pub(crate) fn for_each(&self, side: Side, mut f: impl FnMut(u32, CoeffId)) {
        match self {
            Row::Explicit(sides) => {
                for t in sides[side.index()] {
                    f(t.wire, t.coeff);
                }
            }
            Row::Lazy(template, k) => template.for_each_term(side, *k, f),
        }
    }

    #[inline]
    fn dot<F: PrimeField>(&self, side: Side, values: &[F], coeffs: &CoeffTable<F>) -> F {
        let mut acc = F::ZERO;
        self.for_each(side, |wire, coeff| {
            acc += mul_by_coeff(coeffs, coeff, &values[wire as usize]);
        });
        acc
    }
}

/// Walks logical positions in order starting from an arbitrary one.
pub(crate) struct RowCursor<'a, F: PrimeField> {
    cs: &'a ConstraintSystem<F>,
    pos: usize,
    template: usize,
    occurrence: u32,
}

impl<'a, F: PrimeField> RowCursor<'a, F> {
    pub(crate) fn new(cs: &'a ConstraintSystem<F>, pos: usize) -> Self {
        let nb_explicit = cs.nb_explicit();
        let (template, occurrence) = if pos >= nb_explicit {
            cs.lazy_map
                .locate((pos - nb_explicit) as u64)
                .map(|(t, k)| (t as usize, k))
                .unwrap_or((0, 0))
        } else {
            (0, 0)
        };
        Self {
            cs,
            pos,
            template,
            occurrence,
        }
    }

    /// The row at the current position; advances by one.
    #[inline]
    pub(crate) fn next_row(&mut self) -> (Row<'a>, Option<u32>) {
        let cs = self.cs;
        if self.pos < cs.nb_explicit() {
            let row = Row::Explicit(cs.explicit.row(self.pos));
            self.pos += 1;
            return (row, None);
        }
        let t = &cs.templates[self.template];
        let row = Row::Lazy(t, self.occurrence);
        let id = self.template as u32;
        self.occurrence += 1;
        if self.occurrence == t.count {
            self.template += 1;
            self.occurrence = 0;
        }
        self.pos += 1;
        (row, Some(id))
    }
}

/// A solved witness and the per-constraint evaluations fed to the prover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution<F: PrimeField> {
    /// Every wire value, constant first.
    pub values: Vec<F>,
    pub a: Vec<F>,
    pub b: Vec<F>,
    pub c: Vec<F>,
}

impl<F: PrimeField> Solution<F> {
    /// First position where `a · b != c`.
    pub fn first_unsatisfied(&self) -> Option<usize> {
        self.a
            .par_iter()
            .zip(self.b.par_iter())
            .zip(self.c.par_iter())
            .position_first(|((a, b), c)| *a * b != *c)
    }

    /// True when every constraint holds and the evaluations cover `cs`.
    pub fn is_satisfied(&self, cs: &ConstraintSystem<F>) -> bool {
        let n = cs.nb_constraints() as usize;
        self.a.len() == n
            && self.b.len() == n
            && self.c.len() == n
            && self.first_unsatisfied().is_none()
    }

    /// Values of the public wires (without the constant).
    pub fn public_values(&self, nb_public: u32) -> &[F] {
        &self.values[1..1 + nb_public as usize]
    }
}

/// Evaluate every constraint of `cs` against the full wire assignment.
pub fn evaluate<F: PrimeField>(
    cs: &ConstraintSystem<F>,
    values: Vec<F>,
) -> Result<Solution<F>, SolverError> {
    let nb_wires = cs.nb_wires() as usize;
    if values.len() != nb_wires {
        return Err(SolverError::WitnessLength {
            expected: nb_wires,
            got: values.len(),
        });
    }

    let start = Instant::now();
    let n = cs.nb_constraints() as usize;
    let coeffs = cs.coeffs();
    let mut a = vec![F::ZERO; n];
    let mut b = vec![F::ZERO; n];
    let mut c = vec![F::ZERO; n];

    a.par_chunks_mut(CHUNK_SIZE)
        .zip(b.par_chunks_mut(CHUNK_SIZE))
        .zip(c.par_chunks_mut(CHUNK_SIZE))
        .enumerate()
        .for_each(|(chunk_idx, ((a_chunk, b_chunk), c_chunk))| {
            let mut cursor = RowCursor::new(cs, chunk_idx * CHUNK_SIZE);
            for j in 0..a_chunk.len() {
                let (row, _) = cursor.next_row();
                a_chunk[j] = row.dot(Side::L, &values, coeffs);
                b_chunk[j] = row.dot(Side::R, &values, coeffs);
                c_chunk[j] = row.dot(Side::O, &values, coeffs);
            }
        });

    info!(
        eval_ms = start.elapsed().as_millis() as u64,
        constraints = n,
        explicit = cs.nb_explicit(),
        templates = cs.nb_templates(),
        "constraint evaluation complete"
    );

    Ok(Solution { values, a, b, c })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{CircuitBuilder, Wire};
    use crate::lazy::{lazify, LazifyConfig};
    use blstrs::Scalar as Fr;
    use ff::Field;

    #[test]
    fn test_evaluate_explicit_and_lazy_agree() {
        let mut b = CircuitBuilder::<Fr>::new();
        let p = b.public_input();
        let xs: Vec<Wire> = (0..CHUNK_SIZE as u32 + 10).map(|_| b.secret_input()).collect();
        for &x in &xs {
            b.enforce_terms(&[(x, 3), (p, 1)], &[(Wire::ONE, 1)], &[(x, 3), (p, 1)])
                .unwrap();
        }
        b.enforce_terms(&[(p, 1)], &[(p, 1)], &[(p, 1)]).unwrap();
        let explicit = b.build();

        let mut values = vec![Fr::ONE, Fr::ONE];
        values.extend((0..xs.len() as u64).map(Fr::from));

        let mut lazy = explicit.clone();
        let report = lazify(&mut lazy, &LazifyConfig::default());
        assert_eq!(lazy.nb_explicit(), 1);

        let s0 = evaluate(&explicit, values.clone()).unwrap();
        let s1 = evaluate(&lazy, values).unwrap();
        assert!(s0.is_satisfied(&explicit));
        assert!(s1.is_satisfied(&lazy));
        for old in 0..s0.a.len() {
            let new = report.new_position(old) as usize;
            assert_eq!(s0.a[old], s1.a[new]);
            assert_eq!(s0.c[old], s1.c[new]);
        }
        assert_eq!(s1.a[0], Fr::ONE);
        assert_eq!(s1.a[5], Fr::from(13u64));
    }

    #[test]
    fn test_evaluate_rejects_short_witness() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        let cs = b.build();
        assert!(matches!(
            evaluate(&cs, vec![Fr::ONE]),
            Err(SolverError::WitnessLength {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_unsatisfied_position_reported() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        b.enforce_terms(&[(x, 1)], &[(Wire::ONE, 1)], &[(x, 1)]).unwrap();
        let cs = b.build();
        let s = evaluate(&cs, vec![Fr::ONE, Fr::from(3u64)]).unwrap();
        assert_eq!(s.first_unsatisfied(), Some(0));
        assert!(!s.is_satisfied(&cs));
    }
}
