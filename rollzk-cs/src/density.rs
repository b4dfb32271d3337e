//! Wire density bitmaps extracted from constraint structure.
//!
//! Density tracks which wires appear on the L and R side of any logical
//! constraint. It depends only on circuit topology, so it is computed once per
//! system and reused by key generation: a wire absent from every L row has a
//! zero A polynomial, so its A point is the identity and is left out of the
//! A key segment (likewise for R and the B segments).
//!
//! The proving domain appends one binding row per public wire (and the
//! constant) with that wire on L, so those wires are always dense in A.

use bitvec::prelude::*;
use ff::PrimeField;

use crate::csr::Side;
use crate::system::ConstraintSystem;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireDensity {
    /// Bit `w` is set when wire `w` appears on any L side.
    pub a: BitVec<u64, Lsb0>,
    /// Bit `w` is set when wire `w` appears on any R side.
    pub b: BitVec<u64, Lsb0>,
}

impl WireDensity {
    pub fn from_system<F: PrimeField>(cs: &ConstraintSystem<F>) -> Self {
        let nb_wires = cs.nb_wires() as usize;
        let mut a = bitvec![u64, Lsb0; 0; nb_wires];
        let mut b = bitvec![u64, Lsb0; 0; nb_wires];

        cs.for_each_side_term(Side::L, |wire, _| a.set(wire as usize, true));
        cs.for_each_side_term(Side::R, |wire, _| b.set(wire as usize, true));

        // public binding rows
        a[..cs.wires().first_secret() as usize].fill(true);

        Self { a, b }
    }

    pub fn nb_wires(&self) -> usize {
        self.a.len()
    }

    pub fn a_count(&self) -> usize {
        self.a.count_ones()
    }

    pub fn b_count(&self) -> usize {
        self.b.count_ones()
    }

    /// Complement of `a`: wires whose A point is the identity.
    pub fn a_infinity(&self) -> BitVec<u64, Lsb0> {
        !self.a.clone()
    }

    pub fn b_infinity(&self) -> BitVec<u64, Lsb0> {
        !self.b.clone()
    }

    /// Keep `values[w]` for every set bit `w` of `bits`, in wire order.
    pub fn filter<T: Copy>(bits: &BitSlice<u64, Lsb0>, values: &[T]) -> Vec<T> {
        bits.iter_ones().map(|w| values[w]).collect()
    }

    pub fn memory_bytes(&self) -> usize {
        (self.a.as_raw_slice().len() + self.b.as_raw_slice().len()) * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{CircuitBuilder, Wire};
    use crate::lazy::{lazify, LazifyConfig};
    use blstrs::Scalar as Fr;

    #[test]
    fn test_density_matches_structure() {
        let mut b = CircuitBuilder::<Fr>::new();
        let p = b.public_input();
        let xs: Vec<Wire> = (0..4).map(|_| b.secret_input()).collect();
        let lone = b.secret_input();
        for &x in &xs {
            b.enforce_terms(&[(x, 2)], &[(x, 1)], &[(p, 1)]).unwrap();
        }
        b.enforce_terms(&[(p, 1)], &[(Wire::ONE, 1)], &[(lone, 1)]).unwrap();
        let explicit = b.build();
        let mut lazy = explicit.clone();
        lazify(&mut lazy, &LazifyConfig::default());
        assert_eq!(lazy.nb_templates(), 1);

        let d0 = WireDensity::from_system(&explicit);
        let d1 = WireDensity::from_system(&lazy);
        assert_eq!(d0, d1);

        // wires: 0 const, 1 p, 2..6 xs, 6 lone
        assert_eq!(d0.a.iter_ones().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(d0.b.iter_ones().collect::<Vec<_>>(), vec![0, 2, 3, 4, 5]);
        assert!(d0.a_infinity()[6]);
        assert_eq!(d0.b_count(), 5);
        assert_eq!(
            WireDensity::filter(&d0.b, &[10, 11, 12, 13, 14, 15, 16]),
            vec![10, 12, 13, 14, 15]
        );
    }
}
