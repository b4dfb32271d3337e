//! Coefficient interning.
//!
//! Every coefficient appearing in a linear expression is stored once in a
//! [`CoeffTable`] and referenced by a compact [`CoeffId`]. Values that fit in
//! a signed 64-bit integer are indexed by that integer, everything else by the
//! canonical byte encoding of the field element.
//!
//! Ids `0..4` are reserved for `0`, `1`, `-1` and `2`, in that order, so the
//! evaluator can take a fast path for them without touching the table.

use std::collections::HashMap;

use ff::PrimeField;
use serde::{Deserialize, Serialize};

use crate::error::CsError;

/// Index of a coefficient in a [`CoeffTable`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct CoeffId(pub u32);

impl CoeffId {
    pub const ZERO: CoeffId = CoeffId(0);
    pub const ONE: CoeffId = CoeffId(1);
    pub const MINUS_ONE: CoeffId = CoeffId(2);
    pub const TWO: CoeffId = CoeffId(3);

    /// Number of reserved ids at the start of every table.
    pub const NB_RESERVED: u32 = 4;

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Multiply `value` by the coefficient `id`, skipping the table for the
/// reserved constants.
#[inline]
pub fn mul_by_coeff<F: PrimeField>(table: &CoeffTable<F>, id: CoeffId, value: &F) -> F {
    match id {
        CoeffId::ZERO => F::ZERO,
        CoeffId::ONE => *value,
        CoeffId::MINUS_ONE => -*value,
        CoeffId::TWO => value.double(),
        _ => *table.get(id) * value,
    }
}

/// True when `F::Repr` stores the least significant byte first.
pub fn repr_is_little_endian<F: PrimeField>() -> bool {
    F::ONE.to_repr().as_ref()[0] == 1
}

/// Read `v` as a 64-bit unsigned integer if every byte above the low eight is zero.
fn low_u64<F: PrimeField>(v: &F, le: bool) -> Option<u64> {
    let repr = v.to_repr();
    let bytes = repr.as_ref();
    if bytes.len() < 8 {
        return None;
    }
    let (low, rest) = if le {
        let (low, rest) = bytes.split_at(8);
        (low, rest)
    } else {
        let (rest, low) = bytes.split_at(bytes.len() - 8);
        (low, rest)
    };
    if rest.iter().any(|b| *b != 0) {
        return None;
    }
    let mut word = [0u8; 8];
    word.copy_from_slice(low);
    Some(if le {
        u64::from_le_bytes(word)
    } else {
        u64::from_be_bytes(word)
    })
}

/// Interning table mapping field elements to dense ids.
///
/// The dense `values` array is the persisted form; both lookup indexes are
/// rebuilt from it with [`CoeffTable::from_values`].
#[derive(Clone, Debug)]
pub struct CoeffTable<F: PrimeField> {
    values: Vec<F>,
    small: HashMap<i64, u32>,
    large: HashMap<Box<[u8]>, u32>,
    le: bool,
}

impl<F: PrimeField> Default for CoeffTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> CoeffTable<F> {
    /// An empty table holding only the reserved constants.
    pub fn new() -> Self {
        let mut table = Self {
            values: Vec::new(),
            small: HashMap::new(),
            large: HashMap::new(),
            le: repr_is_little_endian::<F>(),
        };
        for v in [F::ZERO, F::ONE, -F::ONE, F::ONE.double()] {
            table.intern(&v);
        }
        table
    }

    /// Rebuild a table (and its lookup indexes) from the dense coefficient array.
    pub fn from_values(values: Vec<F>) -> Result<Self, CsError> {
        let mut table = Self {
            values: Vec::with_capacity(values.len()),
            small: HashMap::new(),
            large: HashMap::new(),
            le: repr_is_little_endian::<F>(),
        };
        let reserved = [F::ZERO, F::ONE, -F::ONE, F::ONE.double()];
        for (i, v) in values.into_iter().enumerate() {
            if let Some(expected) = reserved.get(i) {
                if *expected != v {
                    return Err(CsError::ReservedCoefficient { id: i as u32 });
                }
            } else if let Some(first) = table.lookup(&v) {
                return Err(CsError::DuplicateCoefficient {
                    index: i,
                    first: first.0,
                });
            }
            table.intern(&v);
        }
        if table.values.len() < CoeffId::NB_RESERVED as usize {
            return Err(CsError::ReservedCoefficient {
                id: table.values.len() as u32,
            });
        }
        Ok(table)
    }

    /// The signed 64-bit value of `v`, if it has one.
    fn small_value(&self, v: &F) -> Option<i64> {
        if let Some(n) = low_u64(v, self.le) {
            if n <= i64::MAX as u64 {
                return Some(n as i64);
            }
        }
        let neg = -*v;
        match low_u64(&neg, self.le) {
            // n == 0 was handled above
            Some(n) if n <= i64::MAX as u64 => Some(-(n as i64)),
            _ => None,
        }
    }

    /// Id of `v` if it has been interned.
    pub fn lookup(&self, v: &F) -> Option<CoeffId> {
        match self.small_value(v) {
            Some(s) => self.small.get(&s).copied().map(CoeffId),
            None => {
                let repr = v.to_repr();
                self.large.get(repr.as_ref()).copied().map(CoeffId)
            }
        }
    }

    /// Return the id of `v`, adding it to the table the first time it is seen.
    pub fn intern(&mut self, v: &F) -> CoeffId {
        let next = self.values.len() as u32;
        let id = match self.small_value(v) {
            Some(s) => *self.small.entry(s).or_insert(next),
            None => {
                let repr = v.to_repr();
                *self
                    .large
                    .entry(repr.as_ref().to_vec().into_boxed_slice())
                    .or_insert(next)
            }
        };
        if id == next {
            self.values.push(*v);
        }
        CoeffId(id)
    }

    /// Intern a small signed integer.
    pub fn intern_i64(&mut self, v: i64) -> CoeffId {
        let magnitude = F::from(v.unsigned_abs());
        let value = if v < 0 { -magnitude } else { magnitude };
        self.intern(&value)
    }

    /// The value behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this table. Systems decoded from
    /// disk are validated against their table before evaluation, see
    /// [`crate::ConstraintSystem::attach_coeffs`].
    #[inline]
    pub fn get(&self, id: CoeffId) -> &F {
        &self.values[id.index()]
    }

    pub fn try_get(&self, id: CoeffId) -> Option<&F> {
        self.values.get(id.index())
    }

    pub fn values(&self) -> &[F] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of coefficients indexed by their 64-bit value.
    pub fn nb_small(&self) -> usize {
        self.small.len()
    }

    /// Number of coefficients indexed by their byte encoding.
    pub fn nb_large(&self) -> usize {
        self.large.len()
    }

    pub fn memory_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<F>()
            + self.small.len() * 12
            + self.large.len() * (4 + std::mem::size_of::<F::Repr>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::Scalar as Fr;
    use ff::Field;
    use rand_core::SeedableRng;
    use rand_xorshift::XorShiftRng;

    #[test]
    fn test_reserved_ids() {
        let t = CoeffTable::<Fr>::new();
        assert_eq!(t.len(), 4);
        assert_eq!(t.lookup(&Fr::ZERO), Some(CoeffId::ZERO));
        assert_eq!(t.lookup(&Fr::ONE), Some(CoeffId::ONE));
        assert_eq!(t.lookup(&-Fr::ONE), Some(CoeffId::MINUS_ONE));
        assert_eq!(t.lookup(&Fr::from(2u64)), Some(CoeffId::TWO));
    }

    #[test]
    fn test_intern_is_deterministic() {
        let mut rng = XorShiftRng::from_seed([0x5d; 16]);
        let mut t = CoeffTable::<Fr>::new();
        let values: Vec<Fr> = (0..64).map(|_| Fr::random(&mut rng)).collect();

        let ids: Vec<CoeffId> = values.iter().map(|v| t.intern(v)).collect();
        let again: Vec<CoeffId> = values.iter().map(|v| t.intern(v)).collect();
        assert_eq!(ids, again);
        assert_eq!(t.len(), 4 + 64);

        for (v, id) in values.iter().zip(&ids) {
            assert_eq!(t.get(*id), v);
        }
        assert_eq!(t.nb_large(), 64);
    }

    #[test]
    fn test_small_values_share_ids() {
        let mut t = CoeffTable::<Fr>::new();
        let a = t.intern_i64(-7);
        let b = t.intern(&-Fr::from(7u64));
        assert_eq!(a, b);
        let c = t.intern_i64(7);
        assert_ne!(a, c);
        assert_eq!(t.intern_i64(2), CoeffId::TWO);
        assert_eq!(t.intern_i64(-1), CoeffId::MINUS_ONE);
        let big = t.intern_i64(i64::MIN + 1);
        assert_eq!(t.get(big), &-Fr::from(i64::MAX as u64));
    }

    #[test]
    fn test_from_values_rebuilds_indexes() {
        let mut t = CoeffTable::<Fr>::new();
        let id = t.intern_i64(1234);
        let large = t.intern(&Fr::from(9u64).invert().unwrap());

        let back = CoeffTable::from_values(t.values().to_vec()).unwrap();
        assert_eq!(back.lookup(&Fr::from(1234u64)), Some(id));
        assert_eq!(back.lookup(&Fr::from(9u64).invert().unwrap()), Some(large));
        assert_eq!(back.len(), t.len());
    }

    #[test]
    fn test_from_values_rejects_duplicates() {
        let mut values = CoeffTable::<Fr>::new().values().to_vec();
        values.push(Fr::from(5u64));
        values.push(Fr::from(5u64));
        assert!(matches!(
            CoeffTable::from_values(values),
            Err(CsError::DuplicateCoefficient { index: 5, first: 4 })
        ));

        let bad = vec![Fr::ONE, Fr::ONE];
        assert!(matches!(
            CoeffTable::from_values(bad),
            Err(CsError::ReservedCoefficient { id: 0 })
        ));
    }

    #[test]
    fn test_mul_by_coeff_fast_paths() {
        let mut t = CoeffTable::<Fr>::new();
        let five = t.intern_i64(5);
        let x = Fr::from(11u64);
        assert_eq!(mul_by_coeff(&t, CoeffId::ZERO, &x), Fr::ZERO);
        assert_eq!(mul_by_coeff(&t, CoeffId::ONE, &x), x);
        assert_eq!(mul_by_coeff(&t, CoeffId::MINUS_ONE, &x), -x);
        assert_eq!(mul_by_coeff(&t, CoeffId::TWO, &x), Fr::from(22u64));
        assert_eq!(mul_by_coeff(&t, five, &x), Fr::from(55u64));
    }
}
