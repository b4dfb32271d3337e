//! Terms, linear expressions and the CSR storage for explicit constraints.
//!
//! A constraint `L · R = O` is three linear expressions over wires. Explicit
//! (non-template) constraints are stored as three CSR matrices, one per side:
//! row `i` of each matrix holds side `L`, `R` or `O` of explicit constraint `i`.
//! Terms reference coefficients through [`CoeffId`], never by value.

use serde::{Deserialize, Serialize};

use crate::coeff::CoeffId;

/// One `coeff · wire` product inside a linear expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    pub wire: u32,
    pub coeff: CoeffId,
}

impl Term {
    #[inline]
    pub fn new(wire: u32, coeff: CoeffId) -> Self {
        Self { wire, coeff }
    }
}

/// Side of a rank-1 constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    L,
    R,
    O,
}

impl Side {
    pub const ALL: [Side; 3] = [Side::L, Side::R, Side::O];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: u8) -> Option<Side> {
        match i {
            0 => Some(Side::L),
            1 => Some(Side::R),
            2 => Some(Side::O),
            _ => None,
        }
    }
}

/// Ordered list of terms. Terms are not merged or sorted; the order in which
/// a front end emits them is part of a constraint's structure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LinearExpression(pub Vec<Term>);

impl LinearExpression {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, wire: u32, coeff: CoeffId) {
        self.0.push(Term::new(wire, coeff));
    }

    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max_wire(&self) -> Option<u32> {
        self.0.iter().map(|t| t.wire).max()
    }
}

impl From<Vec<Term>> for LinearExpression {
    fn from(terms: Vec<Term>) -> Self {
        Self(terms)
    }
}

/// A materialized rank-1 constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub l: LinearExpression,
    pub r: LinearExpression,
    pub o: LinearExpression,
}

impl Constraint {
    pub fn new(l: LinearExpression, r: LinearExpression, o: LinearExpression) -> Self {
        Self { l, r, o }
    }

    #[inline]
    pub fn side(&self, side: Side) -> &[Term] {
        match side {
            Side::L => self.l.terms(),
            Side::R => self.r.terms(),
            Side::O => self.o.terms(),
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Vec<Term> {
        match side {
            Side::L => &mut self.l.0,
            Side::R => &mut self.r.0,
            Side::O => &mut self.o.0,
        }
    }

    pub fn nb_terms(&self) -> usize {
        self.l.len() + self.r.len() + self.o.len()
    }

    pub fn max_wire(&self) -> Option<u32> {
        [self.l.max_wire(), self.r.max_wire(), self.o.max_wire()]
            .into_iter()
            .flatten()
            .max()
    }
}

/// CSR sparse matrix for one side of the explicit constraints.
///
/// Entries for row `i` are at `terms[row_ptrs[i]..row_ptrs[i + 1]]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrMatrix {
    /// Length: `num_rows + 1`, starting at 0.
    pub row_ptrs: Vec<u64>,
    pub terms: Vec<Term>,
}

impl Default for CsrMatrix {
    fn default() -> Self {
        Self {
            row_ptrs: vec![0],
            terms: Vec::new(),
        }
    }
}

impl CsrMatrix {
    pub fn num_rows(&self) -> usize {
        self.row_ptrs.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.terms.len()
    }

    pub fn avg_nnz_per_row(&self) -> f64 {
        if self.num_rows() == 0 {
            0.0
        } else {
            self.nnz() as f64 / self.num_rows() as f64
        }
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[Term] {
        let start = self.row_ptrs[i] as usize;
        let end = self.row_ptrs[i + 1] as usize;
        &self.terms[start..end]
    }

    pub fn push_row(&mut self, row: &[Term]) {
        self.terms.extend_from_slice(row);
        self.row_ptrs.push(self.terms.len() as u64);
    }

    /// Rebuild the matrix keeping only the rows for which `keep` is true.
    pub fn retain_rows(&self, keep: impl Fn(usize) -> bool) -> CsrMatrix {
        let mut out = CsrMatrix::default();
        for i in 0..self.num_rows() {
            if keep(i) {
                out.push_row(self.row(i));
            }
        }
        out
    }

    /// Rewrite every wire id through `f`.
    pub fn remap_wires(&mut self, f: impl Fn(u32) -> u32) {
        for t in self.terms.iter_mut() {
            t.wire = f(t.wire);
        }
    }

    /// Check that row pointers are monotonic and cover `terms` exactly.
    pub fn is_well_formed(&self) -> bool {
        self.row_ptrs.first() == Some(&0)
            && self.row_ptrs.windows(2).all(|w| w[0] <= w[1])
            && self.row_ptrs.last().copied() == Some(self.terms.len() as u64)
    }

    pub fn memory_bytes(&self) -> usize {
        self.row_ptrs.len() * 8 + self.terms.len() * std::mem::size_of::<Term>()
    }
}

/// The three CSR matrices holding every explicit constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintMatrices {
    pub l: CsrMatrix,
    pub r: CsrMatrix,
    pub o: CsrMatrix,
}

impl ConstraintMatrices {
    pub fn num_rows(&self) -> usize {
        self.l.num_rows()
    }

    pub fn side(&self, side: Side) -> &CsrMatrix {
        match side {
            Side::L => &self.l,
            Side::R => &self.r,
            Side::O => &self.o,
        }
    }

    pub fn sides_mut(&mut self) -> [&mut CsrMatrix; 3] {
        [&mut self.l, &mut self.r, &mut self.o]
    }

    pub fn push(&mut self, c: &Constraint) {
        self.l.push_row(c.l.terms());
        self.r.push_row(c.r.terms());
        self.o.push_row(c.o.terms());
    }

    /// Borrow the three sides of explicit row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> [&[Term]; 3] {
        [self.l.row(i), self.r.row(i), self.o.row(i)]
    }

    /// Copy explicit row `i` out as a [`Constraint`].
    pub fn get(&self, i: usize) -> Constraint {
        Constraint {
            l: self.l.row(i).to_vec().into(),
            r: self.r.row(i).to_vec().into(),
            o: self.o.row(i).to_vec().into(),
        }
    }

    pub fn retain_rows(&self, keep: impl Fn(usize) -> bool + Copy) -> ConstraintMatrices {
        ConstraintMatrices {
            l: self.l.retain_rows(keep),
            r: self.r.retain_rows(keep),
            o: self.o.retain_rows(keep),
        }
    }

    pub fn total_nnz(&self) -> usize {
        self.l.nnz() + self.r.nnz() + self.o.nnz()
    }

    pub fn is_well_formed(&self) -> bool {
        let n = self.l.row_ptrs.len();
        self.l.is_well_formed()
            && self.r.is_well_formed()
            && self.o.is_well_formed()
            && self.r.row_ptrs.len() == n
            && self.o.row_ptrs.len() == n
    }

    pub fn memory_bytes(&self) -> usize {
        self.l.memory_bytes() + self.r.memory_bytes() + self.o.memory_bytes()
    }

    pub fn summary(&self) -> String {
        format!(
            "rows: {}, L: {{nnz: {}, avg/row: {:.1}}}, R: {{nnz: {}, avg/row: {:.1}}}, \
             O: {{nnz: {}, avg/row: {:.1}}}, mem: {:.1} MiB",
            self.num_rows(),
            self.l.nnz(),
            self.l.avg_nnz_per_row(),
            self.r.nnz(),
            self.r.avg_nnz_per_row(),
            self.o.nnz(),
            self.o.avg_nnz_per_row(),
            self.memory_bytes() as f64 / (1024.0 * 1024.0),
        )
    }
}
