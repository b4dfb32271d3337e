//! The compiled constraint system.
//!
//! Wire layout: wire `0` is the constant one, followed by the public inputs,
//! the secret inputs and finally the internal wires computed by the solver.
//!
//! Logical constraint order: explicit rows `[0, nb_explicit)` first, then the
//! lazy region, where position `nb_explicit + p` is occurrence `k` of template
//! `t` with `(t, k) = lazy_map.locate(p)`.

use bitvec::prelude::*;
use ff::PrimeField;
use serde::{Deserialize, Serialize};

use crate::builder::Wire;
use crate::coeff::{CoeffId, CoeffTable};
use crate::csr::{Constraint, ConstraintMatrices, LinearExpression, Side};
use crate::error::CsError;
use crate::lazy::{LazyConstraint, LazyIndexMap};
use crate::registry::BlockInfo;

/// Kind of a wire, derived from its position in the layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireKind {
    Constant,
    Public,
    Secret,
    Internal,
}

/// Sizes of the wire regions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePartition {
    pub nb_public: u32,
    pub nb_secret: u32,
    pub nb_internal: u32,
}

impl WirePartition {
    pub fn nb_wires(&self) -> u64 {
        1 + self.nb_public as u64 + self.nb_secret as u64 + self.nb_internal as u64
    }

    /// Number of values a witness supplies (public then secret, no constant).
    pub fn nb_inputs(&self) -> usize {
        self.nb_public as usize + self.nb_secret as usize
    }

    pub fn first_secret(&self) -> u32 {
        1 + self.nb_public
    }

    pub fn first_internal(&self) -> u32 {
        1 + self.nb_public + self.nb_secret
    }

    pub fn kind(&self, wire: u32) -> Option<WireKind> {
        if wire == 0 {
            Some(WireKind::Constant)
        } else if wire < self.first_secret() {
            Some(WireKind::Public)
        } else if wire < self.first_internal() {
            Some(WireKind::Secret)
        } else if (wire as u64) < self.nb_wires() {
            Some(WireKind::Internal)
        } else {
            None
        }
    }

    /// Wire id of a builder handle in this layout.
    pub fn resolve(&self, w: Wire) -> u32 {
        match w.kind() {
            WireKind::Constant => 0,
            WireKind::Public => 1 + w.offset(),
            WireKind::Secret => self.first_secret() + w.offset(),
            WireKind::Internal => self.first_internal() + w.offset(),
        }
    }
}

/// Work of one solver level: everything in it depends only on earlier levels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Explicit constraint indices.
    pub constraints: Vec<u32>,
    /// Template ids; every occurrence of a template runs in its level.
    pub templates: Vec<u32>,
    /// Indices into the system's hint calls.
    pub hints: Vec<u32>,
}

/// A hint invocation: evaluate `inputs`, run hint `key`, write `outputs`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HintCall {
    pub key: String,
    pub inputs: Vec<LinearExpression>,
    pub outputs: Vec<u32>,
}

/// Where a logical constraint position lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowLoc {
    Explicit(usize),
    Lazy { template: u32, occurrence: u32 },
}

/// A rank-1 constraint system with explicit rows and lazy templates.
#[derive(Clone, Debug)]
pub struct ConstraintSystem<F: PrimeField> {
    pub(crate) wires: WirePartition,
    pub(crate) shared: BitVec<u64, Lsb0>,
    pub(crate) coeffs: CoeffTable<F>,
    pub(crate) explicit: ConstraintMatrices,
    pub(crate) block_tags: Vec<u32>,
    pub(crate) blocks: Vec<BlockInfo>,
    pub(crate) templates: Vec<LazyConstraint>,
    pub(crate) lazy_map: LazyIndexMap,
    pub(crate) levels: Vec<Level>,
    pub(crate) hints: Vec<HintCall>,
}

impl<F: PrimeField> ConstraintSystem<F> {
    /// System with no constraints over the given wires. The constant and
    /// public wires are marked shared.
    pub fn empty(wires: WirePartition, coeffs: CoeffTable<F>) -> Self {
        let mut shared = bitvec![u64, Lsb0; 0; wires.nb_wires() as usize];
        shared[..wires.first_secret() as usize].fill(true);
        Self {
            wires,
            shared,
            coeffs,
            explicit: ConstraintMatrices::default(),
            block_tags: Vec::new(),
            blocks: Vec::new(),
            templates: Vec::new(),
            lazy_map: LazyIndexMap::default(),
            levels: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn wires(&self) -> &WirePartition {
        &self.wires
    }

    pub fn nb_wires(&self) -> u64 {
        self.wires.nb_wires()
    }

    pub fn nb_public(&self) -> u32 {
        self.wires.nb_public
    }

    pub fn nb_secret(&self) -> u32 {
        self.wires.nb_secret
    }

    pub fn nb_internal(&self) -> u32 {
        self.wires.nb_internal
    }

    pub fn shared(&self) -> &BitSlice<u64, Lsb0> {
        &self.shared
    }

    pub fn is_shared(&self, wire: u32) -> bool {
        self.shared.get(wire as usize).map_or(false, |b| *b)
    }

    pub fn coeffs(&self) -> &CoeffTable<F> {
        &self.coeffs
    }

    /// Replace the coefficient table, checking that every id used by the
    /// system resolves in `table`.
    pub fn attach_coeffs(&mut self, table: CoeffTable<F>) -> Result<(), CsError> {
        if let Some(max) = self.max_coeff_id() {
            if max as usize >= table.len() {
                return Err(CsError::UnknownCoefficient {
                    id: max,
                    len: table.len(),
                });
            }
        }
        self.coeffs = table;
        Ok(())
    }

    /// Take the coefficient table out, leaving a table with only the
    /// reserved constants.
    pub fn detach_coeffs(&mut self) -> CoeffTable<F> {
        std::mem::take(&mut self.coeffs)
    }

    pub fn explicit(&self) -> &ConstraintMatrices {
        &self.explicit
    }

    pub fn templates(&self) -> &[LazyConstraint] {
        &self.templates
    }

    pub fn lazy_map(&self) -> &LazyIndexMap {
        &self.lazy_map
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn hints(&self) -> &[HintCall] {
        &self.hints
    }

    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    pub fn block_tags(&self) -> &[u32] {
        &self.block_tags
    }

    /// Whether constraints with block tag `tag` may become templates.
    pub fn block_is_lazy(&self, tag: u32) -> bool {
        tag == 0
            || self
                .blocks
                .get(tag as usize - 1)
                .map_or(true, |b| b.lazy)
    }

    /// Total number of logical constraints, explicit plus lazy.
    pub fn nb_constraints(&self) -> u64 {
        self.explicit.num_rows() as u64 + self.lazy_map.total()
    }

    pub fn nb_explicit(&self) -> usize {
        self.explicit.num_rows()
    }

    pub fn nb_templates(&self) -> usize {
        self.templates.len()
    }

    pub fn locate(&self, pos: u64) -> Option<RowLoc> {
        let nb_explicit = self.nb_explicit() as u64;
        if pos < nb_explicit {
            return Some(RowLoc::Explicit(pos as usize));
        }
        self.lazy_map
            .locate(pos - nb_explicit)
            .map(|(template, occurrence)| RowLoc::Lazy {
                template,
                occurrence,
            })
    }

    /// Materialize logical constraint `pos`, expanding templates.
    pub fn fetch(&self, pos: u64) -> Result<Constraint, CsError> {
        match self.locate(pos) {
            Some(RowLoc::Explicit(i)) => Ok(self.explicit.get(i)),
            Some(RowLoc::Lazy {
                template,
                occurrence,
            }) => Ok(self.templates[template as usize].fetch_lazy(occurrence)),
            None => Err(CsError::ConstraintOutOfRange {
                pos,
                total: self.nb_constraints(),
            }),
        }
    }

    /// Visit `(wire, coeff)` for every term on `side` of every logical
    /// constraint, without materializing any of them.
    pub fn for_each_side_term(&self, side: Side, mut f: impl FnMut(u32, CoeffId)) {
        for t in &self.explicit.side(side).terms {
            f(t.wire, t.coeff);
        }
        for t in &self.templates {
            for k in 0..t.count {
                t.for_each_term(side, k, &mut f);
            }
        }
    }

    /// Visit `(position, side, wire, coeff)` for every term of every logical
    /// constraint. Explicit rows come first, then each template's occurrences.
    pub fn for_each_row_term(&self, mut f: impl FnMut(u64, Side, u32, CoeffId)) {
        for side in Side::ALL {
            let m = self.explicit.side(side);
            for i in 0..m.num_rows() {
                for t in m.row(i) {
                    f(i as u64, side, t.wire, t.coeff);
                }
            }
        }
        let base = self.nb_explicit() as u64;
        for (id, t) in self.templates.iter().enumerate() {
            let start = base + self.lazy_map.start(id);
            for k in 0..t.count {
                let pos = start + k as u64;
                for side in Side::ALL {
                    t.for_each_term(side, k, |wire, coeff| f(pos, side, wire, coeff));
                }
            }
        }
    }

    /// Largest coefficient id referenced anywhere in the system.
    pub fn max_coeff_id(&self) -> Option<u32> {
        let explicit = Side::ALL
            .iter()
            .flat_map(|s| self.explicit.side(*s).terms.iter());
        let templates = self
            .templates
            .iter()
            .flat_map(|t| Side::ALL.into_iter().flat_map(move |s| t.template.side(s).iter()));
        let hints = self
            .hints
            .iter()
            .flat_map(|h| h.inputs.iter().flat_map(|e| e.terms().iter()));
        explicit.chain(templates).chain(hints).map(|t| t.coeff.0).max()
    }

    /// Check internal consistency: wire ranges, template shifts, the lazy map
    /// and level references. Coefficient ids are checked by
    /// [`ConstraintSystem::attach_coeffs`].
    pub fn validate_structure(&self) -> Result<(), CsError> {
        let nb_wires = self.nb_wires();
        if nb_wires > u32::MAX as u64 + 1 {
            return Err(CsError::TooManyWires { nb_wires });
        }
        if self.shared.len() as u64 != nb_wires {
            return Err(CsError::LazyMap(format!(
                "shared bitmap covers {} wires, system has {nb_wires}",
                self.shared.len()
            )));
        }
        if !self.explicit.is_well_formed() {
            return Err(CsError::LazyMap("explicit row pointers are malformed".into()));
        }
        if self.block_tags.len() != self.nb_explicit() {
            return Err(CsError::LazyMap(format!(
                "{} block tags for {} explicit constraints",
                self.block_tags.len(),
                self.nb_explicit()
            )));
        }
        let check_wire = |w: u32| {
            if w as u64 >= nb_wires {
                Err(CsError::WireOutOfRange {
                    wire: w as u64,
                    nb_wires,
                })
            } else {
                Ok(())
            }
        };
        for side in Side::ALL {
            for t in &self.explicit.side(side).terms {
                check_wire(t.wire)?;
            }
        }
        for (id, t) in self.templates.iter().enumerate() {
            t.validate(id as u32, nb_wires)?;
        }
        self.lazy_map
            .check_counts(self.templates.iter().map(|t| t.count))?;
        for h in &self.hints {
            for e in &h.inputs {
                for t in e.terms() {
                    check_wire(t.wire)?;
                }
            }
            for w in &h.outputs {
                check_wire(*w)?;
            }
        }
        for (li, level) in self.levels.iter().enumerate() {
            let bad = |what, index| CsError::LevelIndex {
                level: li,
                what,
                index,
            };
            let nb_explicit = self.nb_explicit();
            if let Some(&i) = level.constraints.iter().find(|&&i| i as usize >= nb_explicit) {
                return Err(bad("constraint", i));
            }
            let nb_templates = self.templates.len();
            if let Some(&t) = level.templates.iter().find(|&&t| t as usize >= nb_templates) {
                return Err(bad("template", t));
            }
            if let Some(&h) = level.hints.iter().find(|&&h| h as usize >= self.hints.len()) {
                return Err(bad("hint", h));
            }
            for &t in &level.templates {
                let expected = self.templates[t as usize].level;
                if expected as usize != li {
                    return Err(CsError::TemplateLevel {
                        template: t,
                        level: li,
                        expected,
                    });
                }
            }
        }
        self.check_coverage()
    }

    /// Every explicit row, template and hint must be scheduled exactly once.
    fn check_coverage(&self) -> Result<(), CsError> {
        let mut rows = vec![0usize; self.nb_explicit()];
        let mut templates = vec![0usize; self.templates.len()];
        let mut hints = vec![0usize; self.hints.len()];
        for level in &self.levels {
            level.constraints.iter().for_each(|&i| rows[i as usize] += 1);
            level.templates.iter().for_each(|&t| templates[t as usize] += 1);
            level.hints.iter().for_each(|&h| hints[h as usize] += 1);
        }
        for (what, counts) in [("constraint", &rows), ("template", &templates), ("hint", &hints)] {
            if let Some((index, &times)) = counts.iter().enumerate().find(|(_, &n)| n != 1) {
                return Err(CsError::LevelCoverage {
                    what,
                    index: index as u32,
                    times,
                });
            }
        }
        Ok(())
    }

    pub fn memory_bytes(&self) -> usize {
        self.explicit.memory_bytes()
            + self.coeffs.memory_bytes()
            + self.lazy_map.memory_bytes()
            + self.block_tags.len() * 4
            + self
                .templates
                .iter()
                .map(|t| t.template.nb_terms() * 8 + t.exceptions.len() * 8 + 16)
                .sum::<usize>()
            + self.shared.as_raw_slice().len() * 8
    }

    pub fn summary(&self) -> String {
        format!(
            "ConstraintSystem {{ public: {}, secret: {}, internal: {}, constraints: {}, \
             explicit: {}, templates: {}, lazy: {}, levels: {}, hints: {}, coeffs: {}, \
             mem: {:.1} MiB }}",
            self.wires.nb_public,
            self.wires.nb_secret,
            self.wires.nb_internal,
            self.nb_constraints(),
            self.nb_explicit(),
            self.nb_templates(),
            self.lazy_map.total(),
            self.levels.len(),
            self.hints.len(),
            self.coeffs.len(),
            self.memory_bytes() as f64 / (1024.0 * 1024.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{CircuitBuilder, Wire};
    use blstrs::Scalar as Fr;

    #[test]
    fn test_wire_partition_kinds() {
        let p = WirePartition {
            nb_public: 2,
            nb_secret: 3,
            nb_internal: 4,
        };
        assert_eq!(p.nb_wires(), 10);
        assert_eq!(p.kind(0), Some(WireKind::Constant));
        assert_eq!(p.kind(2), Some(WireKind::Public));
        assert_eq!(p.kind(3), Some(WireKind::Secret));
        assert_eq!(p.kind(6), Some(WireKind::Internal));
        assert_eq!(p.kind(10), None);
        assert_eq!(p.nb_inputs(), 5);
    }

    #[test]
    fn test_fetch_out_of_range() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        let cs = b.build();
        assert!(cs.fetch(0).is_ok());
        assert!(matches!(
            cs.fetch(1),
            Err(CsError::ConstraintOutOfRange { pos: 1, total: 1 })
        ));
    }

    #[test]
    fn test_attach_coeffs_checks_ids() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.enforce_terms(&[(x, 17)], &[(x, 1)], &[(x, 1)]).unwrap();
        let mut cs = b.build();

        let table = cs.detach_coeffs();
        assert_eq!(cs.coeffs().len(), 4);
        assert!(matches!(
            cs.attach_coeffs(CoeffTable::new()),
            Err(CsError::UnknownCoefficient { id: 4, len: 4 })
        ));
        cs.attach_coeffs(table).unwrap();
        assert_eq!(cs.coeffs().len(), 5);
    }

    #[test]
    fn test_validate_catches_bad_wire() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        let mut cs = b.build();
        assert!(cs.validate_structure().is_ok());

        cs.explicit.l.terms[0].wire = 99;
        assert!(matches!(
            cs.validate_structure(),
            Err(CsError::WireOutOfRange { wire: 99, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wire_ids_past_32_bits() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        let mut cs = b.build();
        cs.wires.nb_internal = u32::MAX;
        assert!(matches!(
            cs.validate_structure(),
            Err(CsError::TooManyWires { nb_wires }) if nb_wires == u32::MAX as u64 + 2
        ));
    }

    #[test]
    fn test_validate_requires_each_row_scheduled_once() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        let y = b.internal();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(y, 1)]).unwrap();
        b.enforce_terms(&[(y, 1)], &[(Wire::ONE, 1)], &[(y, 1)]).unwrap();
        let cs = b.build();
        assert!(cs.validate_structure().is_ok());

        let mut missing = cs.clone();
        missing.levels[1].constraints.clear();
        assert!(matches!(
            missing.validate_structure(),
            Err(CsError::LevelCoverage {
                what: "constraint",
                index: 1,
                times: 0
            })
        ));

        let mut twice = cs.clone();
        twice.levels[1].constraints.push(0);
        assert!(matches!(
            twice.validate_structure(),
            Err(CsError::LevelCoverage {
                what: "constraint",
                index: 0,
                times: 2
            })
        ));
    }

    #[test]
    fn test_validate_checks_template_level() {
        let mut b = CircuitBuilder::<Fr>::new();
        for _ in 0..3 {
            let a = b.secret_input();
            let sq = b.internal();
            b.enforce_terms(&[(a, 1)], &[(a, 1)], &[(sq, 1)]).unwrap();
        }
        let mut cs = b.build();
        crate::lazy::lazify(&mut cs, &crate::lazy::LazifyConfig::default());
        assert_eq!(cs.nb_templates(), 1);
        assert!(cs.validate_structure().is_ok());

        cs.templates[0].level = 1;
        cs.levels.push(Level::default());
        assert!(matches!(
            cs.validate_structure(),
            Err(CsError::TemplateLevel {
                template: 0,
                level: 0,
                expected: 1
            })
        ));
    }
}
