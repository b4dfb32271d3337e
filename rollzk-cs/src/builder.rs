//! Native circuit builder.
//!
//! Wires are handed out as [`Wire`] handles while the circuit is being
//! written; their final ids depend on how many public and secret inputs the
//! circuit ends up with, so terms are recorded with a kind tag in the top two
//! bits of the wire id and remapped once in [`CircuitBuilder::build`].
//!
//! Every constraint may mention at most one wire that is not yet known; the
//! builder records that wire as solved by the constraint and assigns the
//! constraint to a level one above the highest level of the wires it reads.
//! Inputs are known before level 0.

use ff::PrimeField;

use crate::coeff::{CoeffId, CoeffTable};
use crate::csr::{Constraint, ConstraintMatrices, LinearExpression, Term};
use crate::error::CsError;
use crate::registry::{BlockInfo, TemplateKey, TemplateRegistry};
use crate::system::{ConstraintSystem, HintCall, Level, WireKind, WirePartition};

const KIND_SHIFT: u32 = 30;
const OFFSET_MASK: u32 = (1 << KIND_SHIFT) - 1;
const TAG_SECRET: u32 = 1 << KIND_SHIFT;
const TAG_INTERNAL: u32 = 2 << KIND_SHIFT;

/// Builder-side wire handle.
///
/// Public handles resolve to their final id immediately; secret and internal
/// handles are offsets into their region until [`CircuitBuilder::build`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Wire(u32);

impl Wire {
    /// The constant-one wire.
    pub const ONE: Wire = Wire(0);

    pub fn kind(self) -> WireKind {
        match self.0 >> KIND_SHIFT {
            0 if self.0 == 0 => WireKind::Constant,
            0 => WireKind::Public,
            1 => WireKind::Secret,
            _ => WireKind::Internal,
        }
    }

    /// Offset inside the wire's region (public offsets start after the constant).
    pub fn offset(self) -> u32 {
        match self.kind() {
            WireKind::Constant => 0,
            WireKind::Public => self.0 - 1,
            _ => self.0 & OFFSET_MASK,
        }
    }

    fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Known after `level` (-1 for inputs).
    Known(i64),
    Unsolved,
}

/// Incrementally records a constraint system.
pub struct CircuitBuilder<F: PrimeField> {
    coeffs: CoeffTable<F>,
    nb_public: u32,
    nb_secret: u32,
    internal_level: Vec<Option<u32>>,
    explicit: ConstraintMatrices,
    block_tags: Vec<u32>,
    blocks: Vec<BlockInfo>,
    current_tag: u32,
    levels: Vec<Level>,
    hints: Vec<HintCall>,
    shared_marks: Vec<Wire>,
}

impl<F: PrimeField> Default for CircuitBuilder<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PrimeField> CircuitBuilder<F> {
    pub fn new() -> Self {
        Self {
            coeffs: CoeffTable::new(),
            nb_public: 0,
            nb_secret: 0,
            internal_level: Vec::new(),
            explicit: ConstraintMatrices::default(),
            block_tags: Vec::new(),
            blocks: Vec::new(),
            current_tag: 0,
            levels: Vec::new(),
            hints: Vec::new(),
            shared_marks: Vec::new(),
        }
    }

    pub fn public_input(&mut self) -> Wire {
        self.nb_public += 1;
        Wire(self.nb_public)
    }

    pub fn secret_input(&mut self) -> Wire {
        let w = Wire(TAG_SECRET | self.nb_secret);
        self.nb_secret += 1;
        w
    }

    /// A wire the solver computes; some later constraint or hint must solve it.
    pub fn internal(&mut self) -> Wire {
        let w = Wire(TAG_INTERNAL | self.internal_level.len() as u32);
        self.internal_level.push(None);
        w
    }

    /// Keep `w` at its absolute id in every template occurrence.
    pub fn mark_shared(&mut self, w: Wire) {
        self.shared_marks.push(w);
    }

    pub fn coeffs_mut(&mut self) -> &mut CoeffTable<F> {
        &mut self.coeffs
    }

    pub fn nb_constraints(&self) -> usize {
        self.explicit.num_rows()
    }

    pub fn term(&mut self, w: Wire, coeff: &F) -> Term {
        Term::new(w.raw(), self.coeffs.intern(coeff))
    }

    pub fn lc(&mut self, terms: &[(Wire, F)]) -> LinearExpression {
        terms.iter().map(|(w, c)| self.term(*w, c)).collect::<Vec<_>>().into()
    }

    pub fn lc_i64(&mut self, terms: &[(Wire, i64)]) -> LinearExpression {
        terms
            .iter()
            .map(|&(w, c)| Term::new(w.raw(), self.coeffs.intern_i64(c)))
            .collect::<Vec<_>>()
            .into()
    }

    /// Start tagging constraints with the factory registered under `key`.
    pub fn begin_block(
        &mut self,
        registry: &TemplateRegistry,
        key: &TemplateKey,
    ) -> Result<(), CsError> {
        let factory = registry
            .get(key)
            .ok_or_else(|| CsError::UnknownTemplate(key.to_string()))?;
        let pos = match self.blocks.iter().position(|b| b.key == key.as_str()) {
            Some(p) => p,
            None => {
                self.blocks.push(BlockInfo {
                    key: key.to_string(),
                    lazy: factory.lazy,
                });
                self.blocks.len() - 1
            }
        };
        self.current_tag = pos as u32 + 1;
        Ok(())
    }

    pub fn end_block(&mut self) {
        self.current_tag = 0;
    }

    fn state(&self, raw: u32) -> State {
        match raw >> KIND_SHIFT {
            0 | 1 => State::Known(-1),
            _ => match self.internal_level[(raw & OFFSET_MASK) as usize] {
                Some(l) => State::Known(l as i64),
                None => State::Unsolved,
            },
        }
    }

    fn level_mut(&mut self, level: u32) -> &mut Level {
        let level = level as usize;
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Level::default);
        }
        &mut self.levels[level]
    }

    /// Record `l · r = o`; returns the constraint index.
    pub fn enforce(
        &mut self,
        l: LinearExpression,
        r: LinearExpression,
        o: LinearExpression,
    ) -> Result<usize, CsError> {
        let index = self.explicit.num_rows();
        let mut max_level = -1i64;
        let mut unknown: Option<(u32, usize)> = None;
        let mut extra = Vec::new();

        for (side, e) in [&l, &r, &o].into_iter().enumerate() {
            for t in e.terms() {
                match self.state(t.wire) {
                    State::Known(lv) => max_level = max_level.max(lv),
                    State::Unsolved => match unknown {
                        None => unknown = Some((t.wire, side)),
                        Some((u, s)) if u == t.wire => {
                            if s != side {
                                return Err(CsError::NonLinearUnknown {
                                    constraint: index,
                                    wire: t.wire & OFFSET_MASK,
                                });
                            }
                        }
                        Some(_) => {
                            if !extra.contains(&t.wire) {
                                extra.push(t.wire);
                            }
                        }
                    },
                }
            }
        }
        if !extra.is_empty() {
            return Err(CsError::TooManyUnknowns {
                constraint: index,
                count: extra.len() + 1,
            });
        }

        let level = (max_level + 1) as u32;
        if let Some((u, _)) = unknown {
            self.internal_level[(u & OFFSET_MASK) as usize] = Some(level);
        }
        self.explicit.push(&Constraint::new(l, r, o));
        self.block_tags.push(self.current_tag);
        self.level_mut(level).constraints.push(index as u32);
        Ok(index)
    }

    /// [`CircuitBuilder::enforce`] with small integer coefficients.
    pub fn enforce_terms(
        &mut self,
        l: &[(Wire, i64)],
        r: &[(Wire, i64)],
        o: &[(Wire, i64)],
    ) -> Result<usize, CsError> {
        let (l, r, o) = (self.lc_i64(l), self.lc_i64(r), self.lc_i64(o));
        self.enforce(l, r, o)
    }

    /// Call hint `key` on `inputs`, producing `nb_outputs` fresh internal wires.
    pub fn hint(
        &mut self,
        key: &str,
        inputs: Vec<LinearExpression>,
        nb_outputs: usize,
    ) -> Result<Vec<Wire>, CsError> {
        let mut max_level = -1i64;
        for t in inputs.iter().flat_map(|e| e.terms()) {
            match self.state(t.wire) {
                State::Known(lv) => max_level = max_level.max(lv),
                State::Unsolved => {
                    return Err(CsError::HintInputUnsolved {
                        key: key.to_string(),
                        wire: t.wire & OFFSET_MASK,
                    })
                }
            }
        }
        let level = (max_level + 1) as u32;
        let outputs: Vec<Wire> = (0..nb_outputs).map(|_| self.internal()).collect();
        for w in &outputs {
            self.internal_level[w.offset() as usize] = Some(level);
        }
        let id = self.hints.len() as u32;
        self.hints.push(HintCall {
            key: key.to_string(),
            inputs,
            outputs: outputs.iter().map(|w| w.raw()).collect(),
        });
        self.level_mut(level).hints.push(id);
        Ok(outputs)
    }

    /// Finish recording: remap wire handles to the final layout.
    pub fn build(self) -> ConstraintSystem<F> {
        let wires = WirePartition {
            nb_public: self.nb_public,
            nb_secret: self.nb_secret,
            nb_internal: self.internal_level.len() as u32,
        };
        let first_secret = wires.first_secret();
        let first_internal = wires.first_internal();
        let remap = move |raw: u32| match raw >> KIND_SHIFT {
            0 => raw,
            1 => first_secret + (raw & OFFSET_MASK),
            _ => first_internal + (raw & OFFSET_MASK),
        };

        let mut explicit = self.explicit;
        for m in explicit.sides_mut() {
            m.remap_wires(remap);
        }
        let mut hints = self.hints;
        for h in hints.iter_mut() {
            for e in h.inputs.iter_mut() {
                for t in e.0.iter_mut() {
                    t.wire = remap(t.wire);
                }
            }
            for w in h.outputs.iter_mut() {
                *w = remap(*w);
            }
        }

        let mut cs = ConstraintSystem::empty(wires, self.coeffs);
        for w in self.shared_marks {
            cs.shared.set(remap(w.raw()) as usize, true);
        }
        cs.explicit = explicit;
        cs.block_tags = self.block_tags;
        cs.blocks = self.blocks;
        cs.levels = self.levels;
        cs.hints = hints;
        cs
    }
}

/// Number of set bits in the shared bitmap beyond the always-shared prefix.
pub fn extra_shared<F: PrimeField>(cs: &ConstraintSystem<F>) -> usize {
    let prefix = cs.wires().first_secret() as usize;
    cs.shared()[prefix..].count_ones()
}

/// Shorthand for a single-term expression with coefficient one.
pub fn var(w: Wire) -> LinearExpression {
    LinearExpression(vec![Term::new(w.raw(), CoeffId::ONE)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TemplateFactory;
    use blstrs::Scalar as Fr;

    #[test]
    fn test_wire_layout_after_build() {
        let mut b = CircuitBuilder::<Fr>::new();
        let s0 = b.secret_input();
        let p0 = b.public_input();
        let i0 = b.internal();
        let s1 = b.secret_input();
        let p1 = b.public_input();
        b.enforce_terms(&[(s0, 1), (s1, 1)], &[(Wire::ONE, 1)], &[(i0, 1)])
            .unwrap();
        let cs = b.build();

        let w = cs.wires();
        assert_eq!((w.nb_public, w.nb_secret, w.nb_internal), (2, 2, 1));
        assert_eq!(w.resolve(p0), 1);
        assert_eq!(w.resolve(p1), 2);
        assert_eq!(w.resolve(s0), 3);
        assert_eq!(w.resolve(s1), 4);
        assert_eq!(w.resolve(i0), 5);

        let c = cs.fetch(0).unwrap();
        assert_eq!(c.l.terms()[0].wire, 3);
        assert_eq!(c.l.terms()[1].wire, 4);
        assert_eq!(c.o.terms()[0].wire, 5);
        assert!(cs.is_shared(0) && cs.is_shared(1) && cs.is_shared(2));
        assert!(!cs.is_shared(3));
    }

    #[test]
    fn test_levels_follow_dependencies() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        let y = b.internal();
        let z = b.internal();
        let w = b.internal();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(y, 1)]).unwrap();
        b.enforce_terms(&[(y, 1)], &[(x, 1)], &[(z, 1)]).unwrap();
        b.enforce_terms(&[(x, 1)], &[(x, 2)], &[(w, 1)]).unwrap();
        let cs = b.build();

        assert_eq!(cs.levels().len(), 2);
        assert_eq!(cs.levels()[0].constraints, vec![0, 2]);
        assert_eq!(cs.levels()[1].constraints, vec![1]);
    }

    #[test]
    fn test_two_unknowns_rejected() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        let y = b.internal();
        let z = b.internal();
        assert!(matches!(
            b.enforce_terms(&[(x, 1)], &[(y, 1)], &[(z, 1)]),
            Err(CsError::TooManyUnknowns {
                constraint: 0,
                count: 2
            })
        ));
        assert!(matches!(
            b.enforce_terms(&[(y, 1)], &[(y, 1)], &[(x, 1)]),
            Err(CsError::NonLinearUnknown { constraint: 0, .. })
        ));
        assert_eq!(b.nb_constraints(), 0);
    }

    #[test]
    fn test_hint_outputs_are_known_at_hint_level() {
        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        let flag = b.hint(crate::registry::IS_ZERO, vec![var(x)], 1).unwrap()[0];
        let out = b.internal();
        b.enforce_terms(&[(flag, 1)], &[(x, 1)], &[(out, 1)]).unwrap();
        let cs = b.build();

        assert_eq!(cs.levels()[0].hints, vec![0]);
        assert_eq!(cs.levels()[1].constraints, vec![0]);
        assert_eq!(cs.hints()[0].outputs, vec![cs.wires().first_internal()]);

        let mut b = CircuitBuilder::<Fr>::new();
        let y = b.internal();
        assert!(matches!(
            b.hint(crate::registry::IS_ZERO, vec![var(y)], 1),
            Err(CsError::HintInputUnsolved { .. })
        ));
    }

    #[test]
    fn test_blocks_are_tagged_once_per_key() {
        let mut registry = TemplateRegistry::with_poseidon();
        let custom = TemplateKey::new("merkle", &[32]);
        registry
            .register(TemplateFactory::new(custom.clone()).eager())
            .unwrap();

        let mut b = CircuitBuilder::<Fr>::new();
        let x = b.secret_input();
        b.begin_block(&registry, &TemplateKey::poseidon(3)).unwrap();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        b.end_block();
        b.begin_block(&registry, &custom).unwrap();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        b.end_block();
        b.begin_block(&registry, &TemplateKey::poseidon(3)).unwrap();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        b.end_block();
        b.enforce_terms(&[(x, 1)], &[(x, 1)], &[(x, 1)]).unwrap();
        assert!(matches!(
            b.begin_block(&registry, &TemplateKey::new("sha", &[256])),
            Err(CsError::UnknownTemplate(_))
        ));

        let cs = b.build();
        assert_eq!(cs.block_tags(), &[1, 2, 1, 0]);
        assert_eq!(cs.blocks().len(), 2);
        assert!(cs.block_is_lazy(1));
        assert!(!cs.block_is_lazy(2));
    }

    #[test]
    fn test_mark_shared() {
        let mut b = CircuitBuilder::<Fr>::new();
        let _ = b.secret_input();
        let fee = b.secret_input();
        b.mark_shared(fee);
        let cs = b.build();
        assert!(cs.is_shared(cs.wires().resolve(fee)));
        assert_eq!(extra_shared(&cs), 1);
    }
}
