//! Lazy constraint templates and the compression pass that extracts them.
//!
//! A batched circuit repeats the same sub-circuit many times; occurrence `k`
//! of a repeated constraint is occurrence `0` with every *shiftable* wire
//! moved by `k * stride`. The constant wire and shared wires (public inputs
//! and anything a builder marked shared) keep their absolute id.
//!
//! [`lazify`] walks each level of a system, groups constraints by a
//! structural [`Signature`] and replaces every group of at least
//! `min_occurrences` members forming an arithmetic progression of anchors
//! with a single [`LazyConstraint`]. The logical constraint order afterwards is
//! the explicit rows in their original relative order, followed by the
//! expansion of every template in template order.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;

use bitvec::prelude::*;
use ff::PrimeField;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coeff::CoeffId;
use crate::csr::{Constraint, Side, Term};
use crate::error::CsError;
use crate::system::ConstraintSystem;

/// Position of a term inside a template constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TermPos {
    pub side: Side,
    pub term: u32,
}

/// One template standing for `count` occurrences of a constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LazyConstraint {
    /// Occurrence 0, with absolute wire ids.
    pub template: Constraint,
    pub count: u32,
    /// Wire shift between consecutive occurrences.
    pub stride: u32,
    /// Solver level every occurrence belongs to.
    pub level: u32,
    /// Block tag of the source constraints (0 when untagged).
    pub tag: u32,
    /// Terms whose wire is never shifted, sorted by side then term index.
    pub exceptions: Vec<TermPos>,
}

impl LazyConstraint {
    #[inline]
    pub fn shift(&self, k: u32) -> u32 {
        k * self.stride
    }

    fn exceptions_of(&self, side: Side) -> &[TermPos] {
        let start = self.exceptions.partition_point(|p| p.side < side);
        let end = self.exceptions.partition_point(|p| p.side <= side);
        &self.exceptions[start..end]
    }

    /// Visit `(wire, coeff)` for every term of `side` in occurrence `k`.
    #[inline]
    pub fn for_each_term(&self, side: Side, k: u32, mut f: impl FnMut(u32, CoeffId)) {
        let shift = self.shift(k);
        let mut fixed = self.exceptions_of(side).iter().peekable();
        for (j, t) in self.template.side(side).iter().enumerate() {
            if fixed.peek().map_or(false, |p| p.term as usize == j) {
                fixed.next();
                f(t.wire, t.coeff);
            } else {
                f(t.wire + shift, t.coeff);
            }
        }
    }

    /// Materialize occurrence `k`.
    pub fn fetch_lazy(&self, k: u32) -> Constraint {
        let mut out = Constraint::default();
        for side in Side::ALL {
            let terms = out.side_mut(side);
            terms.reserve(self.template.side(side).len());
            self.for_each_term(side, k, |wire, coeff| terms.push(Term::new(wire, coeff)));
        }
        out
    }

    /// Check that the last occurrence stays inside a system of `nb_wires` wires.
    /// With `nb_wires <= 2^32`, a template that passes never overflows `u32`
    /// in [`LazyConstraint::shift`] or [`LazyConstraint::for_each_term`].
    pub fn validate(&self, id: u32, nb_wires: u64) -> Result<(), CsError> {
        if self.count == 0 {
            return Err(CsError::LazyMap(format!("template {id} has no occurrences")));
        }
        if self.exceptions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CsError::LazyMap(format!(
                "template {id} exceptions are not sorted"
            )));
        }
        for p in &self.exceptions {
            if p.term as usize >= self.template.side(p.side).len() {
                return Err(CsError::LazyMap(format!(
                    "template {id} exception {:?} points past its side",
                    p
                )));
            }
        }
        let last = self.count - 1;
        let max_shift = last as u64 * self.stride as u64;
        if max_shift > u32::MAX as u64 {
            return Err(CsError::ShiftOverflow {
                template: id,
                occurrence: last as u64,
                wire: max_shift,
                nb_wires,
            });
        }
        for side in Side::ALL {
            let mut fixed = self.exceptions_of(side).iter().peekable();
            for (j, t) in self.template.side(side).iter().enumerate() {
                let shift = if fixed.peek().map_or(false, |p| p.term as usize == j) {
                    fixed.next();
                    0
                } else {
                    max_shift
                };
                let wire = t.wire as u64 + shift;
                if wire >= nb_wires {
                    return Err(CsError::ShiftOverflow {
                        template: id,
                        occurrence: last as u64,
                        wire,
                        nb_wires,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Maps flattened lazy positions to `(template, occurrence)` pairs.
///
/// Stored as prefix sums of template counts; lookup is a binary search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyIndexMap {
    starts: Vec<u64>,
    total: u64,
}

impl LazyIndexMap {
    pub fn from_counts(counts: impl IntoIterator<Item = u32>) -> Self {
        let mut map = Self::default();
        for c in counts {
            map.push(c);
        }
        map
    }

    /// Rebuild from persisted prefix sums.
    pub fn from_parts(starts: Vec<u64>, total: u64) -> Self {
        Self { starts, total }
    }

    /// Append a template with `count` occurrences; returns its first position.
    pub fn push(&mut self, count: u32) -> u64 {
        let start = self.total;
        self.starts.push(start);
        self.total += count as u64;
        start
    }

    /// Total number of lazy constraints.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn nb_templates(&self) -> usize {
        self.starts.len()
    }

    pub fn starts(&self) -> &[u64] {
        &self.starts
    }

    #[inline]
    pub fn start(&self, t: usize) -> u64 {
        self.starts[t]
    }

    pub fn count(&self, t: usize) -> u64 {
        let end = self.starts.get(t + 1).copied().unwrap_or(self.total);
        end - self.starts[t]
    }

    #[inline]
    pub fn position(&self, t: usize, k: u32) -> u64 {
        self.starts[t] + k as u64
    }

    /// Template and occurrence of lazy position `pos`.
    #[inline]
    pub fn locate(&self, pos: u64) -> Option<(u32, u32)> {
        if pos >= self.total {
            return None;
        }
        let t = self.starts.partition_point(|&s| s <= pos) - 1;
        Some((t as u32, (pos - self.starts[t]) as u32))
    }

    /// True when the positions of all templates tile `[0, total)` without
    /// gaps or overlaps.
    pub fn is_bijective(&self) -> bool {
        if self.starts.is_empty() {
            return self.total == 0;
        }
        self.starts[0] == 0
            && self.starts.windows(2).all(|w| w[0] < w[1])
            && self.starts.last().map_or(false, |&s| s < self.total)
    }

    /// Check the map against the per-template occurrence counts.
    pub fn check_counts(&self, counts: impl IntoIterator<Item = u32>) -> Result<(), CsError> {
        let expected = Self::from_counts(counts);
        if expected != *self {
            return Err(CsError::LazyMap(format!(
                "prefix sums do not match template counts (total {} vs {})",
                self.total, expected.total
            )));
        }
        if !self.is_bijective() {
            return Err(CsError::LazyMap("positions overlap or leave gaps".into()));
        }
        Ok(())
    }

    pub fn memory_bytes(&self) -> usize {
        self.starts.len() * 8 + 8
    }
}

/// Parameters of the compression pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LazifyConfig {
    /// Smallest group turned into a template. Values below 2 are raised to 2.
    pub min_occurrences: u32,
}

impl Default for LazifyConfig {
    fn default() -> Self {
        Self { min_occurrences: 2 }
    }
}

/// Outcome of [`lazify`].
#[derive(Clone, Debug, Default)]
pub struct LazifyReport {
    /// `remap[old]` is the new logical position of old constraint `old`.
    pub remap: Vec<u64>,
    pub explicit_before: usize,
    pub explicit_after: usize,
    pub templates_added: usize,
    pub lazy_added: u64,
}

impl LazifyReport {
    pub fn new_position(&self, old: usize) -> u64 {
        self.remap[old]
    }

    /// Number of constraints removed from the explicit region.
    pub fn compressed(&self) -> usize {
        self.explicit_before - self.explicit_after
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum WireRef {
    Relative(u32),
    Absolute(u32),
}

/// Wire-shift invariant description of a constraint.
///
/// Two constraints with equal signatures differ only by a uniform shift of
/// their shiftable wires.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    tag: u32,
    sides: [Vec<(WireRef, CoeffId)>; 3],
}

fn is_shiftable(shared: &BitSlice<u64, Lsb0>, wire: u32) -> bool {
    wire != 0 && !shared.get(wire as usize).map_or(false, |b| *b)
}

/// Signature and anchor of one constraint. The anchor is the smallest
/// shiftable wire; constraints without one have no signature.
fn signature(
    shared: &BitSlice<u64, Lsb0>,
    sides: [&[Term]; 3],
    tag: u32,
) -> Option<(Signature, u32)> {
    let anchor = sides
        .iter()
        .flat_map(|s| s.iter())
        .map(|t| t.wire)
        .filter(|w| is_shiftable(shared, *w))
        .min()?;
    let describe = |terms: &[Term]| -> Vec<(WireRef, CoeffId)> {
        terms
            .iter()
            .map(|t| {
                let r = if is_shiftable(shared, t.wire) {
                    WireRef::Relative(t.wire - anchor)
                } else {
                    WireRef::Absolute(t.wire)
                };
                (r, t.coeff)
            })
            .collect()
    };
    let sig = Signature {
        tag,
        sides: [describe(sides[0]), describe(sides[1]), describe(sides[2])],
    };
    Some((sig, anchor))
}

/// Constraints sharing a signature whose anchors form `anchor0 + k * stride`.
struct Group {
    members: Vec<u32>,
    anchor0: u32,
    stride: u32,
}

impl Group {
    fn new(first: u32, anchor: u32) -> Self {
        Self {
            members: vec![first],
            anchor0: anchor,
            stride: 0,
        }
    }

    /// Add `(index, anchor)` if it continues the progression.
    fn try_extend(&mut self, index: u32, anchor: u32) -> bool {
        let k = self.members.len() as u64;
        if k == 1 {
            if anchor <= self.anchor0 {
                return false;
            }
            self.stride = anchor - self.anchor0;
        } else if anchor as u64 != self.anchor0 as u64 + k * self.stride as u64 {
            return false;
        }
        self.members.push(index);
        true
    }
}

/// Compress repeated constraints of `cs` into templates, in place.
///
/// Already-lazy systems are accepted: only explicit rows are examined and
/// existing templates keep their place ahead of the new ones.
pub fn lazify<F: PrimeField>(cs: &mut ConstraintSystem<F>, config: &LazifyConfig) -> LazifyReport {
    let start = Instant::now();
    let min_occurrences = config.min_occurrences.max(2) as usize;
    let nb_explicit = cs.nb_explicit();
    let old_lazy_total = cs.lazy_map.total();

    let mut found: Vec<LazyConstraint> = Vec::new();
    let mut found_members: Vec<Vec<u32>> = Vec::new();

    for (li, level) in cs.levels.iter().enumerate() {
        let mut open: HashMap<Signature, Group> = HashMap::new();
        let mut closed: Vec<Group> = Vec::new();

        for &i in &level.constraints {
            let tag = cs.block_tags[i as usize];
            if !cs.block_is_lazy(tag) {
                continue;
            }
            let Some((sig, anchor)) = signature(&cs.shared, cs.explicit.row(i as usize), tag)
            else {
                continue;
            };
            match open.entry(sig) {
                Entry::Vacant(e) => {
                    e.insert(Group::new(i, anchor));
                }
                Entry::Occupied(mut e) => {
                    if !e.get_mut().try_extend(i, anchor) {
                        closed.push(std::mem::replace(e.get_mut(), Group::new(i, anchor)));
                    }
                }
            }
        }

        closed.extend(open.into_values());
        closed.retain(|g| g.members.len() >= min_occurrences);
        closed.sort_by_key(|g| g.members[0]);

        for g in closed {
            let template = cs.explicit.get(g.members[0] as usize);
            let mut exceptions = Vec::new();
            for side in Side::ALL {
                for (j, t) in template.side(side).iter().enumerate() {
                    if !is_shiftable(&cs.shared, t.wire) {
                        exceptions.push(TermPos {
                            side,
                            term: j as u32,
                        });
                    }
                }
            }
            debug!(
                level = li,
                count = g.members.len(),
                stride = g.stride,
                first = g.members[0],
                "template extracted"
            );
            found.push(LazyConstraint {
                template,
                count: g.members.len() as u32,
                stride: g.stride,
                level: li as u32,
                tag: cs.block_tags[g.members[0] as usize],
                exceptions,
            });
            found_members.push(g.members);
        }
    }

    let mut lazified = bitvec![u64, Lsb0; 0; nb_explicit];
    for members in &found_members {
        for &m in members {
            lazified.set(m as usize, true);
        }
    }

    let mut new_index = vec![u32::MAX; nb_explicit];
    let mut next = 0u32;
    for (i, slot) in new_index.iter_mut().enumerate() {
        if !lazified[i] {
            *slot = next;
            next += 1;
        }
    }
    let explicit_after = next as usize;

    let mut remap = vec![0u64; nb_explicit + old_lazy_total as usize];
    for i in 0..nb_explicit {
        if !lazified[i] {
            remap[i] = new_index[i] as u64;
        }
    }
    for p in 0..old_lazy_total {
        remap[nb_explicit + p as usize] = explicit_after as u64 + p;
    }

    let first_new = cs.templates.len();
    let mut lazy_added = 0u64;
    for (j, (template, members)) in found.into_iter().zip(&found_members).enumerate() {
        let tid = first_new + j;
        cs.lazy_map.push(template.count);
        for (k, &m) in members.iter().enumerate() {
            remap[m as usize] = explicit_after as u64 + cs.lazy_map.position(tid, k as u32);
        }
        lazy_added += template.count as u64;
        cs.levels[template.level as usize].templates.push(tid as u32);
        cs.templates.push(template);
    }

    cs.explicit = cs.explicit.retain_rows(|i| !lazified[i]);
    cs.block_tags = cs
        .block_tags
        .iter()
        .enumerate()
        .filter(|(i, _)| !lazified[*i])
        .map(|(_, t)| *t)
        .collect();
    for level in cs.levels.iter_mut() {
        level.constraints = level
            .constraints
            .iter()
            .filter(|&&i| !lazified[i as usize])
            .map(|&i| new_index[i as usize])
            .collect();
    }

    let report = LazifyReport {
        remap,
        explicit_before: nb_explicit,
        explicit_after,
        templates_added: cs.templates.len() - first_new,
        lazy_added,
    };
    info!(
        explicit_before = report.explicit_before,
        explicit_after = report.explicit_after,
        templates_added = report.templates_added,
        lazy_constraints = cs.lazy_map.total(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "lazified constraint system"
    );
    report
}
