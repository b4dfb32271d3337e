//! Constraint-system, coefficient-table and witness segments.
//!
//! `cs.save` payload, in order:
//!   - wire partition: nb_public, nb_secret, nb_internal (u32 each)
//!   - shared-wire bitmap
//!   - explicit CSR matrices L, R, O: row_ptrs (u64 vec) + terms
//!   - block table (key, lazy flag) and per-row block tags
//!   - templates: three term lists, count, stride, level, tag, exceptions
//!   - lazy index map: prefix sums + total
//!   - levels: constraint, template and hint index lists
//!   - hint calls: key, input expressions, output wires
//!
//! The coefficient table goes to its own `cs.ct.save` segment; a system read
//! back from `cs.save` carries only the reserved coefficients until
//! [`ConstraintSystem::attach_coeffs`] is called, which [`load_system`] does.

use std::io::{Read, Seek, Write};
use std::time::Instant;

use ff::PrimeField;
use tracing::info;

use crate::codec::{SegmentKind, SegmentReader, SegmentWriter};
use crate::coeff::CoeffTable;
use crate::csr::{Constraint, ConstraintMatrices, CsrMatrix, LinearExpression, Side};
use crate::error::CodecError;
use crate::lazy::{LazyConstraint, LazyIndexMap, TermPos};
use crate::registry::BlockInfo;
use crate::store::{self, SegmentStore};
use crate::system::{ConstraintSystem, HintCall, Level, WirePartition};

// ─── Constraint system ──────────────────────────────────────────────────────

fn write_csr<W: Write + Seek>(
    w: &mut SegmentWriter<'_, W>,
    m: &CsrMatrix,
) -> Result<(), CodecError> {
    w.write_vec_u64(&m.row_ptrs)?;
    w.write_terms(&m.terms)
}

fn read_csr<R: Read>(r: &mut SegmentReader<'_, R>) -> Result<CsrMatrix, CodecError> {
    let row_ptrs = r.read_vec_u64()?;
    let terms = r.read_terms()?;
    Ok(CsrMatrix { row_ptrs, terms })
}

fn write_template<W: Write + Seek>(
    w: &mut SegmentWriter<'_, W>,
    t: &LazyConstraint,
) -> Result<(), CodecError> {
    for side in Side::ALL {
        w.write_terms(t.template.side(side))?;
    }
    w.write_u32(t.count)?;
    w.write_u32(t.stride)?;
    w.write_u32(t.level)?;
    w.write_u32(t.tag)?;
    w.write_u64(t.exceptions.len() as u64)?;
    for p in &t.exceptions {
        w.write_u8(p.side.index() as u8)?;
        w.write_u32(p.term)?;
    }
    Ok(())
}

fn read_template<R: Read>(r: &mut SegmentReader<'_, R>) -> Result<LazyConstraint, CodecError> {
    let mut template = Constraint::default();
    for side in Side::ALL {
        *template.side_mut(side) = r.read_terms()?;
    }
    let count = r.read_u32()?;
    let stride = r.read_u32()?;
    let level = r.read_u32()?;
    let tag = r.read_u32()?;
    let nb_exceptions = r.read_len(5)?;
    let mut exceptions = Vec::with_capacity(nb_exceptions);
    for _ in 0..nb_exceptions {
        let raw = r.read_u8()?;
        let side = Side::from_index(raw).ok_or_else(|| r.malformed(format!("bad side tag {raw}")))?;
        let term = r.read_u32()?;
        if term as usize >= template.side(side).len() {
            return Err(r.malformed(format!("exception points past {side:?} term {term}")));
        }
        exceptions.push(TermPos { side, term });
    }
    if !exceptions.windows(2).all(|w| w[0] < w[1]) {
        return Err(r.malformed("template exceptions are not sorted"));
    }
    Ok(LazyConstraint {
        template,
        count,
        stride,
        level,
        tag,
        exceptions,
    })
}

/// Encode `cs` (without its coefficient table) as a `cs.save` segment.
pub fn write_system<F: PrimeField, W: Write + Seek>(
    sink: &mut W,
    cs: &ConstraintSystem<F>,
) -> Result<u64, CodecError> {
    let mut w = SegmentWriter::begin(
        sink,
        store::CS,
        SegmentKind::ConstraintSystem,
        0,
        cs.nb_constraints(),
    )?;

    w.write_u32(cs.wires.nb_public)?;
    w.write_u32(cs.wires.nb_secret)?;
    w.write_u32(cs.wires.nb_internal)?;
    w.write_bits(&cs.shared)?;

    write_csr(&mut w, &cs.explicit.l)?;
    write_csr(&mut w, &cs.explicit.r)?;
    write_csr(&mut w, &cs.explicit.o)?;

    w.write_u64(cs.blocks.len() as u64)?;
    for b in &cs.blocks {
        w.write_str(&b.key)?;
        w.write_u8(b.lazy as u8)?;
    }
    w.write_vec_u32(&cs.block_tags)?;

    w.write_u64(cs.templates.len() as u64)?;
    for t in &cs.templates {
        write_template(&mut w, t)?;
    }
    w.write_vec_u64(cs.lazy_map.starts())?;
    w.write_u64(cs.lazy_map.total())?;

    w.write_u64(cs.levels.len() as u64)?;
    for level in &cs.levels {
        w.write_vec_u32(&level.constraints)?;
        w.write_vec_u32(&level.templates)?;
        w.write_vec_u32(&level.hints)?;
    }

    w.write_u64(cs.hints.len() as u64)?;
    for h in &cs.hints {
        w.write_str(&h.key)?;
        w.write_u64(h.inputs.len() as u64)?;
        for e in &h.inputs {
            w.write_terms(e.terms())?;
        }
        w.write_vec_u32(&h.outputs)?;
    }

    w.finish()
}

/// Decode a `cs.save` segment. The result holds only the reserved
/// coefficients; attach the table read from `cs.ct.save` before solving.
pub fn read_system<F: PrimeField, R: Read>(
    source: &mut R,
) -> Result<ConstraintSystem<F>, CodecError> {
    let mut r = SegmentReader::open(source, store::CS, SegmentKind::ConstraintSystem)?;

    let wires = WirePartition {
        nb_public: r.read_u32()?,
        nb_secret: r.read_u32()?,
        nb_internal: r.read_u32()?,
    };
    let shared = r.read_bits()?;

    let l = read_csr(&mut r)?;
    let rr = read_csr(&mut r)?;
    let o = read_csr(&mut r)?;
    if l.num_rows() != rr.num_rows() || l.num_rows() != o.num_rows() {
        return Err(r.malformed(format!(
            "side matrices disagree on row count ({}, {}, {})",
            l.num_rows(),
            rr.num_rows(),
            o.num_rows()
        )));
    }

    let nb_blocks = r.read_len(5)?;
    let mut blocks = Vec::with_capacity(nb_blocks);
    for _ in 0..nb_blocks {
        let key = r.read_str()?;
        let lazy = r.read_u8()? != 0;
        blocks.push(BlockInfo { key, lazy });
    }
    let block_tags = r.read_vec_u32()?;
    if let Some(&bad) = block_tags.iter().find(|&&t| t as usize > blocks.len()) {
        return Err(r.malformed(format!("block tag {bad} with {} blocks", blocks.len())));
    }

    // 3 empty term lists + 4 u32 + exception count
    let nb_templates = r.read_len(3 * 8 + 16 + 8)?;
    let mut templates = Vec::with_capacity(nb_templates);
    for _ in 0..nb_templates {
        templates.push(read_template(&mut r)?);
    }
    let starts = r.read_vec_u64()?;
    let total = r.read_u64()?;
    let lazy_map = LazyIndexMap::from_parts(starts, total);

    let nb_levels = r.read_len(24)?;
    let mut levels = Vec::with_capacity(nb_levels);
    for _ in 0..nb_levels {
        levels.push(Level {
            constraints: r.read_vec_u32()?,
            templates: r.read_vec_u32()?,
            hints: r.read_vec_u32()?,
        });
    }

    let nb_hints = r.read_len(4 + 8 + 8)?;
    let mut hints = Vec::with_capacity(nb_hints);
    for _ in 0..nb_hints {
        let key = r.read_str()?;
        let nb_inputs = r.read_len(8)?;
        let mut inputs = Vec::with_capacity(nb_inputs);
        for _ in 0..nb_inputs {
            inputs.push(LinearExpression(r.read_terms()?));
        }
        let outputs = r.read_vec_u32()?;
        hints.push(HintCall { key, inputs, outputs });
    }

    let cs = ConstraintSystem {
        wires,
        shared,
        coeffs: CoeffTable::new(),
        explicit: ConstraintMatrices { l, r: rr, o },
        block_tags,
        blocks,
        templates,
        lazy_map,
        levels,
        hints,
    };
    cs.validate_structure().map_err(|e| r.invalid(e))?;
    r.finish()?;
    Ok(cs)
}

// ─── Coefficient table ──────────────────────────────────────────────────────

pub fn write_coeff_table<F: PrimeField, W: Write + Seek>(
    sink: &mut W,
    table: &CoeffTable<F>,
) -> Result<u64, CodecError> {
    let mut w = SegmentWriter::begin(
        sink,
        store::CS_COEFFS,
        SegmentKind::CoeffTable,
        0,
        table.len() as u64,
    )?;
    w.write_scalars(table.values())?;
    w.finish()
}

/// Decode a `cs.ct.save` segment, rebuilding both lookup indexes.
pub fn read_coeff_table<F: PrimeField, R: Read>(
    source: &mut R,
) -> Result<CoeffTable<F>, CodecError> {
    let mut r = SegmentReader::open(source, store::CS_COEFFS, SegmentKind::CoeffTable)?;
    let values = r.read_scalars::<F>()?;
    let table = CoeffTable::from_values(values).map_err(|e| r.invalid(e))?;
    r.finish()?;
    Ok(table)
}

// ─── Witness ────────────────────────────────────────────────────────────────

/// Which witness vector a segment holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum WitnessVariant {
    /// Public then secret inputs, as consumed by [`crate::solve`].
    Full = 0,
    /// Public inputs only, as consumed by the verifier.
    Public = 1,
}

impl WitnessVariant {
    pub fn segment_name(self) -> &'static str {
        match self {
            WitnessVariant::Full => store::WITNESS_FULL,
            WitnessVariant::Public => store::WITNESS_PUBLIC,
        }
    }
}

pub fn write_witness<F: PrimeField, W: Write + Seek>(
    sink: &mut W,
    variant: WitnessVariant,
    values: &[F],
) -> Result<u64, CodecError> {
    let mut w = SegmentWriter::begin(
        sink,
        variant.segment_name(),
        SegmentKind::Witness,
        variant as u32,
        values.len() as u64,
    )?;
    w.write_scalars(values)?;
    w.finish()
}

pub fn read_witness<F: PrimeField, R: Read>(
    source: &mut R,
    variant: WitnessVariant,
) -> Result<Vec<F>, CodecError> {
    let mut r = SegmentReader::open(source, variant.segment_name(), SegmentKind::Witness)?;
    if r.header().flags != variant as u32 {
        return Err(r.malformed(format!(
            "witness variant flag {} (expected {})",
            r.header().flags,
            variant as u32
        )));
    }
    let values = r.read_scalars::<F>()?;
    r.finish()?;
    Ok(values)
}

// ─── Store-level helpers ────────────────────────────────────────────────────

/// Publish `cs.save` and `cs.ct.save` together.
pub fn save_system<F: PrimeField>(
    store: &SegmentStore,
    cs: &ConstraintSystem<F>,
) -> Result<(), CodecError> {
    let start = Instant::now();
    let mut batch = store.batch();
    let cs_bytes = batch.stage(store::CS, |w| write_system(w, cs))?;
    let ct_bytes = batch.stage(store::CS_COEFFS, |w| write_coeff_table(w, cs.coeffs()))?;
    batch.commit()?;
    info!(
        constraints = cs.nb_constraints(),
        explicit = cs.nb_explicit(),
        templates = cs.nb_templates(),
        cs_bytes,
        ct_bytes,
        save_ms = start.elapsed().as_millis() as u64,
        "constraint system saved"
    );
    Ok(())
}

/// Read `cs.save` and `cs.ct.save` and join them.
pub fn load_system<F: PrimeField>(store: &SegmentStore) -> Result<ConstraintSystem<F>, CodecError> {
    let table = store.read(store::CS_COEFFS, |r| read_coeff_table::<F, _>(r))?;
    let mut cs = store.read(store::CS, |r| read_system::<F, _>(r))?;
    cs.attach_coeffs(table).map_err(|e| CodecError::Invalid {
        segment: store::CS_COEFFS.to_string(),
        source: e,
    })?;
    Ok(cs)
}

/// Publish `witness_full.save` (public + secret inputs) and
/// `witness_pub.save` (the first `nb_public` of them).
pub fn save_witness<F: PrimeField>(
    store: &SegmentStore,
    inputs: &[F],
    nb_public: u32,
) -> Result<(), CodecError> {
    let public = &inputs[..(nb_public as usize).min(inputs.len())];
    let mut batch = store.batch();
    batch.stage(store::WITNESS_FULL, |w| write_witness(w, WitnessVariant::Full, inputs))?;
    batch.stage(store::WITNESS_PUBLIC, |w| write_witness(w, WitnessVariant::Public, public))?;
    batch.commit()
}

pub fn load_witness<F: PrimeField>(
    store: &SegmentStore,
    variant: WitnessVariant,
) -> Result<Vec<F>, CodecError> {
    store.read(variant.segment_name(), |r| read_witness::<F, _>(r, variant))
}
