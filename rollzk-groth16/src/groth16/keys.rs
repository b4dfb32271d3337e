//! Proving and verifying key material and its segment layout.
//!
//! A proving key is stored as six independent segments,
//! `pk.{E,A,B1,B2,Z,K}.<session>.save`. `E` carries the scalar shape and the
//! α/β/δ elements; the others are bare point vectors, each consumed by
//! exactly one fold of the roll prover.

use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Seek, Write};

use bitvec::prelude::*;
use pairing::Engine;
use rollzk_cs::codec::{SegmentKind, SegmentReader, SegmentWriter};
use rollzk_cs::store::{self, SegmentStore};
use rollzk_cs::CodecError;
use tracing::info;

use super::points::{
    header_encoding, read_point, read_points, write_point, write_points, DecodePolicy, Encoding,
};
use crate::error::{ProverError, ProverResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    E,
    A,
    B1,
    B2,
    Z,
    K,
}

/// Every part carrying points, in the order setup emits them.
pub const FOLD_PARTS: [KeyPart; 5] = [KeyPart::A, KeyPart::B1, KeyPart::B2, KeyPart::K, KeyPart::Z];

impl KeyPart {
    pub fn name(self) -> &'static str {
        match self {
            KeyPart::E => "E",
            KeyPart::A => "A",
            KeyPart::B1 => "B1",
            KeyPart::B2 => "B2",
            KeyPart::Z => "Z",
            KeyPart::K => "K",
        }
    }

    pub fn kind(self) -> SegmentKind {
        match self {
            KeyPart::E => SegmentKind::ProvingKeyE,
            KeyPart::A => SegmentKind::ProvingKeyA,
            KeyPart::B1 => SegmentKind::ProvingKeyB1,
            KeyPart::B2 => SegmentKind::ProvingKeyB2,
            KeyPart::Z => SegmentKind::ProvingKeyZ,
            KeyPart::K => SegmentKind::ProvingKeyK,
        }
    }

    pub fn segment(self, session: &str) -> String {
        store::pk_segment(self.name(), session)
    }

    pub fn is_g2(self) -> bool {
        self == KeyPart::B2
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of the `E` segment: everything the prover needs besides the point
/// vectors.
#[derive(Clone)]
pub struct KeyMeta<E: Engine> {
    pub domain_size: u64,
    pub nb_constraints: u64,
    pub nb_wires: u64,
    pub nb_public: u32,

    pub alpha_g1: E::G1Affine,
    pub beta_g1: E::G1Affine,
    pub beta_g2: E::G2Affine,
    pub delta_g1: E::G1Affine,
    pub delta_g2: E::G2Affine,

    /// Bit `w` is set when wire `w` has no A point.
    pub infinity_a: BitVec<u64, Lsb0>,
    /// Bit `w` is set when wire `w` has no B point.
    pub infinity_b: BitVec<u64, Lsb0>,
}

impl<E: Engine> KeyMeta<E> {
    /// First wire folded against `K`; earlier wires are verifier inputs.
    pub fn first_private(&self) -> u64 {
        u64::from(self.nb_public) + 1
    }

    /// Number of points `part` must hold for this key.
    pub fn expected_len(&self, part: KeyPart) -> usize {
        match part {
            KeyPart::E => 0,
            KeyPart::A => self.infinity_a.count_zeros(),
            KeyPart::B1 | KeyPart::B2 => self.infinity_b.count_zeros(),
            KeyPart::Z => self.domain_size.saturating_sub(1) as usize,
            KeyPart::K => self.nb_wires.saturating_sub(self.first_private()) as usize,
        }
    }
}

impl<E: Engine> fmt::Debug for KeyMeta<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMeta")
            .field("domain_size", &self.domain_size)
            .field("nb_constraints", &self.nb_constraints)
            .field("nb_wires", &self.nb_wires)
            .field("nb_public", &self.nb_public)
            .field("a_points", &self.infinity_a.count_zeros())
            .field("b_points", &self.infinity_b.count_zeros())
            .finish()
    }
}

impl<E: Engine> PartialEq for KeyMeta<E> {
    fn eq(&self, other: &Self) -> bool {
        self.domain_size == other.domain_size
            && self.nb_constraints == other.nb_constraints
            && self.nb_wires == other.nb_wires
            && self.nb_public == other.nb_public
            && self.alpha_g1 == other.alpha_g1
            && self.beta_g1 == other.beta_g1
            && self.beta_g2 == other.beta_g2
            && self.delta_g1 == other.delta_g1
            && self.delta_g2 == other.delta_g2
            && self.infinity_a == other.infinity_a
            && self.infinity_b == other.infinity_b
    }
}

#[derive(Clone)]
pub struct ProvingKey<E: Engine> {
    pub meta: KeyMeta<E>,
    pub a: Vec<E::G1Affine>,
    pub b_g1: Vec<E::G1Affine>,
    pub b_g2: Vec<E::G2Affine>,
    pub z: Vec<E::G1Affine>,
    pub k: Vec<E::G1Affine>,
}

impl<E: Engine> PartialEq for ProvingKey<E> {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta
            && self.a == other.a
            && self.b_g1 == other.b_g1
            && self.b_g2 == other.b_g2
            && self.z == other.z
            && self.k == other.k
    }
}

impl<E: Engine> fmt::Debug for ProvingKey<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvingKey")
            .field("meta", &self.meta)
            .field("z", &self.z.len())
            .field("k", &self.k.len())
            .finish()
    }
}

impl<E: Engine> ProvingKey<E> {
    pub fn g1(&self, part: KeyPart) -> Option<&[E::G1Affine]> {
        match part {
            KeyPart::A => Some(&self.a),
            KeyPart::B1 => Some(&self.b_g1),
            KeyPart::Z => Some(&self.z),
            KeyPart::K => Some(&self.k),
            KeyPart::E | KeyPart::B2 => None,
        }
    }
}

#[derive(Clone)]
pub struct VerifyingKey<E: Engine> {
    pub alpha_g1: E::G1Affine,
    pub beta_g1: E::G1Affine,
    pub beta_g2: E::G2Affine,
    pub gamma_g2: E::G2Affine,
    pub delta_g1: E::G1Affine,
    pub delta_g2: E::G2Affine,
    /// `(β·u_i + α·v_i + w_i) / γ` for the constant and each public wire.
    pub ic: Vec<E::G1Affine>,
}

impl<E: Engine> fmt::Debug for VerifyingKey<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("alpha_g1", &self.alpha_g1)
            .field("beta_g2", &self.beta_g2)
            .field("gamma_g2", &self.gamma_g2)
            .field("delta_g2", &self.delta_g2)
            .field("ic", &self.ic.len())
            .finish()
    }
}

impl<E: Engine> PartialEq for VerifyingKey<E> {
    fn eq(&self, other: &Self) -> bool {
        self.alpha_g1 == other.alpha_g1
            && self.beta_g1 == other.beta_g1
            && self.beta_g2 == other.beta_g2
            && self.gamma_g2 == other.gamma_g2
            && self.delta_g1 == other.delta_g1
            && self.delta_g2 == other.delta_g2
            && self.ic == other.ic
    }
}

// ─── Segment I/O ────────────────────────────────────────────────────────────

pub fn write_meta<E: Engine, W: Write + Seek>(
    sink: &mut W,
    segment: &str,
    meta: &KeyMeta<E>,
    encoding: Encoding,
) -> Result<u64, CodecError> {
    let mut w = SegmentWriter::begin(
        sink,
        segment,
        SegmentKind::ProvingKeyE,
        encoding.flag(),
        meta.domain_size,
    )?;
    w.write_u64(meta.domain_size)?;
    w.write_u64(meta.nb_constraints)?;
    w.write_u64(meta.nb_wires)?;
    w.write_u32(meta.nb_public)?;
    write_point(&mut w, &meta.alpha_g1, encoding)?;
    write_point(&mut w, &meta.beta_g1, encoding)?;
    write_point(&mut w, &meta.beta_g2, encoding)?;
    write_point(&mut w, &meta.delta_g1, encoding)?;
    write_point(&mut w, &meta.delta_g2, encoding)?;
    w.write_bits(&meta.infinity_a)?;
    w.write_bits(&meta.infinity_b)?;
    w.finish()
}

pub fn read_meta<E: Engine, R: Read>(
    source: &mut R,
    segment: &str,
    policy: DecodePolicy,
) -> Result<KeyMeta<E>, CodecError> {
    let mut r = SegmentReader::open(source, segment, SegmentKind::ProvingKeyE)?;
    let encoding = header_encoding(&r)?;
    let domain_size = r.read_u64()?;
    let nb_constraints = r.read_u64()?;
    let nb_wires = r.read_u64()?;
    let nb_public = r.read_u32()?;
    let alpha_g1 = read_point(&mut r, encoding, policy)?;
    let beta_g1 = read_point(&mut r, encoding, policy)?;
    let beta_g2 = read_point(&mut r, encoding, policy)?;
    let delta_g1 = read_point(&mut r, encoding, policy)?;
    let delta_g2 = read_point(&mut r, encoding, policy)?;
    let infinity_a = r.read_bits()?;
    let infinity_b = r.read_bits()?;

    if !domain_size.is_power_of_two() || nb_constraints + u64::from(nb_public) + 1 > domain_size {
        return Err(r.malformed(format!(
            "{nb_constraints} constraints and {nb_public} public wires do not fit domain {domain_size}"
        )));
    }
    if infinity_a.len() as u64 != nb_wires || infinity_b.len() as u64 != nb_wires {
        return Err(r.malformed(format!("infinity bitmaps do not cover {nb_wires} wires")));
    }
    r.finish()?;

    Ok(KeyMeta {
        domain_size,
        nb_constraints,
        nb_wires,
        nb_public,
        alpha_g1,
        beta_g1,
        beta_g2,
        delta_g1,
        delta_g2,
        infinity_a,
        infinity_b,
    })
}

/// Write one point segment. `points` must be G1 points unless `part` is B2.
pub fn write_part<G, W>(
    sink: &mut W,
    segment: &str,
    part: KeyPart,
    points: &[G],
    encoding: Encoding,
) -> Result<u64, CodecError>
where
    G: group::prime::PrimeCurveAffine + group::UncompressedEncoding,
    W: Write + Seek,
{
    let mut w = SegmentWriter::begin(
        sink,
        segment,
        part.kind(),
        encoding.flag(),
        points.len() as u64,
    )?;
    write_points(&mut w, points, encoding)?;
    w.finish()
}

pub fn read_part<G, R>(
    source: &mut R,
    segment: &str,
    part: KeyPart,
    policy: DecodePolicy,
) -> Result<Vec<G>, CodecError>
where
    G: group::prime::PrimeCurveAffine + group::UncompressedEncoding,
    R: Read,
{
    let mut r = SegmentReader::open(source, segment, part.kind())?;
    let encoding = header_encoding(&r)?;
    let points = read_points(&mut r, encoding, policy)?;
    r.finish()?;
    Ok(points)
}

pub fn write_verifying_key<E: Engine, W: Write + Seek>(
    sink: &mut W,
    segment: &str,
    vk: &VerifyingKey<E>,
    encoding: Encoding,
) -> Result<u64, CodecError> {
    let mut w = SegmentWriter::begin(
        sink,
        segment,
        SegmentKind::VerifyingKey,
        encoding.flag(),
        vk.ic.len() as u64,
    )?;
    write_point(&mut w, &vk.alpha_g1, encoding)?;
    write_point(&mut w, &vk.beta_g1, encoding)?;
    write_point(&mut w, &vk.beta_g2, encoding)?;
    write_point(&mut w, &vk.gamma_g2, encoding)?;
    write_point(&mut w, &vk.delta_g1, encoding)?;
    write_point(&mut w, &vk.delta_g2, encoding)?;
    write_points(&mut w, &vk.ic, encoding)?;
    w.finish()
}

pub fn read_verifying_key<E: Engine, R: Read>(
    source: &mut R,
    segment: &str,
    policy: DecodePolicy,
) -> Result<VerifyingKey<E>, CodecError> {
    let mut r = SegmentReader::open(source, segment, SegmentKind::VerifyingKey)?;
    let encoding = header_encoding(&r)?;
    let vk = VerifyingKey {
        alpha_g1: read_point(&mut r, encoding, policy)?,
        beta_g1: read_point(&mut r, encoding, policy)?,
        beta_g2: read_point(&mut r, encoding, policy)?,
        gamma_g2: read_point(&mut r, encoding, policy)?,
        delta_g1: read_point(&mut r, encoding, policy)?,
        delta_g2: read_point(&mut r, encoding, policy)?,
        ic: read_points(&mut r, encoding, policy)?,
    };
    if vk.ic.is_empty() {
        return Err(r.malformed("verifying key has no constant-wire IC point"));
    }
    r.finish()?;
    Ok(vk)
}

// ─── Store helpers ──────────────────────────────────────────────────────────

/// Publish all six proving-key segments for `session` as one batch.
pub fn save_proving_key<E: Engine>(
    store: &SegmentStore,
    session: &str,
    pk: &ProvingKey<E>,
    encoding: Encoding,
) -> Result<(), CodecError> {
    let mut batch = store.batch();
    let name = KeyPart::E.segment(session);
    batch.stage(&name, |w| write_meta(w, &name, &pk.meta, encoding))?;
    for part in FOLD_PARTS {
        let name = part.segment(session);
        match pk.g1(part) {
            Some(points) => batch.stage(&name, |w| write_part(w, &name, part, points, encoding))?,
            None => batch.stage(&name, |w| write_part(w, &name, part, &pk.b_g2, encoding))?,
        };
    }
    batch.commit()
}

/// Read every proving-key segment of `session` into memory.
pub fn load_proving_key<E: Engine>(
    store: &SegmentStore,
    session: &str,
    policy: DecodePolicy,
) -> ProverResult<ProvingKey<E>> {
    let store_source = StoreKeySource::new(store.clone(), session, policy);
    let source: &dyn KeySource<E> = &store_source;
    let meta = source.meta()?;
    let pk = ProvingKey {
        a: source.load_g1(KeyPart::A)?.into_owned(),
        b_g1: source.load_g1(KeyPart::B1)?.into_owned(),
        b_g2: source.load_g2(KeyPart::B2)?.into_owned(),
        z: source.load_g1(KeyPart::Z)?.into_owned(),
        k: source.load_g1(KeyPart::K)?.into_owned(),
        meta,
    };
    for part in FOLD_PARTS {
        let got = match part {
            KeyPart::B2 => pk.b_g2.len(),
            _ => pk.g1(part).map_or(0, <[_]>::len),
        };
        check_len(&pk.meta, part, &part.segment(session), got)?;
    }
    Ok(pk)
}

pub fn save_verifying_key<E: Engine>(
    store: &SegmentStore,
    session: &str,
    vk: &VerifyingKey<E>,
    encoding: Encoding,
) -> Result<(), CodecError> {
    let name = store::vk_segment(session);
    store.publish(&name, |w| write_verifying_key(w, &name, vk, encoding))?;
    Ok(())
}

pub fn load_verifying_key<E: Engine>(
    store: &SegmentStore,
    session: &str,
    policy: DecodePolicy,
) -> Result<VerifyingKey<E>, CodecError> {
    let name = store::vk_segment(session);
    store.read(&name, |r| read_verifying_key(r, &name, policy))
}

pub(crate) fn check_len<E: Engine>(
    meta: &KeyMeta<E>,
    part: KeyPart,
    segment: &str,
    got: usize,
) -> ProverResult<()> {
    let expected = meta.expected_len(part);
    if got != expected {
        return Err(ProverError::SegmentLength {
            segment: segment.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

// ─── Key sources ────────────────────────────────────────────────────────────

/// Supplies proving-key segments to the roll prover one at a time.
pub trait KeySource<E: Engine> {
    fn meta(&self) -> ProverResult<KeyMeta<E>>;

    fn load_g1(&self, part: KeyPart) -> ProverResult<Cow<'_, [E::G1Affine]>>;

    fn load_g2(&self, part: KeyPart) -> ProverResult<Cow<'_, [E::G2Affine]>>;
}

impl<E: Engine> KeySource<E> for ProvingKey<E> {
    fn meta(&self) -> ProverResult<KeyMeta<E>> {
        Ok(self.meta.clone())
    }

    fn load_g1(&self, part: KeyPart) -> ProverResult<Cow<'_, [E::G1Affine]>> {
        self.g1(part).map(Cow::Borrowed).ok_or(ProverError::WrongGroup(part))
    }

    fn load_g2(&self, part: KeyPart) -> ProverResult<Cow<'_, [E::G2Affine]>> {
        match part {
            KeyPart::B2 => Ok(Cow::Borrowed(&self.b_g2)),
            _ => Err(ProverError::WrongGroup(part)),
        }
    }
}

/// Reads each segment from a [`SegmentStore`] on demand. Nothing is cached:
/// the points returned by a load are dropped with the `Cow`.
#[derive(Clone, Debug)]
pub struct StoreKeySource {
    store: SegmentStore,
    session: String,
    policy: DecodePolicy,
}

impl StoreKeySource {
    pub fn new(store: SegmentStore, session: &str, policy: DecodePolicy) -> Self {
        Self {
            store,
            session: session.to_string(),
            policy,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn load<G>(&self, part: KeyPart) -> ProverResult<Vec<G>>
    where
        G: group::prime::PrimeCurveAffine + group::UncompressedEncoding,
    {
        let name = part.segment(&self.session);
        let points = self
            .store
            .read(&name, |r| read_part::<G, _>(r, &name, part, self.policy))?;
        info!(part = part.name(), points = points.len(), "key segment loaded");
        Ok(points)
    }
}

impl<E: Engine> KeySource<E> for StoreKeySource {
    fn meta(&self) -> ProverResult<KeyMeta<E>> {
        let name = KeyPart::E.segment(&self.session);
        Ok(self.store.read(&name, |r| read_meta(r, &name, self.policy))?)
    }

    fn load_g1(&self, part: KeyPart) -> ProverResult<Cow<'_, [E::G1Affine]>> {
        if part.is_g2() || part == KeyPart::E {
            return Err(ProverError::WrongGroup(part));
        }
        Ok(Cow::Owned(self.load(part)?))
    }

    fn load_g2(&self, part: KeyPart) -> ProverResult<Cow<'_, [E::G2Affine]>> {
        if !part.is_g2() {
            return Err(ProverError::WrongGroup(part));
        }
        Ok(Cow::Owned(self.load(part)?))
    }
}
