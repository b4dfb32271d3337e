//! Curve point encodings for key, verifying-key and proof segments.
//!
//! Two encodings: `Compressed` (canonical `GroupEncoding`) and `Raw`
//! (`UncompressedEncoding`, larger but cheaper to decode). Either can be read
//! `Checked` (on-curve and prime-order subgroup) or `Unchecked`. Unchecked
//! decoding never raises subgroup faults and must only be used on segments
//! this pipeline produced itself. Bytes that do not encode a curve point are
//! a malformed payload under either policy.

use std::io::{Read, Seek, Write};

use group::prime::PrimeCurveAffine;
use group::{GroupEncoding, UncompressedEncoding};
use rayon::prelude::*;
use rollzk_cs::codec::{SegmentReader, SegmentWriter};
use rollzk_cs::CodecError;
use serde::{Deserialize, Serialize};

/// Points encoded or decoded per rayon batch.
const POINT_BATCH: usize = 1 << 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Compressed,
    Raw,
}

impl Encoding {
    pub fn flag(self) -> u32 {
        match self {
            Encoding::Compressed => 0,
            Encoding::Raw => 1,
        }
    }

    pub fn from_flag(flag: u32) -> Option<Self> {
        match flag {
            0 => Some(Encoding::Compressed),
            1 => Some(Encoding::Raw),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    #[default]
    Checked,
    /// Skips curve and subgroup checks. Trusted sources only.
    Unchecked,
}

/// Encoded size of one point.
pub fn point_size<G: PrimeCurveAffine + UncompressedEncoding>(encoding: Encoding) -> usize {
    match encoding {
        Encoding::Compressed => <G as GroupEncoding>::Repr::default().as_ref().len(),
        Encoding::Raw => <G as UncompressedEncoding>::Uncompressed::default().as_ref().len(),
    }
}

fn encode_into<G>(p: &G, encoding: Encoding, out: &mut [u8])
where
    G: PrimeCurveAffine + UncompressedEncoding,
{
    match encoding {
        Encoding::Compressed => out.copy_from_slice(p.to_bytes().as_ref()),
        Encoding::Raw => out.copy_from_slice(p.to_uncompressed().as_ref()),
    }
}

fn decode<G: PrimeCurveAffine + UncompressedEncoding>(
    bytes: &[u8],
    encoding: Encoding,
    policy: DecodePolicy,
) -> Option<G> {
    match encoding {
        Encoding::Compressed => {
            let mut repr = <G as GroupEncoding>::Repr::default();
            repr.as_mut().copy_from_slice(bytes);
            match policy {
                DecodePolicy::Checked => G::from_bytes(&repr).into(),
                DecodePolicy::Unchecked => G::from_bytes_unchecked(&repr).into(),
            }
        }
        Encoding::Raw => {
            let mut repr = <G as UncompressedEncoding>::Uncompressed::default();
            repr.as_mut().copy_from_slice(bytes);
            match policy {
                DecodePolicy::Checked => G::from_uncompressed(&repr).into(),
                DecodePolicy::Unchecked => G::from_uncompressed_unchecked(&repr).into(),
            }
        }
    }
}

pub fn write_point<G, W>(
    w: &mut SegmentWriter<'_, W>,
    p: &G,
    encoding: Encoding,
) -> Result<(), CodecError>
where
    G: PrimeCurveAffine + UncompressedEncoding,
    W: Write + Seek,
{
    let mut buf = vec![0u8; point_size::<G>(encoding)];
    encode_into(p, encoding, &mut buf);
    w.write_bytes(&buf)
}

pub fn read_point<G, R>(
    r: &mut SegmentReader<'_, R>,
    encoding: Encoding,
    policy: DecodePolicy,
) -> Result<G, CodecError>
where
    G: PrimeCurveAffine + UncompressedEncoding,
    R: Read,
{
    let bytes = r.read_bytes(point_size::<G>(encoding))?;
    decode(&bytes, encoding, policy)
        .ok_or_else(|| point_fault::<G, R>(r, &bytes, encoding, policy, 0))
}

/// Classify a rejected point. Only a point that decodes without the subgroup
/// check is a subgroup fault; anything else is a malformed payload.
fn point_fault<G, R>(
    r: &SegmentReader<'_, R>,
    bytes: &[u8],
    encoding: Encoding,
    policy: DecodePolicy,
    index: u64,
) -> CodecError
where
    G: PrimeCurveAffine + UncompressedEncoding,
    R: Read,
{
    let on_curve = policy == DecodePolicy::Checked
        && decode::<G>(bytes, encoding, DecodePolicy::Unchecked).is_some();
    if on_curve {
        CodecError::Subgroup {
            segment: r.segment().to_string(),
            index,
        }
    } else {
        r.malformed(format!("point {index} is not a valid curve point encoding"))
    }
}

/// Write `points` as a `u64` count followed by the encodings.
pub fn write_points<G, W>(
    w: &mut SegmentWriter<'_, W>,
    points: &[G],
    encoding: Encoding,
) -> Result<(), CodecError>
where
    G: PrimeCurveAffine + UncompressedEncoding,
    W: Write + Seek,
{
    let size = point_size::<G>(encoding);
    w.write_u64(points.len() as u64)?;
    let mut buf = Vec::new();
    for batch in points.chunks(POINT_BATCH) {
        buf.resize(batch.len() * size, 0);
        buf.par_chunks_mut(size)
            .zip(batch.par_iter())
            .for_each(|(out, p)| encode_into(p, encoding, out));
        w.write_bytes(&buf)?;
    }
    Ok(())
}

/// Read a point vector written by [`write_points`], decoding in parallel.
/// A point failing `policy` is reported with its index in the vector.
pub fn read_points<G, R>(
    r: &mut SegmentReader<'_, R>,
    encoding: Encoding,
    policy: DecodePolicy,
) -> Result<Vec<G>, CodecError>
where
    G: PrimeCurveAffine + UncompressedEncoding,
    R: Read,
{
    let size = point_size::<G>(encoding);
    let len = r.read_len(size)?;
    let mut out = Vec::with_capacity(len);
    let mut done = 0usize;
    while done < len {
        let take = (len - done).min(POINT_BATCH);
        let bytes = r.read_bytes(take * size)?;
        let decoded: Result<Vec<G>, usize> = bytes
            .par_chunks(size)
            .enumerate()
            .map(|(i, b)| decode(b, encoding, policy).ok_or(i))
            .collect();
        match decoded {
            Ok(points) => out.extend(points),
            Err(i) => {
                let bad = &bytes[i * size..(i + 1) * size];
                return Err(point_fault::<G, R>(r, bad, encoding, policy, (done + i) as u64));
            }
        }
        done += take;
    }
    Ok(out)
}

/// Encoding recorded in a segment header.
pub fn header_encoding<R: Read>(r: &SegmentReader<'_, R>) -> Result<Encoding, CodecError> {
    Encoding::from_flag(r.header().flags)
        .ok_or_else(|| r.malformed(format!("unknown point encoding flag {}", r.header().flags)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::{Fp, G1Affine, G1Projective, G2Affine, G2Projective};
    use ff::Field;
    use group::{Curve, Group};
    use rand_core::SeedableRng;
    use rand_xorshift::XorShiftRng;
    use rollzk_cs::codec::SegmentKind;
    use std::io::Cursor;

    fn random_points(n: usize) -> (Vec<G1Affine>, Vec<G2Affine>) {
        let mut rng = XorShiftRng::from_seed([7; 16]);
        let g1: Vec<G1Projective> = (0..n).map(|_| G1Projective::random(&mut rng)).collect();
        let g2: Vec<G2Projective> = (0..n).map(|_| G2Projective::random(&mut rng)).collect();
        let mut a = vec![G1Affine::identity(); n];
        let mut b = vec![G2Affine::identity(); n];
        G1Projective::batch_normalize(&g1, &mut a);
        G2Projective::batch_normalize(&g2, &mut b);
        a.push(G1Affine::identity());
        (a, b)
    }

    #[test]
    fn test_point_vectors_roundtrip_in_both_encodings() {
        let (g1, g2) = random_points(20);
        for encoding in [Encoding::Compressed, Encoding::Raw] {
            let mut buf = Cursor::new(Vec::new());
            let kind = SegmentKind::ProvingKeyA;
            let mut w =
                SegmentWriter::begin(&mut buf, "pk.A.t.save", kind, encoding.flag(), 0).unwrap();
            write_points(&mut w, &g1, encoding).unwrap();
            write_points(&mut w, &g2, encoding).unwrap();
            w.finish().unwrap();

            for policy in [DecodePolicy::Checked, DecodePolicy::Unchecked] {
                buf.set_position(0);
                let mut r =
                    SegmentReader::open(&mut buf, "pk.A.t.save", SegmentKind::ProvingKeyA).unwrap();
                assert_eq!(header_encoding(&r).unwrap(), encoding);
                assert_eq!(read_points::<G1Affine, _>(&mut r, encoding, policy).unwrap(), g1);
                assert_eq!(read_points::<G2Affine, _>(&mut r, encoding, policy).unwrap(), g2);
                r.finish().unwrap();
            }
        }
        assert_eq!(point_size::<G1Affine>(Encoding::Compressed), 48);
        assert_eq!(point_size::<G1Affine>(Encoding::Raw), 96);
        assert_eq!(point_size::<G2Affine>(Encoding::Compressed), 96);
    }

    #[test]
    fn test_corrupt_point_reports_its_index() {
        let (g1, _) = random_points(4);
        let mut buf = Cursor::new(Vec::new());
        let mut w =
            SegmentWriter::begin(&mut buf, "pk.K.t.save", SegmentKind::ProvingKeyK, 1, 0).unwrap();
        write_points(&mut w, &g1, Encoding::Raw).unwrap();
        w.finish().unwrap();

        // flip the low byte of point 2's y coordinate, moving it off the curve
        let mut bytes = buf.into_inner();
        bytes[32 + 8 + 2 * 96 + 95] ^= 1;

        for policy in [DecodePolicy::Checked, DecodePolicy::Unchecked] {
            let mut cur = Cursor::new(bytes.clone());
            let mut r =
                SegmentReader::open(&mut cur, "pk.K.t.save", SegmentKind::ProvingKeyK).unwrap();
            match read_points::<G1Affine, _>(&mut r, Encoding::Raw, policy) {
                Err(CodecError::Malformed { segment, reason, .. }) => {
                    assert_eq!(segment, "pk.K.t.save");
                    assert!(reason.contains("point 2"), "{reason}");
                }
                other => panic!("expected malformed payload, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_point_outside_subgroup() {
        // on the curve at the first x where x^3 + 4 is square; not in G1
        let four = Fp::from(4u64);
        let (x, y) = (1u64..)
            .find_map(|x| {
                let x = Fp::from(x);
                Option::<Fp>::from((x.square() * x + four).sqrt()).map(|y| (x, y))
            })
            .unwrap();
        let mut torsion = [0u8; 96];
        torsion[..48].copy_from_slice(&x.to_bytes_be());
        torsion[48..].copy_from_slice(&y.to_bytes_be());
        let (g1, _) = random_points(2);
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u64.to_le_bytes());
        for p in &g1[..2] {
            payload.extend_from_slice(p.to_uncompressed().as_ref());
        }
        payload.extend_from_slice(&torsion);

        let mut buf = Cursor::new(Vec::new());
        let mut w =
            SegmentWriter::begin(&mut buf, "pk.A.t.save", SegmentKind::ProvingKeyA, 1, 0).unwrap();
        w.write_bytes(&payload).unwrap();
        w.finish().unwrap();
        let bytes = buf.into_inner();

        let mut cur = Cursor::new(bytes.clone());
        let mut r = SegmentReader::open(&mut cur, "pk.A.t.save", SegmentKind::ProvingKeyA).unwrap();
        match read_points::<G1Affine, _>(&mut r, Encoding::Raw, DecodePolicy::Checked) {
            Err(CodecError::Subgroup { segment, index }) => {
                assert_eq!(segment, "pk.A.t.save");
                assert_eq!(index, 2);
            }
            other => panic!("expected subgroup fault, got {other:?}"),
        }

        let mut cur = Cursor::new(bytes);
        let mut r = SegmentReader::open(&mut cur, "pk.A.t.save", SegmentKind::ProvingKeyA).unwrap();
        let points =
            read_points::<G1Affine, _>(&mut r, Encoding::Raw, DecodePolicy::Unchecked).unwrap();
        assert_eq!(points.len(), 3);
        assert!(!bool::from(points[2].is_identity()));
    }
}
