use std::fmt;
use std::io::{Read, Seek, Write};

use pairing::Engine;
use rollzk_cs::codec::{SegmentKind, SegmentReader, SegmentWriter};
use rollzk_cs::store::{self, SegmentStore};
use rollzk_cs::CodecError;

use super::points::{header_encoding, read_point, write_point, DecodePolicy, Encoding};

#[derive(Clone)]
pub struct Proof<E: Engine> {
    pub a: E::G1Affine,
    pub b: E::G2Affine,
    pub c: E::G1Affine,
}

impl<E: Engine> PartialEq for Proof<E> {
    fn eq(&self, other: &Self) -> bool {
        self.a == other.a && self.b == other.b && self.c == other.c
    }
}

impl<E: Engine> fmt::Debug for Proof<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proof")
            .field("a", &self.a)
            .field("b", &self.b)
            .field("c", &self.c)
            .finish()
    }
}

impl<E: Engine> Proof<E> {
    pub fn write<W: Write + Seek>(
        &self,
        sink: &mut W,
        segment: &str,
        encoding: Encoding,
    ) -> Result<u64, CodecError> {
        let mut w = SegmentWriter::begin(sink, segment, SegmentKind::Proof, encoding.flag(), 3)?;
        write_point(&mut w, &self.a, encoding)?;
        write_point(&mut w, &self.b, encoding)?;
        write_point(&mut w, &self.c, encoding)?;
        w.finish()
    }

    pub fn read<R: Read>(
        source: &mut R,
        segment: &str,
        policy: DecodePolicy,
    ) -> Result<Self, CodecError> {
        let mut r = SegmentReader::open(source, segment, SegmentKind::Proof)?;
        let encoding = header_encoding(&r)?;
        let proof = Proof {
            a: read_point(&mut r, encoding, policy)?,
            b: read_point(&mut r, encoding, policy)?,
            c: read_point(&mut r, encoding, policy)?,
        };
        r.finish()?;
        Ok(proof)
    }
}

pub fn save_proof<E: Engine>(
    store: &SegmentStore,
    session: &str,
    proof: &Proof<E>,
    encoding: Encoding,
) -> Result<(), CodecError> {
    let name = store::proof_segment(session);
    store.publish(&name, |w| proof.write(w, &name, encoding))?;
    Ok(())
}

pub fn load_proof<E: Engine>(
    store: &SegmentStore,
    session: &str,
    policy: DecodePolicy,
) -> Result<Proof<E>, CodecError> {
    let name = store::proof_segment(session);
    store.read(&name, |r| Proof::read(r, &name, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::{Bls12, G1Affine, G2Affine, Scalar as Fr};
    use group::prime::PrimeCurveAffine;
    use std::io::Cursor;

    #[test]
    fn test_proof_roundtrip() {
        let proof = Proof::<Bls12> {
            a: (G1Affine::generator() * Fr::from(3u64)).into(),
            b: (G2Affine::generator() * Fr::from(5u64)).into(),
            c: (G1Affine::generator() * Fr::from(7u64)).into(),
        };
        let sizes = [
            (Encoding::Compressed, 32 + 48 + 96 + 48),
            (Encoding::Raw, 32 + 96 + 192 + 96),
        ];
        for (encoding, size) in sizes {
            let mut buf = Cursor::new(Vec::new());
            assert_eq!(proof.write(&mut buf, "proof.t.save", encoding).unwrap(), size as u64);
            buf.set_position(0);
            let back = Proof::<Bls12>::read(&mut buf, "proof.t.save", DecodePolicy::Checked);
            assert_eq!(back.unwrap(), proof);
        }
    }
}
