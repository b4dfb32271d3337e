//! Segment framing and raw binary primitives.
//!
//! Every persisted artifact is a self-delimiting segment:
//!
//! ```text
//!   0..4    magic        b"RZK\x01"
//!   4..8    version      u32 LE
//!   8..12   kind         u32 LE (SegmentKind tag)
//!   12..16  flags        u32 LE (point encoding for key segments, variant for witnesses)
//!   16..24  count        u64 LE (element count of the main payload array)
//!   24..32  payload_len  u64 LE (bytes following the header)
//! ```
//!
//! Integers are little-endian. Vectors are a `u64` element count followed by
//! the elements. Readers track their byte offset so every fault names the
//! segment and where in it decoding stopped, and refuse element counts that
//! would run past the declared payload.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use bitvec::prelude::*;
use ff::PrimeField;

use crate::coeff::CoeffId;
use crate::csr::Term;
use crate::error::CodecError;

pub const MAGIC: [u8; 4] = *b"RZK\x01";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: u64 = 32;

/// What a segment holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SegmentKind {
    ConstraintSystem = 1,
    CoeffTable = 2,
    Witness = 3,
    ProvingKeyE = 16,
    ProvingKeyA = 17,
    ProvingKeyB1 = 18,
    ProvingKeyB2 = 19,
    ProvingKeyZ = 20,
    ProvingKeyK = 21,
    VerifyingKey = 32,
    Proof = 33,
}

impl SegmentKind {
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        use SegmentKind::*;
        Some(match tag {
            1 => ConstraintSystem,
            2 => CoeffTable,
            3 => Witness,
            16 => ProvingKeyE,
            17 => ProvingKeyA,
            18 => ProvingKeyB1,
            19 => ProvingKeyB2,
            20 => ProvingKeyZ,
            21 => ProvingKeyK,
            32 => VerifyingKey,
            33 => Proof,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use SegmentKind::*;
        match self {
            ConstraintSystem => "constraint-system",
            CoeffTable => "coefficient-table",
            Witness => "witness",
            ProvingKeyE => "pk.E",
            ProvingKeyA => "pk.A",
            ProvingKeyB1 => "pk.B1",
            ProvingKeyB2 => "pk.B2",
            ProvingKeyZ => "pk.Z",
            ProvingKeyK => "pk.K",
            VerifyingKey => "vk",
            Proof => "proof",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded segment header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub kind: SegmentKind,
    pub flags: u32,
    pub count: u64,
    pub payload_len: u64,
}

impl SegmentHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.kind.tag().to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Parse and validate a header. `expected` of `None` accepts any kind.
    pub fn parse(
        buf: &[u8; HEADER_SIZE as usize],
        segment: &str,
        expected: Option<SegmentKind>,
    ) -> Result<Self, CodecError> {
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let dword = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != MAGIC {
            return Err(CodecError::BadMagic {
                segment: segment.to_string(),
                found: magic,
            });
        }
        let version = word(4);
        if version != FORMAT_VERSION {
            return Err(CodecError::Version {
                segment: segment.to_string(),
                expected: FORMAT_VERSION,
                found: version,
            });
        }
        let tag = word(8);
        let kind = match (SegmentKind::from_tag(tag), expected) {
            (Some(k), Some(e)) if k == e => k,
            (Some(k), None) => k,
            (_, Some(e)) => {
                return Err(CodecError::KindMismatch {
                    segment: segment.to_string(),
                    expected: e,
                    found: tag,
                })
            }
            (None, None) => {
                return Err(CodecError::Malformed {
                    segment: segment.to_string(),
                    offset: 8,
                    reason: format!("unknown segment kind tag {tag}"),
                })
            }
        };
        Ok(Self {
            kind,
            flags: word(12),
            count: dword(16),
            payload_len: dword(24),
        })
    }
}

// ─── Counting wrappers ──────────────────────────────────────────────────────

/// `Write` adapter counting bytes written.
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `Read` adapter counting bytes read.
pub struct CountingReader<R> {
    inner: R,
    read: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, read: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

// ─── Segment writer ─────────────────────────────────────────────────────────

/// Bytes staged per `write_all` when encoding integer arrays.
const STAGE_BYTES: usize = 64 * 1024;

/// Streams one segment into a seekable sink. The header is written as a
/// placeholder and patched with the payload length in [`SegmentWriter::finish`].
pub struct SegmentWriter<'a, W: Write + Seek> {
    out: CountingWriter<&'a mut W>,
    segment: String,
    start: u64,
    kind: SegmentKind,
    flags: u32,
    count: u64,
}

impl<'a, W: Write + Seek> SegmentWriter<'a, W> {
    pub fn begin(
        sink: &'a mut W,
        segment: &str,
        kind: SegmentKind,
        flags: u32,
        count: u64,
    ) -> Result<Self, CodecError> {
        let start = sink.stream_position().map_err(|e| CodecError::Io {
            segment: segment.to_string(),
            offset: 0,
            source: e,
        })?;
        let mut w = Self {
            out: CountingWriter::new(sink),
            segment: segment.to_string(),
            start,
            kind,
            flags,
            count,
        };
        w.write_bytes(&[0u8; HEADER_SIZE as usize])?;
        Ok(w)
    }

    fn io(&self, e: io::Error) -> CodecError {
        CodecError::Io {
            segment: self.segment.clone(),
            offset: self.out.written(),
            source: e,
        }
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Override the element-count hint recorded in the header.
    pub fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.out.write_all(bytes).map_err(|e| self.io(e))
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.write_bytes(&[v])
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_u32(s.len() as u32)?;
        self.write_bytes(s.as_bytes())
    }

    fn write_staged<T: Copy, const N: usize>(
        &mut self,
        items: &[T],
        encode: impl Fn(T) -> [u8; N],
    ) -> Result<(), CodecError> {
        self.write_u64(items.len() as u64)?;
        let mut stage = Vec::with_capacity(STAGE_BYTES);
        for chunk in items.chunks((STAGE_BYTES / N).max(1)) {
            stage.clear();
            for &item in chunk {
                stage.extend_from_slice(&encode(item));
            }
            self.write_bytes(&stage)?;
        }
        Ok(())
    }

    pub fn write_vec_u32(&mut self, v: &[u32]) -> Result<(), CodecError> {
        self.write_staged(v, u32::to_le_bytes)
    }

    pub fn write_vec_u64(&mut self, v: &[u64]) -> Result<(), CodecError> {
        self.write_staged(v, u64::to_le_bytes)
    }

    /// Terms as interleaved `(wire u32, coeff u32)` pairs.
    pub fn write_terms(&mut self, terms: &[Term]) -> Result<(), CodecError> {
        self.write_staged(terms, |t| {
            let mut b = [0u8; 8];
            b[..4].copy_from_slice(&t.wire.to_le_bytes());
            b[4..].copy_from_slice(&t.coeff.0.to_le_bytes());
            b
        })
    }

    /// Bitmap as bit length followed by its raw `u64` words.
    pub fn write_bits(&mut self, bits: &BitSlice<u64, Lsb0>) -> Result<(), CodecError> {
        self.write_u64(bits.len() as u64)?;
        let mut words = bits.to_bitvec();
        words.set_uninitialized(false);
        self.write_vec_u64(words.as_raw_slice())
    }

    /// Field elements in canonical representation.
    pub fn write_scalars<F: PrimeField>(&mut self, values: &[F]) -> Result<(), CodecError> {
        self.write_u64(values.len() as u64)?;
        for v in values {
            self.write_bytes(v.to_repr().as_ref())?;
        }
        Ok(())
    }

    /// Patch the header and leave the sink positioned after the segment.
    /// Returns the total segment size in bytes.
    pub fn finish(self) -> Result<u64, CodecError> {
        let total = self.out.written();
        let header = SegmentHeader {
            kind: self.kind,
            flags: self.flags,
            count: self.count,
            payload_len: total - HEADER_SIZE,
        };
        let segment = self.segment;
        let sink = self.out.into_inner();
        let io = |e| CodecError::Io {
            segment: segment.clone(),
            offset: 0,
            source: e,
        };
        sink.seek(SeekFrom::Start(self.start)).map_err(io)?;
        sink.write_all(&header.to_bytes()).map_err(io)?;
        sink.seek(SeekFrom::Start(self.start + total)).map_err(io)?;
        Ok(total)
    }
}

// ─── Segment reader ─────────────────────────────────────────────────────────

/// Reads one segment, enforcing its declared payload length.
pub struct SegmentReader<'a, R: Read> {
    inp: CountingReader<&'a mut R>,
    segment: String,
    header: SegmentHeader,
}

impl<'a, R: Read> SegmentReader<'a, R> {
    pub fn open(source: &'a mut R, segment: &str, kind: SegmentKind) -> Result<Self, CodecError> {
        let mut inp = CountingReader::new(source);
        let header = read_header(&mut inp, segment, Some(kind))?;
        Ok(Self {
            inp,
            segment: segment.to_string(),
            header,
        })
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Byte offset from the start of the segment.
    pub fn offset(&self) -> u64 {
        self.inp.offset()
    }

    pub fn remaining(&self) -> u64 {
        (HEADER_SIZE + self.header.payload_len).saturating_sub(self.inp.offset())
    }

    pub fn malformed(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Malformed {
            segment: self.segment.clone(),
            offset: self.inp.offset(),
            reason: reason.into(),
        }
    }

    pub fn invalid(&self, source: crate::error::CsError) -> CodecError {
        CodecError::Invalid {
            segment: self.segment.clone(),
            source,
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        if buf.len() as u64 > self.remaining() {
            return Err(self.malformed(format!(
                "needs {} bytes, {} left in payload",
                buf.len(),
                self.remaining()
            )));
        }
        let offset = self.inp.offset();
        self.inp.read_exact(buf).map_err(|e| CodecError::Io {
            segment: self.segment.clone(),
            offset,
            source: e,
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| self.malformed("string is not UTF-8"))
    }

    /// Read an element count and check that `count * elem_size` bytes remain.
    pub fn read_len(&mut self, elem_size: usize) -> Result<usize, CodecError> {
        let count = self.read_u64()?;
        match count.checked_mul(elem_size as u64) {
            Some(bytes) if bytes <= self.remaining() => Ok(count as usize),
            _ => Err(self.malformed(format!(
                "declared {count} elements of {elem_size} bytes, {} bytes left",
                self.remaining()
            ))),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_staged<T, const N: usize>(
        &mut self,
        decode: impl Fn([u8; N]) -> T,
    ) -> Result<Vec<T>, CodecError> {
        let len = self.read_len(N)?;
        let mut out = Vec::with_capacity(len);
        let mut stage = vec![0u8; STAGE_BYTES - STAGE_BYTES % N];
        let mut left = len;
        while left > 0 {
            let take = left.min(stage.len() / N);
            let buf = &mut stage[..take * N];
            self.read_exact(buf)?;
            for chunk in buf.chunks_exact(N) {
                let mut item = [0u8; N];
                item.copy_from_slice(chunk);
                out.push(decode(item));
            }
            left -= take;
        }
        Ok(out)
    }

    pub fn read_vec_u32(&mut self) -> Result<Vec<u32>, CodecError> {
        self.read_staged(u32::from_le_bytes)
    }

    pub fn read_vec_u64(&mut self) -> Result<Vec<u64>, CodecError> {
        self.read_staged(u64::from_le_bytes)
    }

    pub fn read_terms(&mut self) -> Result<Vec<Term>, CodecError> {
        self.read_staged(|b: [u8; 8]| Term {
            wire: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            coeff: CoeffId(u32::from_le_bytes([b[4], b[5], b[6], b[7]])),
        })
    }

    pub fn read_bits(&mut self) -> Result<BitVec<u64, Lsb0>, CodecError> {
        let bit_len = self.read_u64()?;
        let words = self.read_vec_u64()?;
        if (words.len() as u64) * 64 < bit_len || (words.len() as u64) > bit_len.div_ceil(64) {
            return Err(self.malformed(format!(
                "{} words cannot hold a {bit_len}-bit bitmap",
                words.len()
            )));
        }
        let mut bits = BitVec::from_vec(words);
        bits.truncate(bit_len as usize);
        Ok(bits)
    }

    pub fn read_scalars<F: PrimeField>(&mut self) -> Result<Vec<F>, CodecError> {
        let size = F::Repr::default().as_ref().len();
        let len = self.read_len(size)?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let mut repr = F::Repr::default();
            self.read_exact(repr.as_mut())?;
            let v = Option::<F>::from(F::from_repr(repr))
                .ok_or_else(|| self.malformed(format!("scalar {i} is not canonical")))?;
            out.push(v);
        }
        Ok(out)
    }

    /// Check that the payload was consumed exactly.
    pub fn finish(self) -> Result<SegmentHeader, CodecError> {
        if self.remaining() != 0 {
            return Err(self.malformed(format!("{} trailing payload bytes", self.remaining())));
        }
        Ok(self.header)
    }
}

fn read_header<R: Read>(
    r: &mut R,
    segment: &str,
    expected: Option<SegmentKind>,
) -> Result<SegmentHeader, CodecError> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    r.read_exact(&mut buf).map_err(|e| CodecError::Io {
        segment: segment.to_string(),
        offset: 0,
        source: e,
    })?;
    SegmentHeader::parse(&buf, segment, expected)
}

/// Read the next segment's header and skip its payload.
pub fn skip_segment<R: Read>(r: &mut R, segment: &str) -> Result<SegmentHeader, CodecError> {
    let header = read_header(r, segment, None)?;
    let skipped = io::copy(&mut r.take(header.payload_len), &mut io::sink()).map_err(|e| {
        CodecError::Io {
            segment: segment.to_string(),
            offset: HEADER_SIZE,
            source: e,
        }
    })?;
    if skipped != header.payload_len {
        return Err(CodecError::Malformed {
            segment: segment.to_string(),
            offset: HEADER_SIZE + skipped,
            reason: format!("payload truncated ({skipped} of {} bytes)", header.payload_len),
        });
    }
    Ok(header)
}
