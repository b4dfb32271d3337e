//! Directory of named segment files.
//!
//! Segments are published atomically: data goes to `<name>.tmp`, is synced,
//! then renamed over `<name>`. A failed writer removes its temporary file, so
//! an aborted compression, setup or proof never leaves a readable artifact.
//! Artifacts made of several segments go through a [`SegmentBatch`].

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::error::CodecError;

/// Default buffered reader/writer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 << 20;

pub const CS: &str = "cs.save";
pub const CS_COEFFS: &str = "cs.ct.save";
pub const WITNESS_FULL: &str = "witness_full.save";
pub const WITNESS_PUBLIC: &str = "witness_pub.save";

/// `pk.<part>.<session>.save`
pub fn pk_segment(part: &str, session: &str) -> String {
    format!("pk.{part}.{session}.save")
}

pub fn vk_segment(session: &str) -> String {
    format!("vk.{session}.save")
}

pub fn proof_segment(session: &str) -> String {
    format!("proof.{session}.save")
}

fn io_err(segment: &str, e: io::Error) -> CodecError {
    CodecError::Io {
        segment: segment.to_string(),
        offset: 0,
        source: e,
    }
}

#[derive(Clone, Debug)]
pub struct SegmentStore {
    dir: PathBuf,
    buffer_capacity: usize,
}

impl SegmentStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, CodecError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        })
    }

    pub fn with_buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes.max(4096);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    pub fn size(&self, name: &str) -> Result<u64, CodecError> {
        fs::metadata(self.path(name))
            .map(|m| m.len())
            .map_err(|e| io_err(name, e))
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.tmp"))
    }

    /// Write `<name>.tmp` through `f` and sync it. The temporary file is
    /// removed on any failure.
    fn write_tmp<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut BufWriter<File>) -> Result<T, CodecError>,
    ) -> Result<(T, u64), CodecError> {
        let tmp = self.tmp_path(name);
        let file = File::create(&tmp).map_err(|e| io_err(name, e))?;
        let mut writer = BufWriter::with_capacity(self.buffer_capacity, file);

        let result = f(&mut writer).and_then(|value| {
            let file = writer.into_inner().map_err(|e| io_err(name, e.into_error()))?;
            file.sync_all().map_err(|e| io_err(name, e))?;
            let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
            Ok((value, bytes))
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
            debug!(segment = name, "segment write failed, temporary file removed");
        }
        result
    }

    /// Write segment `name` through `f` and publish it only if `f` succeeds.
    pub fn publish<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut BufWriter<File>) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let start = Instant::now();
        let (value, bytes) = self.write_tmp(name, f)?;
        let tmp = self.tmp_path(name);
        if let Err(e) = fs::rename(&tmp, self.path(name)) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(name, e));
        }

        info!(
            segment = name,
            bytes,
            write_ms = start.elapsed().as_millis() as u64,
            "segment published"
        );
        Ok(value)
    }

    /// Start a group of segments that become visible together.
    pub fn batch(&self) -> SegmentBatch<'_> {
        SegmentBatch {
            store: self,
            staged: Vec::new(),
            bytes: 0,
            start: Instant::now(),
        }
    }

    /// Buffered reader over segment `name`.
    pub fn open(&self, name: &str) -> Result<BufReader<File>, CodecError> {
        let file = File::open(self.path(name)).map_err(|e| io_err(name, e))?;
        Ok(BufReader::with_capacity(self.buffer_capacity, file))
    }

    /// Open segment `name` and decode it with `f`, logging size and time.
    pub fn read<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut BufReader<File>) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let start = Instant::now();
        let mut reader = self.open(name)?;
        let value = f(&mut reader)?;
        info!(
            segment = name,
            bytes = self.size(name).unwrap_or(0),
            read_ms = start.elapsed().as_millis() as u64,
            "segment loaded"
        );
        Ok(value)
    }

    pub fn remove(&self, name: &str) -> Result<(), CodecError> {
        fs::remove_file(self.path(name)).map_err(|e| io_err(name, e))
    }
}

/// Segments staged under temporary names and published by [`commit`].
///
/// Dropping an uncommitted batch removes everything it staged. A commit that
/// fails part way removes every segment of the batch, including older copies
/// that were not yet replaced, so no mix of old and new segments survives.
///
/// [`commit`]: SegmentBatch::commit
pub struct SegmentBatch<'a> {
    store: &'a SegmentStore,
    staged: Vec<String>,
    bytes: u64,
    start: Instant,
}

impl SegmentBatch<'_> {
    /// Write segment `name` through `f` without publishing it.
    pub fn stage<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut BufWriter<File>) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let (value, bytes) = self.store.write_tmp(name, f)?;
        self.staged.push(name.to_string());
        self.bytes += bytes;
        Ok(value)
    }

    pub fn staged(&self) -> &[String] {
        &self.staged
    }

    /// Rename every staged segment into place.
    pub fn commit(mut self) -> Result<(), CodecError> {
        let staged = std::mem::take(&mut self.staged);
        for name in &staged {
            if let Err(e) = fs::rename(self.store.tmp_path(name), self.store.path(name)) {
                for other in &staged {
                    let _ = fs::remove_file(self.store.tmp_path(other));
                    let _ = fs::remove_file(self.store.path(other));
                }
                debug!(
                    segment = %name,
                    segments = staged.len(),
                    "batch commit failed, segments removed"
                );
                return Err(io_err(name, e));
            }
        }
        info!(
            segments = staged.len(),
            bytes = self.bytes,
            write_ms = self.start.elapsed().as_millis() as u64,
            "segment batch published"
        );
        Ok(())
    }
}

impl Drop for SegmentBatch<'_> {
    fn drop(&mut self) {
        for name in &self.staged {
            let _ = fs::remove_file(self.store.tmp_path(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SegmentKind, SegmentReader, SegmentWriter};
    use std::io::Write;

    #[test]
    fn test_publish_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();

        store
            .publish("vk.s1.save", |w| {
                let mut seg =
                    SegmentWriter::begin(w, "vk.s1.save", SegmentKind::VerifyingKey, 0, 1)?;
                seg.write_u64(42)?;
                seg.finish()
            })
            .unwrap();
        assert!(store.exists("vk.s1.save"));
        assert!(!store.exists("vk.s1.save.tmp"));

        let v = store
            .read("vk.s1.save", |r| {
                let mut seg = SegmentReader::open(r, "vk.s1.save", SegmentKind::VerifyingKey)?;
                let v = seg.read_u64()?;
                seg.finish()?;
                Ok(v)
            })
            .unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();

        let res: Result<(), _> = store.publish("pk.A.s1.save", |w| {
            w.write_all(b"partial").map_err(|e| io_err("pk.A.s1.save", e))?;
            Err(CodecError::Malformed {
                segment: "pk.A.s1.save".into(),
                offset: 7,
                reason: "interrupted".into(),
            })
        });
        assert!(res.is_err());
        assert!(!store.exists("pk.A.s1.save"));
        assert!(!store.exists("pk.A.s1.save.tmp"));
    }

    fn stage_u64(batch: &mut SegmentBatch<'_>, name: &str, v: u64) {
        batch
            .stage(name, |w| {
                let mut seg = SegmentWriter::begin(w, name, SegmentKind::Witness, 0, 1)?;
                seg.write_u64(v)?;
                seg.finish()
            })
            .unwrap();
    }

    #[test]
    fn test_batch_is_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();

        let mut batch = store.batch();
        stage_u64(&mut batch, "a.save", 1);
        stage_u64(&mut batch, "b.save", 2);
        assert!(!store.exists("a.save"));
        assert!(store.path("b.save.tmp").is_file());
        batch.commit().unwrap();
        assert!(store.exists("a.save") && store.exists("b.save"));
        assert!(!store.path("a.save.tmp").exists());

        let mut dropped = store.batch();
        stage_u64(&mut dropped, "c.save", 3);
        drop(dropped);
        assert!(!store.exists("c.save"));
        assert!(!store.path("c.save.tmp").exists());
    }

    #[test]
    fn test_failed_commit_removes_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();
        let mut old = store.batch();
        stage_u64(&mut old, "a.save", 1);
        stage_u64(&mut old, "c.save", 1);
        old.commit().unwrap();

        // a directory in the way of `b.save` makes its rename fail
        fs::create_dir(store.path("b.save")).unwrap();
        fs::write(store.path("b.save").join("x"), b"x").unwrap();

        let mut batch = store.batch();
        for name in ["a.save", "b.save", "c.save"] {
            stage_u64(&mut batch, name, 2);
        }
        let err = batch.commit().unwrap_err();
        assert_eq!(err.segment(), "b.save");
        assert!(!store.exists("a.save"));
        assert!(!store.exists("c.save"));
        for name in ["a.save", "b.save", "c.save"] {
            assert!(!store.path(&format!("{name}.tmp")).exists());
        }
    }

    #[test]
    fn test_missing_segment_names_itself() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();
        let err = store.open("pk.Z.s1.save").err().unwrap();
        assert_eq!(err.segment(), "pk.Z.s1.save");
    }

    #[test]
    fn test_segment_names() {
        assert_eq!(pk_segment("B2", "demo"), "pk.B2.demo.save");
        assert_eq!(vk_segment("demo"), "vk.demo.save");
        assert_eq!(proof_segment("demo"), "proof.demo.save");
    }
}
