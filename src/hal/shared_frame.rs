//! Named shared-memory frame region.
//!
//! Layout: `rows * cols` little-endian `f64` samples, row-major, nothing
//! else. Producer and consumer agree on name and dimensions at setup; there
//! is no header, so a size disagreement is caught when the region is opened.
//!
//! One producer overwrites whole frames; readers only ever copy out. The
//! producer is responsible for never exposing a half-written frame.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use memmap2::MmapMut;

use super::FrameSource;
use crate::core::{Frame, Result, RigError};

const SAMPLE_BYTES: usize = 8;

/// Backing file for a region name: tmpfs when the host has one.
pub fn region_path(name: &str) -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.join(name)
    } else {
        std::env::temp_dir().join(name)
    }
}

pub struct SharedFrameRegion {
    name: String,
    path: PathBuf,
    rows: usize,
    cols: usize,
    mmap: Option<MmapMut>,
    owner: bool,
}

impl SharedFrameRegion {
    /// Create and zero a new region. Fails if one with this name already exists.
    pub fn create(name: &str, rows: usize, cols: usize) -> Result<Self> {
        let len = Self::byte_len(name, rows, cols)?;
        let path = region_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => RigError::resource(name, "region already exists"),
                _ => RigError::resource(name, e),
            })?;
        file.set_len(len as u64)
            .map_err(|e| RigError::resource(name, e))?;

        let mut region = Self::map(name, path, rows, cols, &file, true)?;
        if let Some(mmap) = region.mmap.as_mut() {
            mmap.fill(0);
        }
        debug!("created shared region {} ({}x{})", name, rows, cols);
        Ok(region)
    }

    /// Attach to a region some other party created.
    pub fn open(name: &str, rows: usize, cols: usize) -> Result<Self> {
        let len = Self::byte_len(name, rows, cols)?;
        let path = region_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => RigError::resource(name, "region does not exist"),
                _ => RigError::resource(name, e),
            })?;
        let actual = file
            .metadata()
            .map_err(|e| RigError::resource(name, e))?
            .len() as usize;
        if actual != len {
            let samples = actual / SAMPLE_BYTES;
            return Err(RigError::DimensionMismatch {
                expected: (rows, cols),
                found: (samples / cols, cols),
            });
        }
        Self::map(name, path, rows, cols, &file, false)
    }

    fn byte_len(name: &str, rows: usize, cols: usize) -> Result<usize> {
        if rows == 0 || cols == 0 {
            return Err(RigError::InvalidConfig(format!(
                "region {} must have non-zero dimensions",
                name
            )));
        }
        Ok(rows * cols * SAMPLE_BYTES)
    }

    fn map(
        name: &str,
        path: PathBuf,
        rows: usize,
        cols: usize,
        file: &File,
        owner: bool,
    ) -> Result<Self> {
        // Safety: the file is only resized by its creator, before mapping.
        let mmap = unsafe { MmapMut::map_mut(file) }.map_err(|e| RigError::resource(name, e))?;
        Ok(Self {
            name: name.to_string(),
            path,
            rows,
            cols,
            mmap: Some(mmap),
            owner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    fn mapped(&self) -> Result<&MmapMut> {
        self.mmap
            .as_ref()
            .ok_or_else(|| RigError::resource(&self.name, "region is closed"))
    }

    fn mapped_mut(&mut self) -> Result<&mut MmapMut> {
        let name = self.name.clone();
        self.mmap
            .as_mut()
            .ok_or_else(|| RigError::resource(name, "region is closed"))
    }

    /// Copy the current contents out.
    pub fn read_frame(&self) -> Result<Frame> {
        let data = self
            .mapped()?
            .chunks_exact(SAMPLE_BYTES)
            .map(|chunk| {
                let mut buf = [0u8; SAMPLE_BYTES];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();
        Ok(Frame {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    pub fn read_slot(&self, index: usize) -> Result<f64> {
        let start = index * SAMPLE_BYTES;
        let mmap = self.mapped()?;
        let bytes = mmap
            .get(start..start + SAMPLE_BYTES)
            .ok_or_else(|| RigError::InvalidConfig(format!("slot {} out of range", index)))?;
        let mut buf = [0u8; SAMPLE_BYTES];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    /// Overwrite the whole region with `frame`, sample by sample.
    ///
    /// Not atomic: a reader copying out at the same moment can get a torn
    /// frame, part old and part new. Publishing whole frames is up to the
    /// producer. A frame of the wrong size is rejected before anything is
    /// written.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.dims() != (self.rows, self.cols) {
            return Err(RigError::DimensionMismatch {
                expected: (self.rows, self.cols),
                found: frame.dims(),
            });
        }
        let mmap = self.mapped_mut()?;
        for (bytes, v) in mmap.chunks_exact_mut(SAMPLE_BYTES).zip(&frame.data) {
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    pub fn write_slot(&mut self, index: usize, value: f64) -> Result<()> {
        let start = index * SAMPLE_BYTES;
        let mmap = self.mapped_mut()?;
        let bytes = mmap
            .get_mut(start..start + SAMPLE_BYTES)
            .ok_or_else(|| RigError::InvalidConfig(format!("slot {} out of range", index)))?;
        bytes.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Unmap; the owning side also unlinks the backing file.
    pub fn close(&mut self) -> Result<()> {
        if self.mmap.take().is_none() {
            return Ok(());
        }
        if self.owner {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!("unlinked shared region {}", self.name),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(RigError::resource(&self.name, e)),
            }
        }
        Ok(())
    }
}

impl Drop for SharedFrameRegion {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to release shared region {}: {}", self.name, e);
        }
    }
}

/// Frame source backed by a region an external producer writes into.
pub struct SharedFrameReader {
    region: SharedFrameRegion,
}

impl SharedFrameReader {
    pub fn open(name: &str, rows: usize, cols: usize) -> Result<Self> {
        Ok(Self {
            region: SharedFrameRegion::open(name, rows, cols)?,
        })
    }

    pub fn read_slot(&self, index: usize) -> Result<f64> {
        self.region.read_slot(index)
    }
}

impl FrameSource for SharedFrameReader {
    fn get_current_frame(&mut self) -> Result<Frame> {
        self.region.read_frame()
    }

    fn close(&mut self) -> Result<()> {
        self.region.close()
    }
}

/// Producer side of a region.
pub struct SharedFrameWriter {
    region: SharedFrameRegion,
}

impl SharedFrameWriter {
    /// Create (and own) a fresh region.
    pub fn create(name: &str, rows: usize, cols: usize) -> Result<Self> {
        Ok(Self {
            region: SharedFrameRegion::create(name, rows, cols)?,
        })
    }

    pub fn region(&self) -> &SharedFrameRegion {
        &self.region
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.region.write_frame(frame)
    }

    pub fn write_slot(&mut self, index: usize, value: f64) -> Result<()> {
        self.region.write_slot(index, value)
    }

    pub fn close(&mut self) -> Result<()> {
        self.region.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("bmi-rig-test-{}-{}", name, std::process::id())
    }

    #[test]
    fn test_reader_sees_writer_frames() {
        let name = unique("roundtrip");
        let mut writer = SharedFrameWriter::create(&name, 2, 3).unwrap();
        let mut reader = SharedFrameReader::open(&name, 2, 3).unwrap();

        assert_eq!(reader.get_current_frame().unwrap(), Frame::zeros(2, 3));

        let frame = Frame::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        writer.write_frame(&frame).unwrap();
        assert_eq!(reader.get_current_frame().unwrap(), frame);
    }

    #[test]
    fn test_read_is_a_copy() {
        let name = unique("copy");
        let mut writer = SharedFrameWriter::create(&name, 1, 2).unwrap();
        let mut reader = SharedFrameReader::open(&name, 1, 2).unwrap();

        writer.write_frame(&Frame::filled(1, 2, 1.0)).unwrap();
        let snapshot = reader.get_current_frame().unwrap();
        writer.write_frame(&Frame::filled(1, 2, 9.0)).unwrap();
        assert_eq!(snapshot, Frame::filled(1, 2, 1.0));
    }

    #[test]
    fn test_wrong_size_write_leaves_frame_alone() {
        let name = unique("wrong-size");
        let mut writer = SharedFrameWriter::create(&name, 2, 2).unwrap();
        let mut reader = SharedFrameReader::open(&name, 2, 2).unwrap();

        writer.write_frame(&Frame::filled(2, 2, 4.0)).unwrap();
        assert!(matches!(
            writer.write_frame(&Frame::filled(1, 4, 8.0)),
            Err(RigError::DimensionMismatch { .. })
        ));
        assert_eq!(reader.get_current_frame().unwrap(), Frame::filled(2, 2, 4.0));
    }

    #[test]
    fn test_duplicate_create_fails() {
        let name = unique("duplicate");
        let _first = SharedFrameWriter::create(&name, 1, 1).unwrap();
        assert!(matches!(
            SharedFrameWriter::create(&name, 1, 1),
            Err(RigError::Resource { .. })
        ));
    }

    #[test]
    fn test_open_missing_and_mismatched() {
        let name = unique("mismatch");
        assert!(matches!(
            SharedFrameReader::open(&name, 1, 1),
            Err(RigError::Resource { .. })
        ));
        let _writer = SharedFrameWriter::create(&name, 4, 4).unwrap();
        assert!(matches!(
            SharedFrameReader::open(&name, 2, 4),
            Err(RigError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_only_owner_unlinks() {
        let name = unique("unlink");
        let mut writer = SharedFrameWriter::create(&name, 1, 1).unwrap();
        let mut reader = SharedFrameReader::open(&name, 1, 1).unwrap();

        reader.close().unwrap();
        reader.close().unwrap();
        assert!(region_path(&name).exists());
        assert!(reader.get_current_frame().is_err());

        writer.close().unwrap();
        assert!(!region_path(&name).exists());
    }

    #[test]
    fn test_slots() {
        let name = unique("slots");
        let mut writer = SharedFrameWriter::create(&name, 1, 4).unwrap();
        let reader = SharedFrameReader::open(&name, 1, 4).unwrap();
        writer.write_slot(2, 42.5).unwrap();
        assert_eq!(reader.read_slot(2).unwrap(), 42.5);
        assert!(reader.read_slot(4).is_err());
    }
}
