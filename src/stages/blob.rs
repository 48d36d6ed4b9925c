//! Binary sub-format for fitted model weights.
//!
//! Every blob is little-endian: a 4-byte magic naming the model kind, a
//! `u16` format version, then the kind's explicit fields. Blobs travel
//! inside pipeline files as base64 strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::core::{Result, RigError};

pub const BLOB_VERSION: u16 = 1;

pub struct BlobWriter {
    bytes: Vec<u8>,
}

impl BlobWriter {
    pub fn new(magic: &[u8; 4]) -> Self {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(magic);
        bytes.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        Self { bytes }
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64s(mut self, values: &[i64]) -> Self {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f64s(mut self, values: &[f64]) -> Self {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn into_base64(self) -> String {
        STANDARD.encode(self.bytes)
    }
}

pub struct BlobReader<'a> {
    stage: &'static str,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    /// Check the magic and version, leaving the reader at the first field.
    pub fn open(stage: &'static str, magic: &[u8; 4], bytes: &'a [u8]) -> Result<Self> {
        let mut reader = Self {
            stage,
            bytes,
            offset: 0,
        };
        let found = reader.take(4)?;
        if found != magic {
            return Err(RigError::invalid_params(stage, "model blob has the wrong magic"));
        }
        let raw = reader.take(2)?;
        let version = u16::from_le_bytes([raw[0], raw[1]]);
        if version != BLOB_VERSION {
            return Err(RigError::invalid_params(
                stage,
                format!("unsupported model blob version {}", version),
            ));
        }
        Ok(reader)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(RigError::invalid_params(self.stage, "model blob is truncated"));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take8(&mut self) -> Result<[u8; 8]> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(buf)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn i64s(&mut self, count: usize) -> Result<Vec<i64>> {
        (0..count).map(|_| self.take8().map(i64::from_le_bytes)).collect()
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.take8().map(f64::from_le_bytes)
    }

    pub fn f64s(&mut self, count: usize) -> Result<Vec<f64>> {
        (0..count).map(|_| self.f64()).collect()
    }

    /// Fail if anything is left over.
    pub fn finish(self) -> Result<()> {
        if self.offset != self.bytes.len() {
            return Err(RigError::invalid_params(
                self.stage,
                format!("{} trailing bytes in model blob", self.bytes.len() - self.offset),
            ));
        }
        Ok(())
    }
}

pub fn decode_base64(stage: &'static str, text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| RigError::invalid_params(stage, e))
}

/// Raw `f64` samples as base64, used for reference images.
pub fn samples_to_base64(samples: &[f64]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 8);
    for v in samples {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

pub fn samples_from_base64(stage: &'static str, text: &str) -> Result<Vec<f64>> {
    let bytes = decode_base64(stage, text)?;
    if bytes.len() % 8 != 0 {
        return Err(RigError::invalid_params(stage, "sample data is not a whole number of f64s"));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect())
}
