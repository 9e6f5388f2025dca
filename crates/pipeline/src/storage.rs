//! On-disk sample files.
//!
//! Spill files and state files share one layout: a headerless run of
//! native-endian 8-byte doubles, so the sample count is `len / 8`.

use byteorder::{ByteOrder, NativeEndian, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::BufferError;

pub const SAMPLE_WIDTH: usize = 8;

pub fn encode(values: &[f64]) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(values.len() * SAMPLE_WIDTH);
    for &v in values {
        bytes.write_f64::<NativeEndian>(v)?;
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f64>, BufferError> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(BufferError::CorruptState {
            len: bytes.len() as u64,
        });
    }
    let mut values = vec![0.0; bytes.len() / SAMPLE_WIDTH];
    NativeEndian::read_f64_into(bytes, &mut values);
    Ok(values)
}

/// The private file backing a hybrid buffer while it is open.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    file: File,
}

impl SpillFile {
    /// Creates (or truncates) the file at `path` and writes `values` to it.
    pub fn create(path: &Path, values: &[f64]) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut spill = Self {
            path: path.to_path_buf(),
            file,
        };
        spill.append(values)?;
        Ok(spill)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, values: &[f64]) -> io::Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.file.write_all(&encode(values)?)
    }

    /// Discards the file contents and writes `values` in their place.
    pub fn rewrite(&mut self, values: &[f64]) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.append(values)
    }

    /// Flushes, closes and deletes the file.
    pub fn remove(mut self) -> io::Result<()> {
        self.file.flush()?;
        let path = self.path.clone();
        drop(self);
        fs::remove_file(path)
    }
}

/// Writes `values` to `path` through a sibling temporary file, so a reader
/// never sees a half-written state file.
pub fn write_state(path: &Path, values: &[f64]) -> Result<(), BufferError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    let result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(&encode(values)?)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    Ok(result?)
}

pub fn read_state(path: &Path) -> Result<Vec<f64>, BufferError> {
    decode(&fs::read(path)?)
}
