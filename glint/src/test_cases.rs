//! Persisted (settings, camera) pairs, used to get back to interesting
//! views quickly.
//!
//! The file is a flat array of fixed-size [`TestCase`] records, without any
//! header.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use log::info;
use thiserror::Error;

use crate::{CameraState, Settings, SettingsError, SettingsRecord};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TestCase {
    pub settings: SettingsRecord,
    pub camera: CameraState,
}

impl TestCase {
    pub const SIZE: usize = mem::size_of::<Self>();

    pub fn new(settings: Settings, camera: CameraState) -> Self {
        Self {
            settings: settings.into(),
            camera,
        }
    }

    pub fn settings(&self) -> Result<Settings, SettingsError> {
        Settings::try_from(self.settings)
    }
}

#[derive(Debug, Error)]
pub enum TestCaseError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("file size ({size} bytes) is not a multiple of the record size")]
    Corrupted { size: u64 },

    #[error("test case #{index} doesn't exist (there are {len} of them)")]
    OutOfBounds { index: usize, len: usize },

    #[error("invalid settings")]
    Settings(#[from] SettingsError),
}

#[derive(Debug)]
pub struct TestCases {
    path: PathBuf,
    file: File,
    len: usize,
}

impl TestCases {
    /// Opens given file, creating it if it doesn't exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TestCaseError> {
        let path = path.as_ref().to_owned();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let size = file.metadata()?.len();

        if size % TestCase::SIZE as u64 != 0 {
            return Err(TestCaseError::Corrupted { size });
        }

        let len = (size / TestCase::SIZE as u64) as usize;

        info!("Loaded test cases from `{}`; len={len}", path.display());

        Ok(Self { path, file, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn load(&mut self, index: usize) -> Result<TestCase, TestCaseError> {
        self.check(index)?;

        let mut buf = [0; TestCase::SIZE];

        self.file.seek(SeekFrom::Start(Self::offset(index)))?;
        self.file.read_exact(&mut buf)?;

        let case: TestCase = bytemuck::pod_read_unaligned(&buf);

        // Make sure the record is actually usable before handing it out
        case.settings()?;

        Ok(case)
    }

    /// Appends a test case; returns its index.
    pub fn append(&mut self, case: &TestCase) -> Result<usize, TestCaseError> {
        let index = self.len;

        self.write_at(index, case)?;
        self.len += 1;

        Ok(index)
    }

    pub fn replace(
        &mut self,
        index: usize,
        case: &TestCase,
    ) -> Result<(), TestCaseError> {
        self.check(index)?;
        self.write_at(index, case)
    }

    /// Removes a test case, shifting all the following ones back.
    pub fn delete(&mut self, index: usize) -> Result<(), TestCaseError> {
        self.check(index)?;

        let mut tail = Vec::new();

        self.file.seek(SeekFrom::Start(Self::offset(index + 1)))?;
        self.file.read_to_end(&mut tail)?;
        self.file.seek(SeekFrom::Start(Self::offset(index)))?;
        self.file.write_all(&tail)?;
        self.file.set_len(Self::offset(self.len - 1))?;
        self.file.flush()?;
        self.len -= 1;

        Ok(())
    }

    fn write_at(
        &mut self,
        index: usize,
        case: &TestCase,
    ) -> Result<(), TestCaseError> {
        self.file.seek(SeekFrom::Start(Self::offset(index)))?;
        self.file.write_all(bytemuck::bytes_of(case))?;
        self.file.flush()?;

        Ok(())
    }

    fn check(&self, index: usize) -> Result<(), TestCaseError> {
        if index < self.len {
            Ok(())
        } else {
            Err(TestCaseError::OutOfBounds {
                index,
                len: self.len,
            })
        }
    }

    fn offset(index: usize) -> u64 {
        (index * TestCase::SIZE) as u64
    }
}
