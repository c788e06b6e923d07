//! Raw flash dumps

use std::{fs, ops::Range, path::Path};

use log::debug;

use crate::{
    partition_table::{PARTITION_TABLE_OFFSET, PARTITION_TABLE_SIZE},
    Error,
};

/// The contents of a flash chip, as read by a programmer or `esptool
/// read_flash`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    data: Vec<u8>,
}

impl FlashImage {
    /// Smallest dump which still holds the partition table at its default
    /// location
    pub const MIN_SIZE: usize = PARTITION_TABLE_OFFSET as usize + PARTITION_TABLE_SIZE;

    /// Read a dump from disk, requiring it to cover the default partition
    /// table location.
    pub fn read(path: &Path) -> Result<Self, Error> {
        Self::read_with_minimum(path, Self::MIN_SIZE)
    }

    /// Read a dump from disk, requiring it to be at least `minimum` bytes
    pub fn read_with_minimum(path: &Path, minimum: usize) -> Result<Self, Error> {
        let data =
            fs::read(path).map_err(|e| Error::FileOpenError(path.display().to_string(), e))?;
        debug!("Read {:#x} bytes from {}", data.len(), path.display());

        Self::from_bytes(data, minimum)
    }

    /// Wrap an in-memory dump
    pub fn from_bytes(data: Vec<u8>, minimum: usize) -> Result<Self, Error> {
        if data.len() < minimum {
            return Err(Error::TooSmall {
                size: data.len(),
                minimum,
            });
        }

        Ok(Self { data })
    }

    /// Address of the first byte of the dump
    pub fn base_address(&self) -> u32 {
        0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of `range`, or `None` if any part of it lies outside the dump
    pub fn get(&self, range: Range<usize>) -> Option<&[u8]> {
        self.data.get(range)
    }

    /// Bytes from `offset` to the end of the dump
    pub fn tail(&self, offset: usize) -> Option<&[u8]> {
        self.data.get(offset..)
    }
}
