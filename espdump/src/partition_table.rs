//! Binary ESP-IDF partition tables
//!
//! The partition table lives in its own flash sector, at `0x8000` unless the
//! firmware was built with a different `CONFIG_PARTITION_TABLE_OFFSET`. It is
//! a sequence of 32-byte records: partition entries, an optional MD5 digest of
//! the preceding entries, and `0xff` padding marking the end of the table.
//!
//! For more information on the partition table format see:
//! <https://docs.espressif.com/projects/esp-idf/en/latest/esp32/api-guides/partition-tables.html>

use std::{
    fmt::{Display, Formatter},
    io::Cursor,
    ops::Range,
};

use binread::{BinRead, BinReaderExt};
use bitflags::bitflags;
use log::{debug, warn};
use md5::{Digest, Md5};
use strum::{Display as StrumDisplay, FromRepr};

use crate::{error::CorruptTable, flash_image::FlashImage};

/// Default location of the partition table
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;
/// Size of the flash sector reserved for the partition table
pub const PARTITION_TABLE_SIZE: usize = 0x1000;

const MAX_PARTITION_LENGTH: usize = 0xC00;
const PARTITION_SIZE: usize = 32;
const MAGIC_BYTES: &[u8] = &[0xAA, 0x50];
const MD5_PART_MAGIC_BYTES: &[u8] = &[
    0xEB, 0xEB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];
const END_MARKER: [u8; 32] = [0xFF; 32];

/// Partition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    App,
    Data,
    /// User defined types (`0x40..=0xfe`) and anything unassigned
    Custom(u8),
}

impl Type {
    pub fn as_u8(&self) -> u8 {
        match self {
            Type::App => 0x00,
            Type::Data => 0x01,
            Type::Custom(ty) => *ty,
        }
    }
}

impl From<u8> for Type {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => Type::App,
            0x01 => Type::Data,
            ty => Type::Custom(ty),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::App => write!(f, "app"),
            Type::Data => write!(f, "data"),
            Type::Custom(ty) => write!(f, "{ty:#04x}"),
        }
    }
}

/// Sub-types of `app` partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppType {
    Factory,
    /// OTA slot `0..=15`
    Ota(u8),
    Test,
}

impl AppType {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(AppType::Factory),
            0x10..=0x1f => Some(AppType::Ota(raw - 0x10)),
            0x20 => Some(AppType::Test),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AppType::Factory => 0x00,
            AppType::Ota(slot) => 0x10 + slot,
            AppType::Test => 0x20,
        }
    }
}

impl Display for AppType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppType::Factory => write!(f, "factory"),
            AppType::Ota(slot) => write!(f, "ota_{slot}"),
            AppType::Test => write!(f, "test"),
        }
    }
}

/// Sub-types of `data` partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, StrumDisplay)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Ota = 0x00,
    Phy = 0x01,
    Nvs = 0x02,
    CoreDump = 0x03,
    #[strum(serialize = "nvs_keys")]
    NvsKeys = 0x04,
    EFuse = 0x05,
    Undefined = 0x06,
    EspHttpd = 0x80,
    Fat = 0x81,
    Spiffs = 0x82,
    LittleFs = 0x83,
}

/// Partition sub-type, interpreted according to the partition's [Type]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubType {
    App(AppType),
    Data(DataType),
    Custom(u8),
}

impl SubType {
    pub fn new(ty: Type, raw: u8) -> Self {
        let known = match ty {
            Type::App => AppType::from_u8(raw).map(SubType::App),
            Type::Data => DataType::from_repr(raw).map(SubType::Data),
            Type::Custom(_) => None,
        };

        known.unwrap_or(SubType::Custom(raw))
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SubType::App(ty) => ty.as_u8(),
            SubType::Data(ty) => *ty as u8,
            SubType::Custom(ty) => *ty,
        }
    }
}

impl Display for SubType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SubType::App(ty) => write!(f, "{ty}"),
            SubType::Data(ty) => write!(f, "{ty}"),
            SubType::Custom(ty) => write!(f, "{ty:#04x}"),
        }
    }
}

bitflags! {
    /// Partition flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const ENCRYPTED = 0x1;
        const READONLY = 0x2;
    }
}

#[derive(Debug, BinRead)]
#[br(little, magic = b"\xAA\x50")]
struct RawPartition {
    ty: u8,
    sub_type: u8,
    offset: u32,
    size: u32,
    #[br(map = |s: [u8; 16]| label_from_bytes(&s))]
    label: String,
    flags: u32,
}

fn label_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// A single entry of the partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    label: String,
    ty: Type,
    sub_type: SubType,
    offset: u32,
    size: u32,
    flags: Flags,
}

impl RawPartition {
    fn into_partition(self) -> Partition {
        let ty = Type::from(self.ty);

        Partition {
            label: self.label,
            ty,
            sub_type: SubType::new(ty, self.sub_type),
            offset: self.offset,
            size: self.size,
            flags: Flags::from_bits_retain(self.flags),
        }
    }
}

impl Partition {
    pub fn new(
        label: impl Into<String>,
        ty: Type,
        sub_type: SubType,
        offset: u32,
        size: u32,
        flags: Flags,
    ) -> Self {
        Partition {
            label: label.into(),
            ty,
            sub_type,
            offset,
            size,
            flags,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn sub_type(&self) -> SubType {
        self.sub_type
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(Flags::ENCRYPTED)
    }

    /// First byte past the end of the partition
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    /// Byte range of the partition within the flash dump
    pub fn range(&self) -> Range<usize> {
        self.offset as usize..self.end() as usize
    }

    pub fn overlaps(&self, other: &Partition) -> bool {
        (self.offset as u64) < other.end() && (other.offset as u64) < self.end()
    }

    /// Encode the partition as a 32-byte table record
    pub fn to_bytes(&self) -> [u8; PARTITION_SIZE] {
        let mut record = [0u8; PARTITION_SIZE];
        record[0..2].copy_from_slice(MAGIC_BYTES);
        record[2] = self.ty.as_u8();
        record[3] = self.sub_type.as_u8();
        record[4..8].copy_from_slice(&self.offset.to_le_bytes());
        record[8..12].copy_from_slice(&self.size.to_le_bytes());
        for (dest, source) in record[12..28].iter_mut().zip(self.label.bytes()) {
            *dest = source;
        }
        record[28..32].copy_from_slice(&self.flags.bits().to_le_bytes());

        record
    }
}

/// A decoded partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
    md5_verified: bool,
}

impl PartitionTable {
    /// Locate and decode the partition table at `offset` in the flash dump.
    ///
    /// Every partition must lie within the dump and no two partitions may
    /// overlap; a table that breaks either rule cannot be trusted at all.
    pub fn parse(flash: &FlashImage, offset: u32) -> Result<Self, CorruptTable> {
        let start = offset as usize;
        let data = flash
            .get(start..start + MAX_PARTITION_LENGTH)
            .ok_or(CorruptTable::OutOfRange { offset })?;

        let table = Self::try_from_bytes(data, offset)?;
        table.validate(flash.len())?;

        if table.partitions.is_empty() {
            warn!("Partition table at {offset:#x} contains no partitions");
        }

        Ok(table)
    }

    /// Decode the records of a partition table.
    ///
    /// `base` is the flash address of `data`, used for error reporting only.
    pub fn try_from_bytes(data: &[u8], base: u32) -> Result<Self, CorruptTable> {
        let mut md5 = Md5::new();
        let mut partitions = Vec::new();
        let mut md5_verified = false;

        let records = data
            .chunks_exact(PARTITION_SIZE)
            .take(MAX_PARTITION_LENGTH / PARTITION_SIZE);

        for (index, record) in records.enumerate() {
            let offset = base + (index * PARTITION_SIZE) as u32;

            if record.starts_with(MAGIC_BYTES) {
                let mut reader = Cursor::new(record);
                let raw: RawPartition = reader
                    .read_le()
                    .map_err(|source| CorruptTable::MalformedEntry { offset, source })?;
                let partition = raw.into_partition();
                debug!(
                    "Partition '{}' ({}, {}) at {:#x}, {:#x} bytes",
                    partition.label,
                    partition.ty,
                    partition.sub_type,
                    partition.offset,
                    partition.size
                );

                partitions.push(partition);
                md5.update(record);
            } else if record.starts_with(MD5_PART_MAGIC_BYTES) {
                // The first 16 bytes are just the marker. The next 16 bytes is the actual md5
                // digest.
                let digest_in_table = &record[16..32];
                let digest_computed = md5.clone().finalize();
                if digest_computed.as_slice() != digest_in_table {
                    return Err(CorruptTable::DigestMismatch {
                        expected: digest_in_table.to_vec(),
                        computed: digest_computed.to_vec(),
                    });
                }
                md5_verified = true;
            } else if record == END_MARKER {
                break;
            } else {
                return Err(CorruptTable::BadMagic {
                    offset,
                    magic: [record[0], record[1]],
                });
            }
        }

        Ok(Self {
            partitions,
            md5_verified,
        })
    }

    fn validate(&self, flash_size: usize) -> Result<(), CorruptTable> {
        for partition in &self.partitions {
            if partition.end() > flash_size as u64 {
                return Err(CorruptTable::OutOfBounds {
                    label: partition.label.clone(),
                    offset: partition.offset,
                    end: partition.end(),
                    flash_size,
                });
            }
        }

        for (index, first) in self.partitions.iter().enumerate() {
            for second in &self.partitions[index + 1..] {
                if first.overlaps(second) {
                    return Err(CorruptTable::Overlap(
                        first.label.clone(),
                        second.label.clone(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Whether the table carried an MD5 digest record (which then matched)
    pub fn md5_verified(&self) -> bool {
        self.md5_verified
    }

    pub fn find(&self, label: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.label == label)
    }

    pub fn find_by_type(&self, ty: Type) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.ty == ty)
    }

    /// Encode partitions into the binary table format, including the MD5
    /// record and end-of-table padding.
    pub fn to_bytes(partitions: &[Partition]) -> Vec<u8> {
        let mut result = Vec::with_capacity(MAX_PARTITION_LENGTH);
        let mut md5 = Md5::new();

        for partition in partitions {
            let record = partition.to_bytes();
            md5.update(record);
            result.extend_from_slice(&record);
        }

        result.extend_from_slice(MD5_PART_MAGIC_BYTES);
        result.extend_from_slice(&md5.finalize());
        result.resize(MAX_PARTITION_LENGTH, 0xFF);

        result
    }
}
