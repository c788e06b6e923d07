//! Library and application errors

use std::{io, path::PathBuf};

use miette::Diagnostic;
use strum::VariantNames;
use thiserror::Error;

use crate::targets::Chip;

/// All possible errors returned by espdump
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to open file: {0}")]
    #[diagnostic(code(espdump::file_open))]
    FileOpenError(String, #[source] io::Error),

    #[error("Failed to write file: {0}")]
    #[diagnostic(code(espdump::file_write))]
    FileWriteError(String, #[source] io::Error),

    #[error("Output file {} already exists", .0.display())]
    #[diagnostic(
        code(espdump::output_exists),
        help("Remove the existing file or pass `--force` to overwrite it")
    )]
    OutputExists(PathBuf),

    #[error("Flash dump of {size:#x} bytes is too small, expected at least {minimum:#x} bytes")]
    #[diagnostic(
        code(espdump::too_small),
        help("A flash dump must at least contain the partition table sector")
    )]
    TooSmall { size: usize, minimum: usize },

    #[error("Corrupt partition table")]
    #[diagnostic(transparent)]
    CorruptTable(#[from] CorruptTable),

    #[error("Partition does not contain an application image")]
    #[diagnostic(transparent)]
    NotAnAppImage(#[from] NotAnAppImage),

    #[error("Unknown chip id {0:#x} in image header")]
    #[diagnostic(
        code(espdump::unknown_chip),
        help("Supported chips are: {}. Use `--chip` to select one", Chip::VARIANTS.join(", "))
    )]
    UnknownChip(u16),

    #[error("Invalid configuration file {0}")]
    #[diagnostic(code(espdump::invalid_config))]
    InvalidConfig(String, #[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Partition table errors; all of these abort the extraction
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum CorruptTable {
    #[error("Partition table at {offset:#x} lies outside of the flash dump")]
    #[diagnostic(code(espdump::corrupt_table::out_of_range))]
    OutOfRange { offset: u32 },

    #[error("Unrecognized partition table record at {offset:#x}: {magic:02x?}")]
    #[diagnostic(
        code(espdump::corrupt_table::bad_magic),
        help("Entries must start with `aa 50`, the table must end with an MD5 record or `ff` padding")
    )]
    BadMagic { offset: u32, magic: [u8; 2] },

    #[error("Partition table entry at {offset:#x} could not be decoded")]
    #[diagnostic(code(espdump::corrupt_table::malformed_entry))]
    MalformedEntry {
        offset: u32,
        #[source]
        source: binread::Error,
    },

    #[error("MD5 digest mismatch: table contains {expected:02x?}, computed {computed:02x?}")]
    #[diagnostic(
        code(espdump::corrupt_table::digest_mismatch),
        help("The partition table sector has been damaged, no partition can be trusted")
    )]
    DigestMismatch { expected: Vec<u8>, computed: Vec<u8> },

    #[error(
        "Partition '{label}' ({offset:#x}..{end:#x}) does not fit in a flash dump of {flash_size:#x} bytes"
    )]
    #[diagnostic(code(espdump::corrupt_table::out_of_bounds))]
    OutOfBounds {
        label: String,
        offset: u32,
        end: u64,
        flash_size: usize,
    },

    #[error("Partitions '{0}' and '{1}' overlap")]
    #[diagnostic(code(espdump::corrupt_table::overlap))]
    Overlap(String, String),
}

/// An application partition that does not start with a valid image header
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum NotAnAppImage {
    #[error("Invalid image magic {0:#04x}, expected 0xe9")]
    #[diagnostic(
        code(espdump::not_an_app_image::magic),
        help("Erased flash reads as 0xff, the partition is probably an unused OTA slot")
    )]
    InvalidMagic(u8),

    #[error("Image of {0} bytes is too short to hold an image header")]
    #[diagnostic(code(espdump::not_an_app_image::too_short))]
    TooShort(usize),
}

/// Recoverable problems found while decoding an application image
///
/// None of these prevent an ELF file from being written; they are reported
/// with the partition that produced them.
#[derive(Clone, Debug, Diagnostic, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ImageWarning {
    #[error("Image truncated at offset {offset:#x}: kept {recovered} of {declared} segments")]
    #[diagnostic(code(espdump::truncated_image))]
    TruncatedImage {
        offset: usize,
        recovered: usize,
        declared: usize,
    },

    #[error("Image checksum mismatch: stored {stored:#04x}, computed {computed:#04x}")]
    #[diagnostic(code(espdump::checksum_mismatch))]
    ChecksumMismatch { stored: u8, computed: u8 },

    #[error("Image checksum is missing")]
    #[diagnostic(code(espdump::checksum_missing))]
    ChecksumMissing,

    #[error("Image SHA-256 digest mismatch")]
    #[diagnostic(code(espdump::digest_mismatch))]
    DigestMismatch,

    #[error("Image header announces a SHA-256 digest, but none is present")]
    #[diagnostic(code(espdump::digest_missing))]
    DigestMissing,

    #[error("Unknown chip id {0:#x}, assuming {1}")]
    #[diagnostic(code(espdump::unknown_chip))]
    UnknownChip(u16, Chip),
}

impl ImageWarning {
    /// Whether this warning means segments were abandoned
    pub fn is_truncation(&self) -> bool {
        matches!(self, ImageWarning::TruncatedImage { .. })
    }
}

/// Problems with the dump as a whole which do not stop the extraction
#[derive(Clone, Debug, Diagnostic, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DumpWarning {
    #[error("Partition table contains no partitions")]
    #[diagnostic(
        code(espdump::empty_table),
        help("The dump may have been read from the wrong offset, see `--partition-table-offset`")
    )]
    EmptyTable,

    #[error("Partition table contains no application partitions")]
    #[diagnostic(
        code(espdump::no_applications),
        help("Only the bootloader, if one was found, has been converted to ELF")
    )]
    NoApplications,

    #[error("No bootloader image found at any of the usual offsets")]
    #[diagnostic(
        code(espdump::no_bootloader),
        help("Use `--bootloader-offset` if the bootloader lives elsewhere")
    )]
    NoBootloader,
}
