//! Convert raw ESP32 flash dumps into ELF images and partition files
//!
//! A dump read back from an ESP32 family chip contains the second stage
//! bootloader, a partition table, and the partitions it describes. This crate
//! decodes the partition table and turns every application image into a
//! minimal ELF file which disassemblers and debuggers can load. Data
//! partitions are copied verbatim, under names which identify their role to
//! the NVS decoding tools downstream.
//!
//! ## As an application
//!
//! [espdump] can be installed using `cargo install`:
//!
//! ```bash
//! $ cargo install espdump
//! ```
//!
//! ## As a library
//!
//! espdump can be used as a library in other applications:
//!
//! ```toml
//! espdump = { version = "0.1", default-features = false }
//! ```
//!
//! We add `default-features` here to disable the `cli` feature, which is
//! enabled by default; its dependencies are only needed by the binary.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use espdump::{extract, ExtractOptions, FlashImage, OutputWriter};
//!
//! # fn main() -> Result<(), espdump::Error> {
//! let input = Path::new("flash.bin");
//! let flash = FlashImage::read(input)?;
//! let writer = OutputWriter::for_input(input, None);
//!
//! let mut extraction = extract(&flash, &ExtractOptions::default(), &writer)?;
//! extraction.write(&writer)?;
//! # Ok(())
//! # }
//! ```
//!
//! [espdump]: https://crates.io/crates/espdump

pub use self::{
    error::Error,
    extract::{extract, ExtractOptions},
    flash_image::FlashImage,
    output::OutputWriter,
    partition_table::PartitionTable,
    targets::Chip,
};

#[cfg(feature = "cli")]
pub mod cli;

pub mod classify;
pub mod elf;
pub mod error;
pub mod extract;
pub mod flash_image;
pub mod image_format;
pub mod output;
pub mod partition_table;
pub mod targets;

#[cfg(feature = "cli")]
pub mod logging;
