//! Turning a flash dump into a set of artifacts
//!
//! Extraction happens in two steps: [extract] decodes the dump and builds
//! every artifact in memory, then [Extraction::write] stores them. A failure
//! to decode one partition never prevents the others from being extracted;
//! only a damaged partition table aborts the whole run.

use std::{borrow::Cow, collections::HashMap, path::PathBuf};

use log::{debug, info, warn};
use strum::IntoEnumIterator;

use crate::{
    classify::{classify_with_data, Role},
    elf::SynthesizedElf,
    error::{CorruptTable, DumpWarning, ImageWarning},
    flash_image::FlashImage,
    image_format::{AppImage, ESP_MAGIC},
    output::OutputWriter,
    partition_table::{Partition, PartitionTable, PARTITION_TABLE_OFFSET},
    targets::Chip,
    Error,
};

/// Where to look for the second stage bootloader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootloaderLocation {
    /// Try the boot addresses of all supported chips
    #[default]
    Auto,
    /// Expect the bootloader at the given flash offset
    At(u32),
    /// Do not extract the bootloader
    Skip,
}

/// Settings for an extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub partition_table_offset: u32,
    pub bootloader: BootloaderLocation,
    /// Chip to assume for every image, regardless of what its header says
    pub chip: Option<Chip>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            partition_table_offset: PARTITION_TABLE_OFFSET,
            bootloader: BootloaderLocation::Auto,
            chip: None,
        }
    }
}

/// Result of extracting a single region of the dump
#[derive(Debug)]
pub enum Outcome {
    /// Everything was recovered without problems
    Recovered,
    /// An artifact was produced, but the region was damaged
    PartiallyRecovered(Vec<ImageWarning>),
    /// No artifact could be produced
    Failed(Error),
}

impl Outcome {
    fn from_warnings(warnings: Vec<ImageWarning>) -> Self {
        if warnings.is_empty() {
            Outcome::Recovered
        } else {
            Outcome::PartiallyRecovered(warnings)
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// File contents produced for a region of the dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact<'a> {
    pub file_name: String,
    pub data: Cow<'a, [u8]>,
    /// Where the artifact was written, once it has been
    pub path: Option<PathBuf>,
}

/// Region of the dump an [Entry] was extracted from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Bootloader { offset: u32 },
    Partition { partition: Partition, role: Role },
}

impl Source {
    pub fn label(&self) -> &str {
        match self {
            Source::Bootloader { .. } => "bootloader",
            Source::Partition { partition, .. } => partition.label(),
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            Source::Bootloader { offset } => *offset,
            Source::Partition { partition, .. } => partition.offset(),
        }
    }

    /// Short description of what the region holds
    pub fn kind(&self) -> String {
        match self {
            Source::Bootloader { .. } => String::from("bootloader"),
            Source::Partition { role, .. } => role.to_string(),
        }
    }
}

/// One extracted region of the dump
#[derive(Debug)]
pub struct Entry<'a> {
    pub source: Source,
    pub outcome: Outcome,
    /// Chip the ELF file was built for, for application images only
    pub chip: Option<Chip>,
    pub artifact: Option<Artifact<'a>>,
}

/// Everything extracted from one flash dump
#[derive(Debug)]
pub struct Extraction<'a> {
    pub table: PartitionTable,
    pub entries: Vec<Entry<'a>>,
    pub warnings: Vec<DumpWarning>,
}

impl<'a> Extraction<'a> {
    /// Number of ELF files produced
    pub fn elf_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.chip.is_some() && entry.artifact.is_some())
            .count()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact<'a>> {
        self.entries.iter().filter_map(|entry| entry.artifact.as_ref())
    }

    /// Entries for which no artifact could be produced
    pub fn failures(&self) -> impl Iterator<Item = &Entry<'a>> {
        self.entries.iter().filter(|entry| entry.outcome.is_failed())
    }

    /// Write every artifact using `writer`, stopping at the first failure
    pub fn write(&mut self, writer: &OutputWriter) -> Result<(), Error> {
        for artifact in self.entries.iter_mut().filter_map(|e| e.artifact.as_mut()) {
            let path = writer.write(&artifact.file_name, &artifact.data)?;
            artifact.path = Some(path);
        }

        Ok(())
    }
}

/// Decode `flash` and build the artifacts for the bootloader and every
/// partition. Nothing is written to disk; file names are taken from
/// `writer`.
pub fn extract<'a>(
    flash: &'a FlashImage,
    options: &ExtractOptions,
    writer: &OutputWriter,
) -> Result<Extraction<'a>, Error> {
    let table = PartitionTable::parse(flash, options.partition_table_offset)?;
    info!(
        "Found {} partitions at {:#x}{}",
        table.len(),
        options.partition_table_offset,
        if table.md5_verified() {
            ", MD5 verified"
        } else {
            ""
        }
    );

    let mut entries = Vec::with_capacity(table.len() + 1);
    let mut warnings = Vec::new();

    match extract_bootloader(flash, options, writer) {
        Some(entry) => entries.push(entry),
        None if options.bootloader == BootloaderLocation::Auto => {
            warn!("{}", DumpWarning::NoBootloader);
            warnings.push(DumpWarning::NoBootloader);
        }
        None => {}
    }

    for partition in table.partitions() {
        entries.push(extract_partition(flash, partition, options, writer)?);
    }
    disambiguate_file_names(&mut entries, writer);

    if table.is_empty() {
        warnings.push(DumpWarning::EmptyTable);
    } else if !entries.iter().any(|entry| {
        matches!(&entry.source, Source::Partition { role, .. } if role.is_app())
    }) {
        warn!("{}", DumpWarning::NoApplications);
        warnings.push(DumpWarning::NoApplications);
    }

    Ok(Extraction {
        table,
        entries,
        warnings,
    })
}

/// Partitions sharing a label and role would overwrite each other; name them
/// after their offsets instead
fn disambiguate_file_names(entries: &mut [Entry<'_>], writer: &OutputWriter) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for artifact in entries.iter().filter_map(|entry| entry.artifact.as_ref()) {
        *counts.entry(artifact.file_name.clone()).or_default() += 1;
    }

    for entry in entries.iter_mut() {
        let (Source::Partition { partition, role }, Some(artifact)) =
            (&entry.source, entry.artifact.as_mut())
        else {
            continue;
        };

        if counts.get(&artifact.file_name).is_some_and(|&count| count > 1) {
            let file_name = writer.unique_partition_file_name(partition, *role);
            warn!(
                "Partition '{}' at {:#x} shares its name with another partition, writing {}",
                partition.label(),
                partition.offset(),
                file_name
            );
            artifact.file_name = file_name;
        }
    }
}

fn extract_bootloader<'a>(
    flash: &'a FlashImage,
    options: &ExtractOptions,
    writer: &OutputWriter,
) -> Option<Entry<'a>> {
    let table_offset = options.partition_table_offset;

    let offset = match options.bootloader {
        BootloaderLocation::Skip => return None,
        BootloaderLocation::At(offset) => offset,
        BootloaderLocation::Auto => find_bootloader(flash, options.chip, table_offset)?,
    };
    debug!("Extracting bootloader at {offset:#x}");

    // The bootloader is bounded by the partition table
    let data = flash
        .get(offset as usize..table_offset as usize)
        .unwrap_or_default();

    let source = Source::Bootloader { offset };
    Some(convert_image(data, source, options.chip, writer.bootloader_file_name()))
}

/// First boot address holding an image header, trying the given chip's
/// address before the others
fn find_bootloader(flash: &FlashImage, chip: Option<Chip>, table_offset: u32) -> Option<u32> {
    let mut candidates: Vec<u32> = chip.iter().map(Chip::boot_address).collect();
    for address in Chip::iter().map(|chip| chip.boot_address()) {
        if !candidates.contains(&address) {
            candidates.push(address);
        }
    }

    candidates.into_iter().find(|&address| {
        address < table_offset && flash.data().get(address as usize) == Some(&ESP_MAGIC)
    })
}

fn extract_partition<'a>(
    flash: &'a FlashImage,
    partition: &Partition,
    options: &ExtractOptions,
    writer: &OutputWriter,
) -> Result<Entry<'a>, Error> {
    let data = flash
        .get(partition.range())
        .ok_or_else(|| CorruptTable::OutOfBounds {
            label: partition.label().to_string(),
            offset: partition.offset(),
            end: partition.end(),
            flash_size: flash.len(),
        })?;

    let role = classify_with_data(partition, data);
    debug!(
        "Partition '{}' at {:#x}: {}",
        partition.label(),
        partition.offset(),
        role
    );

    let file_name = writer.partition_file_name(partition, role);
    let source = Source::Partition {
        partition: partition.clone(),
        role,
    };

    if !role.is_app() {
        return Ok(Entry {
            source,
            outcome: Outcome::Recovered,
            chip: None,
            artifact: Some(Artifact {
                file_name,
                data: Cow::Borrowed(data),
                path: None,
            }),
        });
    }

    if partition.is_encrypted() {
        warn!(
            "Partition '{}' is encrypted, its image cannot be decoded",
            partition.label()
        );
    }

    Ok(convert_image(data, source, options.chip, file_name))
}

/// Decode the application image in `data` and convert it to an ELF file
fn convert_image<'a>(
    data: &'a [u8],
    source: Source,
    chip: Option<Chip>,
    file_name: String,
) -> Entry<'a> {
    let parsed = match AppImage::parse(data) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!("Skipping '{}': {error}", source.label());
            return Entry {
                source,
                outcome: Outcome::Failed(error.into()),
                chip: None,
                artifact: None,
            };
        }
    };

    let mut warnings = parsed.warnings;
    let chip = match (chip, parsed.image.chip()) {
        (Some(chip), _) | (None, Some(chip)) => chip,
        (None, None) => {
            let fallback = Chip::default();
            let warning = ImageWarning::UnknownChip(parsed.image.metadata.chip_id, fallback);
            warn!("{warning}");
            warnings.push(warning);
            fallback
        }
    };

    let elf = SynthesizedElf::new(parsed.image, chip);
    debug!(
        "'{}': {} segments for {chip}, {} omitted",
        source.label(),
        elf.segments().len(),
        elf.omitted_segments()
    );

    Entry {
        source,
        outcome: Outcome::from_warnings(warnings),
        chip: Some(chip),
        artifact: Some(Artifact {
            file_name,
            data: Cow::Owned(elf.to_bytes()),
            path: None,
        }),
    }
}
