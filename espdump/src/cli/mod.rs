//! Command-line interface
//!
//! No stability guaranties apply

use std::{num::ParseIntError, path::PathBuf};

use clap::Parser;
use comfy_table::{modifiers, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use log::info;
use miette::Result;

use self::config::Config;
use crate::{
    extract::{extract, BootloaderLocation, Entry, ExtractOptions, Extraction, Outcome},
    flash_image::FlashImage,
    output::OutputWriter,
    partition_table::{PARTITION_TABLE_OFFSET, PARTITION_TABLE_SIZE},
    targets::Chip,
};

pub mod config;

/// Convert an ESP32 flash dump into ELF images and raw partition files
#[derive(Debug, Parser)]
#[command(about, version)]
pub struct Cli {
    /// Raw flash dump, as read with `esptool.py read_flash`
    pub input: PathBuf,
    /// Directory to write the extracted files to [default: next to the input]
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Flash offset of the bootloader [default: detected]
    #[arg(long, value_parser = parse_u32)]
    pub bootloader_offset: Option<u32>,
    /// Do not convert the bootloader
    #[arg(long, conflicts_with = "bootloader_offset")]
    pub no_bootloader: bool,
    /// Flash offset of the partition table [default: 0x8000]
    #[arg(long, value_parser = parse_u32)]
    pub partition_table_offset: Option<u32>,
    /// Chip to build ELF files for, instead of the one named in each image
    #[arg(long, value_enum)]
    pub chip: Option<Chip>,
    /// Overwrite existing output files
    #[arg(short, long)]
    pub force: bool,
    /// Show what would be extracted without writing any files
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_u32(input: &str) -> Result<u32, ParseIntError> {
    parse_int::parse(input)
}

impl Cli {
    /// Combine the command-line options with the configuration file; options
    /// given on the command line win.
    pub fn extract_options(&self, config: &Config) -> ExtractOptions {
        let bootloader = if self.no_bootloader {
            BootloaderLocation::Skip
        } else if let Some(offset) = self.bootloader_offset {
            BootloaderLocation::At(offset)
        } else if !config.extract_bootloader {
            BootloaderLocation::Skip
        } else if let Some(offset) = config.bootloader_offset {
            BootloaderLocation::At(offset)
        } else {
            BootloaderLocation::Auto
        };

        ExtractOptions {
            partition_table_offset: self
                .partition_table_offset
                .or(config.partition_table_offset)
                .unwrap_or(PARTITION_TABLE_OFFSET),
            bootloader,
            chip: self.chip.or(config.chip),
        }
    }
}

/// Convert the flash dump named on the command line
pub fn run(args: Cli, config: &Config) -> Result<()> {
    let options = args.extract_options(config);

    let minimum = options.partition_table_offset as usize + PARTITION_TABLE_SIZE;
    let flash = FlashImage::read_with_minimum(&args.input, minimum)?;

    let writer = OutputWriter::for_input(&args.input, args.output_dir.as_deref())
        .overwrite(args.force || config.overwrite);

    let mut extraction = extract(&flash, &options, &writer)?;

    if args.dry_run {
        info!("Dry run, no files written");
    } else {
        extraction.write(&writer)?;
    }

    print_report(&extraction);

    info!(
        "{} ELF files, {} files in total, {} partitions skipped",
        extraction.elf_count(),
        extraction.artifacts().count(),
        extraction.failures().count()
    );

    Ok(())
}

fn status_cell(entry: &Entry<'_>) -> Cell {
    match &entry.outcome {
        Outcome::Recovered => Cell::new("ok").fg(Color::Green),
        Outcome::PartiallyRecovered(warnings) => {
            let text = warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            Cell::new(text).fg(Color::Yellow)
        }
        Outcome::Failed(error) => Cell::new(error.to_string()).fg(Color::Red),
    }
}

/// Print a table of everything that was extracted
pub fn print_report(extraction: &Extraction<'_>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Name")
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
            Cell::new("Role")
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold),
            Cell::new("Offset")
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
            Cell::new("Chip")
                .fg(Color::Magenta)
                .add_attribute(Attribute::Bold),
            Cell::new("File")
                .fg(Color::DarkCyan)
                .add_attribute(Attribute::Bold),
            Cell::new("Status")
                .fg(Color::Yellow)
                .add_attribute(Attribute::Bold),
        ]);

    for entry in &extraction.entries {
        let file = entry
            .artifact
            .as_ref()
            .map(|artifact| artifact.file_name.as_str())
            .unwrap_or("-");
        let chip = entry.chip.map(|chip| chip.to_string()).unwrap_or_default();

        table.add_row(vec![
            Cell::new(entry.source.label()).fg(Color::Green),
            Cell::new(entry.source.kind()).fg(Color::Cyan),
            Cell::new(format!("{:#x}", entry.source.offset())).fg(Color::Red),
            Cell::new(chip).fg(Color::Magenta),
            Cell::new(file).fg(Color::DarkCyan),
            status_cell(entry),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("espdump").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let cli = parse(&["flash.bin"]);
        let options = cli.extract_options(&Config::default());

        assert_eq!(options, ExtractOptions::default());
    }

    #[test]
    fn command_line_wins_over_config() {
        let config = Config {
            bootloader_offset: Some(0x2000),
            partition_table_offset: Some(0x9000),
            chip: Some(Chip::Esp32s3),
            ..Config::default()
        };

        let options = parse(&["flash.bin"]).extract_options(&config);
        assert_eq!(options.bootloader, BootloaderLocation::At(0x2000));
        assert_eq!(options.partition_table_offset, 0x9000);
        assert_eq!(options.chip, Some(Chip::Esp32s3));

        let cli = parse(&[
            "flash.bin",
            "--bootloader-offset",
            "0x1000",
            "--partition-table-offset",
            "32768",
            "--chip",
            "esp32c3",
        ]);
        let options = cli.extract_options(&config);
        assert_eq!(options.bootloader, BootloaderLocation::At(0x1000));
        assert_eq!(options.partition_table_offset, 0x8000);
        assert_eq!(options.chip, Some(Chip::Esp32c3));
    }

    #[test]
    fn bootloader_can_be_disabled() {
        let options = parse(&["flash.bin", "--no-bootloader"]).extract_options(&Config::default());
        assert_eq!(options.bootloader, BootloaderLocation::Skip);

        let config = Config {
            extract_bootloader: false,
            ..Config::default()
        };
        let options = parse(&["flash.bin"]).extract_options(&config);
        assert_eq!(options.bootloader, BootloaderLocation::Skip);

        assert!(Cli::try_parse_from([
            "espdump",
            "flash.bin",
            "--no-bootloader",
            "--bootloader-offset",
            "0x0"
        ])
        .is_err());
    }
}
