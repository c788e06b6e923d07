//! Chips which may have produced a flash dump
//!
//! The application image header records the id of the chip the image was
//! built for. That id decides the instruction set, and thereby the machine
//! type of the synthesized ELF file.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, VariantNames};

use crate::Error;

/// ELF machine type for Xtensa
pub const EM_XTENSA: u16 = 94;
/// ELF machine type for RISC-V
pub const EM_RISCV: u16 = 243;

/// Instruction set architecture of a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Xtensa,
    RiscV,
}

/// All supported devices
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Display,
    EnumIter,
    EnumString,
    VariantNames,
    Serialize,
    Deserialize,
)]
#[non_exhaustive]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Chip {
    /// ESP32
    #[default]
    Esp32,
    /// ESP32-C2, ESP8684
    Esp32c2,
    /// ESP32-C3, ESP8685
    Esp32c3,
    /// ESP32-C5
    Esp32c5,
    /// ESP32-C6
    Esp32c6,
    /// ESP32-H2
    Esp32h2,
    /// ESP32-P4
    Esp32p4,
    /// ESP32-S2
    Esp32s2,
    /// ESP32-S3
    Esp32s3,
}

impl Chip {
    /// Look up a chip by the `chip_id` field of an image's extended header
    pub fn from_id(id: u16) -> Result<Self, Error> {
        Chip::iter()
            .find(|chip| chip.id() == id)
            .ok_or(Error::UnknownChip(id))
    }

    /// The `chip_id` written into image headers for this chip
    pub fn id(&self) -> u16 {
        match self {
            Chip::Esp32 => 0,
            Chip::Esp32s2 => 2,
            Chip::Esp32c3 => 5,
            Chip::Esp32s3 => 9,
            Chip::Esp32c2 => 12,
            Chip::Esp32c6 => 13,
            Chip::Esp32h2 => 16,
            Chip::Esp32p4 => 18,
            Chip::Esp32c5 => 23,
        }
    }

    /// Flash offset of the second stage bootloader
    pub fn boot_address(&self) -> u32 {
        match self {
            Chip::Esp32 | Chip::Esp32s2 => 0x1000,
            Chip::Esp32c5 | Chip::Esp32p4 => 0x2000,
            _ => 0x0,
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            Chip::Esp32 | Chip::Esp32s2 | Chip::Esp32s3 => Architecture::Xtensa,
            _ => Architecture::RiscV,
        }
    }

    /// ELF `e_machine` value for code running on this chip
    pub fn elf_machine(&self) -> u16 {
        match self.architecture() {
            Architecture::Xtensa => EM_XTENSA,
            Architecture::RiscV => EM_RISCV,
        }
    }

    /// ELF `e_flags` value matching what the ESP-IDF toolchains emit
    pub fn elf_flags(&self) -> u32 {
        // EF_RISCV_RVC = 0x1, EF_RISCV_FLOAT_ABI_SINGLE = 0x2
        match self {
            Chip::Esp32 | Chip::Esp32s2 | Chip::Esp32s3 => 0x300,
            Chip::Esp32p4 => 0x3,
            _ => 0x1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_ids_are_unique() {
        for chip in Chip::iter() {
            assert_eq!(Chip::from_id(chip.id()).unwrap(), chip);
        }
    }

    #[test]
    fn unknown_chip_id() {
        assert!(matches!(Chip::from_id(0xffff), Err(Error::UnknownChip(0xffff))));
    }

    #[test]
    fn machine_types() {
        assert_eq!(Chip::Esp32.elf_machine(), EM_XTENSA);
        assert_eq!(Chip::Esp32s3.elf_machine(), EM_XTENSA);
        assert_eq!(Chip::Esp32c3.elf_machine(), EM_RISCV);
        assert_eq!(Chip::Esp32p4.elf_machine(), EM_RISCV);
    }

    #[test]
    fn parse_chip_name() {
        assert_eq!("esp32c6".parse::<Chip>().unwrap(), Chip::Esp32c6);
        assert!("esp8266".parse::<Chip>().is_err());
    }
}
