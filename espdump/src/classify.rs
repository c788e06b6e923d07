//! Semantic roles of partitions
//!
//! The role decides what is extracted from a partition (an ELF image or a raw
//! copy) and the suffix of the file it ends up in, which is what the
//! downstream NVS converters select their input by.

use std::fmt::{Display, Formatter};

use crate::partition_table::{AppType, DataType, Partition, SubType, Type};

/// Entries of the Xiaomi/Yeelight key-value store start with `55 aa`
const MI_NVS_MAGIC: &[u8] = &[0x55, 0xAA];

/// What a partition is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Factory,
    Ota(u8),
    Test,
    /// Application partition with an unassigned sub-type
    App,
    OtaData,
    Phy,
    Nvs,
    CoreDump,
    NvsKeys,
    EFuse,
    Undefined,
    EspHttpd,
    Fat,
    Spiffs,
    LittleFs,
    /// Vendor key-value store used by Xiaomi/Yeelight firmware
    MiNvs,
    UnknownData,
}

impl Role {
    /// Application roles are converted to ELF, everything else is copied raw
    pub fn is_app(&self) -> bool {
        matches!(self, Role::Factory | Role::Ota(_) | Role::Test | Role::App)
    }

    /// File extension of the artifact extracted for this role
    pub fn extension(&self) -> &'static str {
        if self.is_app() {
            "elf"
        } else {
            "dat"
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Factory => "factory",
            Role::Ota(slot) => return write!(f, "ota_{slot}"),
            Role::Test => "test",
            Role::App => "app",
            Role::OtaData => "ota_data",
            Role::Phy => "phy",
            Role::Nvs => "nvs",
            Role::CoreDump => "coredump",
            Role::NvsKeys => "nvs_keys",
            Role::EFuse => "efuse",
            Role::Undefined => "undefined",
            Role::EspHttpd => "esphttpd",
            Role::Fat => "fat",
            Role::Spiffs => "spiffs",
            Role::LittleFs => "littlefs",
            Role::MiNvs => "minvs",
            Role::UnknownData => "unknown-data",
        };

        f.write_str(name)
    }
}

/// Map a partition's type and sub-type to its role.
///
/// Values outside of the ones assigned by ESP-IDF never fail: unknown app
/// sub-types are still treated as applications, everything else becomes
/// [Role::UnknownData].
pub fn classify(partition: &Partition) -> Role {
    match (partition.ty(), partition.sub_type()) {
        (Type::App, SubType::App(AppType::Factory)) => Role::Factory,
        (Type::App, SubType::App(AppType::Ota(slot))) => Role::Ota(slot),
        (Type::App, SubType::App(AppType::Test)) => Role::Test,
        (Type::App, _) => Role::App,
        (Type::Data, SubType::Data(data)) => match data {
            DataType::Ota => Role::OtaData,
            DataType::Phy => Role::Phy,
            DataType::Nvs => Role::Nvs,
            DataType::CoreDump => Role::CoreDump,
            DataType::NvsKeys => Role::NvsKeys,
            DataType::EFuse => Role::EFuse,
            DataType::Undefined => Role::Undefined,
            DataType::EspHttpd => Role::EspHttpd,
            DataType::Fat => Role::Fat,
            DataType::Spiffs => Role::Spiffs,
            DataType::LittleFs => Role::LittleFs,
        },
        _ => Role::UnknownData,
    }
}

/// Like [classify], but also looks at the partition contents to recognize
/// vendor formats hiding behind unassigned sub-types.
pub fn classify_with_data(partition: &Partition, data: &[u8]) -> Role {
    match classify(partition) {
        Role::UnknownData if data.starts_with(MI_NVS_MAGIC) => Role::MiNvs,
        role => role,
    }
}
