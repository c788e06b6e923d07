//! Command-line interface configuration
//!
//! Defaults for the command-line options may be stored in an `espdump.toml`
//! file; the [Config] type handles loading it.

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Chip, Error};

const CONFIG_FILE_NAME: &str = "espdump.toml";

fn deserialize_hex_to_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(hex) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let hex = hex.to_lowercase();
    let hex = hex.trim_start_matches("0x");

    let int = u32::from_str_radix(hex, 16).map_err(serde::de::Error::custom)?;

    Ok(Some(int))
}

fn serialize_u32_to_hex<S>(decimal: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match decimal {
        Some(decimal) => serializer.serialize_str(&format!("{decimal:#x}")),
        None => serializer.serialize_none(),
    }
}

/// Defaults for the command-line options
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Flash offset of the second stage bootloader, detected if not set
    #[serde(
        serialize_with = "serialize_u32_to_hex",
        deserialize_with = "deserialize_hex_to_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub bootloader_offset: Option<u32>,
    /// Flash offset of the partition table
    #[serde(
        serialize_with = "serialize_u32_to_hex",
        deserialize_with = "deserialize_hex_to_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub partition_table_offset: Option<u32>,
    /// Chip to assume for all images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chip: Option<Chip>,
    /// Replace existing output files
    pub overwrite: bool,
    /// Convert the bootloader along with the partitions
    pub extract_bootloader: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootloader_offset: None,
            partition_table_offset: None,
            chip: None,
            overwrite: false,
            extract_bootloader: true,
        }
    }
}

impl Config {
    /// Load the configuration file, if there is one
    pub fn load() -> Result<Self, Error> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load the configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let raw_data = read_to_string(path)
            .map_err(|e| Error::FileOpenError(path.display().to_string(), e))?;
        let config = Self::from_toml(&raw_data)
            .map_err(|e| Error::InvalidConfig(path.display().to_string(), Box::new(e)))?;

        debug!("Config from {}: {:#?}", path.display(), &config);

        Ok(config)
    }

    fn from_toml(raw_data: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw_data)
    }

    /// The first configuration file found in the current directory, its
    /// parent, or the user's configuration directory
    fn config_path() -> Option<PathBuf> {
        if let Ok(current_dir) = std::env::current_dir() {
            let local_config = current_dir.join(CONFIG_FILE_NAME);
            if local_config.exists() {
                return Some(local_config);
            }
            if let Some(parent_folder) = current_dir.parent() {
                let workspace_config = parent_folder.join(CONFIG_FILE_NAME);
                if workspace_config.exists() {
                    return Some(workspace_config);
                }
            }
        }

        ProjectDirs::from("rs", "esp", "espdump")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}
