#![allow(dead_code)]

use std::{env, fs, path::PathBuf, process};

use espdump::partition_table::{
    AppType, DataType, Flags, Partition, PartitionTable, SubType, Type,
};
use sha2::{Digest, Sha256};

pub const ENTRY: u32 = 0x4008_0400;
pub const DROM: &[u8] = b"esp32 rodata\0\0\0\0";
pub const DRAM: &[u8] = &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x11, 0x22, 0x33];
pub const IRAM: &[u8] = &[0x36, 0x41, 0x00, 0x1d, 0xf0, 0x00, 0x00, 0x00];

/// Segments of the test application, in image order
pub const SEGMENTS: &[(u32, &[u8])] = &[
    (0x4008_0000, IRAM),
    (0x3f40_0020, DROM),
    (0x3ffb_0000, DRAM),
];

/// Encode an application image: header, extended header, segments,
/// checksum, and optionally the SHA-256 digest
pub fn app_image(chip_id: u16, segments: &[(u32, &[u8])], append_digest: bool) -> Vec<u8> {
    let mut data = vec![0xE9, segments.len() as u8, 0x02, 0x20];
    data.extend_from_slice(&ENTRY.to_le_bytes());
    data.extend_from_slice(&[0xEE, 0, 0, 0]);
    data.extend_from_slice(&chip_id.to_le_bytes());
    data.push(0);
    data.extend_from_slice(&0u16.to_le_bytes());
    data.extend_from_slice(&u16::MAX.to_le_bytes());
    data.extend_from_slice(&[0; 4]);
    data.push(append_digest as u8);
    assert_eq!(data.len(), 24);

    let mut checksum = 0xEF;
    for (addr, payload) in segments {
        data.extend_from_slice(&addr.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        checksum = payload.iter().fold(checksum, |acc, b| acc ^ b);
    }

    let padding = 15 - (data.len() % 16);
    data.resize(data.len() + padding, 0);
    data.push(checksum);

    if append_digest {
        let digest = Sha256::digest(&data);
        data.extend_from_slice(&digest);
    }

    data
}

/// The partition layout of a typical single-app firmware
pub fn single_app_layout() -> Vec<Partition> {
    vec![
        Partition::new(
            "nvs",
            Type::Data,
            SubType::Data(DataType::Nvs),
            0x9000,
            0x6000,
            Flags::empty(),
        ),
        Partition::new(
            "phy_init",
            Type::Data,
            SubType::Data(DataType::Phy),
            0xf000,
            0x1000,
            Flags::empty(),
        ),
        Partition::new(
            "factory",
            Type::App,
            SubType::App(AppType::Factory),
            0x10000,
            0x10000,
            Flags::empty(),
        ),
    ]
}

/// A 128 KiB dump with the given partition table and regions, everything
/// else erased
pub fn flash_dump(partitions: &[Partition], regions: &[(usize, &[u8])]) -> Vec<u8> {
    let mut data = vec![0xFF; 0x20000];
    let table = PartitionTable::to_bytes(partitions);
    data[0x8000..0x8000 + table.len()].copy_from_slice(&table);

    for (offset, bytes) in regions {
        data[*offset..*offset + bytes.len()].copy_from_slice(bytes);
    }

    data
}

/// A dump of the single-app layout with bootloader, NVS data and
/// application filled in
pub fn firmware_dump() -> Vec<u8> {
    let bootloader = app_image(0, &[(0x4008_0000, IRAM)], false);
    let app = app_image(0, SEGMENTS, true);
    let nvs = [0xFE, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00];

    flash_dump(
        &single_app_layout(),
        &[(0x1000, &bootloader), (0x9000, &nvs), (0x10000, &app)],
    )
}

/// An empty directory unique to this test process
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("espdump-test-{}-{name}", process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}
