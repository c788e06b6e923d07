use std::{fs, process::Command};

use assert_cmd::prelude::*;
use espdump::partition_table::{DataType, Flags, Partition, SubType, Type};

mod common;
use common::*;

#[test]
fn converts_dump() -> Result<(), Box<dyn std::error::Error>> {
    let dir = scratch_dir("cli-convert");
    let input = dir.join("yeelight.bin");
    fs::write(&input, firmware_dump())?;
    let output = dir.join("out");
    fs::create_dir(&output)?;

    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir).arg(&input).arg("--output-dir").arg(&output);
    cmd.assert().success();

    assert!(output.join("yeelight.bootloader.elf").exists());
    assert!(output.join("yeelight.factory.factory.elf").exists());
    assert!(output.join("yeelight.nvs.nvs.dat").exists());
    assert!(output.join("yeelight.phy_init.phy.dat").exists());

    // A second run refuses to replace the files
    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir).arg(&input).arg("--output-dir").arg(&output);
    cmd.assert().failure();

    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir)
        .arg(&input)
        .arg("--output-dir")
        .arg(&output)
        .arg("--force");
    cmd.assert().success();

    fs::remove_dir_all(dir)?;

    Ok(())
}

#[test]
fn dry_run_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let dir = scratch_dir("cli-dry-run");
    let input = dir.join("dump.bin");
    fs::write(&input, firmware_dump())?;

    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir).arg(&input).arg("--dry-run").arg("--no-bootloader");
    cmd.assert().success();

    assert_eq!(fs::read_dir(&dir)?.count(), 1);

    fs::remove_dir_all(dir)?;

    Ok(())
}

#[test]
fn dump_warnings_are_reported_once() -> Result<(), Box<dyn std::error::Error>> {
    let dir = scratch_dir("cli-warnings");
    let nvs = Partition::new(
        "nvs",
        Type::Data,
        SubType::Data(DataType::Nvs),
        0x9000,
        0x6000,
        Flags::empty(),
    );
    let input = dir.join("dump.bin");
    fs::write(&input, flash_dump(&[nvs], &[]))?;

    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir)
        .env("RUST_LOG", "warn")
        .arg(&input)
        .arg("--dry-run")
        .arg("--no-bootloader");
    let output = cmd.output()?;
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let count = stderr
        .matches("Partition table contains no application partitions")
        .count();
    assert_eq!(count, 1, "{stderr}");

    fs::remove_dir_all(dir)?;

    Ok(())
}

#[test]
fn fatal_errors() -> Result<(), Box<dyn std::error::Error>> {
    let dir = scratch_dir("cli-fatal");

    // Missing input
    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir).arg(dir.join("missing.bin"));
    cmd.assert().failure();

    // Too small to hold a partition table
    let small = dir.join("small.bin");
    fs::write(&small, vec![0xFF; 0x1000])?;
    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir).arg(&small);
    cmd.assert().failure();

    // Corrupt partition table
    let mut data = firmware_dump();
    data[0x8000] = 0x00;
    let corrupt = dir.join("corrupt.bin");
    fs::write(&corrupt, data)?;
    let mut cmd = Command::cargo_bin("espdump")?;
    cmd.current_dir(&dir).arg(&corrupt);
    cmd.assert().failure();

    fs::remove_dir_all(dir)?;

    Ok(())
}
