//! Writing extracted artifacts to disk

use std::{
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use log::info;

use crate::{classify::Role, partition_table::Partition, Error};

/// Writes artifacts next to each other, named after the dump they came from
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    basename: String,
    overwrite: bool,
}

impl OutputWriter {
    /// Create a writer placing files in `dir`, prefixed with `basename`
    pub fn new(dir: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            basename: basename.into(),
            overwrite: false,
        }
    }

    /// Create a writer for the dump at `input`: files go into `output_dir`,
    /// or next to the dump if none is given, and are prefixed with the dump's
    /// file stem.
    pub fn for_input(input: &Path, output_dir: Option<&Path>) -> Self {
        let dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        let basename = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("flash"));

        Self::new(dir, basename)
    }

    /// Replace existing files instead of failing
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// `<basename>.<label>.<role>.<ext>`
    ///
    /// Path separators and control characters in the label are replaced, so
    /// the file always lands in the output directory.
    pub fn partition_file_name(&self, partition: &Partition, role: Role) -> String {
        format!(
            "{}.{}.{}.{}",
            self.basename,
            sanitize_label(partition.label()),
            role,
            role.extension()
        )
    }

    /// `<basename>.<label>@<offset>.<role>.<ext>`, for partitions whose label
    /// and role are not unique within the table
    pub fn unique_partition_file_name(&self, partition: &Partition, role: Role) -> String {
        format!(
            "{}.{}@{:#x}.{}.{}",
            self.basename,
            sanitize_label(partition.label()),
            partition.offset(),
            role,
            role.extension()
        )
    }

    /// `<basename>.bootloader.elf`
    pub fn bootloader_file_name(&self) -> String {
        format!("{}.bootloader.elf", self.basename)
    }

    /// Write `data` to `file_name` inside the output directory, returning the
    /// full path of the file
    pub fn write(&self, file_name: &str, data: &[u8]) -> Result<PathBuf, Error> {
        let path = self.dir.join(file_name);

        let mut options = OpenOptions::new();
        options.write(true);
        if self.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let mut file = options.open(&path).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::OutputExists(path.clone()),
            _ => Error::FileWriteError(path.display().to_string(), e),
        })?;
        file.write_all(data)
            .map_err(|e| Error::FileWriteError(path.display().to_string(), e))?;

        info!("Wrote {} ({:#x} bytes)", path.display(), data.len());

        Ok(path)
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
