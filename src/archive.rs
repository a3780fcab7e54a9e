//! Tar/gzip packing and unpacking for the `Archive` and `Extract` actions.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// Archive formats the engine can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detects the format from a file name, case-insensitively.
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }

    fn suffixes(self) -> &'static [&'static str] {
        match self {
            ArchiveFormat::Tar => &[".tar"],
            ArchiveFormat::TarGz => &[".tar.gz", ".tgz"],
        }
    }
}

/// File name with its archive suffix removed (`photos.tar.gz` -> `photos`).
pub fn archive_stem(file_name: &str) -> String {
    let lower = file_name.to_lowercase();
    ArchiveFormat::detect(file_name)
        .and_then(|format| {
            format
                .suffixes()
                .iter()
                .find(|suffix| lower.ends_with(*suffix))
                .map(|suffix| file_name[..file_name.len() - suffix.len()].to_string())
        })
        .unwrap_or_else(|| file_name.to_string())
}

/// Packs `src` (file or directory) into a new gzip-compressed tarball at `dst`.
///
/// A partially written archive is removed on failure.
pub fn create_tar_gz(src: &Path, dst: &Path) -> io::Result<()> {
    let entry_name = src.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "source has no file name")
    })?;

    let result = (|| -> io::Result<()> {
        let encoder = GzEncoder::new(File::create(dst)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        if src.is_dir() {
            builder.append_dir_all(entry_name, src)?;
        } else {
            builder.append_path_with_name(src, entry_name)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(dst);
    }
    result
}

/// Unpacks `src` into `out_dir`, creating it first.
///
/// Entries that would escape `out_dir` are skipped by `tar`. A partially
/// populated `out_dir` is removed on failure.
pub fn extract(src: &Path, format: ArchiveFormat, out_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(out_dir)?;

    let result = File::open(src).and_then(|file| match format {
        ArchiveFormat::Tar => tar::Archive::new(file).unpack(out_dir),
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(out_dir),
    });

    if result.is_err() {
        let _ = fs::remove_dir_all(out_dir);
    }
    result
}
