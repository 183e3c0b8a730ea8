// src/recipe/kitchen/archive.rs

//! Archive and source file utilities for the Kitchen

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// How a fetched file is unpacked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    TarXz,
    TarZst,
    /// Handed to the system `tar`, which has bzip2 built in
    TarBz2,
    /// Extracted in-process with the `zip` crate
    Zip,
    /// Not an archive; staged as-is
    Plain,
}

impl ArchiveKind {
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Self::TarXz
        } else if lower.ends_with(".tar.zst") || lower.ends_with(".tar.zstd") {
            Self::TarZst
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") || lower.ends_with(".tbz") {
            Self::TarBz2
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else if lower.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Plain
        }
    }

    pub fn is_archive(&self) -> bool {
        *self != Self::Plain
    }
}

/// Unpack `archive` into `dest`, or copy it there when it is not an archive
///
/// `filename` decides the format, since cached files carry a checksum prefix.
pub fn stage_file(archive: &Path, filename: &str, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let kind = ArchiveKind::from_filename(filename);
    debug!("Staging {} ({:?}) into {}", archive.display(), kind, dest.display());

    match kind {
        ArchiveKind::Tar => unpack_tar(File::open(archive)?, dest),
        ArchiveKind::TarGz => unpack_tar(flate2::read::GzDecoder::new(open(archive)?), dest),
        ArchiveKind::TarXz => unpack_tar(xz2::read::XzDecoder::new(open(archive)?), dest),
        ArchiveKind::TarZst => {
            let decoder = zstd::Decoder::new(File::open(archive)?)
                .map_err(|e| Error::Archive(format!("{}: {}", filename, e)))?;
            unpack_tar(decoder, dest)
        }
        ArchiveKind::TarBz2 => run_tool(
            Command::new("tar").arg("-xjf").arg(archive).arg("-C").arg(dest),
            filename,
        ),
        ArchiveKind::Zip => unpack_zip(File::open(archive)?, dest),
        ArchiveKind::Plain => {
            fs::copy(archive, dest.join(filename))?;
            Ok(())
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| Error::Archive(format!("Failed to extract into {}: {}", dest.display(), e)))
}

fn unpack_zip(file: File, dest: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::Archive(format!("Invalid zip archive: {}", e)))?;
    archive
        .extract(dest)
        .map_err(|e| Error::Archive(format!("Failed to extract into {}: {}", dest.display(), e)))
}

fn run_tool(command: &mut Command, filename: &str) -> Result<()> {
    let output = command
        .output()
        .map_err(|e| Error::Archive(format!("Failed to run extractor for {}: {}", filename, e)))?;

    if !output.status.success() {
        return Err(Error::Archive(format!(
            "Failed to extract {}: {}",
            filename,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Descend through a lone top-level directory
///
/// Most source archives unpack into `name-version/`; steps run inside it.
pub fn source_root(dir: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();

    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        return Ok(entries[0].path());
    }
    Ok(dir.to_path_buf())
}

/// Apply a patch to the source directory
pub fn apply_patch(source_dir: &Path, patch_path: &Path, strip: u32) -> Result<()> {
    let output = Command::new("patch")
        .arg(format!("-p{}", strip))
        .arg("--batch")
        .arg("-i")
        .arg(patch_path)
        .current_dir(source_dir)
        .output()
        .map_err(|e| Error::Archive(format!("Failed to run patch: {}", e)))?;

    if !output.status.success() {
        return Err(Error::Archive(format!(
            "Failed to apply patch {}: {}",
            patch_path.display(),
            String::from_utf8_lossy(&output.stdout).trim()
        )));
    }

    Ok(())
}

/// Copy a directory tree, recreating symlinks rather than following them
pub fn copy_tree(from: &Path, to: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let target = to.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn make_tar_gz(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_archive_kind() {
        assert_eq!(ArchiveKind::from_filename("a-1.0.tar.gz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_filename("a.tgz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_filename("a.tar.xz"), ArchiveKind::TarXz);
        assert_eq!(ArchiveKind::from_filename("a.tar.zst"), ArchiveKind::TarZst);
        assert_eq!(ArchiveKind::from_filename("a.tar.bz2"), ArchiveKind::TarBz2);
        assert_eq!(ArchiveKind::from_filename("a.zip"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_filename("install.sh"), ArchiveKind::Plain);
        assert!(!ArchiveKind::Plain.is_archive());
    }

    #[test]
    fn test_stage_tar_gz_and_descend() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("cached-blob");
        make_tar_gz(
            &archive,
            &[("hello-1.0/configure", "#!/bin/sh\n"), ("hello-1.0/README", "hi\n")],
        );

        let dest = tmp.path().join("source");
        stage_file(&archive, "hello-1.0.tar.gz", &dest).unwrap();

        let root = source_root(&dest).unwrap();
        assert_eq!(root, dest.join("hello-1.0"));
        assert_eq!(fs::read_to_string(root.join("README")).unwrap(), "hi\n");
    }

    #[test]
    fn test_stage_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("cached-blob");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("tool-2.0/bin/tool", options).unwrap();
        std::io::Write::write_all(&mut writer, b"#!/bin/sh\necho tool\n").unwrap();
        writer.finish().unwrap();

        let dest = tmp.path().join("source");
        stage_file(&archive, "tool-2.0.zip", &dest).unwrap();

        let root = source_root(&dest).unwrap();
        assert_eq!(root, dest.join("tool-2.0"));
        assert!(root.join("bin/tool").is_file());

        fs::write(&archive, "not a zip").unwrap();
        let err = stage_file(&archive, "tool-2.0.zip", &tmp.path().join("bad")).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn test_stage_plain_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blob");
        fs::write(&file, "echo hi\n").unwrap();

        let dest = tmp.path().join("source");
        stage_file(&file, "install.sh", &dest).unwrap();
        assert!(dest.join("install.sh").exists());
        assert_eq!(source_root(&dest).unwrap(), dest);
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blob");
        fs::write(&file, "definitely not gzip").unwrap();

        let err = stage_file(&file, "x.tar.gz", &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, Error::Archive(_)));
    }

    #[test]
    fn test_copy_tree_keeps_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("from");
        fs::create_dir_all(from.join("bin")).unwrap();
        fs::write(from.join("bin/tool-1"), "x").unwrap();
        std::os::unix::fs::symlink("tool-1", from.join("bin/tool")).unwrap();

        let to = tmp.path().join("to");
        assert_eq!(copy_tree(&from, &to).unwrap(), 2);
        assert_eq!(fs::read_link(to.join("bin/tool")).unwrap(), PathBuf::from("tool-1"));
    }
}
