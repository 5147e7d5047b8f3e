use flate2::read::GzDecoder;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, UpdateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    fn detect(archive_path: &Path) -> Result<Self> {
        let name = archive_path.to_string_lossy();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            Err(UpdateError::ArchiveStructureInvalid {
                archive: archive_path.to_path_buf(),
                reason: "unknown archive format".to_string(),
            })
        }
    }
}

/// One entry of an archive, reduced to what layout detection needs.
struct EntryInfo {
    path: PathBuf,
    is_dir: bool,
}

/// Unpack `archive_path` into `work_dir`.
///
/// A single wrapper folder at the top of the archive (as in GitHub source
/// exports) is flattened into `work_dir`. Existing files are overwritten. The
/// archive file is removed once its contents are in place.
pub fn install_archive(archive_path: &Path, work_dir: &Path) -> Result<()> {
    let kind = ArchiveKind::detect(archive_path)?;
    let entries = match kind {
        ArchiveKind::Zip => list_zip(archive_path)?,
        ArchiveKind::TarGz => list_tar_gz(archive_path)?,
    };
    let wrapper = find_wrapper(archive_path, &entries)?;

    match kind {
        ArchiveKind::Zip => extract_zip(archive_path, work_dir)?,
        ArchiveKind::TarGz => extract_tar_gz(archive_path, work_dir)?,
    }

    if let Some(wrapper) = wrapper {
        // The wrapper may hold a child of the same name, so it moves aside first.
        let staging = stage_wrapper(&work_dir.join(&wrapper), work_dir)?;
        tracing::debug!("Flattening {} from {}", wrapper.display(), staging.display());
        flatten(&staging, work_dir)?;
    }

    fs::remove_file(archive_path).map_err(|e| {
        UpdateError::io(format!("Failed to remove {}", archive_path.display()), e)
    })?;
    Ok(())
}

/// The single top-level folder every entry lives under, if there is one.
///
/// An archive with no directory at all is rejected. With a directory present,
/// a single root can only be that directory.
fn find_wrapper(archive_path: &Path, entries: &[EntryInfo]) -> Result<Option<PathBuf>> {
    let mut roots = BTreeSet::new();
    let mut has_dir = false;

    for entry in entries {
        let mut components = entry.path.components().filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        });
        let Some(root) = components.next() else {
            continue;
        };
        if entry.is_dir || components.next().is_some() {
            has_dir = true;
        }
        roots.insert(PathBuf::from(root));
    }

    if !has_dir {
        return Err(UpdateError::ArchiveStructureInvalid {
            archive: archive_path.to_path_buf(),
            reason: "no top-level directory entry".to_string(),
        });
    }

    if roots.len() != 1 {
        return Ok(None);
    }
    Ok(roots.into_iter().next())
}

fn list_zip(archive_path: &Path) -> Result<Vec<EntryInfo>> {
    let mut archive = open_zip(archive_path)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(zip_error)?;
        let Some(path) = file.enclosed_name() else {
            continue;
        };
        entries.push(EntryInfo {
            path,
            is_dir: file.is_dir(),
        });
    }
    Ok(entries)
}

fn list_tar_gz(archive_path: &Path) -> Result<Vec<EntryInfo>> {
    let mut archive = open_tar_gz(archive_path)?;
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(tar_error)? {
        let entry = entry.map_err(tar_error)?;
        let path = entry.path().map_err(tar_error)?.into_owned();
        entries.push(EntryInfo {
            path,
            is_dir: entry.header().entry_type().is_dir(),
        });
    }
    Ok(entries)
}

fn extract_zip(archive_path: &Path, work_dir: &Path) -> Result<()> {
    open_zip(archive_path)?.extract(work_dir).map_err(zip_error)
}

fn extract_tar_gz(archive_path: &Path, work_dir: &Path) -> Result<()> {
    open_tar_gz(archive_path)?.unpack(work_dir).map_err(tar_error)
}

fn open_zip(archive_path: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(archive_path).map_err(|e| {
        UpdateError::io(format!("Failed to open {}", archive_path.display()), e)
    })?;
    zip::ZipArchive::new(file).map_err(zip_error)
}

fn open_tar_gz(archive_path: &Path) -> Result<tar::Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(archive_path).map_err(|e| {
        UpdateError::io(format!("Failed to open {}", archive_path.display()), e)
    })?;
    Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
}

fn zip_error(e: zip::result::ZipError) -> UpdateError {
    UpdateError::Extraction {
        message: e.to_string(),
    }
}

fn tar_error(e: std::io::Error) -> UpdateError {
    UpdateError::Extraction {
        message: e.to_string(),
    }
}

/// Rename the extracted wrapper to a name no archive entry can occupy.
fn stage_wrapper(wrapper_dir: &Path, work_dir: &Path) -> Result<PathBuf> {
    let mut attempt = 0u32;
    let staging = loop {
        let candidate = work_dir.join(format!(".ghau-unpack-{}-{}", std::process::id(), attempt));
        if fs::symlink_metadata(&candidate).is_err() {
            break candidate;
        }
        attempt += 1;
    };
    fs::rename(wrapper_dir, &staging).map_err(|e| {
        UpdateError::io(
            format!("Failed to move {} to {}", wrapper_dir.display(), staging.display()),
            e,
        )
    })?;
    Ok(staging)
}

/// Move every child of `wrapper_dir` up into `dest`, then remove the wrapper.
fn flatten(wrapper_dir: &Path, dest: &Path) -> Result<()> {
    for entry in read_dir(wrapper_dir)? {
        let source = entry.path();
        move_merge(&source, &dest.join(entry.file_name()))?;
    }
    fs::remove_dir_all(wrapper_dir)
        .map_err(|e| UpdateError::io(format!("Failed to remove {}", wrapper_dir.display()), e))
}

/// Rename `source` to `target`. Directories merge into an existing directory;
/// anything else already at `target` is replaced.
fn move_merge(source: &Path, target: &Path) -> Result<()> {
    let target_meta = fs::symlink_metadata(target).ok();

    if source.is_dir() {
        if target_meta.as_ref().is_some_and(|m| m.is_dir()) {
            for entry in read_dir(source)? {
                move_merge(&entry.path(), &target.join(entry.file_name()))?;
            }
            return fs::remove_dir(source)
                .map_err(|e| UpdateError::io(format!("Failed to remove {}", source.display()), e));
        }
        if target_meta.is_some() {
            remove_any(target)?;
        }
    } else if target_meta.is_some() {
        remove_any(target)?;
    }

    fs::rename(source, target).map_err(|e| {
        UpdateError::io(
            format!("Failed to move {} to {}", source.display(), target.display()),
            e,
        )
    })
}

fn remove_any(path: &Path) -> Result<()> {
    let result = if fs::symlink_metadata(path).is_ok_and(|m| m.is_dir()) {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| UpdateError::io(format!("Failed to replace {}", path.display()), e))
}

fn read_dir(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    fs::read_dir(dir)
        .and_then(|it| it.collect::<std::io::Result<Vec<_>>>())
        .map_err(|e| UpdateError::io(format!("Failed to read {}", dir.display()), e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    /// Write a zip at `path` with the given directories and `(name, contents)` files.
    pub(crate) fn write_zip(path: &Path, dirs: &[&str], files: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        for dir in dirs {
            writer.add_directory(*dir, options).unwrap();
        }
        for (name, contents) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
        let encoder = flate2::write::GzEncoder::new(
            File::create(path).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_flattens_wrapper_folder() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("update.zip");
        write_zip(
            &archive,
            &["repo-v2/", "repo-v2/sub/"],
            &[("repo-v2/a.txt", "a"), ("repo-v2/sub/b.txt", "b")],
        );

        install_archive(&archive, dir.path()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dir.path().join("sub/b.txt")).unwrap(), "b");
        assert!(!dir.path().join("repo-v2").exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_overwrites_and_merges_existing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "old").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/keep.txt"), "keep").unwrap();

        let archive = dir.path().join("update.zip");
        write_zip(
            &archive,
            &["repo-v2/"],
            &[("repo-v2/a.txt", "new"), ("repo-v2/sub/b.txt", "b")],
        );
        install_archive(&archive, dir.path()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
        assert!(dir.path().join("sub/keep.txt").exists());
        assert!(dir.path().join("sub/b.txt").exists());
    }

    #[test]
    fn test_wrapper_containing_its_own_name() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("update.zip");
        write_zip(
            &archive,
            &["app/", "app/app/", "app/zzz/"],
            &[("app/app/core.txt", "core"), ("app/zzz/z.txt", "z")],
        );

        install_archive(&archive, dir.path()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("app/core.txt")).unwrap(), "core");
        assert_eq!(fs::read_to_string(dir.path().join("zzz/z.txt")).unwrap(), "z");
        assert!(!dir.path().join("app/app").exists());
        assert!(!dir.path().join("app/zzz").exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".ghau-unpack"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_tar_gz_without_dir_entries() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("update.tar.gz");
        write_tar_gz(&archive, &[("app-1.2/run.sh", "echo"), ("app-1.2/lib/x", "x")]);

        install_archive(&archive, dir.path()).unwrap();

        assert!(dir.path().join("run.sh").exists());
        assert!(dir.path().join("lib/x").exists());
        assert!(!dir.path().join("app-1.2").exists());
    }

    #[test]
    fn test_archive_without_directory_is_invalid() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("update.zip");
        write_zip(&archive, &[], &[("a.txt", "a"), ("b.txt", "b")]);

        let err = install_archive(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, UpdateError::ArchiveStructureInvalid { .. }));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_unwrapped_archive_extracts_in_place() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("update.zip");
        write_zip(&archive, &["bin/"], &[("bin/app", "x"), ("README", "r")]);

        install_archive(&archive, dir.path()).unwrap();

        assert!(dir.path().join("bin/app").exists());
        assert!(dir.path().join("README").exists());
    }

    #[test]
    fn test_unknown_format() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("update.rar");
        fs::write(&archive, "").unwrap();
        assert!(matches!(
            install_archive(&archive, dir.path()),
            Err(UpdateError::ArchiveStructureInvalid { .. })
        ));
    }
}
