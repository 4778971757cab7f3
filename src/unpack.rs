/*
MIT License

Copyright (c) 2021 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/
//! Extraction of an archive into a directory.

use crate::helpers::{copy_to_end, set_mode, set_mtime, DirectoryMetadata, PendingDirectories};
use crate::stream::ArchiveStream;
use crate::{Result, TarEntry, TarError, TarReader, TypeFlag};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Options of [`unpack`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Replace existing files. Without it, an existing file is an error.
    pub overwrite: bool,
    /// Apply the permission bits of the entries (unix only).
    pub preserve_permissions: bool,
    /// Apply the modification times of the entries.
    pub preserve_mtime: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            preserve_permissions: true,
            preserve_mtime: true,
        }
    }
}

/// Extracts all remaining entries of `reader` below `dest`.
///
/// Directories, regular files, symbolic links (unix only) and hard links are
/// created; other entry types are skipped with a warning. So are entries with
/// absolute paths or `..` components. Directory modification times and
/// permissions are applied once all their entries are written, so read-only
/// directories can still be filled.
///
/// # Errors
/// Errors of the reader, I/O errors while creating files, and
/// [`io::ErrorKind::AlreadyExists`] if a file exists and
/// [`UnpackOptions::overwrite`] is not set.
pub fn unpack<S: Read + ArchiveStream>(
    reader: &mut TarReader<S>,
    dest: impl AsRef<Path>,
    options: &UnpackOptions,
) -> Result<()> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let mut directories = PendingDirectories::new();
    let mut buf = Vec::new();
    while let Some(mut entry) = reader.next_entry()? {
        unpack_entry(&mut entry, dest, options, &mut directories, &mut buf)?;
    }
    directories.finish();
    Ok(())
}

fn unpack_entry<S, F>(
    entry: &mut TarEntry<S>,
    dest: &Path,
    options: &UnpackOptions,
    directories: &mut PendingDirectories<F>,
    buf: &mut Vec<u8>,
) -> Result<()>
where
    S: Read + ArchiveStream,
    F: FnMut(&Path, &DirectoryMetadata) -> io::Result<()>,
{
    let header = entry.header();
    if header.is_global_extended_attributes() {
        return Ok(());
    }
    let Some(relative) = sanitize(&header.name) else {
        log::warn!("Skipping entry with unsafe path {:?}", header.name);
        return Ok(());
    };
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    let target = dest.join(&relative);
    let (type_flag, mode, mtime) = (header.type_flag, header.mode, header.mtime);
    directories.observe(&target);

    match type_flag {
        TypeFlag::DIRTYPE => {
            fs::create_dir_all(&target)?;
            let metadata = DirectoryMetadata {
                mtime: options.preserve_mtime.then_some(mtime),
                mode: options.preserve_permissions.then_some(mode),
            };
            directories.push_directory(target, metadata);
            return Ok(());
        }
        TypeFlag::REGTYPE | TypeFlag::AREGTYPE | TypeFlag::CONTTYPE => {
            prepare_target(&target, options)?;
            let mut file = File::create(&target)?;
            let written = copy_to_end(entry, &mut file, buf)?;
            log::trace!("extracted {written} bytes to {}", target.display());
        }
        TypeFlag::SYMTYPE => {
            prepare_target(&target, options)?;
            create_symlink(entry.link_name(), &target)?;
            return Ok(());
        }
        TypeFlag::LINK => {
            let Some(source) = sanitize(entry.link_name()) else {
                log::warn!("Skipping hard link to unsafe path {:?}", entry.link_name());
                return Ok(());
            };
            prepare_target(&target, options)?;
            fs::hard_link(dest.join(source), &target)?;
            return Ok(());
        }
        other => {
            log::warn!("Skipping {other:?} entry {:?}", entry.name());
            return Ok(());
        }
    }

    if options.preserve_permissions {
        set_mode(&target, mode)?;
    }
    if options.preserve_mtime {
        if let Err(e) = set_mtime(&target, mtime) {
            log::warn!("Failed to set modification time of {}: {e}", target.display());
        }
    }
    Ok(())
}

/// Relative path of an entry below the destination. `None` if the entry
/// would end up outside of it.
fn sanitize(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

/// Creates the parent directories of `target` and removes an existing file.
fn prepare_target(target: &Path, options: &UnpackOptions) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(target) {
        Ok(_) if !options.overwrite => Err(TarError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        ))),
        Ok(metadata) if metadata.is_dir() => Ok(fs::remove_dir_all(target)?),
        Ok(_) => Ok(fs::remove_file(target)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn create_symlink(link_name: &str, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link_name, target)
}

#[cfg(not(unix))]
fn create_symlink(link_name: &str, target: &Path) -> io::Result<()> {
    log::warn!(
        "Skipping symbolic link {} -> {link_name}, not supported on this platform",
        target.display()
    );
    Ok(())
}
