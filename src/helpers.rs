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
//! Helpers shared by the reader, the writer and the extraction layer.

use crate::{Result, TarError, BLOCKSIZE};
use filetime::FileTime;
use std::fmt::{Debug, Formatter};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Size of the chunks payload data is copied or skipped in.
pub(crate) const CHUNK_SIZE: usize = 4096;

const ZERO_BLOCK: [u8; BLOCKSIZE] = [0; BLOCKSIZE];

/// Number of zero bytes that follow `size` bytes of payload to reach the next
/// block boundary.
pub const fn padding(size: u64) -> u64 {
    if size == 0 {
        0
    } else {
        (511 | (size - 1)) + 1 - size
    }
}

/// Makes sure `buf` can hold one chunk.
fn chunk_buffer(buf: &mut Vec<u8>) -> &mut [u8] {
    if buf.len() < CHUNK_SIZE {
        buf.resize(CHUNK_SIZE, 0);
    }
    &mut buf[..CHUNK_SIZE]
}

/// Copies exactly `len` bytes from `src` to `dst` in chunks, using `buf` as
/// scratch space.
///
/// # Errors
/// Fails with [`TarError::UnexpectedEof`] if `src` ends early.
pub(crate) fn copy_exact<R, W>(src: &mut R, dst: &mut W, len: u64, buf: &mut Vec<u8>) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let chunk = chunk_buffer(buf);
    let mut remaining = len;
    while remaining > 0 {
        let want = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = match src.read(&mut chunk[..want]) {
            Ok(0) => return Err(TarError::UnexpectedEof(remaining)),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TarError::from_io(e)),
        };
        dst.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Copies everything `src` yields to `dst` in chunks. Returns the number of
/// bytes copied.
pub(crate) fn copy_to_end<R, W>(src: &mut R, dst: &mut W, buf: &mut Vec<u8>) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let chunk = chunk_buffer(buf);
    let mut copied = 0;
    loop {
        let n = match src.read(chunk) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TarError::from_io(e)),
        };
        dst.write_all(&chunk[..n])?;
        copied += n as u64;
    }
}

/// Reads and drops exactly `len` bytes of `src`.
pub(crate) fn discard<R: Read + ?Sized>(src: &mut R, len: u64, buf: &mut Vec<u8>) -> Result<()> {
    copy_exact(src, &mut io::sink(), len, buf)
}

/// Writes `len` zero bytes, e.g. the padding after an entry's payload.
pub(crate) fn write_zeros<W: Write + ?Sized>(dst: &mut W, mut len: u64) -> io::Result<()> {
    while len > 0 {
        let n = len.min(BLOCKSIZE as u64) as usize;
        dst.write_all(&ZERO_BLOCK[..n])?;
        len -= n as u64;
    }
    Ok(())
}

/// This function reads the exact amount of bytes required to fill the buffer, possibly performing
/// multiple reads to do so (and also retrying if required to deal with EINTR).
///
/// This function will either:
///  - succeed in reading the exact number of bytes required and return `Ok(true)`
///  - encounter an immediate EOF and return `Ok(false)` (without reading anything)
///  - encounter an EOF after reading at least one byte and return an error of kind
///    [`ErrorKind::UnexpectedEof`]
///  - fail for any other I/O reason
pub(crate) fn read_exactish<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let buflen = buf.len();
    let mut todo: &mut [u8] = buf;

    while !todo.is_empty() {
        match reader.read(todo) {
            Ok(0) if todo.len() == buflen => return Ok(false),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => todo = &mut todo[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Sets the modification time of `path` with [`filetime`].
pub fn set_mtime(path: &Path, mtime: SystemTime) -> io::Result<()> {
    filetime::set_file_mtime(path, FileTime::from_system_time(mtime))
}

/// Sets the permission bits of `path`. Does nothing outside of unix.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

/// Sets the permission bits of `path`. Does nothing outside of unix.
#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Metadata of an extracted directory that is applied once everything below
/// it is written.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DirectoryMetadata {
    /// Modification time.
    pub mtime: Option<SystemTime>,
    /// Permission bits (unix only).
    pub mode: Option<u32>,
}

impl DirectoryMetadata {
    /// Whether there is nothing to apply.
    pub const fn is_empty(&self) -> bool {
        self.mtime.is_none() && self.mode.is_none()
    }
}

/// Applies `metadata` to the directory at `path` with [`set_mtime`] and
/// [`set_mode`]. The time is set first.
pub fn apply_directory_metadata(path: &Path, metadata: &DirectoryMetadata) -> io::Result<()> {
    if let Some(mtime) = metadata.mtime {
        set_mtime(path, mtime)?;
    }
    if let Some(mode) = metadata.mode {
        set_mode(path, mode)?;
    }
    Ok(())
}

/// Function that applies deferred metadata to a directory.
pub type ApplyMetadata = fn(&Path, &DirectoryMetadata) -> io::Result<()>;

/// Deferred metadata of extracted directories.
///
/// Creating a file inside a directory updates the directory's mtime, and a
/// read-only mode would keep its children from being created. So both can
/// only be applied once all entries below the directory are written. Archives
/// list children right after their parent, so a stack is enough: before each
/// entry, every directory that isn't an ancestor of the entry is finished and
/// gets its metadata applied.
///
/// Failures to apply metadata are logged and otherwise ignored.
pub struct PendingDirectories<F = ApplyMetadata> {
    pending: Vec<(PathBuf, DirectoryMetadata)>,
    apply: F,
}

impl PendingDirectories {
    /// Stack that applies metadata with [`apply_directory_metadata`].
    pub fn new() -> Self {
        Self::with_applier(apply_directory_metadata)
    }
}

impl Default for PendingDirectories {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Debug for PendingDirectories<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDirectories")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<F> PendingDirectories<F>
where
    F: FnMut(&Path, &DirectoryMetadata) -> io::Result<()>,
{
    /// Stack that applies metadata with `apply`.
    pub const fn with_applier(apply: F) -> Self {
        Self {
            pending: Vec::new(),
            apply,
        }
    }

    /// Announces that `path` is about to be written. Applies the metadata of
    /// all pending directories that don't contain it.
    pub fn observe(&mut self, path: &Path) {
        while let Some((dir, _)) = self.pending.last() {
            if path != dir && path.starts_with(dir) {
                break;
            }
            self.apply_top();
        }
    }

    /// Defers applying `metadata` to the directory at `path`.
    pub fn push_directory(&mut self, path: PathBuf, metadata: DirectoryMetadata) {
        self.observe(&path);
        if !metadata.is_empty() {
            self.pending.push((path, metadata));
        }
    }

    /// Applies all remaining metadata, innermost directory first.
    pub fn finish(&mut self) {
        while !self.pending.is_empty() {
            self.apply_top();
        }
    }

    /// Number of directories waiting for their metadata.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn apply_top(&mut self) {
        if let Some((dir, metadata)) = self.pending.pop() {
            if let Err(e) = (self.apply)(&dir, &metadata) {
                log::warn!("Failed to set metadata of directory {}: {e}", dir.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 511);
        assert_eq!(padding(511), 1);
        assert_eq!(padding(512), 0);
        assert_eq!(padding(513), 511);
        for size in (0..5000).chain([u64::from(u32::MAX), 8 << 30]) {
            let pad = padding(size);
            assert!(pad < BLOCKSIZE as u64);
            assert_eq!((size + pad) % BLOCKSIZE as u64, 0, "size={size}");
        }
    }

    #[test]
    fn test_copy_exact() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut buf = Vec::new();
        let mut out = Vec::new();
        copy_exact(&mut &data[..], &mut out, 9_000, &mut buf).unwrap();
        assert_eq!(out, &data[..9_000]);
        assert_eq!(buf.len(), CHUNK_SIZE);

        let err = copy_exact(&mut &data[..100], &mut io::sink(), 150, &mut buf).unwrap_err();
        assert!(matches!(err, TarError::UnexpectedEof(50)));
    }

    #[test]
    fn test_discard() {
        let mut src: &[u8] = b"0123456789";
        discard(&mut src, 4, &mut Vec::new()).unwrap();
        assert_eq!(src, b"456789");
    }

    #[test]
    fn test_write_zeros() {
        let mut out = vec![1];
        write_zeros(&mut out, 700).unwrap();
        assert_eq!(out.len(), 701);
        assert!(out[1..].iter().all(|b| *b == 0));
    }

    fn read9(r: &mut &[u8]) -> io::Result<bool> {
        read_exactish(r, &mut [0; 9])
    }

    #[test]
    fn test_read_exactish() {
        // empty returns false immediately
        let mut r = b"" as &[u8];
        assert!(!read9(&mut r).unwrap());
        assert!(!read9(&mut r).unwrap());

        r = b"ninebytes";
        assert!(read9(&mut r).unwrap());
        assert!(!read9(&mut r).unwrap());

        // read a full buffer and then fail on a partial one
        r = b"twelve bytes";
        assert!(read9(&mut r).unwrap());
        assert_eq!(read9(&mut r).unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }

    fn mode(mode: u32) -> DirectoryMetadata {
        DirectoryMetadata {
            mtime: None,
            mode: Some(mode),
        }
    }

    #[test]
    fn test_directory_ordering() {
        let events = RefCell::new(Vec::new());
        let t = |secs| DirectoryMetadata {
            mtime: Some(UNIX_EPOCH + Duration::from_secs(secs)),
            mode: None,
        };
        let mut stack = PendingDirectories::with_applier(|path: &Path, _: &DirectoryMetadata| {
            events.borrow_mut().push(format!("mtime {}", path.display()));
            Ok(())
        });

        stack.push_directory(PathBuf::from("dir"), t(1));
        stack.observe(Path::new("dir/file"));
        events.borrow_mut().push("write dir/file".to_owned());
        stack.push_directory(PathBuf::from("dir/sub"), t(2));
        stack.push_directory(PathBuf::from("dir2"), t(3));
        assert_eq!(stack.len(), 1);
        stack.finish();
        assert!(stack.is_empty());
        drop(stack);

        assert_eq!(
            events.into_inner(),
            ["write dir/file", "mtime dir/sub", "mtime dir", "mtime dir2"]
        );
    }

    #[test]
    fn test_directory_sibling_prefix_is_not_a_child() {
        let applied = RefCell::new(Vec::new());
        let mut stack = PendingDirectories::with_applier(|path: &Path, _: &DirectoryMetadata| {
            applied.borrow_mut().push(path.to_path_buf());
            Ok(())
        });
        stack.push_directory(PathBuf::from("dir"), mode(0o755));
        // "dir2" starts with "dir" as a string, but not as a path
        stack.observe(Path::new("dir2/file"));
        assert_eq!(applied.borrow().len(), 1);
    }

    #[test]
    fn test_directory_failures_are_swallowed() {
        let mut stack =
            PendingDirectories::with_applier(|_: &Path, _: &DirectoryMetadata| -> io::Result<()> {
                Err(io::Error::new(ErrorKind::PermissionDenied, "nope"))
            });
        stack.push_directory(PathBuf::from("a"), mode(0o700));
        stack.push_directory(PathBuf::from("b"), mode(0o700));
        stack.finish();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_directory_without_metadata_is_not_deferred() {
        let mut stack = PendingDirectories::new();
        stack.push_directory(PathBuf::from("a"), DirectoryMetadata::default());
        assert!(stack.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_directory_metadata() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mtime = UNIX_EPOCH + Duration::from_secs(2_000_000);
        let metadata = DirectoryMetadata {
            mtime: Some(mtime),
            mode: Some(0o40555),
        };
        apply_directory_metadata(dir.path(), &metadata).unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();
        assert_eq!(meta.modified().unwrap(), mtime);
        assert_eq!(meta.permissions().mode() & 0o7777, 0o555);
        set_mode(dir.path(), 0o755).unwrap();
    }

    #[test]
    fn test_set_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let mtime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        set_mtime(dir.path(), mtime).unwrap();
        let meta = std::fs::metadata(dir.path()).unwrap();
        assert_eq!(meta.modified().unwrap(), mtime);
    }
}
