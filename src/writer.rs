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
//! Module for [`TarWriter`].

use crate::encode::{encode_global, encode_header, encode_primary, validate};
use crate::helpers::{copy_exact, copy_to_end, padding, write_zeros};
use crate::stream::{ArchiveStream, Seekable, Sequential};
use crate::tar_format_types::octal_max;
use crate::{Format, Result, TarError, TarHeader, TypeFlag, BLOCKSIZE};
use core::fmt::{Debug, Formatter};
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

/// Writes entries of one [`Format`] to a stream.
///
/// The end-of-archive marker (two zero blocks) is written by
/// [`TarWriter::finish`], [`TarWriter::into_inner`] or when the writer is
/// dropped, but only if at least one entry was written. Errors while dropping
/// are logged; call [`TarWriter::finish`] to see them.
pub struct TarWriter<S: Write + ArchiveStream> {
    stream: Option<S>,
    format: Format,
    wrote_entries: bool,
    finished: bool,
    /// Number of the next PAX global extended attributes entry.
    global_sequence: u32,
    buf: Vec<u8>,
}

impl<W: Write> TarWriter<Sequential<W>> {
    /// Writer over a stream that is only written front to back.
    pub fn new(inner: W, format: Format) -> Self {
        Self::with_stream(Sequential::new(inner), format)
    }
}

impl<W: Write + Seek> TarWriter<Seekable<W>> {
    /// Writer over a stream with random access, which also supports
    /// [`TarWriter::write_entry_unsized`].
    ///
    /// # Errors
    /// Fails if the position of the stream can't be determined.
    pub fn seekable(inner: W, format: Format) -> Result<Self> {
        Ok(Self::with_stream(Seekable::new(inner)?, format))
    }
}

impl<S: Write + ArchiveStream> TarWriter<S> {
    fn with_stream(stream: S, format: Format) -> Self {
        Self {
            stream: Some(stream),
            format,
            wrote_entries: false,
            finished: false,
            global_sequence: 1,
            buf: Vec::new(),
        }
    }

    /// Format all entries are written in.
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Writes one entry with exactly `header.size` bytes of `data`.
    ///
    /// PAX global extended attributes headers ([`TarHeader::new_global`]) are
    /// written with their attributes as payload; `data` is ignored for them.
    ///
    /// # Errors
    /// - [`TarError::UnsupportedEntryType`] if the format can't store the
    ///   entry type, and for metadata types that the writer generates itself
    /// - [`TarError::MissingLinkTarget`] for links without a target
    /// - [`TarError::FieldOverflow`] if a value doesn't fit into the format
    /// - [`TarError::UnexpectedEof`] if `data` is shorter than `header.size`
    /// - [`TarError::Disposed`] after [`TarWriter::finish`]
    pub fn write_entry<R: Read>(&mut self, header: &TarHeader, mut data: R) -> Result<()> {
        let stream = stream_mut(&mut self.stream, self.finished)?;
        if header.is_global_extended_attributes() {
            if self.format != Format::Pax {
                return Err(TarError::UnsupportedEntryType {
                    type_flag: TypeFlag::XGLTYPE as u8,
                    format: self.format,
                });
            }
            stream.write_all(&encode_global(header, self.global_sequence)?)?;
            self.global_sequence += 1;
            self.wrote_entries = true;
            return Ok(());
        }

        let blocks = encode_header(header, self.format)?;
        stream.write_all(&blocks)?;
        self.wrote_entries = true;
        copy_exact(&mut data, stream, header.size, &mut self.buf)?;
        write_zeros(stream, padding(header.size))?;
        log::trace!("wrote {:?} entry {:?}", header.type_flag, header.name);
        Ok(())
    }

    /// Writes one entry whose size is only known once `data` is exhausted.
    /// `header.size` is ignored. Returns the size of the payload.
    ///
    /// The header is written first and patched afterwards, which needs a
    /// seekable stream. Outside of GNU archives the final size has to fit the
    /// octal `size` field.
    ///
    /// If this fails after the placeholder header went out, the archive can't
    /// be completed: the writer counts as finished, no end-of-archive marker
    /// is written and later writes fail with [`TarError::Disposed`].
    ///
    /// # Errors
    /// [`TarError::NotSeekable`] on a sequential stream, before anything is
    /// written. Otherwise the errors of [`TarWriter::write_entry`].
    pub fn write_entry_unsized<R: Read>(&mut self, header: &TarHeader, mut data: R) -> Result<u64> {
        let format = self.format;
        let stream = stream_mut(&mut self.stream, self.finished)?;
        if !stream.is_seekable() {
            return Err(TarError::NotSeekable("writing an entry of unknown size"));
        }
        if header.is_global_extended_attributes() {
            self.write_entry(header, data)?;
            return Ok(0);
        }
        validate(header, format)?;

        let mut placeholder = header.clone();
        placeholder.size = 0;
        let blocks = encode_header(&placeholder, format)?;
        match write_unsized(stream, &blocks, placeholder, format, &mut data, &mut self.buf) {
            Ok(size) => {
                self.wrote_entries = true;
                Ok(size)
            }
            Err(e) => {
                log::warn!("Tar archive is incomplete after failed write of {:?}", header.name);
                self.finished = true;
                self.wrote_entries = false;
                Err(e)
            }
        }
    }

    /// Writes the file, directory or symbolic link at `path` as entry `name`,
    /// with metadata taken from the file system.
    ///
    /// # Errors
    /// I/O errors, the errors of [`TarWriter::write_entry`], and
    /// [`io::ErrorKind::Unsupported`] for other kinds of files.
    pub fn write_entry_from_file(&mut self, path: impl AsRef<Path>, name: &str) -> Result<()> {
        let path = path.as_ref();
        let metadata = fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();

        let mut header = TarHeader::new(name, TypeFlag::REGTYPE);
        header.mtime = metadata.modified()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            header.mode = metadata.mode() & 0o7777;
            header.uid = metadata.uid();
            header.gid = metadata.gid();
        }

        if file_type.is_dir() {
            header.type_flag = TypeFlag::DIRTYPE;
            self.write_entry(&header, io::empty())
        } else if file_type.is_symlink() {
            header.type_flag = TypeFlag::SYMTYPE;
            header.link_name = fs::read_link(path)?.to_string_lossy().into_owned();
            self.write_entry(&header, io::empty())
        } else if file_type.is_file() {
            header.size = metadata.len();
            self.write_entry(&header, File::open(path)?)
        } else {
            Err(TarError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not a file, directory or symbolic link", path.display()),
            )))
        }
    }

    /// Writes the end-of-archive marker (if any entry was written) and
    /// flushes the stream. Later writes fail with [`TarError::Disposed`].
    ///
    /// # Errors
    /// I/O errors of the stream.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Some(stream) = self.stream.as_mut() {
            if self.wrote_entries {
                write_zeros(stream, 2 * BLOCKSIZE as u64)?;
                log::debug!("Wrote end of Tar archive with two zero blocks");
            }
            stream.flush()?;
        }
        Ok(())
    }

    /// Finishes the archive and returns the underlying stream.
    ///
    /// # Errors
    /// The errors of [`TarWriter::finish`].
    pub fn into_inner(mut self) -> Result<S> {
        self.finish()?;
        self.stream.take().ok_or(TarError::Disposed("archive writer"))
    }
}

/// Writes the placeholder `blocks`, the payload and the padding, then patches
/// the size into the last header block.
fn write_unsized<S, R>(
    stream: &mut S,
    blocks: &[u8],
    mut header: TarHeader,
    format: Format,
    data: &mut R,
    buf: &mut Vec<u8>,
) -> Result<u64>
where
    S: Write + ArchiveStream,
    R: Read,
{
    stream.write_all(blocks)?;
    let header_pos = stream.position() - BLOCKSIZE as u64;

    let size = copy_to_end(data, stream, buf)?;
    write_zeros(stream, padding(size))?;
    let end = stream.position();

    check_unsized_size(size, format)?;
    header.size = size;
    let block = encode_primary(&header, format)?;
    stream.seek_to(header_pos)?;
    stream.write_all(&block)?;
    stream.seek_to(end)?;
    Ok(size)
}

/// A PAX size record would have to precede the header, so only GNU base-256
/// can go beyond the octal field.
fn check_unsized_size(size: u64, format: Format) -> Result<()> {
    if format != Format::Gnu && size > octal_max(12) {
        return Err(TarError::FieldOverflow {
            field: "size",
            format,
        });
    }
    Ok(())
}

fn stream_mut<S>(stream: &mut Option<S>, finished: bool) -> Result<&mut S> {
    match stream {
        Some(stream) if !finished => Ok(stream),
        _ => Err(TarError::Disposed("archive writer")),
    }
}

impl<S: Write + ArchiveStream> Drop for TarWriter<S> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("Failed to finish Tar archive: {e}");
        }
    }
}

impl<S: Write + ArchiveStream> Debug for TarWriter<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TarWriter")
            .field("format", &self.format)
            .field("wrote_entries", &self.wrote_entries)
            .field("finished", &self.finished)
            .field("global_sequence", &self.global_sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TarReader;
    use std::io::Cursor;

    fn file(name: &str, size: u64) -> TarHeader {
        let mut header = TarHeader::new(name, TypeFlag::REGTYPE);
        header.size = size;
        header
    }

    #[test]
    fn test_trailer_only_after_entries() {
        let writer = TarWriter::new(Vec::new(), Format::Ustar);
        assert!(writer.into_inner().unwrap().into_inner().is_empty());

        let mut writer = TarWriter::new(Vec::new(), Format::Ustar);
        writer.write_entry(&file("a", 0), io::empty()).unwrap();
        let archive = writer.into_inner().unwrap().into_inner();
        assert_eq!(archive.len(), 3 * BLOCKSIZE);
        assert!(archive[BLOCKSIZE..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_drop_writes_trailer() {
        let mut archive = Vec::new();
        {
            let mut writer = TarWriter::new(&mut archive, Format::Gnu);
            writer.write_entry(&file("a", 3), &b"abc"[..]).unwrap();
        }
        assert_eq!(archive.len(), 4 * BLOCKSIZE);
    }

    #[test]
    fn test_write_after_finish() {
        let mut writer = TarWriter::new(Vec::new(), Format::Pax);
        writer.finish().unwrap();
        let err = writer.write_entry(&file("a", 0), io::empty()).unwrap_err();
        assert!(matches!(err, TarError::Disposed("archive writer")));
    }

    #[test]
    fn test_short_data_is_an_error() {
        let mut writer = TarWriter::new(Vec::new(), Format::Pax);
        let err = writer.write_entry(&file("a", 10), &b"abc"[..]).unwrap_err();
        assert!(matches!(err, TarError::UnexpectedEof(7)));
    }

    #[test]
    fn test_validation_happens_before_writing() {
        let mut writer = TarWriter::new(Vec::new(), Format::V7);
        let link = TarHeader::new("link", TypeFlag::LINK);
        assert!(matches!(
            writer.write_entry(&link, io::empty()),
            Err(TarError::MissingLinkTarget(TypeFlag::LINK))
        ));
        let fifo = TarHeader::new("fifo", TypeFlag::FIFOTYPE);
        assert!(writer.write_entry(&fifo, io::empty()).is_err());
        let global = TarHeader::new_global(Default::default());
        assert!(writer.write_entry(&global, io::empty()).is_err());
        assert!(writer.into_inner().unwrap().into_inner().is_empty());
    }

    #[test]
    fn test_global_sequence_increases() {
        let mut writer = TarWriter::new(Vec::new(), Format::Pax);
        let global = TarHeader::new_global([("a".to_owned(), "b".to_owned())].into());
        writer.write_entry(&global, io::empty()).unwrap();
        writer.write_entry(&global, io::empty()).unwrap();
        let archive = writer.into_inner().unwrap().into_inner();

        let mut reader = TarReader::new(&archive[..]);
        let names: Vec<String> = reader
            .entries()
            .map(|entry| entry.unwrap().name().to_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with(".1"), "{}", names[0]);
        assert!(names[1].ends_with(".2"), "{}", names[1]);
    }

    #[test]
    fn test_unsized_entry() {
        let mut writer = TarWriter::seekable(Cursor::new(Vec::new()), Format::Pax).unwrap();
        let data = vec![42u8; 1300];
        let size = writer
            .write_entry_unsized(&file("streamed.bin", 0), &data[..])
            .unwrap();
        assert_eq!(size, 1300);
        writer.write_entry(&file("next", 1), &b"n"[..]).unwrap();
        let archive = writer.into_inner().unwrap().into_inner().into_inner();

        let mut reader = TarReader::new(&archive[..]);
        let mut entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.size(), 1300);
        let mut read = Vec::new();
        entry.read_to_end(&mut read).unwrap();
        assert_eq!(read, data);
        assert_eq!(reader.next_entry().unwrap().unwrap().name(), "next");
    }

    #[test]
    fn test_unsized_entry_needs_seekable_stream() {
        let mut writer = TarWriter::new(Vec::new(), Format::Gnu);
        let err = writer
            .write_entry_unsized(&file("streamed.bin", 0), &b"data"[..])
            .unwrap_err();
        assert!(err.is_capability());
        assert!(writer.into_inner().unwrap().into_inner().is_empty());
    }

    #[test]
    fn test_unsized_size_limit() {
        for format in [Format::V7, Format::Ustar, Format::Pax] {
            assert!(check_unsized_size(octal_max(12), format).is_ok());
            assert!(matches!(
                check_unsized_size(octal_max(12) + 1, format),
                Err(TarError::FieldOverflow { field: "size", .. })
            ));
        }
        assert!(check_unsized_size(octal_max(12) + 1, Format::Gnu).is_ok());
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device went away"))
        }
    }

    #[test]
    fn test_failed_unsized_entry_disposes_writer() {
        let mut writer = TarWriter::seekable(Cursor::new(Vec::new()), Format::Ustar).unwrap();
        writer.write_entry(&file("a", 1), &b"a"[..]).unwrap();
        let data = (&b"0123456789"[..]).chain(BrokenReader);
        assert!(matches!(
            writer.write_entry_unsized(&file("streamed.bin", 0), data),
            Err(TarError::Io(_))
        ));
        assert!(matches!(
            writer.write_entry(&file("b", 0), io::empty()),
            Err(TarError::Disposed(_))
        ));
        // no end-of-archive marker behind the broken entry
        let archive = writer.into_inner().unwrap().into_inner().into_inner();
        assert_eq!(archive.len(), 3 * BLOCKSIZE + 10);
        assert_eq!(&archive[3 * BLOCKSIZE..], b"0123456789");
    }

    #[test]
    fn test_write_entry_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("hello_world.txt");
        fs::write(&file_path, "Hello World\n").unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&file_path, mtime).unwrap();

        let mut writer = TarWriter::new(Vec::new(), Format::Pax);
        writer.write_entry_from_file(dir.path(), "dir/").unwrap();
        writer
            .write_entry_from_file(&file_path, "dir/hello_world.txt")
            .unwrap();
        let archive = writer.into_inner().unwrap().into_inner();

        let mut reader = TarReader::new(&archive[..]);
        let dir_entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(dir_entry.entry_type(), TypeFlag::DIRTYPE);
        assert_eq!(dir_entry.name(), "dir/");
        let mut file_entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(file_entry.entry_type(), TypeFlag::REGTYPE);
        assert_eq!(file_entry.size(), 12);
        let mut content = String::new();
        file_entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "Hello World\n");
        assert_eq!(
            file_entry.header().mtime,
            std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_write_symlink_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("target.txt", &link).unwrap();

        let mut writer = TarWriter::new(Vec::new(), Format::Ustar);
        writer.write_entry_from_file(&link, "link").unwrap();
        let archive = writer.into_inner().unwrap().into_inner();
        let entry = TarReader::new(&archive[..]).next_entry().unwrap().unwrap();
        assert_eq!(entry.entry_type(), TypeFlag::SYMTYPE);
        assert_eq!(entry.link_name(), "target.txt");
    }
}
