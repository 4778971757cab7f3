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
//! Module for [`TarReader`].

use crate::chain::{MetadataChain, Step};
use crate::entry_data::EntryData;
use crate::helpers::{copy_exact, discard, padding, read_exactish};
use crate::stream::{ArchiveStream, Seekable, Sequential};
use crate::{Format, Result, TarError, TarHeader, TypeFlag, BLOCKSIZE};
use core::fmt::{Debug, Formatter};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek};
use std::rc::Rc;

/// Describes an entry in an archive: its decoded header and a view of its
/// payload.
pub struct TarEntry<S> {
    header: TarHeader,
    data: EntryData<S>,
}

impl<S> TarEntry<S> {
    /// Decoded header with long names and extended attributes applied.
    pub const fn header(&self) -> &TarHeader {
        &self.header
    }

    /// Path of the entry.
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Target of hard and symbolic links.
    pub fn link_name(&self) -> &str {
        &self.header.link_name
    }

    /// Filesize in bytes.
    pub const fn size(&self) -> u64 {
        self.header.size
    }

    pub const fn entry_type(&self) -> TypeFlag {
        self.header.type_flag
    }

    /// Format of the header this entry was read from.
    pub const fn format(&self) -> Format {
        self.header.format
    }

    /// The attributes of a PAX global extended attributes entry. `None` for
    /// all other entries.
    pub fn global_extended_attributes(&self) -> Option<&BTreeMap<String, String>> {
        self.header
            .is_global_extended_attributes()
            .then_some(&self.header.extended_attributes)
    }

    /// Payload of the entry.
    pub fn data(&mut self) -> &mut EntryData<S> {
        &mut self.data
    }

    pub fn into_data(self) -> EntryData<S> {
        self.data
    }

    pub fn into_parts(self) -> (TarHeader, EntryData<S>) {
        (self.header, self.data)
    }
}

impl<S: Read + ArchiveStream> Read for TarEntry<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl<S> Debug for TarEntry<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TarEntry")
            .field("name", &self.header.name)
            .field("type", &self.header.type_flag)
            .field("size", &self.header.size)
            .field("format", &self.header.format)
            .field("data", &"<bytes>")
            .finish()
    }
}

/// Reads the entries of a Tar archive from a stream.
///
/// The reader takes ownership of the stream; pass `&mut R` to keep using it
/// afterwards. Entries are read strictly in order, each [`TarReader::next_entry`]
/// call first skips what is left of the previous entry's payload.
///
/// The end of the archive is two zero blocks, a single zero block or the end
/// of the stream. Once the end was seen, or any error occurred, the reader
/// returns no further entries.
pub struct TarReader<S> {
    stream: Rc<RefCell<S>>,
    at_end: bool,
    /// Absolute offset of the next header.
    next_header: u64,
    buf: Vec<u8>,
}

impl<R: Read> TarReader<Sequential<R>> {
    /// Reader over a stream that can only be read front to back.
    pub fn new(inner: R) -> Self {
        Self::with_stream(Sequential::new(inner))
    }
}

impl<R: Read + Seek> TarReader<Seekable<R>> {
    /// Reader over a stream with random access, starting at its current
    /// position. Entry data can be read in any order.
    ///
    /// # Errors
    /// Fails if the length of the stream can't be determined.
    pub fn seekable(inner: R) -> Result<Self> {
        Ok(Self::with_stream(Seekable::new(inner)?))
    }
}

impl<S: ArchiveStream> TarReader<S> {
    fn with_stream(stream: S) -> Self {
        Self {
            next_header: stream.position(),
            stream: Rc::new(RefCell::new(stream)),
            at_end: false,
            buf: Vec::new(),
        }
    }
}

impl<S> TarReader<S> {
    /// Whether the end of the archive was reached.
    pub const fn is_at_end(&self) -> bool {
        self.at_end
    }

    /// Returns the underlying stream. Views of entries stop working.
    ///
    /// # Errors
    /// Fails if an entry view is reading at the same time.
    pub fn into_inner(self) -> Result<S> {
        Rc::try_unwrap(self.stream)
            .map(RefCell::into_inner)
            .map_err(|_| TarError::Io(io::Error::other("archive stream is still in use")))
    }
}

impl<S: Read + ArchiveStream> TarReader<S> {
    /// Returns the next entry, or `None` at the end of the archive.
    ///
    /// # Errors
    /// Malformed headers or metadata chains, and I/O errors. Iteration stops
    /// after the first error.
    pub fn next_entry(&mut self) -> Result<Option<TarEntry<S>>> {
        if self.at_end {
            return Ok(None);
        }
        let result = self.read_entry();
        if !matches!(result, Ok(Some(_))) {
            self.at_end = true;
        }
        result
    }

    /// Iterates over the remaining entries.
    pub fn entries(&mut self) -> Entries<'_, S> {
        Entries { reader: self }
    }

    fn read_entry(&mut self) -> Result<Option<TarEntry<S>>> {
        let mut stream = self
            .stream
            .try_borrow_mut()
            .map_err(|_| TarError::Io(io::Error::other("archive stream is in use")))?;
        let stream = &mut *stream;

        // advance past the previous entry
        if stream.is_seekable() {
            match stream.stream_len() {
                Some(len) if self.next_header > len => {
                    return Err(TarError::UnexpectedEof(self.next_header - len));
                }
                Some(len) if len == self.next_header => {
                    log::debug!("End of seekable Tar archive without end blocks");
                    return Ok(None);
                }
                _ => stream.seek_to(self.next_header)?,
            }
        } else if let Some(unread) = self.next_header.checked_sub(stream.position()) {
            discard(stream, unread, &mut self.buf)?;
        }

        let mut chain = MetadataChain::new();
        let mut step = Step::NeedHeader;
        let header = loop {
            step = match step {
                Step::NeedHeader => match read_header(stream)? {
                    Some(header) => chain.push_header(header)?,
                    None if chain.is_pending() => {
                        return Err(TarError::UnexpectedEof(BLOCKSIZE as u64))
                    }
                    None => return Ok(None),
                },
                Step::NeedPayload(size) => {
                    let mut payload = Vec::with_capacity(size as usize);
                    copy_exact(stream, &mut payload, size, &mut self.buf)?;
                    discard(stream, padding(size), &mut self.buf)?;
                    chain.push_payload(&payload)?
                }
                Step::Resolved(header) => break header,
            };
        };

        let start = stream.position();
        // the payload of global attributes was consumed by the chain
        let len = if header.is_global_extended_attributes() {
            0
        } else {
            header.size
        };
        self.next_header = start + len + padding(len);
        if stream.stream_len() == Some(start) {
            self.at_end = true;
        }

        let seekable = stream.is_seekable();
        let data = EntryData::new(Rc::downgrade(&self.stream), start, len, seekable);
        Ok(Some(TarEntry { header, data }))
    }
}

/// Reads one header block. `None` means end of archive.
fn read_header<S: Read + ?Sized>(stream: &mut S) -> Result<Option<TarHeader>> {
    let mut block = [0u8; BLOCKSIZE];
    if !read_exactish(stream, &mut block).map_err(TarError::from_io)? {
        log::warn!("Reached end of Tar archive data without finding zero/end blocks!");
        return Ok(None);
    }
    if let Some(header) = TarHeader::from_block(&block)? {
        return Ok(Some(header));
    }
    match read_exactish(stream, &mut block).map_err(TarError::from_io)? {
        true if block.iter().all(|b| *b == 0) => {
            log::debug!("End of Tar archive with two zero blocks!");
        }
        _ => log::warn!("Zero block found at end of Tar archive, but only one instead of two!"),
    }
    Ok(None)
}

impl<S> Debug for TarReader<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TarReader")
            .field("at_end", &self.at_end)
            .field("next_header", &self.next_header)
            .finish_non_exhaustive()
    }
}

/// Iterator over the entries of a [`TarReader`].
pub struct Entries<'a, S> {
    reader: &'a mut TarReader<S>,
}

impl<S: Read + ArchiveStream> Iterator for Entries<'_, S> {
    type Item = Result<TarEntry<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_entry().transpose()
    }
}

impl<S> Debug for Entries<'_, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entries")
            .field("reader", &self.reader)
            .finish()
    }
}
