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
//! Async reading and writing of Tar archives on top of tokio.
//!
//! The async types behave like [`crate::TarReader`] and [`crate::TarWriter`]
//! over sequential streams. Every suspension point is an I/O call on the
//! underlying stream, and payloads are moved in chunks of at most 4096 bytes.
//! Dropping a future cancels it at a chunk boundary; the archive stream is
//! then not necessarily at a block boundary and should not be used further.
//!
//! This module is only available with the `async` feature:
//!
//! ```toml
//! [dependencies]
//! tar-stream = { version = "0.1", features = ["async"] }
//! ```

use crate::chain::{MetadataChain, Step};
use crate::encode::{encode_global, encode_header};
use crate::helpers::{padding, CHUNK_SIZE};
use crate::{Format, Result, TarError, TarHeader, TypeFlag, BLOCKSIZE};
use core::fmt::{Debug, Formatter};
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// This function reads the exact amount of bytes required to fill the buffer, possibly performing
/// multiple reads to do so (and also retrying if required to deal with EINTR).
///
/// This is the async version of `read_exactish()`.
async fn read_exactish_async(
    reader: &mut (impl AsyncRead + Unpin),
    buf: &mut [u8],
) -> io::Result<bool> {
    let buflen = buf.len();
    let mut todo: &mut [u8] = buf;

    while !todo.is_empty() {
        match reader.read(todo).await {
            Ok(0) if todo.len() == buflen => return Ok(false),
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => todo = &mut todo[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Async version of the chunked copy: exactly `len` bytes from `src` to `dst`.
/// Without a `dst` the bytes are dropped.
async fn copy_exact_async<R, W>(
    src: &mut R,
    mut dst: Option<&mut W>,
    len: u64,
    buf: &mut Vec<u8>,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    buf.resize(CHUNK_SIZE, 0);
    let mut remaining = len;
    while remaining > 0 {
        let want = CHUNK_SIZE.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = match src.read(&mut buf[..want]).await {
            Ok(0) => return Err(TarError::UnexpectedEof(remaining)),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TarError::from_io(e)),
        };
        if let Some(dst) = dst.as_deref_mut() {
            dst.write_all(&buf[..n]).await?;
        }
        remaining -= n as u64;
    }
    Ok(())
}

async fn discard_async<R>(src: &mut R, len: u64, buf: &mut Vec<u8>) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    copy_exact_async::<R, tokio::io::Sink>(src, None, len, buf).await
}

async fn write_zeros_async<W>(dst: &mut W, mut len: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let zeros = [0u8; BLOCKSIZE];
    while len > 0 {
        let n = len.min(BLOCKSIZE as u64) as usize;
        dst.write_all(&zeros[..n]).await?;
        len -= n as u64;
    }
    Ok(())
}

/// Reads the entries of a Tar archive from an [`AsyncRead`].
pub struct AsyncTarReader<R> {
    inner: R,
    at_end: bool,
    /// Unread payload of the current entry.
    remaining: u64,
    /// Padding after the current entry.
    pad: u64,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> AsyncTarReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            at_end: false,
            remaining: 0,
            pad: 0,
            buf: Vec::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Returns the next entry, or `None` at the end of the archive. Skips
    /// what is left of the previous entry first.
    ///
    /// # Errors
    /// The errors of [`crate::TarReader::next_entry`].
    pub async fn next_entry(&mut self) -> Result<Option<AsyncTarEntry<'_, R>>> {
        if self.at_end {
            return Ok(None);
        }
        match self.read_entry().await {
            Ok(Some(header)) => Ok(Some(AsyncTarEntry {
                header,
                reader: self,
            })),
            Ok(None) => {
                self.at_end = true;
                Ok(None)
            }
            Err(e) => {
                self.at_end = true;
                Err(e)
            }
        }
    }

    async fn read_entry(&mut self) -> Result<Option<TarHeader>> {
        let skip = self.remaining + self.pad;
        discard_async(&mut self.inner, skip, &mut self.buf).await?;
        self.remaining = 0;
        self.pad = 0;

        let mut chain = MetadataChain::new();
        let mut step = Step::NeedHeader;
        let header = loop {
            step = match step {
                Step::NeedHeader => match self.read_header().await? {
                    Some(header) => chain.push_header(header)?,
                    None if chain.is_pending() => {
                        return Err(TarError::UnexpectedEof(BLOCKSIZE as u64))
                    }
                    None => return Ok(None),
                },
                Step::NeedPayload(size) => {
                    let mut payload = vec![0; size as usize];
                    self.inner
                        .read_exact(&mut payload)
                        .await
                        .map_err(TarError::from_io)?;
                    discard_async(&mut self.inner, padding(size), &mut self.buf).await?;
                    chain.push_payload(&payload)?
                }
                Step::Resolved(header) => break header,
            };
        };

        if !header.is_global_extended_attributes() {
            self.remaining = header.size;
            self.pad = padding(header.size);
        }
        Ok(Some(header))
    }

    async fn read_header(&mut self) -> Result<Option<TarHeader>> {
        let mut block = [0u8; BLOCKSIZE];
        if !read_exactish_async(&mut self.inner, &mut block)
            .await
            .map_err(TarError::from_io)?
        {
            log::warn!("Reached end of Tar archive data without finding zero/end blocks!");
            return Ok(None);
        }
        if let Some(header) = TarHeader::from_block(&block)? {
            return Ok(Some(header));
        }
        let second = read_exactish_async(&mut self.inner, &mut block)
            .await
            .map_err(TarError::from_io)?;
        if second && block.iter().all(|b| *b == 0) {
            log::debug!("End of Tar archive with two zero blocks!");
        } else {
            log::warn!("Zero block found at end of Tar archive, but only one instead of two!");
        }
        Ok(None)
    }
}

impl<R> Debug for AsyncTarReader<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncTarReader")
            .field("at_end", &self.at_end)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// An entry of an [`AsyncTarReader`]. Reading it yields the entry's payload.
pub struct AsyncTarEntry<'a, R> {
    header: TarHeader,
    reader: &'a mut AsyncTarReader<R>,
}

impl<R> AsyncTarEntry<'_, R> {
    /// Decoded header with long names and extended attributes applied.
    pub const fn header(&self) -> &TarHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub const fn size(&self) -> u64 {
        self.header.size
    }

    pub const fn entry_type(&self) -> TypeFlag {
        self.header.type_flag
    }

    /// Payload bytes not read yet.
    pub fn remaining(&self) -> u64 {
        self.reader.remaining
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for AsyncTarEntry<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let reader = &mut *self.get_mut().reader;
        if reader.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let max = buf
            .remaining()
            .min(usize::try_from(reader.remaining).unwrap_or(usize::MAX));
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(max));
        ready!(Pin::new(&mut reader.inner).poll_read(cx, &mut limited))?;
        let n = limited.filled().len();
        if n == 0 {
            return Poll::Ready(Err(TarError::UnexpectedEof(reader.remaining).into()));
        }
        buf.advance(n);
        reader.remaining -= n as u64;
        Poll::Ready(Ok(()))
    }
}

impl<R> Debug for AsyncTarEntry<'_, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncTarEntry")
            .field("name", &self.header.name)
            .field("type", &self.header.type_flag)
            .field("size", &self.header.size)
            .finish_non_exhaustive()
    }
}

/// Writes entries of one [`Format`] to an [`AsyncWrite`].
///
/// Unlike [`crate::TarWriter`] there is no way to finish the archive on drop;
/// call [`AsyncTarWriter::finish`].
pub struct AsyncTarWriter<W> {
    inner: W,
    format: Format,
    wrote_entries: bool,
    finished: bool,
    global_sequence: u32,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> AsyncTarWriter<W> {
    pub fn new(inner: W, format: Format) -> Self {
        Self {
            inner,
            format,
            wrote_entries: false,
            finished: false,
            global_sequence: 1,
            buf: Vec::new(),
        }
    }

    /// Writes one entry with exactly `header.size` bytes of `data`.
    ///
    /// # Errors
    /// The errors of [`crate::TarWriter::write_entry`].
    pub async fn write_entry<R>(&mut self, header: &TarHeader, mut data: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if self.finished {
            return Err(TarError::Disposed("archive writer"));
        }
        if header.is_global_extended_attributes() {
            if self.format != Format::Pax {
                return Err(TarError::UnsupportedEntryType {
                    type_flag: TypeFlag::XGLTYPE as u8,
                    format: self.format,
                });
            }
            let blocks = encode_global(header, self.global_sequence)?;
            self.inner.write_all(&blocks).await?;
            self.global_sequence += 1;
            self.wrote_entries = true;
            return Ok(());
        }

        let blocks = encode_header(header, self.format)?;
        self.inner.write_all(&blocks).await?;
        self.wrote_entries = true;
        copy_exact_async(&mut data, Some(&mut self.inner), header.size, &mut self.buf).await?;
        write_zeros_async(&mut self.inner, padding(header.size)).await?;
        Ok(())
    }

    /// Writes the end-of-archive marker (if any entry was written) and
    /// flushes the stream.
    ///
    /// # Errors
    /// I/O errors of the stream.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.wrote_entries {
            write_zeros_async(&mut self.inner, 2 * BLOCKSIZE as u64).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Finishes the archive and returns the underlying stream.
    ///
    /// # Errors
    /// The errors of [`AsyncTarWriter::finish`].
    pub async fn into_inner(mut self) -> Result<W> {
        self.finish().await?;
        Ok(self.inner)
    }
}

impl<W> Debug for AsyncTarWriter<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncTarWriter")
            .field("format", &self.format)
            .field("wrote_entries", &self.wrote_entries)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
