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
//! Position tracking wrappers around the archive's byte stream.
//!
//! The reader and writer only know the stream through [`ArchiveStream`]; which
//! wrapper is used is decided by the constructor ([`crate::TarReader::new`] vs.
//! [`crate::TarReader::seekable`] and the same for the writer).

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Capabilities of the stream an archive is read from or written to.
pub trait ArchiveStream {
    /// Whether [`ArchiveStream::seek_to`] can move to arbitrary offsets.
    fn is_seekable(&self) -> bool;

    /// Absolute offset of the next byte read or written.
    fn position(&self) -> u64;

    /// Moves to the absolute offset `pos`.
    ///
    /// # Errors
    /// Sequential streams fail with [`io::ErrorKind::Unsupported`] unless
    /// `pos` is the current position.
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;

    /// Total length of the stream, if known.
    fn stream_len(&self) -> Option<u64>;
}

/// A stream that is only read or written front to back.
#[derive(Debug)]
pub struct Sequential<T> {
    inner: T,
    position: u64,
}

impl<T> Sequential<T> {
    pub const fn new(inner: T) -> Self {
        Self { inner, position: 0 }
    }

    pub const fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> ArchiveStream for Sequential<T> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        if pos == self.position {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is not seekable",
        ))
    }

    fn stream_len(&self) -> Option<u64> {
        None
    }
}

impl<T: Read> Read for Sequential<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<T: Write> Write for Sequential<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A stream with random access.
#[derive(Debug)]
pub struct Seekable<T> {
    inner: T,
    position: u64,
    len: u64,
}

impl<T: Seek> Seekable<T> {
    /// Wraps `inner`, starting at its current position.
    ///
    /// # Errors
    /// Fails if the length of the stream can't be determined.
    pub fn new(mut inner: T) -> io::Result<Self> {
        let position = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self {
            inner,
            position,
            len,
        })
    }
}

impl<T> Seekable<T> {
    pub const fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Seek> ArchiveStream for Seekable<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        if pos != self.position {
            self.position = self.inner.seek(SeekFrom::Start(pos))?;
        }
        Ok(())
    }

    fn stream_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

impl<T: Read> Read for Seekable<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<T: Write> Write for Seekable<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        self.len = self.len.max(self.position);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sequential_counts_bytes() {
        let mut stream = Sequential::new(&b"hello world"[..]);
        let mut buf = [0; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(stream.position(), 5);
        assert!(!stream.is_seekable());
        assert!(stream.seek_to(5).is_ok());
        assert_eq!(
            stream.seek_to(0).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert_eq!(stream.stream_len(), None);
    }

    #[test]
    fn test_seekable_starts_at_current_position() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4, 5, 6]);
        cursor.set_position(2);
        let mut stream = Seekable::new(cursor).unwrap();
        assert_eq!(stream.position(), 2);
        assert_eq!(stream.stream_len(), Some(6));

        let mut buf = [0; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        stream.seek_to(1).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [2, 3]);
        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn test_seekable_write_grows_len() {
        let mut stream = Seekable::new(Cursor::new(Vec::new())).unwrap();
        stream.write_all(b"abc").unwrap();
        assert_eq!(stream.stream_len(), Some(3));
        stream.seek_to(1).unwrap();
        stream.write_all(b"X").unwrap();
        assert_eq!(stream.stream_len(), Some(3));
        assert_eq!(stream.into_inner().into_inner(), b"aXc");
    }
}
